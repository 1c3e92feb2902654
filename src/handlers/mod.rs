pub mod config;
pub mod jobs;
pub mod uploads;

pub use config::*;
pub use jobs::*;
pub use uploads::*;
