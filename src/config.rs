//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization library for converting between Rust structs and data formats
//! - **derive macros**: Automatically generate code for common traits (Debug, Clone, Serialize, Deserialize)
//! - **struct**: Custom data types that group related fields together
//! - **impl blocks**: Add methods to structs
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_SERVER_PORT, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;              // Better error handling with context
use serde::{Deserialize, Serialize};  // For converting to/from TOML, JSON, etc.
use std::env;                    // For reading environment variables
use std::path::PathBuf;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, models, processing,
/// storage, engines) makes it easier to understand and maintain as the
/// application grows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub processing: ProcessingConfig,
    pub storage: StorageConfig,
    pub engines: EnginesConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
/// - `port = 8080`: Common development port (production often uses 80 or 443)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,  // u16 = unsigned 16-bit integer (0-65535), perfect for port numbers
}

/// Engine model selection.
///
/// `whisper_model` is the default model applied to new submissions, and
/// doubles as the "current preference" used when a job is retried or
/// recovered after a restart. It can be changed at runtime through the
/// config endpoint.
///
/// ## Model size trade-offs:
/// - Smaller models ("tiny", "base"): faster processing, lower accuracy
/// - Larger models ("medium", "large"): slower processing, higher accuracy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub whisper_model: String,
}

/// Background processing tuning.
///
/// `max_workers` is the global concurrency ceiling of the worker pool: at
/// most this many jobs execute at any instant, process-wide. It is read
/// once when the dispatcher is built, so runtime updates take effect on
/// the next start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    pub max_workers: usize,
}

/// Filesystem layout and upload limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory uploaded audio files are saved into
    pub upload_dir: String,

    /// Path of the SQLite job database
    pub database_path: String,

    /// Largest accepted upload, in megabytes
    pub max_upload_mb: usize,
}

impl StorageConfig {
    pub fn upload_dir(&self) -> PathBuf {
        PathBuf::from(&self.upload_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.database_path)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}

/// External engine commands.
///
/// Each command is expected to print its result as JSON on stdout; see
/// the engines module for the exact wire contracts. Keeping these as
/// plain program names means any runtime with the right output shape can
/// be dropped in from the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnginesConfig {
    pub transcriber_command: String,
    pub diarizer_command: String,
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// Default values ensure the application can start even if no configuration file exists.
/// They also serve as documentation of reasonable starting values.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 8080,                     // Common development port
            },
            models: ModelsConfig {
                whisper_model: "base".to_string(),  // Good balance of accuracy and speed
            },
            processing: ProcessingConfig {
                max_workers: 3,  // Transcription is heavy; three at once is plenty
            },
            storage: StorageConfig {
                upload_dir: "instance/uploads".to_string(),
                database_path: "instance/transcriber.sqlite".to_string(),
                max_upload_mb: 700,  // A long meeting recording as uncompressed WAV
            },
            engines: EnginesConfig {
                transcriber_command: "whisper-json".to_string(),
                diarizer_command: "diarize-json".to_string(),
            },
        }
    }
}

/// Implementation block for AppConfig - adds methods to the struct.
impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_HOST=0.0.0.0`: Override server host
    /// - `APP_SERVER_PORT=3000`: Override server port
    /// - `APP_MODELS_WHISPER_MODEL=large`: Override whisper model
    /// - `HOST=0.0.0.0`: Special case for deployment platforms
    /// - `PORT=3000`: Special case for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults - converts our Default impl to config format
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. Load from config.toml file (if it exists) - required(false) means "don't error if missing"
            .add_source(config::File::with_name("config").required(false))
            // 3. Load from environment variables with APP_ prefix
            // Example: APP_SERVER_HOST becomes server.host in the config
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Handle special environment variables used by deployment platforms
        // These don't follow the APP_ prefix convention but are commonly used
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        // Build the final configuration and convert it back to our AppConfig struct
        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0 (port 0 is reserved and can't be used)
    /// - Max workers is greater than 0 (the pool must be able to run something)
    /// - The upload size limit is greater than 0
    /// - Model and engine command names are not empty
    ///
    /// ## Why validate:
    /// Catching configuration errors early prevents runtime failures and
    /// provides clear error messages about what's wrong.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.processing.max_workers == 0 {
            return Err(anyhow::anyhow!("Max workers must be greater than 0"));
        }

        if self.storage.max_upload_mb == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        if self.models.whisper_model.trim().is_empty() {
            return Err(anyhow::anyhow!("Whisper model name cannot be empty"));
        }

        if self.engines.transcriber_command.trim().is_empty()
            || self.engines.diarizer_command.trim().is_empty()
        {
            return Err(anyhow::anyhow!("Engine commands cannot be empty"));
        }

        Ok(())  // All validation passed
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// This method allows updating only some fields, not the entire configuration.
    /// For example, you can send just `{"models": {"whisper_model": "small"}}` to
    /// change the preferred model, which is the typical way a user picks a
    /// different model for subsequent submissions and retries.
    ///
    /// Worker-pool and storage settings are applied at startup; changing
    /// them here persists the preference for the next start but does not
    /// resize a running pool.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        // Parse the JSON string into a generic value
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        // Update server configuration if provided
        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;  // Convert u64 to u16 for port number
            }
        }

        // Update model configuration if provided
        if let Some(models) = partial_config.get("models") {
            if let Some(whisper) = models.get("whisper_model").and_then(|v| v.as_str()) {
                self.models.whisper_model = whisper.to_string();
            }
        }

        // Update processing configuration if provided
        if let Some(processing) = partial_config.get("processing") {
            if let Some(workers) = processing.get("max_workers").and_then(|v| v.as_u64()) {
                self.processing.max_workers = workers as usize;
            }
        }

        // Update storage configuration if provided
        if let Some(storage) = partial_config.get("storage") {
            if let Some(limit) = storage.get("max_upload_mb").and_then(|v| v.as_u64()) {
                self.storage.max_upload_mb = limit as usize;
            }
        }

        // Validate the updated configuration to ensure it's still valid
        self.validate()?;
        Ok(())
    }
}

/// Tests for the configuration module.
#[cfg(test)]
mod tests {
    use super::*;  // Import everything from the parent module

    /// Test that the default configuration is valid and has expected values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.models.whisper_model, "base");
        assert_eq!(config.processing.max_workers, 3);
        // Ensure the default config passes validation
        assert!(config.validate().is_ok());
    }

    /// Test that validation catches invalid configurations.
    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;  // Invalid port
        // Validation should fail for port 0
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.processing.max_workers = 0;  // The pool could never run anything
        assert!(config.validate().is_err());
    }

    /// Test that runtime configuration updates work correctly.
    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"models": {"whisper_model": "small"}}"#;  // Update only the model
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.models.whisper_model, "small");  // Model should be updated
        // Other fields should remain unchanged
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.processing.max_workers, 3);
    }

    /// Test that an update cannot leave the configuration invalid.
    #[test]
    fn test_config_update_rejects_invalid_values() {
        let mut config = AppConfig::default();
        let json = r#"{"processing": {"max_workers": 0}}"#;
        assert!(config.update_from_json(json).is_err());
    }
}
