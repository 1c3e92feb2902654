//! # Application State Management
//!
//! This module manages shared state that needs to be accessed by multiple HTTP request handlers
//! simultaneously. This is one of the most complex parts of the application from a Rust perspective.
//!
//! ## Key Rust Concepts (IMPORTANT for beginners):
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Allows multiple parts of the program to safely share ownership of data
//! - **Why needed**: Multiple HTTP requests run simultaneously and all need access to the same state
//! - **Memory safety**: Automatically cleans up data when the last reference is dropped
//! - **Thread safety**: Safe to share between threads
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: Allows multiple readers OR one writer at a time (but not both)
//! - **Why needed**: Multiple requests can read config simultaneously, but only one can update it
//! - **Performance**: Reading is fast (no blocking), writing blocks everything else
//! - **Deadlock prevention**: Rust's type system helps prevent common locking mistakes
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: Multiple ownership (many HTTP handlers can hold a reference)
//! - **RwLock**: Thread-safe read/write access
//! - **T**: The actual data type being protected
//! - **Result**: Thread-safe shared mutable state - the "holy grail" of concurrent programming

use crate::config::AppConfig;        // Our configuration types
use crate::jobs::Dispatcher;         // Background worker pool handle
use crate::store::JobStore;          // Durable job records
use std::collections::HashMap;       // For storing per-endpoint metrics
use std::sync::{Arc, RwLock};        // Thread-safe shared ownership and locking
use std::time::Instant;              // For tracking server uptime

/// The main application state that's shared across all HTTP request handlers.
///
/// ## Thread Safety Pattern:
/// Mutable data (config, metrics) lives behind Arc<RwLock<T>>. The store
/// and dispatcher manage their own interior locking, so plain Arc handles
/// are enough for them.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    /// Arc<RwLock<AppConfig>> means:
    /// - Arc: Multiple HTTP handlers can hold a reference to this
    /// - RwLock: Multiple readers OR one writer (thread-safe)
    /// - AppConfig: The actual configuration data
    pub config: Arc<RwLock<AppConfig>>,

    /// Durable job records; the single source of truth for job status
    pub store: Arc<JobStore>,

    /// Handle to the background worker pool; submission, retry and
    /// recovery all go through this
    pub dispatcher: Arc<Dispatcher>,

    /// Performance metrics (constantly being updated by requests)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started (never changes, so no Arc<RwLock> needed)
    pub start_time: Instant,
}

/// Performance metrics collected across all HTTP requests.
///
/// ## Why these metrics matter:
/// - **request_count**: Total requests processed (for load monitoring)
/// - **error_count**: Total errors (for reliability monitoring)
/// - **jobs_submitted**: Jobs accepted since start (queue inflow)
/// - **endpoint_metrics**: Per-endpoint statistics (for performance optimization)
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Jobs accepted for background processing since server start
    pub jobs_submitted: u64,

    /// Detailed metrics for each API endpoint (URL path)
    /// Key: endpoint name (e.g., "GET /health")
    /// Value: detailed metrics for that endpoint
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
///
/// ## Performance calculations:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    /// Number of requests to this specific endpoint
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    /// Number of errors that occurred for this endpoint
    pub error_count: u64,
}

/// Implementation of methods for AppState.
impl AppState {
    /// Assemble the shared state from the already-built service objects.
    ///
    /// The store and dispatcher are constructed (and recovery has run)
    /// before this is called, so state assembly itself cannot fail.
    pub fn new(config: AppConfig, store: Arc<JobStore>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            // Wrap config for thread-safe sharing and updating
            config: Arc::new(RwLock::new(config)),
            store,
            dispatcher,
            // Start with empty metrics
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            // Record when the server started
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// ## Why clone:
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    /// AppConfig is designed to be cheap to clone.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Update the configuration with validation.
    ///
    /// ## Error handling:
    /// Configuration is validated before updating to ensure it's always valid.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                // Validation passed, update the config
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => {
                // Validation failed, return the error
                Err(e.to_string())
            }
        }
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    /// Increment the total error counter (called when any request fails).
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Count one accepted job submission.
    pub fn increment_jobs_submitted(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.jobs_submitted += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// ## HashMap operations:
    /// The first time we see an endpoint, we create a new EndpointMetric with default values.
    /// Subsequent requests update the existing metrics for that endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        // Get or create metrics for this specific endpoint
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        // Update the metrics for this endpoint
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    ///
    /// ## Why a snapshot:
    /// - Takes a read lock to get consistent data
    /// - Clones the data so we don't hold the lock while sending HTTP response
    /// - Ensures metrics don't change while we're serializing them to JSON
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            jobs_submitted: metrics.jobs_submitted,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Implementation of utility methods for EndpointMetric.
impl EndpointMetric {
    /// Calculate the average response time for this endpoint.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0  // No requests yet, so no average to calculate
        }
    }

    /// Calculate the error rate for this endpoint as a percentage (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0  // No requests yet, so no errors possible
        }
    }
}
