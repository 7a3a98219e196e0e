//! Pipeline configuration.
//!
//! Covers the worker pool, batch and upload sizing, the composition bounds
//! handed to every construction step, local storage and cleanup, and the
//! duplicate cache location.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::composer::{DEFAULT_MAX_STEPS, DEFAULT_STOPPING_PROB};
use crate::generators::BaseParams;
use crate::remote::DEFAULT_PAGE_SIZE;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the pipeline manager.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Pool settings
    /// Maximum number of worker tasks running at once.
    pub num_workers: usize,
    /// Tasks submitted per batch.
    pub batch_size: usize,
    /// Stop after this many batches. Runs until shutdown when unset.
    pub max_iterations: Option<u64>,

    // Composition settings
    /// Bounds and base seed for every construction step.
    pub base_params: BaseParams,
    /// Probability of stopping before each step after the first.
    pub stopping_prob: f64,
    /// Upper bound on construction steps per composite. Zero yields the
    /// empty composite for every task.
    pub max_steps: usize,
    /// Optional YAML rule table replacing the built-in rules.
    pub rules_file: Option<PathBuf>,

    // Collaborator settings
    /// Cap on one measurement call. Zero marks every measurement unavailable.
    pub measurement_timeout: Duration,

    // Upload settings
    /// Buffered results that trigger an upload. Zero uploads after every batch.
    pub upload_threshold: usize,
    /// Page size for the remote hash listing.
    pub remote_page_size: usize,
    /// Replace the cached Confirmed set with the remote listing at startup.
    pub force_refresh: bool,

    // Storage settings
    /// Duplicate cache file.
    pub cache_file: PathBuf,
    /// Root of the local artifact store.
    pub local_dir: PathBuf,
    /// Processed tasks between local cleanups.
    pub cleanup_interval: u64,
    /// Local artifacts older than this are removed by cleanup.
    pub max_artifact_age: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_workers: 5,
            batch_size: 10,
            max_iterations: None,

            base_params: BaseParams::default(),
            stopping_prob: DEFAULT_STOPPING_PROB,
            max_steps: DEFAULT_MAX_STEPS,
            rules_file: None,

            measurement_timeout: Duration::from_secs(60),

            upload_threshold: 10,
            remote_page_size: DEFAULT_PAGE_SIZE,
            force_refresh: false,

            cache_file: PathBuf::from("circuit_hashes_cache.json"),
            local_dir: PathBuf::from("circuits"),
            cleanup_interval: 1000,
            max_artifact_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `FORGE_NUM_WORKERS`: Worker pool size (default: 5)
    /// - `FORGE_BATCH_SIZE`: Tasks per batch (default: 10)
    /// - `FORGE_MAX_ITERATIONS`: Batches to run before stopping (default: unbounded)
    /// - `FORGE_MIN_WIDTH` / `FORGE_MAX_WIDTH`: Width bounds (default: 1 / 30)
    /// - `FORGE_MIN_DEPTH` / `FORGE_MAX_DEPTH`: Depth bounds (default: 1 / 200)
    /// - `FORGE_MIN_REPS` / `FORGE_MAX_REPS`: Repetition bounds (default: 1 / 3)
    /// - `FORGE_SEED`: Base seed (default: 5000000)
    /// - `FORGE_MEASURE`: Append measurements to every step (default: false)
    /// - `FORGE_STOPPING_PROB`: Early stopping probability (default: 0.3)
    /// - `FORGE_MAX_STEPS`: Steps per composite (default: 5)
    /// - `FORGE_RULES_FILE`: YAML rule table
    /// - `FORGE_MEASUREMENT_TIMEOUT_SECS`: Measurement cap (default: 60)
    /// - `FORGE_UPLOAD_THRESHOLD`: Results per upload (default: 10)
    /// - `FORGE_REMOTE_PAGE_SIZE`: Remote listing page size (default: 1000)
    /// - `FORGE_FORCE_REFRESH`: Resync the cache from the remote (default: false)
    /// - `FORGE_CACHE_FILE`: Duplicate cache (default: circuit_hashes_cache.json)
    /// - `FORGE_LOCAL_DIR`: Local artifact root (default: circuits)
    /// - `FORGE_CLEANUP_INTERVAL`: Processed tasks between cleanups (default: 1000)
    /// - `FORGE_MAX_ARTIFACT_AGE_HOURS`: Local artifact retention (default: 24)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the result
    /// does not validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Pool settings
        if let Ok(val) = std::env::var("FORGE_NUM_WORKERS") {
            config.num_workers = parse_env_value(&val, "FORGE_NUM_WORKERS")?;
        }

        if let Ok(val) = std::env::var("FORGE_BATCH_SIZE") {
            config.batch_size = parse_env_value(&val, "FORGE_BATCH_SIZE")?;
        }

        if let Ok(val) = std::env::var("FORGE_MAX_ITERATIONS") {
            config.max_iterations = Some(parse_env_value(&val, "FORGE_MAX_ITERATIONS")?);
        }

        // Composition settings
        let base = &mut config.base_params;
        if let Ok(val) = std::env::var("FORGE_MIN_WIDTH") {
            base.min_width = parse_env_value(&val, "FORGE_MIN_WIDTH")?;
        }

        if let Ok(val) = std::env::var("FORGE_MAX_WIDTH") {
            base.max_width = parse_env_value(&val, "FORGE_MAX_WIDTH")?;
        }

        if let Ok(val) = std::env::var("FORGE_MIN_DEPTH") {
            base.min_depth = parse_env_value(&val, "FORGE_MIN_DEPTH")?;
        }

        if let Ok(val) = std::env::var("FORGE_MAX_DEPTH") {
            base.max_depth = parse_env_value(&val, "FORGE_MAX_DEPTH")?;
        }

        if let Ok(val) = std::env::var("FORGE_MIN_REPS") {
            base.min_reps = parse_env_value(&val, "FORGE_MIN_REPS")?;
        }

        if let Ok(val) = std::env::var("FORGE_MAX_REPS") {
            base.max_reps = parse_env_value(&val, "FORGE_MAX_REPS")?;
        }

        if let Ok(val) = std::env::var("FORGE_SEED") {
            base.seed = parse_env_value(&val, "FORGE_SEED")?;
        }

        if let Ok(val) = std::env::var("FORGE_MEASURE") {
            base.measure = parse_env_bool(&val, "FORGE_MEASURE")?;
        }

        if let Ok(val) = std::env::var("FORGE_STOPPING_PROB") {
            config.stopping_prob = parse_env_value(&val, "FORGE_STOPPING_PROB")?;
        }

        if let Ok(val) = std::env::var("FORGE_MAX_STEPS") {
            config.max_steps = parse_env_value(&val, "FORGE_MAX_STEPS")?;
        }

        if let Ok(val) = std::env::var("FORGE_RULES_FILE") {
            config.rules_file = Some(PathBuf::from(val));
        }

        // Collaborator settings
        if let Ok(val) = std::env::var("FORGE_MEASUREMENT_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "FORGE_MEASUREMENT_TIMEOUT_SECS")?;
            config.measurement_timeout = Duration::from_secs(secs);
        }

        // Upload settings
        if let Ok(val) = std::env::var("FORGE_UPLOAD_THRESHOLD") {
            config.upload_threshold = parse_env_value(&val, "FORGE_UPLOAD_THRESHOLD")?;
        }

        if let Ok(val) = std::env::var("FORGE_REMOTE_PAGE_SIZE") {
            config.remote_page_size = parse_env_value(&val, "FORGE_REMOTE_PAGE_SIZE")?;
        }

        if let Ok(val) = std::env::var("FORGE_FORCE_REFRESH") {
            config.force_refresh = parse_env_bool(&val, "FORGE_FORCE_REFRESH")?;
        }

        // Storage settings
        if let Ok(val) = std::env::var("FORGE_CACHE_FILE") {
            config.cache_file = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("FORGE_LOCAL_DIR") {
            config.local_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("FORGE_CLEANUP_INTERVAL") {
            config.cleanup_interval = parse_env_value(&val, "FORGE_CLEANUP_INTERVAL")?;
        }

        if let Ok(val) = std::env::var("FORGE_MAX_ARTIFACT_AGE_HOURS") {
            let hours: u64 = parse_env_value(&val, "FORGE_MAX_ARTIFACT_AGE_HOURS")?;
            config.max_artifact_age = Duration::from_secs(hours * 60 * 60);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Pool validation
        if self.num_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "num_workers must be greater than 0".to_string(),
            ));
        }

        if self.batch_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "batch_size must be greater than 0".to_string(),
            ));
        }

        // Composition validation
        let base = &self.base_params;
        if base.min_width == 0 {
            return Err(ConfigError::ValidationFailed(
                "min_width must be at least 1".to_string(),
            ));
        }

        if base.min_width > base.max_width {
            return Err(ConfigError::ValidationFailed(
                "min_width cannot exceed max_width".to_string(),
            ));
        }

        if base.min_depth > base.max_depth {
            return Err(ConfigError::ValidationFailed(
                "min_depth cannot exceed max_depth".to_string(),
            ));
        }

        if base.min_reps == 0 || base.min_reps > base.max_reps {
            return Err(ConfigError::ValidationFailed(
                "min_reps must be at least 1 and cannot exceed max_reps".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.stopping_prob) {
            return Err(ConfigError::ValidationFailed(
                "stopping_prob must be between 0.0 and 1.0".to_string(),
            ));
        }

        // Upload validation
        if self.remote_page_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "remote_page_size must be greater than 0".to_string(),
            ));
        }

        // Storage validation
        if self.cache_file.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "cache_file cannot be empty".to_string(),
            ));
        }

        if self.local_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "local_dir cannot be empty".to_string(),
            ));
        }

        if self.cleanup_interval == 0 {
            return Err(ConfigError::ValidationFailed(
                "cleanup_interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the worker pool size.
    pub fn with_num_workers(mut self, workers: usize) -> Self {
        self.num_workers = workers;
        self
    }

    /// Builder method to set the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Builder method to bound the number of batches.
    pub fn with_max_iterations(mut self, iterations: u64) -> Self {
        self.max_iterations = Some(iterations);
        self
    }

    /// Builder method to set the composition bounds.
    pub fn with_base_params(mut self, params: BaseParams) -> Self {
        self.base_params = params;
        self
    }

    /// Builder method to set the base seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.base_params.seed = seed;
        self
    }

    /// Builder method to set the width bounds.
    pub fn with_width_range(mut self, min: usize, max: usize) -> Self {
        self.base_params.min_width = min;
        self.base_params.max_width = max;
        self
    }

    /// Builder method to set the depth bounds.
    pub fn with_depth_range(mut self, min: usize, max: usize) -> Self {
        self.base_params.min_depth = min;
        self.base_params.max_depth = max;
        self
    }

    /// Builder method to set the early stopping probability.
    pub fn with_stopping_prob(mut self, prob: f64) -> Self {
        self.stopping_prob = prob;
        self
    }

    /// Builder method to set the maximum steps per composite.
    pub fn with_max_steps(mut self, steps: usize) -> Self {
        self.max_steps = steps;
        self
    }

    /// Builder method to set the rule table file.
    pub fn with_rules_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.rules_file = Some(path.into());
        self
    }

    /// Builder method to set the measurement timeout.
    pub fn with_measurement_timeout(mut self, timeout: Duration) -> Self {
        self.measurement_timeout = timeout;
        self
    }

    /// Builder method to set the upload threshold.
    pub fn with_upload_threshold(mut self, threshold: usize) -> Self {
        self.upload_threshold = threshold;
        self
    }

    /// Builder method to set the remote listing page size.
    pub fn with_remote_page_size(mut self, size: usize) -> Self {
        self.remote_page_size = size;
        self
    }

    /// Builder method to force a cache refresh at startup.
    pub fn with_force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    /// Builder method to set the duplicate cache file.
    pub fn with_cache_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_file = path.into();
        self
    }

    /// Builder method to set the local artifact root.
    pub fn with_local_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_dir = path.into();
        self
    }

    /// Builder method to set the cleanup interval.
    pub fn with_cleanup_interval(mut self, interval: u64) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Builder method to set the local artifact retention.
    pub fn with_max_artifact_age(mut self, age: Duration) -> Self {
        self.max_artifact_age = age;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
