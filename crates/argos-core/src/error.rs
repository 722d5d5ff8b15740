use thiserror::Error;

/// Application-wide error types for Argos.
#[derive(Error, Debug)]
pub enum AppError {
    /// robots.txt disallows the URL for the engine's user agent.
    #[error("Blocked by robots.txt: {0}")]
    PolicyBlocked(String),

    /// No enabled site configuration matches the URL.
    #[error("No enabled site configuration for {0}")]
    ConfigurationMissing(String),

    /// A required instruction failed.
    #[error("Instruction {step} ({description}) failed: {message}")]
    InstructionFailed {
        step: u32,
        description: String,
        message: String,
    },

    /// The browser process could not be started.
    #[error("Browser launch failed: {0}")]
    BrowserLaunchFailed(String),

    /// robots.txt fetch or page navigation failed.
    #[error("Network fetch failed: {0}")]
    NetworkFetchFailed(String),

    /// A required extractor yielded nothing, or extraction itself broke.
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    /// An operation exceeded its deadline.
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// The surrounding job was cancelled (shutdown or watchdog).
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Site configuration or request failed validation.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Reading or writing persisted state failed.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Invalid runtime configuration (environment, flags).
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    /// Stable identifier used in failure results and HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::PolicyBlocked(_) => "policy_blocked",
            AppError::ConfigurationMissing(_) => "configuration_missing",
            AppError::InstructionFailed { .. } => "instruction_failed",
            AppError::BrowserLaunchFailed(_) => "browser_launch_failed",
            AppError::NetworkFetchFailed(_) => "network_fetch_failed",
            AppError::ExtractionFailed(_) => "extraction_failed",
            AppError::Timeout(_) => "timeout",
            AppError::Cancelled(_) => "cancelled",
            AppError::ValidationError(_) => "validation_error",
            AppError::SerializationError(_) => "serialization_error",
            AppError::StorageError(_) => "storage_error",
            AppError::ConfigError(_) => "config_error",
        }
    }

    /// Returns true if this error is transient and worth retrying on a later run.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::NetworkFetchFailed(_)
                | AppError::Timeout(_)
                | AppError::BrowserLaunchFailed(_)
        )
    }
}
