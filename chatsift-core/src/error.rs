//! Error types for the chatsift core library.
//!
//! This module provides a unified error handling system for the chat
//! pipeline, covering configuration, the classification API, the watched
//! document and the pipeline runtime itself.
//!
//! # Error Codes Reference
//!
//! | Code Range | Category | Description |
//! |------------|----------|-------------|
//! | E1001-E1099 | Config | Config file, credential and validation errors |
//! | E2001-E2099 | Classifier | Remote model API, response parsing and retry errors |
//! | E3001-E3099 | Document | Chat container, node extraction and transcript errors |
//! | E4001-E4099 | Pipeline | Runtime lifecycle and channel errors |
//! | E9001-E9099 | General | Internal, IO and serialization errors |

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Configuration for retry behavior with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first call included
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 for doubling)
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::for_classifier()
    }
}

impl RetryConfig {
    /// Retry schedule for the classification endpoint: 3 attempts, 2s then 4s.
    pub fn for_classifier() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }

    /// Calculate the delay to wait after the given failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_delay as u64)
    }

    /// The full list of waits between attempts, in order.
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.delay_for_attempt(attempt))
            .collect()
    }
}

/// The main error type for the chatsift core library.
#[derive(Debug, Error)]
pub enum ChatsiftError {
    // ========================================================================
    // Configuration Errors (E1001-E1099)
    // ========================================================================
    /// No API credential is stored
    #[error("[E1001] Missing API key: {0}")]
    MissingCredential(String),

    /// Configuration file parse error
    #[error("[E1002] Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// Invalid configuration value
    #[error("[E1003] Invalid configuration value for '{key}': {message}")]
    InvalidConfigValue { key: String, message: String },

    /// Settings storage could not be read or written
    #[error("[E1004] Settings storage error: {0}")]
    SettingsStorage(String),

    // ========================================================================
    // Classifier Errors (E2001-E2099)
    // ========================================================================
    /// The request could not be sent or was rejected
    #[error("[E2001] API request failed: {0}")]
    ApiRequestFailed(String),

    /// The response body was not what the endpoint contract promises
    #[error("[E2002] Failed to parse API response: {0}")]
    ApiParseError(String),

    /// The endpoint answered with a 4xx/other non-retryable status
    #[error("[E2003] API rejected request with status {status}: {message}")]
    ApiRejected { status: u16, message: String },

    /// The endpoint is overloaded or unavailable (500/503)
    #[error("[E2004] API service unavailable ({status}): {message}")]
    ApiServiceUnavailable { status: u16, message: String },

    /// The request timed out
    #[error("[E2005] API request timed out after {0} seconds")]
    ApiTimeout(u64),

    /// The model returned no usable text
    #[error("[E2006] Model returned an empty response")]
    EmptyResponse,

    /// Transient failures persisted through every attempt
    #[error("[E2007] Classification failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    // ========================================================================
    // Document Errors (E3001-E3099)
    // ========================================================================
    /// A chat node could not be read
    #[error("[E3001] Failed to extract chat node: {0}")]
    ExtractionFailed(String),

    /// The observed container has gone away
    #[error("[E3002] Chat container detached: {0}")]
    ContainerDetached(String),

    /// No transcript lines could be read from the input
    #[error("[E3003] Transcript is empty: {0}")]
    EmptyTranscript(String),

    // ========================================================================
    // Pipeline Errors (E4001-E4099)
    // ========================================================================
    /// Pipeline has already been started
    #[error("[E4001] Pipeline already running")]
    PipelineAlreadyRunning,

    /// Pipeline task is gone
    #[error("[E4002] Pipeline is not running")]
    PipelineNotRunning,

    /// An internal channel closed unexpectedly
    #[error("[E4003] Pipeline channel closed: {0}")]
    ChannelClosed(String),

    // ========================================================================
    // General Errors (E9001-E9099)
    // ========================================================================
    /// Internal error (catch-all for unexpected conditions)
    #[error("[E9001] Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("[E9003] IO error: {0}")]
    IoError(String),

    /// Serialization/deserialization error
    #[error("[E9004] Serialization error: {0}")]
    SerializationError(String),
}

/// Result type alias for chatsift operations.
pub type ChatsiftResult<T> = Result<T, ChatsiftError>;

// ============================================================================
// From trait implementations for seamless error propagation
// ============================================================================

/// The request URL carries the API key as a query parameter, so it is stripped
/// before the error text is kept anywhere.
impl From<reqwest::Error> for ChatsiftError {
    fn from(err: reqwest::Error) -> Self {
        let err = err.without_url();
        if err.is_timeout() {
            ChatsiftError::ApiTimeout(30)
        } else if err.is_connect() {
            ChatsiftError::ApiServiceUnavailable {
                status: 0,
                message: err.to_string(),
            }
        } else if err.is_status() {
            match err.status().map(|s| s.as_u16()) {
                Some(status @ (500 | 503)) => ChatsiftError::ApiServiceUnavailable {
                    status,
                    message: err.to_string(),
                },
                Some(status) => ChatsiftError::ApiRejected {
                    status,
                    message: err.to_string(),
                },
                None => ChatsiftError::ApiRequestFailed(err.to_string()),
            }
        } else if err.is_decode() {
            ChatsiftError::ApiParseError(err.to_string())
        } else {
            ChatsiftError::ApiRequestFailed(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ChatsiftError {
    fn from(err: serde_json::Error) -> Self {
        ChatsiftError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for ChatsiftError {
    fn from(err: std::io::Error) -> Self {
        ChatsiftError::IoError(err.to_string())
    }
}

impl From<config::ConfigError> for ChatsiftError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound(key) => ChatsiftError::InvalidConfigValue {
                key,
                message: "Key not found".to_string(),
            },
            config::ConfigError::FileParse { uri, cause } => ChatsiftError::ConfigParseError(
                format!("Failed to parse {}: {}", uri.unwrap_or_default(), cause),
            ),
            config::ConfigError::Type {
                origin,
                unexpected,
                expected,
                key,
            } => ChatsiftError::InvalidConfigValue {
                key: key.unwrap_or_else(|| origin.map(|o| o.to_string()).unwrap_or_default()),
                message: format!("Expected {}, got {}", expected, unexpected),
            },
            _ => ChatsiftError::ConfigParseError(err.to_string()),
        }
    }
}

// ============================================================================
// Error categorization helpers
// ============================================================================

impl ChatsiftError {
    /// Returns true if this error is related to configuration.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ChatsiftError::MissingCredential(_)
                | ChatsiftError::ConfigParseError(_)
                | ChatsiftError::InvalidConfigValue { .. }
                | ChatsiftError::SettingsStorage(_)
        )
    }

    /// Returns true if waiting and retrying the same request might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChatsiftError::ApiServiceUnavailable { .. } | ChatsiftError::ApiTimeout(_)
        )
    }

    /// Returns an error code suitable for logging or external reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            ChatsiftError::MissingCredential(_) => "E1001",
            ChatsiftError::ConfigParseError(_) => "E1002",
            ChatsiftError::InvalidConfigValue { .. } => "E1003",
            ChatsiftError::SettingsStorage(_) => "E1004",
            ChatsiftError::ApiRequestFailed(_) => "E2001",
            ChatsiftError::ApiParseError(_) => "E2002",
            ChatsiftError::ApiRejected { .. } => "E2003",
            ChatsiftError::ApiServiceUnavailable { .. } => "E2004",
            ChatsiftError::ApiTimeout(_) => "E2005",
            ChatsiftError::EmptyResponse => "E2006",
            ChatsiftError::RetriesExhausted { .. } => "E2007",
            ChatsiftError::ExtractionFailed(_) => "E3001",
            ChatsiftError::ContainerDetached(_) => "E3002",
            ChatsiftError::EmptyTranscript(_) => "E3003",
            ChatsiftError::PipelineAlreadyRunning => "E4001",
            ChatsiftError::PipelineNotRunning => "E4002",
            ChatsiftError::ChannelClosed(_) => "E4003",
            ChatsiftError::Internal(_) => "E9001",
            ChatsiftError::IoError(_) => "E9003",
            ChatsiftError::SerializationError(_) => "E9004",
        }
    }

    /// Returns a user-friendly suggestion for how to resolve this error.
    pub fn user_suggestion(&self) -> Option<&'static str> {
        match self {
            ChatsiftError::MissingCredential(_) => {
                Some("Save a Gemini API key with 'chatsift config set-key <KEY>'")
            }
            ChatsiftError::ApiRejected { status: 401, .. }
            | ChatsiftError::ApiRejected { status: 403, .. } => {
                Some("Check that the saved API key is valid for the configured model")
            }
            ChatsiftError::ApiServiceUnavailable { .. } | ChatsiftError::RetriesExhausted { .. } => {
                Some("The model service is busy; messages are kept and will be retried")
            }
            ChatsiftError::ConfigParseError(_) => {
                Some("Check chatsift.toml and CHATSIFT_* environment variables")
            }
            ChatsiftError::EmptyTranscript(_) => {
                Some("Pass a transcript with one '[MM:SS] text' line per segment")
            }
            _ => None,
        }
    }

    /// Log this error with appropriate severity level.
    pub fn log(&self) {
        let code = self.error_code();
        let suggestion = self.user_suggestion();

        if self.is_transient() {
            warn!(
                error_code = %code,
                suggestion = suggestion,
                "Transient error occurred: {}",
                self
            );
        } else {
            error!(
                error_code = %code,
                suggestion = suggestion,
                "Error occurred: {}",
                self
            );
        }
    }
}

// ============================================================================
// Retry utilities
// ============================================================================

/// Execute an async operation, retrying transient failures per `config`.
///
/// `wait` performs the backoff between attempts so callers can substitute a
/// clock that does not really sleep. Non-transient errors are returned
/// immediately; running out of attempts yields [`ChatsiftError::RetriesExhausted`].
pub async fn retry_async_with<F, Fut, T, W, WFut>(
    operation: F,
    config: &RetryConfig,
    wait: W,
) -> ChatsiftResult<T>
where
    F: Fn(u32) -> Fut,
    Fut: std::future::Future<Output = ChatsiftResult<T>>,
    W: Fn(Duration) -> WFut,
    WFut: std::future::Future<Output = ()>,
{
    let max_attempts = config.max_attempts.max(1);

    for attempt in 0..max_attempts {
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 0 {
                    info!(
                        "Operation succeeded on attempt {} after {} retries",
                        attempt + 1,
                        attempt
                    );
                }
                return Ok(result);
            }
            Err(e) if !e.is_transient() => {
                e.log();
                return Err(e);
            }
            Err(e) if attempt + 1 == max_attempts => {
                e.log();
                return Err(ChatsiftError::RetriesExhausted {
                    attempts: max_attempts,
                    last_error: e.to_string(),
                });
            }
            Err(e) => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "Attempt {} failed ({}), retrying in {:?}",
                    attempt + 1,
                    e,
                    delay
                );
                wait(delay).await;
            }
        }
    }

    Err(ChatsiftError::Internal(
        "Retry loop exhausted without error".to_string(),
    ))
}

// ============================================================================
// User-friendly error formatting for CLI
// ============================================================================

/// Format an error for CLI display with suggestions.
pub struct CliErrorDisplay<'a> {
    error: &'a ChatsiftError,
}

impl<'a> CliErrorDisplay<'a> {
    pub fn new(error: &'a ChatsiftError) -> Self {
        Self { error }
    }
}

impl<'a> fmt::Display for CliErrorDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Main error message (already includes code)
        writeln!(f, "{}", self.error)?;

        if let Some(suggestion) = self.error.user_suggestion() {
            writeln!(f)?;
            writeln!(f, "  Suggestion: {}", suggestion)?;
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    fn unavailable() -> ChatsiftError {
        ChatsiftError::ApiServiceUnavailable {
            status: 503,
            message: "overloaded".to_string(),
        }
    }

    #[test]
    fn test_error_display() {
        let err = ChatsiftError::MissingCredential("no key saved".to_string());
        assert!(err.to_string().contains("E1001"));
        assert!(err.to_string().contains("no key saved"));

        let err = ChatsiftError::ApiRejected {
            status: 400,
            message: "bad request".to_string(),
        };
        assert!(err.to_string().contains("E2003"));
        assert!(err.to_string().contains("400"));
    }

    #[test]
    fn test_error_categorization() {
        let config_err = ChatsiftError::MissingCredential("key".to_string());
        assert!(config_err.is_config_error());

        let api_err = ChatsiftError::ApiParseError("not json".to_string());
        assert!(!api_err.is_config_error());
        assert!(!ChatsiftError::ApiRejected {
            status: 403,
            message: "denied".to_string()
        }
        .is_config_error());
    }

    #[test]
    fn test_is_transient() {
        assert!(unavailable().is_transient());
        assert!(ChatsiftError::ApiTimeout(30).is_transient());

        assert!(!ChatsiftError::MissingCredential("k".to_string()).is_transient());
        assert!(!ChatsiftError::ApiRejected {
            status: 404,
            message: "missing".to_string()
        }
        .is_transient());
        assert!(!ChatsiftError::ApiParseError("x".to_string()).is_transient());
        assert!(!ChatsiftError::EmptyResponse.is_transient());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ChatsiftError::MissingCredential("k".to_string()).error_code(),
            "E1001"
        );
        assert_eq!(unavailable().error_code(), "E2004");
        assert_eq!(
            ChatsiftError::ExtractionFailed("node".to_string()).error_code(),
            "E3001"
        );
        assert_eq!(ChatsiftError::PipelineNotRunning.error_code(), "E4002");
        assert_eq!(
            ChatsiftError::Internal("err".to_string()).error_code(),
            "E9001"
        );
    }

    #[test]
    fn test_user_suggestions() {
        assert!(ChatsiftError::MissingCredential("k".to_string())
            .user_suggestion()
            .is_some());
        assert!(ChatsiftError::ApiRejected {
            status: 401,
            message: "unauthorized".to_string()
        }
        .user_suggestion()
        .is_some());
        assert!(ChatsiftError::Internal("err".to_string())
            .user_suggestion()
            .is_none());
    }

    #[test]
    fn test_classifier_retry_schedule() {
        let config = RetryConfig::for_classifier();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(
            config.schedule(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[test]
    fn test_retry_delay_calculation() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            backoff_multiplier: 2.0,
        };

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: ChatsiftResult<()> = retry_async_with(
            |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ChatsiftError::ApiParseError("garbage".to_string()))
                }
            },
            &RetryConfig::for_classifier(),
            |_| async {},
        )
        .await;

        assert!(matches!(result, Err(ChatsiftError::ApiParseError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausts_budget() {
        let waits = Arc::new(Mutex::new(Vec::new()));
        let recorded = waits.clone();

        let result: ChatsiftResult<()> = retry_async_with(
            |_| async { Err(unavailable()) },
            &RetryConfig::for_classifier(),
            move |d| {
                recorded.lock().unwrap().push(d);
                async {}
            },
        )
        .await;

        assert!(matches!(
            result,
            Err(ChatsiftError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(
            *waits.lock().unwrap(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let result = retry_async_with(
            |attempt| async move {
                if attempt < 2 {
                    Err(unavailable())
                } else {
                    Ok(attempt)
                }
            },
            &RetryConfig::for_classifier(),
            |_| async {},
        )
        .await;

        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ChatsiftError = io_err.into();
        assert!(matches!(err, ChatsiftError::IoError(_)));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_result: Result<serde_json::Value, _> = serde_json::from_str("invalid json");
        let err: ChatsiftError = json_result.unwrap_err().into();
        assert!(matches!(err, ChatsiftError::SerializationError(_)));
    }

    #[test]
    fn test_cli_error_display() {
        let err = ChatsiftError::MissingCredential("no key saved".to_string());
        let output = CliErrorDisplay::new(&err).to_string();
        assert!(output.contains("no key saved"));
        assert!(output.contains("Suggestion"));

        let err = ChatsiftError::Internal("boom".to_string());
        let output = CliErrorDisplay::new(&err).to_string();
        assert!(output.contains("E9001"));
        assert!(!output.contains("Suggestion"));
    }
}
