use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::error::RetryConfig;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatsiftConfig {
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub batcher: BatcherConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatcherConfig {
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_min_message_chars")]
    pub min_message_chars: usize,

    #[serde(default)]
    pub selectors: ChatSelectors,
}

/// Lookup keys into the host document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSelectors {
    #[serde(default = "default_container_selector")]
    pub container: String,

    #[serde(default = "default_message_tag")]
    pub message_tag: String,

    #[serde(default = "default_author_selector")]
    pub author: String,

    #[serde(default = "default_body_selector")]
    pub body: String,

    #[serde(default = "default_timestamp_selector")]
    pub timestamp: String,
}

/// Transcript analysis. Endpoint, timeout and retries are shared with the
/// classifier section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_analysis_model")]
    pub model: String,

    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json_format: bool,
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_model() -> String {
    "gemma-3-27b-it".to_string()
}

fn default_max_text_chars() -> usize {
    150
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    2000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_flush_threshold() -> usize {
    2
}

fn default_batch_size() -> usize {
    2
}

fn default_debounce() -> u64 {
    50
}

fn default_poll_interval() -> u64 {
    2000
}

fn default_connect_timeout() -> u64 {
    3000
}

fn default_min_message_chars() -> usize {
    3
}

fn default_container_selector() -> String {
    "#items.yt-live-chat-item-list-renderer".to_string()
}

fn default_message_tag() -> String {
    "yt-live-chat-text-message-renderer".to_string()
}

fn default_author_selector() -> String {
    "#author-name".to_string()
}

fn default_body_selector() -> String {
    "#message".to_string()
}

fn default_timestamp_selector() -> String {
    "#timestamp".to_string()
}

fn default_analysis_model() -> String {
    "gemini-3-flash-preview".to_string()
}

fn default_max_input_chars() -> usize {
    45_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            max_text_chars: default_max_text_chars(),
            request_timeout_secs: default_request_timeout(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl ClassifierConfig {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            backoff_multiplier: self.backoff_multiplier,
            ..RetryConfig::for_classifier()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            flush_threshold: default_flush_threshold(),
            batch_size: default_batch_size(),
            debounce_ms: default_debounce(),
        }
    }
}

impl BatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            connect_timeout_ms: default_connect_timeout(),
            min_message_chars: default_min_message_chars(),
            selectors: ChatSelectors::default(),
        }
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ChatSelectors {
    fn default() -> Self {
        Self {
            container: default_container_selector(),
            message_tag: default_message_tag(),
            author: default_author_selector(),
            body: default_body_selector(),
            timestamp: default_timestamp_selector(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            model: default_analysis_model(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl ChatsiftConfig {
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from_paths(get_config_paths())
    }

    pub fn load_from_paths(paths: Vec<PathBuf>) -> Result<Self, ConfigLoadError> {
        load_dotenv_files();

        let mut builder = ConfigBuilder::builder();

        for path in paths {
            if path.exists() {
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("CHATSIFT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;

        let mut chatsift_config: ChatsiftConfig = config.try_deserialize()?;

        if let Ok(level) = std::env::var("CHATSIFT_LOG_LEVEL") {
            chatsift_config.logging.level = level;
        } else if let Ok(level) = std::env::var("RUST_LOG") {
            chatsift_config.logging.level = level;
        }

        chatsift_config.validate()?;

        Ok(chatsift_config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.classifier.base_url.is_empty() {
            return Err(ConfigLoadError::MissingRequired(
                "classifier.base_url".to_string(),
            ));
        }

        if !self.classifier.base_url.starts_with("http://")
            && !self.classifier.base_url.starts_with("https://")
        {
            return Err(ConfigLoadError::InvalidValue {
                key: "classifier.base_url".to_string(),
                message: "Must start with http:// or https://".to_string(),
            });
        }

        if self.classifier.model.trim().is_empty() {
            return Err(ConfigLoadError::MissingRequired(
                "classifier.model".to_string(),
            ));
        }

        if self.classifier.max_attempts == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "classifier.max_attempts".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.classifier.max_text_chars == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "classifier.max_text_chars".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.batcher.batch_size == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "batcher.batch_size".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.batcher.flush_threshold == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "batcher.flush_threshold".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.watcher.poll_interval_ms == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "watcher.poll_interval_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.analysis.model.trim().is_empty() {
            return Err(ConfigLoadError::MissingRequired("analysis.model".to_string()));
        }

        if self.analysis.max_input_chars == 0 {
            return Err(ConfigLoadError::InvalidValue {
                key: "analysis.max_input_chars".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let level_lower = self.logging.level.to_lowercase();
        if !valid_levels.contains(&level_lower.as_str()) && !level_lower.contains('=') {
            return Err(ConfigLoadError::InvalidValue {
                key: "logging.level".to_string(),
                message: format!(
                    "Invalid log level '{}'. Must be one of: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        Ok(())
    }

    pub fn log_level(&self) -> &str {
        &self.logging.level
    }
}

pub fn get_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join("config").join("default.toml"));
        paths.push(cwd.join("config").join("local.toml"));
        paths.push(cwd.join("chatsift.toml"));
    }

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("chatsift").join("config.toml"));
    }

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".chatsift").join("config.toml"));
    }

    paths
}

fn load_dotenv_files() {
    let env_paths = get_dotenv_paths();

    for path in env_paths {
        if path.exists() {
            let _ = dotenvy::from_path(&path);
        }
    }
}

fn get_dotenv_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(".env"));
        paths.push(cwd.join(".env.local"));
    }

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".chatsift").join(".env"));
    }

    paths
}

pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("chatsift"))
}

pub fn ensure_config_dir() -> Result<PathBuf, std::io::Error> {
    let config_dir = get_config_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not determine config directory",
        )
    })?;

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ChatsiftConfig::default();

        assert_eq!(
            config.classifier.base_url,
            "https://generativelanguage.googleapis.com"
        );
        assert_eq!(config.classifier.model, "gemma-3-27b-it");
        assert_eq!(config.classifier.max_text_chars, 150);
        assert_eq!(config.classifier.max_attempts, 3);
        assert_eq!(config.batcher.flush_threshold, 2);
        assert_eq!(config.batcher.batch_size, 2);
        assert_eq!(config.batcher.debounce_ms, 50);
        assert_eq!(config.watcher.poll_interval_ms, 2000);
        assert_eq!(config.watcher.min_message_chars, 3);
        assert_eq!(config.watcher.selectors.author, "#author-name");
        assert_eq!(config.analysis.model, "gemini-3-flash-preview");
        assert_eq!(config.analysis.max_input_chars, 45_000);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
    }

    #[test]
    fn test_retry_config_from_classifier() {
        let retry = ClassifierConfig::default().retry_config();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(
            retry.schedule(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(ChatsiftConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_invalid_base_url() {
        let mut config = ChatsiftConfig::default();
        config.classifier.base_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_batch_size() {
        let mut config = ChatsiftConfig::default();
        config.batcher.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_attempts() {
        let mut config = ChatsiftConfig::default();
        config.classifier.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_transcript_budget() {
        let mut config = ChatsiftConfig::default();
        config.analysis.max_input_chars = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let mut config = ChatsiftConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_complex_log_level() {
        let mut config = ChatsiftConfig::default();
        config.logging.level = "chatsift_core=debug,reqwest=warn".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatsift.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[batcher]\nbatch_size = 5\n\n[classifier]\nmodel = \"gemini-2.0-flash\""
        )
        .unwrap();

        let config = ChatsiftConfig::load_from_paths(vec![path]).unwrap();
        assert_eq!(config.batcher.batch_size, 5);
        assert_eq!(config.batcher.flush_threshold, 2);
        assert_eq!(config.classifier.model, "gemini-2.0-flash");
    }

    #[test]
    fn test_config_dir_helper() {
        assert!(get_config_dir().is_some());
    }
}
