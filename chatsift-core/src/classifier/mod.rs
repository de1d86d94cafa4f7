//! Batch classification against a remote language model.

mod gemini;
mod prompt;
mod response;

pub use gemini::{GeminiClassifier, GeminiClient};
pub use prompt::build_prompt;
pub use response::{correlate, parse_records, strip_code_fences};

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::ChatsiftResult;
use crate::models::{Batch, ClassifiedMessage};

/// Labels a batch of chat messages.
///
/// Implementations make one remote call per attempt for the whole batch and
/// never touch the pipeline buffer. Only QUESTION and NOTE items are returned.
#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, batch: &Batch) -> ChatsiftResult<Vec<ClassifiedMessage>>;
}

pub type DynClassifier = Arc<dyn Classifier>;

/// Waits between retry attempts.
#[async_trait]
pub trait RetryDelay: Send + Sync {
    async fn wait(&self, delay: Duration);
}

/// Real sleep on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelay;

#[async_trait]
impl RetryDelay for TokioDelay {
    async fn wait(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Records requested waits and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingDelay {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingDelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl RetryDelay for RecordingDelay {
    async fn wait(&self, delay: Duration) {
        self.waits
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(delay);
    }
}
