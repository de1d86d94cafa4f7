use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::batcher::Batcher;
use crate::error::{ChatsiftError, ChatsiftResult};
use crate::models::{Batch, ClassifiedMessage, PipelineEvent, StatusKind, StatusNotice};

/// Running delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub batches_delivered: u64,
    pub items_delivered: u64,
    pub empty_batches: u64,
    pub failures: u64,
    pub requeued_messages: u64,
}

/// What happened to one classification outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Results(usize),
    Nothing,
    Requeued(usize),
}

/// Fans classification outcomes out to subscribers.
pub struct Dispatcher {
    events: broadcast::Sender<PipelineEvent>,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            events,
            stats: DispatchStats::default(),
        }
    }

    pub fn with_sender(events: broadcast::Sender<PipelineEvent>) -> Self {
        Self {
            events,
            stats: DispatchStats::default(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Routes a finished classification. A failed batch goes back into
    /// `batcher`, ahead of everything that arrived after it, before the status
    /// notice is sent.
    pub fn dispatch(
        &mut self,
        batch: Batch,
        result: ChatsiftResult<Vec<ClassifiedMessage>>,
        batcher: &mut Batcher,
    ) -> Dispatched {
        match result {
            Ok(items) if items.is_empty() => {
                batcher.settle(&batch);
                self.stats.empty_batches += 1;
                debug!(batch = batch.len(), "Nothing relevant in batch");
                Dispatched::Nothing
            }
            Ok(items) => {
                batcher.settle(&batch);
                let count = items.len();
                self.stats.batches_delivered += 1;
                self.stats.items_delivered += count as u64;
                self.publish(PipelineEvent::Results(items));
                Dispatched::Results(count)
            }
            Err(err) => {
                let count = batch.len();
                self.stats.failures += 1;
                self.stats.requeued_messages += count as u64;
                warn!(error_code = err.error_code(), requeued = count, "Classification failed: {}", err);

                batcher.requeue(batch);
                self.publish_status(status_for_error(&err));
                Dispatched::Requeued(count)
            }
        }
    }

    pub fn publish_status(&self, notice: StatusNotice) {
        self.publish(PipelineEvent::Status(notice));
    }

    /// Best effort: having no subscriber is fine.
    fn publish(&self, event: PipelineEvent) {
        let name = event.name();
        if self.events.send(event).is_err() {
            trace!(event = name, "No subscribers for event");
        }
    }
}

/// User-facing notice for a failed batch. Configuration problems ask the user
/// to act; everything else says the messages will be retried.
pub fn status_for_error(err: &ChatsiftError) -> StatusNotice {
    match err {
        ChatsiftError::MissingCredential(_) => StatusNotice::new(
            StatusKind::Configuration,
            "API key missing. Save a Gemini API key to start classifying.",
        ),
        ChatsiftError::ApiRejected { status: 401 | 403, .. } => StatusNotice::new(
            StatusKind::Configuration,
            "The API key was rejected. Check the saved key.",
        ),
        e if e.is_config_error() => {
            StatusNotice::new(StatusKind::Configuration, format!("Configuration error: {}", e))
        }
        e => StatusNotice::new(
            StatusKind::Retrying,
            format!("Classifier unavailable, messages kept for retry ({})", e.error_code()),
        ),
    }
}
