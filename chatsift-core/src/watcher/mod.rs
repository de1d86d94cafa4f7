//! Chat container watcher.
//!
//! Polls the document for the chat container, keeps a mutation listener on
//! whichever container is current, and turns inserted chat nodes into
//! filtered [`ChatMessage`] batches.

mod dom;
mod extract;
mod filter;
mod memory;

pub use dom::{
    ChatDocument, ChatNode, ContainerId, DynChatDocument, MutationRecord, MutationStream, NodeRef,
};
pub use extract::extract_message;
pub use filter::{is_symbols_only, ContentFilter};
pub use memory::{MemoryDocument, MemoryNode};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::WatcherConfig;
use crate::models::ChatMessage;

/// What the watcher reports to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum WatcherEvent {
    /// New chat lines, in document order. Never empty.
    Messages(Vec<ChatMessage>),
    Attached(ContainerId),
    Detached(ContainerId),
    /// No container showed up within the connect timeout. Sent at most once.
    NotFound,
}

struct Attachment {
    container: ContainerId,
    stream: MutationStream,
}

pub struct ChatWatcher {
    document: DynChatDocument,
    config: WatcherConfig,
    filter: ContentFilter,
    attachment: Option<Attachment>,
}

impl ChatWatcher {
    pub fn new(document: DynChatDocument, config: WatcherConfig) -> Self {
        let filter = ContentFilter::new(config.min_message_chars);
        Self {
            document,
            config,
            filter,
            attachment: None,
        }
    }

    pub fn attached_container(&self) -> Option<ContainerId> {
        self.attachment.as_ref().map(|a| a.container)
    }

    /// One polling step: attach to a new container or drop a vanished one.
    pub fn poll(&mut self) -> Vec<WatcherEvent> {
        let mut events = Vec::new();
        let current = self.attached_container();
        let found = self
            .document
            .query_container(&self.config.selectors.container);

        if let Some(found) = found.filter(|f| Some(*f) != current) {
            if let Some(old) = self.detach() {
                events.push(WatcherEvent::Detached(old));
            }
            match self.document.observe(found) {
                Ok(stream) => {
                    info!(container = %found, "Attached to chat container");
                    self.attachment = Some(Attachment {
                        container: found,
                        stream,
                    });
                    events.push(WatcherEvent::Attached(found));
                }
                Err(e) => debug!(container = %found, "Could not observe container: {}", e),
            }
            return events;
        }

        if let Some(current) = current {
            if !self.document.contains(current) {
                self.detach();
                events.push(WatcherEvent::Detached(current));
            }
        }

        events
    }

    /// Extract and filter the chat lines carried by a mutation batch.
    pub fn process_mutations(&self, records: &[MutationRecord]) -> Vec<ChatMessage> {
        let mut messages = Vec::new();

        for node in records.iter().flat_map(|r| r.added_nodes.iter()) {
            match extract_message(node.as_ref(), &self.config.selectors) {
                Ok(Some(message)) if self.filter.admits(&message.message) => messages.push(message),
                Ok(Some(message)) => trace!(author = %message.author, "Filtered low-content message"),
                Ok(None) => {}
                Err(e) => debug!("Skipping chat node: {}", e),
            }
        }

        messages
    }

    fn detach(&mut self) -> Option<ContainerId> {
        let attachment = self.attachment.take()?;
        info!(container = %attachment.container, "Detached from chat container");
        Some(attachment.container)
    }

    /// Runs until `shutdown_rx` fires or the event receiver goes away.
    pub async fn run(mut self, events: mpsc::Sender<WatcherEvent>, mut shutdown_rx: oneshot::Receiver<()>) {
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let connect_deadline = sleep(self.config.connect_timeout());
        tokio::pin!(connect_deadline);
        let mut ever_attached = false;
        let mut not_found_reported = false;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for event in self.poll() {
                        if matches!(event, WatcherEvent::Attached(_)) {
                            ever_attached = true;
                        }
                        if events.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                records = next_mutations(&mut self.attachment) => {
                    let event = match records {
                        Some(records) => {
                            let messages = self.process_mutations(&records);
                            if messages.is_empty() {
                                continue;
                            }
                            debug!(count = messages.len(), "Extracted chat messages");
                            WatcherEvent::Messages(messages)
                        }
                        // Listener disconnected; the next poll reattaches.
                        None => match self.detach() {
                            Some(old) => WatcherEvent::Detached(old),
                            None => continue,
                        },
                    };
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
                _ = &mut connect_deadline, if !ever_attached && !not_found_reported => {
                    not_found_reported = true;
                    warn!(selector = %self.config.selectors.container, "Chat container not found");
                    if events.send(WatcherEvent::NotFound).await.is_err() {
                        return;
                    }
                }
                _ = &mut shutdown_rx => {
                    info!("Chat watcher shutting down");
                    break;
                }
            }
        }

        self.detach();
    }

    pub fn spawn(self, events: mpsc::Sender<WatcherEvent>) -> WatcherHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(events, shutdown_rx));
        WatcherHandle { shutdown_tx, task }
    }
}

async fn next_mutations(attachment: &mut Option<Attachment>) -> Option<Vec<MutationRecord>> {
    match attachment {
        Some(attachment) => attachment.stream.recv().await,
        None => std::future::pending().await,
    }
}

/// Owner handle for a spawned watcher task.
pub struct WatcherHandle {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    /// Signals shutdown and waits for the listener to be released.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            warn!("Chat watcher task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
