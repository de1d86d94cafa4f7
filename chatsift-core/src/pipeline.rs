//! Pipeline runtime.
//!
//! One task owns the [`Batcher`] and the [`Dispatcher`]. It selects over
//! watcher output, the debounce deadline, finished classifications, credential
//! changes and control commands, so every buffer mutation happens inside a
//! single synchronous step of that task. Classifications run in their own
//! tasks and report back over a channel.

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::batcher::Batcher;
use crate::classifier::DynClassifier;
use crate::config::ChatsiftConfig;
use crate::credentials::DynCredentialStore;
use crate::dispatcher::{DispatchStats, Dispatcher};
use crate::error::{ChatsiftError, ChatsiftResult};
use crate::models::{Batch, ClassifiedMessage, PipelineEvent, StatusKind, StatusNotice};
use crate::watcher::{ChatWatcher, DynChatDocument, WatcherEvent, WatcherHandle};

const EVENT_CAPACITY: usize = 256;
const WATCHER_CHANNEL_CAPACITY: usize = 64;

type Outcome = (Batch, ChatsiftResult<Vec<ClassifiedMessage>>);

/// Point-in-time view of the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineSnapshot {
    pub monitoring: bool,
    pub buffered_ids: Vec<String>,
    pub in_flight: usize,
    pub stats: DispatchStats,
}

impl PipelineSnapshot {
    pub fn buffered(&self) -> usize {
        self.buffered_ids.len()
    }
}

enum Command {
    Start(oneshot::Sender<ChatsiftResult<()>>),
    Stop(oneshot::Sender<ChatsiftResult<()>>),
    Snapshot(oneshot::Sender<PipelineSnapshot>),
    Shutdown(oneshot::Sender<DispatchStats>),
}

/// Everything the runtime needs. Monitoring begins as soon as it is spawned.
pub struct Pipeline {
    config: ChatsiftConfig,
    document: DynChatDocument,
    classifier: DynClassifier,
    credentials: DynCredentialStore,
}

impl Pipeline {
    pub fn new(
        config: ChatsiftConfig,
        document: DynChatDocument,
        classifier: DynClassifier,
        credentials: DynCredentialStore,
    ) -> Self {
        Self {
            config,
            document,
            classifier,
            credentials,
        }
    }

    pub fn spawn(self) -> PipelineHandle {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (watcher_tx, watcher_rx) = mpsc::channel(WATCHER_CHANNEL_CAPACITY);
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let credential_rx = self.credentials.subscribe();

        info!(
            classifier = self.classifier.name(),
            batch_size = self.config.batcher.batch_size,
            flush_threshold = self.config.batcher.flush_threshold,
            "Starting chat pipeline"
        );

        let runtime = Runtime {
            batcher: Batcher::new(&self.config.batcher),
            dispatcher: Dispatcher::with_sender(events_tx.clone()),
            classifier: self.classifier,
            document: self.document,
            config: self.config,
            watcher: None,
            watcher_tx,
            outcomes_tx,
            in_flight: 0,
        };

        let task = tokio::spawn(runtime.run(watcher_rx, outcomes_rx, credential_rx, commands_rx));

        PipelineHandle {
            commands: commands_tx,
            events: events_tx,
            task,
        }
    }
}

/// Control surface for a spawned pipeline.
pub struct PipelineHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<PipelineEvent>,
    task: JoinHandle<()>,
}

impl PipelineHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Resumes monitoring after [`PipelineHandle::stop`].
    pub async fn start(&self) -> ChatsiftResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Start(tx)).await?;
        rx.await
            .map_err(|_| ChatsiftError::ChannelClosed("start reply".to_string()))?
    }

    /// Stops watching and flushing. In-flight classifications still complete
    /// and are dispatched; buffered messages are kept.
    pub async fn stop(&self) -> ChatsiftResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Stop(tx)).await?;
        rx.await
            .map_err(|_| ChatsiftError::ChannelClosed("stop reply".to_string()))?
    }

    pub async fn snapshot(&self) -> ChatsiftResult<PipelineSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx)).await?;
        rx.await
            .map_err(|_| ChatsiftError::ChannelClosed("snapshot reply".to_string()))
    }

    /// Stops the runtime after draining in-flight classifications.
    pub async fn shutdown(self) -> ChatsiftResult<DispatchStats> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx)).await?;
        let stats = rx
            .await
            .map_err(|_| ChatsiftError::ChannelClosed("shutdown reply".to_string()))?;

        if let Err(e) = self.task.await {
            warn!("Pipeline task ended abnormally: {}", e);
        }
        Ok(stats)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    async fn send(&self, command: Command) -> ChatsiftResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ChatsiftError::PipelineNotRunning)
    }
}

struct Runtime {
    batcher: Batcher,
    dispatcher: Dispatcher,
    classifier: DynClassifier,
    document: DynChatDocument,
    config: ChatsiftConfig,
    watcher: Option<WatcherHandle>,
    watcher_tx: mpsc::Sender<WatcherEvent>,
    outcomes_tx: mpsc::UnboundedSender<Outcome>,
    in_flight: usize,
}

impl Runtime {
    async fn run(
        mut self,
        mut watcher_rx: mpsc::Receiver<WatcherEvent>,
        mut outcomes_rx: mpsc::UnboundedReceiver<Outcome>,
        mut credential_rx: watch::Receiver<Option<String>>,
        mut commands_rx: mpsc::Receiver<Command>,
    ) {
        self.start_watcher();
        let mut credentials_open = true;

        let shutdown_reply = loop {
            let deadline = self.batcher.deadline();

            tokio::select! {
                Some(event) = watcher_rx.recv() => self.on_watcher_event(event),
                _ = sleep_until_deadline(deadline) => {
                    if let Some(batch) = self.batcher.take_due(Instant::now()) {
                        self.classify(batch);
                    }
                }
                Some((batch, result)) = outcomes_rx.recv() => {
                    self.in_flight -= 1;
                    self.dispatcher.dispatch(batch, result, &mut self.batcher);
                }
                changed = credential_rx.changed(), if credentials_open => {
                    if changed.is_err() {
                        credentials_open = false;
                        continue;
                    }
                    let has_key = credential_rx.borrow_and_update().is_some();
                    self.on_credential_change(has_key);
                }
                command = commands_rx.recv() => match command {
                    Some(Command::Start(reply)) => {
                        let _ = reply.send(self.start());
                    }
                    Some(Command::Stop(reply)) => {
                        let _ = reply.send(self.stop().await);
                    }
                    Some(Command::Snapshot(reply)) => {
                        let _ = reply.send(self.snapshot());
                    }
                    Some(Command::Shutdown(reply)) => break Some(reply),
                    None => break None,
                },
            }
        };

        if let Some(watcher) = self.watcher.take() {
            watcher.stop().await;
        }

        if self.in_flight > 0 {
            info!(in_flight = self.in_flight, "Waiting for in-flight classifications");
        }
        while self.in_flight > 0 {
            let Some((batch, result)) = outcomes_rx.recv().await else {
                break;
            };
            self.in_flight -= 1;
            self.dispatcher.dispatch(batch, result, &mut self.batcher);
        }

        let stats = self.dispatcher.stats();
        info!(
            batches = stats.batches_delivered,
            items = stats.items_delivered,
            failures = stats.failures,
            buffered = self.batcher.len(),
            "Chat pipeline stopped"
        );

        if let Some(reply) = shutdown_reply {
            let _ = reply.send(stats);
        }
    }

    fn on_watcher_event(&mut self, event: WatcherEvent) {
        match event {
            WatcherEvent::Messages(messages) => {
                // Extracted before a stop: buffered, flushed once monitoring resumes.
                if !self.batcher.is_active() {
                    debug!(held = messages.len(), "Monitoring stopped, holding messages");
                }
                let now = Instant::now();
                // One batch per trigger; the rest wait on the re-armed deadline.
                if self.batcher.push(messages, now) {
                    if let Some(batch) = self.batcher.take_ready(now) {
                        self.classify(batch);
                    }
                }
            }
            WatcherEvent::Attached(_) => self
                .dispatcher
                .publish_status(StatusNotice::new(StatusKind::Info, "Connected to live chat")),
            WatcherEvent::Detached(_) => self.dispatcher.publish_status(StatusNotice::new(
                StatusKind::Disconnected,
                "Live chat went away, waiting for it to come back",
            )),
            WatcherEvent::NotFound => self.dispatcher.publish_status(StatusNotice::new(
                StatusKind::Disconnected,
                "Chat not found. Is a live chat open on this page?",
            )),
        }
    }

    fn on_credential_change(&mut self, has_key: bool) {
        if has_key {
            info!(buffered = self.batcher.len(), "API key available");
            self.batcher.arm(Instant::now());
        } else {
            warn!("API key cleared");
        }
    }

    fn classify(&mut self, batch: Batch) {
        self.in_flight += 1;
        let classifier = self.classifier.clone();
        let outcomes = self.outcomes_tx.clone();

        debug!(batch = batch.len(), in_flight = self.in_flight, "Dispatching batch to classifier");
        tokio::spawn(async move {
            let result = classifier.classify(&batch).await;
            let _ = outcomes.send((batch, result));
        });
    }

    fn start_watcher(&mut self) {
        let watcher = ChatWatcher::new(self.document.clone(), self.config.watcher.clone());
        self.watcher = Some(watcher.spawn(self.watcher_tx.clone()));
    }

    fn start(&mut self) -> ChatsiftResult<()> {
        if self.watcher.is_some() {
            return Err(ChatsiftError::PipelineAlreadyRunning);
        }
        self.start_watcher();
        self.batcher.start(Instant::now());
        self.dispatcher
            .publish_status(StatusNotice::new(StatusKind::Info, "Monitoring started"));
        info!("Monitoring started");
        Ok(())
    }

    async fn stop(&mut self) -> ChatsiftResult<()> {
        let watcher = self.watcher.take().ok_or(ChatsiftError::PipelineNotRunning)?;
        watcher.stop().await;
        self.batcher.stop();
        self.dispatcher
            .publish_status(StatusNotice::new(StatusKind::Info, "Monitoring stopped"));
        info!(buffered = self.batcher.len(), "Monitoring stopped");
        Ok(())
    }

    fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            monitoring: self.watcher.is_some(),
            buffered_ids: self.batcher.pending().map(|m| m.id.clone()).collect(),
            in_flight: self.in_flight,
            stats: self.dispatcher.stats(),
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classifier;
    use crate::config::ChatSelectors;
    use crate::credentials::{CredentialStore, MemoryCredentialStore};
    use crate::models::{Category, ChatMessage};
    use crate::watcher::{MemoryDocument, MemoryNode};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Labels every message QUESTION, or fails while no key is stored.
    struct KeyedClassifier {
        credentials: Arc<MemoryCredentialStore>,
        calls: AtomicUsize,
        latency_ms: AtomicU64,
    }

    #[async_trait]
    impl Classifier for KeyedClassifier {
        fn name(&self) -> &str {
            "keyed"
        }

        async fn classify(&self, batch: &Batch) -> ChatsiftResult<Vec<ClassifiedMessage>> {
            let latency = self.latency_ms.load(Ordering::SeqCst);
            if latency > 0 {
                tokio::time::sleep(Duration::from_millis(latency)).await;
            }
            if self.credentials.get().is_none() {
                return Err(ChatsiftError::MissingCredential("unset".into()));
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(batch
                .messages
                .iter()
                .map(|m| ClassifiedMessage::new(m.clone(), Category::Question))
                .collect())
        }
    }

    type Harness = (
        Arc<MemoryDocument>,
        Arc<MemoryCredentialStore>,
        Arc<KeyedClassifier>,
        PipelineHandle,
    );

    fn keyed(key: Option<&str>) -> (Arc<MemoryCredentialStore>, Arc<KeyedClassifier>) {
        let credentials = Arc::new(MemoryCredentialStore::new(key.map(String::from)));
        let classifier = Arc::new(KeyedClassifier {
            credentials: credentials.clone(),
            calls: AtomicUsize::new(0),
            latency_ms: AtomicU64::new(0),
        });
        (credentials, classifier)
    }

    fn setup(key: Option<&str>) -> Harness {
        let doc = Arc::new(MemoryDocument::new());
        doc.mount_container(ChatSelectors::default().container);
        let (credentials, classifier) = keyed(key);
        let handle = Pipeline::new(
            ChatsiftConfig::default(),
            doc.clone(),
            classifier.clone(),
            credentials.clone(),
        )
        .spawn();
        (doc, credentials, classifier, handle)
    }

    /// A runtime driven by hand, with no task or watcher behind it.
    fn bare_runtime(classifier: DynClassifier) -> (Runtime, mpsc::UnboundedReceiver<Outcome>) {
        let config = ChatsiftConfig::default();
        let (watcher_tx, _) = mpsc::channel(1);
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let runtime = Runtime {
            batcher: Batcher::new(&config.batcher),
            dispatcher: Dispatcher::new(EVENT_CAPACITY),
            classifier,
            document: Arc::new(MemoryDocument::new()),
            config,
            watcher: None,
            watcher_tx,
            outcomes_tx,
            in_flight: 0,
        };
        (runtime, outcomes_rx)
    }

    fn chat(count: usize) -> Vec<ChatMessage> {
        (0..count)
            .map(|i| ChatMessage::new("viewer", format!("message number {}", i)).with_id(format!("m{}", i)))
            .collect()
    }

    fn line(author: &str, body: &str) -> crate::watcher::NodeRef {
        MemoryNode::chat_message(&ChatSelectors::default(), author, body, None).into_ref()
    }

    async fn next_results(rx: &mut broadcast::Receiver<PipelineEvent>) -> Vec<ClassifiedMessage> {
        loop {
            match rx.recv().await.unwrap() {
                PipelineEvent::Results(items) => return items,
                PipelineEvent::Status(_) => continue,
            }
        }
    }

    async fn next_status(rx: &mut broadcast::Receiver<PipelineEvent>) -> StatusNotice {
        loop {
            if let PipelineEvent::Status(notice) = rx.recv().await.unwrap() {
                return notice;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_flow_to_results() {
        let (doc, _creds, _classifier, handle) = setup(Some("key"));
        let mut rx = handle.subscribe();

        let connected = next_status(&mut rx).await;
        assert_eq!(connected.kind, StatusKind::Info);

        doc.append_nodes(vec![line("ana", "what is a trait object?"), line("bo", "how do lifetimes work")]);

        let items = next_results(&mut rx).await;
        let authors: Vec<_> = items.iter().map(|i| i.message.author.as_str()).collect();
        assert_eq!(authors, vec!["ana", "bo"]);

        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.items_delivered, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_message_flushes_after_debounce() {
        let (doc, _creds, classifier, handle) = setup(Some("key"));
        let mut rx = handle.subscribe();
        next_status(&mut rx).await;

        doc.append_nodes(vec![line("ana", "lonely question?")]);
        let items = next_results(&mut rx).await;
        assert_eq!(items.len(), 1);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_key_parks_messages_until_key_saved() {
        let (doc, creds, _classifier, handle) = setup(None);
        let mut rx = handle.subscribe();
        next_status(&mut rx).await;

        doc.append_nodes(vec![line("ana", "first question"), line("bo", "second question")]);

        let notice = next_status(&mut rx).await;
        assert_eq!(notice.kind, StatusKind::Configuration);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.buffered(), 2);
        assert_eq!(snapshot.stats.failures, 1);

        // Parked messages stay put until a key shows up.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.snapshot().await.unwrap().stats.failures, 1);

        creds.set(Some("now-set".to_string())).unwrap();
        let items = next_results(&mut rx).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].message.author, "ana");

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.buffered(), 0);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_and_start() {
        let (doc, _creds, classifier, handle) = setup(Some("key"));
        let mut rx = handle.subscribe();
        next_status(&mut rx).await;

        handle.stop().await.unwrap();
        assert!(matches!(handle.stop().await, Err(ChatsiftError::PipelineNotRunning)));
        assert!(!handle.snapshot().await.unwrap().monitoring);

        doc.append_nodes(vec![line("ana", "unseen while stopped"), line("bo", "also unseen")]);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);

        handle.start().await.unwrap();
        assert!(matches!(handle.start().await, Err(ChatsiftError::PipelineAlreadyRunning)));
        assert!(handle.snapshot().await.unwrap().monitoring);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight() {
        let (doc, _creds, classifier, handle) = setup(Some("key"));
        classifier.latency_ms.store(1_000, Ordering::SeqCst);
        let mut rx = handle.subscribe();
        next_status(&mut rx).await;

        doc.append_nodes(vec![line("ana", "slow question one"), line("bo", "slow question two")]);
        loop {
            if handle.snapshot().await.unwrap().in_flight == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let stats = handle.shutdown().await.unwrap();
        assert_eq!(stats.batches_delivered, 1);
        assert_eq!(stats.items_delivered, 2);
        assert_eq!(next_results(&mut rx).await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_trigger_sends_one_batch() {
        let (_creds, classifier) = keyed(Some("key"));
        let (mut runtime, mut outcomes) = bare_runtime(classifier);

        runtime.on_watcher_event(WatcherEvent::Messages(chat(6)));
        assert_eq!(runtime.in_flight, 1);
        assert_eq!(runtime.snapshot().buffered_ids, vec!["m2", "m3", "m4", "m5"]);

        let deadline = runtime.batcher.deadline().expect("remainder keeps a deadline");
        let (batch, result) = outcomes.recv().await.unwrap();
        assert_eq!(batch.ids(), vec!["m0", "m1"]);
        assert!(result.is_ok());

        // Nothing else goes out before the debounce deadline.
        assert!(runtime.batcher.take_due(deadline - Duration::from_millis(1)).is_none());
        let next = runtime.batcher.take_due(deadline).unwrap();
        assert_eq!(next.ids(), vec!["m2", "m3"]);
    }

    #[tokio::test]
    async fn test_messages_extracted_before_stop_are_kept() {
        let (_creds, classifier) = keyed(Some("key"));
        let (mut runtime, _outcomes) = bare_runtime(classifier.clone());

        runtime.batcher.stop();
        runtime.on_watcher_event(WatcherEvent::Messages(chat(3)));

        assert_eq!(runtime.in_flight, 0);
        assert!(runtime.batcher.deadline().is_none());
        assert_eq!(runtime.snapshot().buffered_ids, vec!["m0", "m1", "m2"]);

        runtime.batcher.start(Instant::now());
        let batch = runtime.batcher.take_ready(Instant::now()).unwrap();
        assert_eq!(batch.ids(), vec!["m0", "m1"]);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }
}
