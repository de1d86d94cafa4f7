use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

use super::dom::{ChatDocument, ChatNode, ContainerId, MutationRecord, MutationStream, NodeRef};
use crate::config::ChatSelectors;
use crate::error::{ChatsiftError, ChatsiftResult};

/// Element with a flat selector → text map standing in for its subtree.
#[derive(Debug, Clone)]
pub struct MemoryNode {
    tag: String,
    element: bool,
    fields: HashMap<String, String>,
}

impl MemoryNode {
    pub fn element(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            element: true,
            fields: HashMap::new(),
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        let mut fields = HashMap::new();
        fields.insert(String::new(), content.into());
        Self {
            tag: "#text".to_string(),
            element: false,
            fields,
        }
    }

    pub fn with_field(mut self, selector: impl Into<String>, text: impl Into<String>) -> Self {
        self.fields.insert(selector.into(), text.into());
        self
    }

    /// A chat line shaped the way `selectors` expects.
    pub fn chat_message(
        selectors: &ChatSelectors,
        author: &str,
        body: &str,
        timestamp: Option<&str>,
    ) -> Self {
        let mut node = Self::element(&selectors.message_tag)
            .with_field(&selectors.author, author)
            .with_field(&selectors.body, body);
        if let Some(ts) = timestamp {
            node = node.with_field(&selectors.timestamp, ts);
        }
        node
    }

    pub fn into_ref(self) -> NodeRef {
        Arc::new(self)
    }
}

impl ChatNode for MemoryNode {
    fn is_element(&self) -> bool {
        self.element
    }

    fn tag_name(&self) -> String {
        self.tag.clone()
    }

    fn query_text(&self, selector: &str) -> ChatsiftResult<Option<String>> {
        Ok(self.fields.get(selector).cloned())
    }
}

struct MountedContainer {
    id: ContainerId,
    selector: String,
    observers: Vec<mpsc::UnboundedSender<Vec<MutationRecord>>>,
}

#[derive(Default)]
struct DocumentState {
    next_id: u64,
    container: Option<MountedContainer>,
}

/// Single-container document kept in memory. Used by the CLI host and tests.
#[derive(Default)]
pub struct MemoryDocument {
    state: Mutex<DocumentState>,
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DocumentState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mounts a fresh container, replacing (and disconnecting) any existing one.
    pub fn mount_container(&self, selector: impl Into<String>) -> ContainerId {
        let mut state = self.lock();
        state.next_id += 1;
        let id = ContainerId(state.next_id);
        let selector = selector.into();
        debug!(%id, selector = %selector, "Mounted chat container");
        state.container = Some(MountedContainer {
            id,
            selector,
            observers: Vec::new(),
        });
        id
    }

    pub fn remove_container(&self) -> Option<ContainerId> {
        let removed = self.lock().container.take().map(|c| c.id);
        if let Some(id) = removed {
            debug!(%id, "Removed chat container");
        }
        removed
    }

    pub fn current_container(&self) -> Option<ContainerId> {
        self.lock().container.as_ref().map(|c| c.id)
    }

    pub fn observer_count(&self) -> usize {
        self.lock()
            .container
            .as_ref()
            .map(|c| c.observers.iter().filter(|o| !o.is_closed()).count())
            .unwrap_or(0)
    }

    /// Inserts nodes as one mutation. Returns false when no container is mounted.
    pub fn append_nodes(&self, nodes: Vec<NodeRef>) -> bool {
        let mut state = self.lock();
        let Some(container) = state.container.as_mut() else {
            return false;
        };

        let record = MutationRecord::added(nodes);
        container
            .observers
            .retain(|observer| observer.send(vec![record.clone()]).is_ok());
        true
    }
}

impl ChatDocument for MemoryDocument {
    fn query_container(&self, selector: &str) -> Option<ContainerId> {
        self.lock()
            .container
            .as_ref()
            .filter(|c| c.selector == selector)
            .map(|c| c.id)
    }

    fn contains(&self, container: ContainerId) -> bool {
        self.lock()
            .container
            .as_ref()
            .is_some_and(|c| c.id == container)
    }

    fn observe(&self, container: ContainerId) -> ChatsiftResult<MutationStream> {
        let mut state = self.lock();
        match state.container.as_mut() {
            Some(mounted) if mounted.id == container => {
                let (tx, rx) = mpsc::unbounded_channel();
                mounted.observers.push(tx);
                Ok(rx)
            }
            _ => Err(ChatsiftError::ContainerDetached(container.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SELECTOR: &str = "#items";

    #[test]
    fn test_mount_and_query() {
        let doc = MemoryDocument::new();
        assert!(doc.query_container(SELECTOR).is_none());

        let id = doc.mount_container(SELECTOR);
        assert_eq!(doc.query_container(SELECTOR), Some(id));
        assert!(doc.query_container("#other").is_none());
        assert!(doc.contains(id));
    }

    #[test]
    fn test_remount_gets_new_identity() {
        let doc = MemoryDocument::new();
        let first = doc.mount_container(SELECTOR);
        let second = doc.mount_container(SELECTOR);

        assert_ne!(first, second);
        assert!(!doc.contains(first));
        assert!(doc.contains(second));
    }

    #[tokio::test]
    async fn test_observe_receives_appends() {
        let doc = MemoryDocument::new();
        let id = doc.mount_container(SELECTOR);
        let mut stream = doc.observe(id).unwrap();

        let node = MemoryNode::element("chat-line").with_field("#message", "hi there");
        assert!(doc.append_nodes(vec![node.into_ref()]));

        let records = stream.recv().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].added_nodes.len(), 1);
    }

    #[test]
    fn test_observe_detached_container_fails() {
        let doc = MemoryDocument::new();
        let id = doc.mount_container(SELECTOR);
        doc.remove_container();
        assert!(doc.observe(id).is_err());
        assert!(!doc.append_nodes(vec![]));
    }

    #[test]
    fn test_dropped_stream_is_pruned() {
        let doc = MemoryDocument::new();
        let id = doc.mount_container(SELECTOR);
        let stream = doc.observe(id).unwrap();
        assert_eq!(doc.observer_count(), 1);

        drop(stream);
        doc.append_nodes(vec![MemoryNode::text("x").into_ref()]);
        assert_eq!(doc.observer_count(), 0);
    }

    #[test]
    fn test_chat_message_node() {
        let selectors = ChatSelectors::default();
        let node = MemoryNode::chat_message(&selectors, "ana", "why?", None);
        assert!(node.is_element());
        assert_eq!(node.tag_name(), selectors.message_tag);
        assert_eq!(
            node.query_text(&selectors.author).unwrap(),
            Some("ana".to_string())
        );
        assert_eq!(node.query_text(&selectors.timestamp).unwrap(), None);
    }
}
