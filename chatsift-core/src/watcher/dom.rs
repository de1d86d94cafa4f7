use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::ChatsiftResult;

/// Opaque identity of a chat container element. A container that is torn
/// down and re-created gets a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerId(pub u64);

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "container#{}", self.0)
    }
}

/// A node inserted into the watched container.
pub trait ChatNode: Send + Sync {
    /// Text/comment nodes report false.
    fn is_element(&self) -> bool;

    fn tag_name(&self) -> String;

    /// Rendered text of the first descendant matching `selector`.
    fn query_text(&self, selector: &str) -> ChatsiftResult<Option<String>>;
}

pub type NodeRef = Arc<dyn ChatNode>;

/// One child-list change.
#[derive(Clone, Default)]
pub struct MutationRecord {
    pub added_nodes: Vec<NodeRef>,
}

impl MutationRecord {
    pub fn added(nodes: Vec<NodeRef>) -> Self {
        Self { added_nodes: nodes }
    }
}

impl std::fmt::Debug for MutationRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationRecord")
            .field("added_nodes", &self.added_nodes.len())
            .finish()
    }
}

/// Delivers mutation batches for one observed container. Dropping it
/// disconnects the listener.
pub type MutationStream = mpsc::UnboundedReceiver<Vec<MutationRecord>>;

/// The host page, as far as the watcher is concerned.
pub trait ChatDocument: Send + Sync {
    fn query_container(&self, selector: &str) -> Option<ContainerId>;

    /// Whether `container` is still attached to the document.
    fn contains(&self, container: ContainerId) -> bool;

    /// Attach a subtree child-list listener to `container`.
    fn observe(&self, container: ContainerId) -> ChatsiftResult<MutationStream>;
}

pub type DynChatDocument = Arc<dyn ChatDocument>;
