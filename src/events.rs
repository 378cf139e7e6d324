//! Signals the core emits for the embedding shell.

use crate::feedlist::NodeId;

/// Core → shell notifications.
///
/// The shell owns one receiver and reacts however it likes (redraw a tree
/// row, pop a credentials dialog). The core never blocks on the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    /// A node's items or counters changed.
    NodeUpdated(NodeId),
    /// The tree structure changed (add/remove/reparent/import).
    FeedListChanged,
    /// A search folder's materialised view changed.
    SearchFolderUpdated(NodeId),
    /// A remote source needs credentials before it can continue.
    AuthRequired(NodeId),
    /// A subscription's favicon was stored or replaced.
    IconUpdated(NodeId),
}
