//! The feed list: a typed tree of folders, feeds, search folders, and
//! remote source roots.
//!
//! Nodes live in an id-keyed arena; parents hold ordered child-id lists.
//! Removal is recursive and reports every removed descendant bottom-up so
//! per-kind cleanup (items, update state, favicon) runs in a defined
//! order.

mod node;
pub mod opml;

pub use node::{Capabilities, Node, NodeId, NodeKind};

use std::collections::HashMap;

use sha2::{Digest, Sha256};

/// The tree. One per session, owned by the main context.
#[derive(Debug)]
pub struct FeedList {
    nodes: HashMap<NodeId, Node>,
    root: NodeId,
    next_seq: u64,
}

impl Default for FeedList {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedList {
    pub fn new() -> Self {
        let root_id: NodeId = "root".to_string();
        let mut nodes = HashMap::new();
        nodes.insert(
            root_id.clone(),
            Node::new(root_id.clone(), "", NodeKind::Folder),
        );
        Self {
            nodes,
            root: root_id,
            next_seq: 1,
        }
    }

    pub fn root_id(&self) -> &NodeId {
        &self.root
    }

    /// Mint a fresh node id, unique within this tree.
    pub fn generate_id(&mut self) -> NodeId {
        loop {
            let hash = Sha256::digest(format!("node-{}", self.next_seq).as_bytes());
            self.next_seq += 1;
            let id = format!("{:x}", hash)[..8].to_string();
            if !self.nodes.contains_key(&id) {
                return id;
            }
        }
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn subscription(&self, id: &str) -> Option<&crate::subscription::Subscription> {
        self.node(id).and_then(Node::subscription)
    }

    pub fn subscription_mut(
        &mut self,
        id: &str,
    ) -> Option<&mut crate::subscription::Subscription> {
        self.node_mut(id).and_then(Node::subscription_mut)
    }

    /// First node whose subscription source equals `url`, searching the
    /// subtree under `ancestor` (pass the root id for the whole tree).
    pub fn find_by_url(&self, ancestor: &str, url: &str) -> Option<&Node> {
        let node = self.node(ancestor)?;
        if node
            .subscription()
            .is_some_and(|subscription| subscription.source == url)
        {
            return Some(node);
        }
        for child in &node.children {
            if let Some(found) = self.find_by_url(child, url) {
                return Some(found);
            }
        }
        None
    }

    /// Direct children of a node, in order.
    pub fn children(&self, id: &str) -> Vec<NodeId> {
        self.node(id).map(|n| n.children.clone()).unwrap_or_default()
    }

    /// Visit every descendant of `ancestor` depth-first, parents first.
    pub fn for_each_child(&self, ancestor: &str, f: &mut dyn FnMut(&Node)) {
        for child_id in self.children(ancestor) {
            if let Some(child) = self.node(&child_id) {
                f(child);
            }
            self.for_each_child(&child_id, f);
        }
    }

    /// Ids of every feed-like node (feeds and source roots) in the tree.
    pub fn feed_node_ids(&self) -> Vec<NodeId> {
        let mut ids = Vec::new();
        self.for_each_child(&self.root.clone(), &mut |node| {
            if node.subscription().is_some() {
                ids.push(node.id.clone());
            }
        });
        ids
    }

    /// Ids of every search folder in the tree.
    pub fn search_folder_ids(&self) -> Vec<NodeId> {
        let mut ids = Vec::new();
        self.for_each_child(&self.root.clone(), &mut |node| {
            if matches!(node.kind, NodeKind::SearchFolder { .. }) {
                ids.push(node.id.clone());
            }
        });
        ids
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Insert a node under a parent. `position` of `None` appends.
    ///
    /// Returns the node id, or `None` when the parent is unknown or not
    /// foldable.
    pub fn add_child(&mut self, parent_id: &str, mut node: Node, position: Option<usize>) -> Option<NodeId> {
        let parent = self.nodes.get_mut(parent_id)?;
        if !parent.kind.capabilities().foldable && parent.id != self.root {
            return None;
        }

        let id = node.id.clone();
        node.parent = Some(parent_id.to_string());
        match position {
            Some(pos) if pos <= parent.children.len() => parent.children.insert(pos, id.clone()),
            _ => parent.children.push(id.clone()),
        }
        self.nodes.insert(id.clone(), node);
        Some(id)
    }

    /// Move a node under a new parent, appending it there.
    ///
    /// Refuses to create cycles (a node cannot move under its own
    /// descendant) and refuses unknown ids.
    pub fn reparent(&mut self, id: &str, new_parent_id: &str) -> bool {
        if id == new_parent_id || !self.nodes.contains_key(id) || !self.nodes.contains_key(new_parent_id)
        {
            return false;
        }
        // Walk up from the new parent; finding `id` would create a cycle.
        let mut cursor = Some(new_parent_id.to_string());
        while let Some(current) = cursor {
            if current == id {
                return false;
            }
            cursor = self.nodes.get(&current).and_then(|n| n.parent.clone());
        }

        let old_parent = match self.nodes.get(id).and_then(|n| n.parent.clone()) {
            Some(parent) => parent,
            None => return false, // the root cannot be reparented
        };
        if let Some(parent) = self.nodes.get_mut(&old_parent) {
            parent.children.retain(|child| child != id);
        }
        if let Some(parent) = self.nodes.get_mut(new_parent_id) {
            parent.children.push(id.to_string());
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent = Some(new_parent_id.to_string());
        }
        true
    }

    /// Remove a node and all its descendants.
    ///
    /// Returns the removed nodes bottom-up (children before parents), so
    /// callers can run per-kind cleanup in a defined order.
    pub fn remove(&mut self, id: &str) -> Vec<Node> {
        if id == self.root {
            return Vec::new();
        }
        let Some(node) = self.nodes.get(id) else {
            return Vec::new();
        };

        if let Some(parent_id) = node.parent.clone() {
            if let Some(parent) = self.nodes.get_mut(&parent_id) {
                parent.children.retain(|child| child != id);
            }
        }

        let mut removed = Vec::new();
        self.remove_recursive(id, &mut removed);
        removed
    }

    fn remove_recursive(&mut self, id: &str, removed: &mut Vec<Node>) {
        let children = self.children(id);
        for child in children {
            self.remove_recursive(&child, removed);
        }
        if let Some(node) = self.nodes.remove(id) {
            removed.push(node);
        }
    }
}

// ============================================================================
// Coordinated removal
// ============================================================================

/// Remove a node with full cleanup: jobs cancelled, store rows and icons
/// dropped for every descendant (bottom-up), search folders re-evaluated,
/// and — for a child of a sync-enabled source — the unsubscribe
/// replicated remotely unless another copy of the feed remains.
pub async fn remove_node(ctx: &crate::CoreCtx, node_id: &NodeId) {
    use crate::subscription::SubscriptionKind;

    // Capture what remote propagation needs before the node disappears.
    let unsubscribe = {
        let feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        feedlist.node(node_id).and_then(|node| {
            let subscription = node.subscription()?;
            match subscription.kind {
                SubscriptionKind::ReaderStream | SubscriptionKind::TtrssStream => {
                    let root = crate::remote::source::source_root_of(&feedlist, node_id)?;
                    let stream_id = subscription
                        .metadata_value("feed-id")
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| format!("feed/{}", subscription.source));
                    Some((root, stream_id, subscription.source.clone()))
                }
                _ => None,
            }
        })
    };

    let removed = {
        let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        feedlist.remove(node_id)
    };
    if removed.is_empty() {
        return;
    }

    // Children come out before their parents, so per-kind cleanup runs in
    // a defined order.
    for node in &removed {
        crate::subscription::cancel_updates(ctx, &node.id);
        if node.subscription().is_some() {
            let _ = ctx.db.remove_items(&node.id).await;
            let _ = ctx.db.remove_update_state(&node.id).await;
            let _ = ctx.db.remove_icon(&node.id).await;
        }
    }

    crate::rules::search_folder::rebuild_all(ctx).await;

    // Propagate the removal only if there is no other copy of the feed.
    if let Some((root, stream_id, url)) = unsubscribe {
        let still_referenced = {
            let feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
            let tree_root = feedlist.root_id().clone();
            feedlist.find_by_url(&tree_root, &url).is_some()
        };
        if !still_referenced {
            crate::remote::edit::remove_subscription(ctx, &root, &stream_id);
        }
    }

    ctx.emit(crate::CoreEvent::FeedListChanged);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::Subscription;

    fn feed_node(list: &mut FeedList, title: &str, url: &str) -> Node {
        let id = list.generate_id();
        Node::new(
            id,
            title,
            NodeKind::Feed {
                subscription: Box::new(Subscription::new(url)),
            },
        )
    }

    #[test]
    fn test_ids_are_unique() {
        let mut list = FeedList::new();
        let a = list.generate_id();
        let b = list.generate_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_add_and_find_by_url() {
        let mut list = FeedList::new();
        let root = list.root_id().clone();
        let node = feed_node(&mut list, "Example", "https://example.com/feed");
        list.add_child(&root, node, None).unwrap();

        let found = list.find_by_url(&root, "https://example.com/feed").unwrap();
        assert_eq!(found.title, "Example");
        assert!(list.find_by_url(&root, "https://other.example/feed").is_none());
    }

    #[test]
    fn test_position_insert() {
        let mut list = FeedList::new();
        let root = list.root_id().clone();
        let a = feed_node(&mut list, "A", "https://a.example/feed");
        let b = feed_node(&mut list, "B", "https://b.example/feed");
        let c = feed_node(&mut list, "C", "https://c.example/feed");
        list.add_child(&root, a, None);
        list.add_child(&root, b, None);
        let c_id = list.add_child(&root, c, Some(1)).unwrap();
        assert_eq!(list.children(&root)[1], c_id);
    }

    #[test]
    fn test_remove_is_recursive_and_bottom_up() {
        let mut list = FeedList::new();
        let root = list.root_id().clone();
        let folder_id = list.generate_id();
        let folder = Node::new(folder_id.clone(), "Folder", NodeKind::Folder);
        list.add_child(&root, folder, None);
        let feed = feed_node(&mut list, "Feed", "https://example.com/feed");
        let feed_id = list.add_child(&folder_id, feed, None).unwrap();

        let removed = list.remove(&folder_id);
        assert_eq!(removed.len(), 2);
        // Bottom-up: the feed comes out before its folder.
        assert_eq!(removed[0].id, feed_id);
        assert_eq!(removed[1].id, folder_id);
        assert!(list.node(&folder_id).is_none());
        assert!(list.node(&feed_id).is_none());
    }

    #[test]
    fn test_reparent_rejects_cycles() {
        let mut list = FeedList::new();
        let root = list.root_id().clone();
        let outer_id = list.generate_id();
        list.add_child(&root, Node::new(outer_id.clone(), "Outer", NodeKind::Folder), None);
        let inner_id = list.generate_id();
        list.add_child(&outer_id, Node::new(inner_id.clone(), "Inner", NodeKind::Folder), None);

        assert!(!list.reparent(&outer_id, &inner_id));
        assert!(list.reparent(&inner_id, &root));
        assert_eq!(list.node(&inner_id).unwrap().parent.as_deref(), Some("root"));
    }

    #[test]
    fn test_feeds_not_foldable() {
        let mut list = FeedList::new();
        let root = list.root_id().clone();
        let feed = feed_node(&mut list, "Feed", "https://example.com/feed");
        let feed_id = list.add_child(&root, feed, None).unwrap();
        let other = feed_node(&mut list, "Other", "https://other.example/feed");
        assert!(list.add_child(&feed_id, other, None).is_none());
    }
}
