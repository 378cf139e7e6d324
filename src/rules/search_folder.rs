//! Search folders: nodes whose content is a rule set evaluated over the
//! whole item store.
//!
//! The matched id set is materialised on the node payload. A rule-set edit
//! triggers a full rebuild; an item insert/delete/column change re-tests
//! just that item.

use std::collections::BTreeSet;

use crate::feedlist::{NodeId, NodeKind};
use crate::storage::Item;
use crate::{CoreCtx, CoreEvent};

use super::RuleSet;

/// Payload of a `search-folder` node.
#[derive(Debug, Clone, Default)]
pub struct SearchFolder {
    pub rules: RuleSet,
    /// Materialised ids of the matching items.
    matched: BTreeSet<i64>,
}

impl SearchFolder {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules,
            matched: BTreeSet::new(),
        }
    }

    /// The materialised view, ascending by item id.
    pub fn item_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.matched.iter().copied()
    }

    pub fn contains(&self, item_id: i64) -> bool {
        self.matched.contains(&item_id)
    }

    pub fn len(&self) -> usize {
        self.matched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matched.is_empty()
    }

    /// Re-test one item against the rule set; returns true if the view
    /// changed.
    pub fn retest_item(&mut self, item: &Item) -> bool {
        if self.rules.matches(item) {
            self.matched.insert(item.id)
        } else {
            self.matched.remove(&item.id)
        }
    }

    /// Drop an id the store no longer has.
    pub fn forget_item(&mut self, item_id: i64) -> bool {
        self.matched.remove(&item_id)
    }

    /// Replace the whole view from a full evaluation pass.
    pub fn rebuild(&mut self, items: &[Item]) {
        self.matched = items
            .iter()
            .filter(|item| self.rules.matches(item))
            .map(|item| item.id)
            .collect();
    }
}

// ============================================================================
// Invalidation entry points
// ============================================================================

/// Full re-evaluation of one search folder (rule-set edit, import).
pub async fn rebuild(ctx: &CoreCtx, node_id: &NodeId) {
    let items = match ctx.db.all_items().await {
        Ok(items) => items,
        Err(e) => {
            tracing::warn!(error = %e, "search folder rebuild failed to load items");
            return;
        }
    };

    let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
    if let Some(node) = feedlist.node_mut(node_id) {
        if let NodeKind::SearchFolder { folder } = &mut node.kind {
            folder.rebuild(&items);
            let (count, unread) = derived_counts(folder, &items);
            node.item_count = count;
            node.unread_count = unread;
            drop(feedlist);
            ctx.emit(CoreEvent::SearchFolderUpdated(node_id.clone()));
        }
    }
}

/// Full re-evaluation of every search folder.
pub async fn rebuild_all(ctx: &CoreCtx) {
    let folders: Vec<NodeId> = {
        let feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        feedlist.search_folder_ids()
    };
    for node_id in folders {
        rebuild(ctx, &node_id).await;
    }
}

/// Incremental invalidation: one item changed (insert, state flip).
pub async fn item_changed(ctx: &CoreCtx, item: &Item) {
    let changed: Vec<NodeId> = {
        let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        let ids = feedlist.search_folder_ids();
        let mut changed = Vec::new();
        for node_id in ids {
            if let Some(node) = feedlist.node_mut(&node_id) {
                if let NodeKind::SearchFolder { folder } = &mut node.kind {
                    if folder.retest_item(item) {
                        changed.push(node_id);
                    }
                }
            }
        }
        changed
    };

    for node_id in &changed {
        refresh_counters(ctx, node_id).await;
        ctx.emit(CoreEvent::SearchFolderUpdated(node_id.clone()));
    }
}

/// Incremental invalidation: an item was deleted from the store.
pub fn item_removed(ctx: &CoreCtx, item_id: i64) {
    let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
    let ids = feedlist.search_folder_ids();
    for node_id in ids {
        if let Some(node) = feedlist.node_mut(&node_id) {
            if let NodeKind::SearchFolder { folder } = &mut node.kind {
                if folder.forget_item(item_id) {
                    node.item_count = node.item_count.saturating_sub(1);
                    ctx.emit(CoreEvent::SearchFolderUpdated(node_id.clone()));
                }
            }
        }
    }
}

/// Batch invalidation after a merge touched a node's items.
///
/// Cache trimming may have deleted rows and the merge may have inserted
/// or rewritten others, so every search folder gets a rebuild pass. The
/// per-item path is for state flips where the touched row is known.
pub async fn node_items_changed(ctx: &CoreCtx, _node_id: &NodeId) {
    rebuild_all(ctx).await;
}

/// Search folder counters are derived, never stored.
fn derived_counts(folder: &SearchFolder, items: &[Item]) -> (u32, u32) {
    let count = folder.len() as u32;
    let unread = items
        .iter()
        .filter(|item| folder.contains(item.id) && !item.read)
        .count() as u32;
    (count, unread)
}

async fn refresh_counters(ctx: &CoreCtx, node_id: &NodeId) {
    let items = match ctx.db.all_items().await {
        Ok(items) => items,
        Err(_) => return,
    };
    let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
    if let Some(node) = feedlist.node_mut(node_id) {
        if let NodeKind::SearchFolder { folder } = &node.kind {
            let (count, unread) = derived_counts(folder, &items);
            node.item_count = count;
            node.unread_count = unread;
        }
    }
}
