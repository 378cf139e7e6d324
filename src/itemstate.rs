//! Item state changes: the one place read/flag flips go through.
//!
//! A state change (a) updates the store row, (b) re-tests the item against
//! every search folder, (c) refreshes the owning node's counters, and (d)
//! for children of a sync-enabled source, enqueues the matching remote
//! edit action. All steps are idempotent.

use crate::feedlist::NodeId;
use crate::remote::{edit, source};
use crate::subscription::SubscriptionKind;
use crate::{CoreCtx, CoreEvent};

/// Set an item's read state.
///
/// Returns whether anything changed; repeated calls are no-ops.
pub async fn set_read(ctx: &CoreCtx, item_id: i64, read: bool) -> bool {
    let changed = match ctx.db.set_item_read(item_id, read).await {
        Ok(changed) => changed,
        Err(e) => {
            tracing::warn!(item = item_id, error = %e, "failed to change read state");
            return false;
        }
    };
    if !changed {
        return false;
    }

    let Ok(Some(item)) = ctx.db.item_by_id(item_id).await else {
        return true;
    };

    crate::rules::search_folder::item_changed(ctx, &item).await;
    refresh_counters(ctx, &item.node_id).await;
    replicate(ctx, &item.node_id, &item.source_id, ReplicatedEdit::Read(read));
    true
}

/// Set an item's flag (star) state.
pub async fn set_flagged(ctx: &CoreCtx, item_id: i64, flagged: bool) -> bool {
    let changed = match ctx.db.set_item_flagged(item_id, flagged).await {
        Ok(changed) => changed,
        Err(e) => {
            tracing::warn!(item = item_id, error = %e, "failed to change flag state");
            return false;
        }
    };
    if !changed {
        return false;
    }

    let Ok(Some(item)) = ctx.db.item_by_id(item_id).await else {
        return true;
    };

    crate::rules::search_folder::item_changed(ctx, &item).await;
    refresh_counters(ctx, &item.node_id).await;
    replicate(
        ctx,
        &item.node_id,
        &item.source_id,
        ReplicatedEdit::Starred(flagged),
    );
    true
}

/// Mark everything in a node read, replicating each flip.
pub async fn mark_all_read(ctx: &CoreCtx, node_id: &NodeId) -> u64 {
    let items = match ctx.db.items_for_node(node_id).await {
        Ok(items) => items,
        Err(_) => return 0,
    };
    let mut changed = 0;
    for item in items {
        if !item.read && set_read(ctx, item.id, true).await {
            changed += 1;
        }
    }
    changed
}

enum ReplicatedEdit {
    Read(bool),
    Starred(bool),
}

/// Forward a state flip to the owning remote source, if any.
fn replicate(ctx: &CoreCtx, node_id: &NodeId, guid: &str, edit_kind: ReplicatedEdit) {
    let target = {
        let feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        let Some(subscription) = feedlist.subscription(node_id) else {
            return;
        };
        match subscription.kind {
            SubscriptionKind::ReaderStream | SubscriptionKind::TtrssStream => {
                source::source_root_of(&feedlist, node_id)
                    .map(|root| (root, subscription.source.clone()))
            }
            _ => None,
        }
    };

    if let Some((root, feed_url)) = target {
        match edit_kind {
            ReplicatedEdit::Read(read) => edit::mark_read(ctx, &root, guid, &feed_url, read),
            ReplicatedEdit::Starred(starred) => {
                edit::mark_starred(ctx, &root, guid, &feed_url, starred)
            }
        }
    }
}

async fn refresh_counters(ctx: &CoreCtx, node_id: &NodeId) {
    if let Ok(counts) = ctx.db.node_counts(node_id).await {
        let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        if let Some(node) = feedlist.node_mut(node_id) {
            node.item_count = counts.item_count;
            node.unread_count = counts.unread_count;
            node.new_count = counts.new_count;
        }
    }
    ctx.emit(CoreEvent::NodeUpdated(node_id.clone()));
}
