//! The auto-update scheduler: a coarse periodic tick that enqueues due
//! subscriptions and stale favicons.
//!
//! Retry policy lives here, not in the job runner: a failed fetch simply
//! becomes due again on a later tick. Offline mode suppresses network
//! scheduling but command and file sources still run.

use std::time::Duration;

use chrono::Utc;

use crate::feedlist::{NodeId, NodeKind};
use crate::subscription::{self, SubscriptionKind};
use crate::{remote, CoreCtx};

/// Seconds between scheduler passes.
pub const TICK_INTERVAL_SECS: u64 = 30;

/// Favicons are refreshed monthly.
const FAVICON_REFRESH_SECS: i64 = 30 * 24 * 60 * 60;

/// One scheduler pass. Returns the node ids that were enqueued.
///
/// Call this from a timer on the main context, or drive it manually in
/// tests with a chosen `now`.
pub fn tick(ctx: &CoreCtx, now: i64) -> Vec<NodeId> {
    let candidates: Vec<(NodeId, SchedKind)> = {
        let feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        let mut out = Vec::new();
        let root = feedlist.root_id().clone();
        feedlist.for_each_child(&root, &mut |node| match &node.kind {
            NodeKind::Feed { subscription } => {
                let kind = match subscription.kind {
                    // Stream children are fetched by their source's quick
                    // and full updates, not the generic interval logic.
                    SubscriptionKind::ReaderStream | SubscriptionKind::TtrssStream => {
                        SchedKind::Favicon
                    }
                    _ => SchedKind::Feed,
                };
                out.push((node.id.clone(), kind));
            }
            NodeKind::SourceRoot { .. } => out.push((node.id.clone(), SchedKind::Source)),
            _ => {}
        });
        out
    };

    let mut enqueued = Vec::new();
    for (node_id, kind) in candidates {
        let started = match kind {
            SchedKind::Feed => subscription::auto_update(ctx, &node_id, now),
            SchedKind::Source => remote::source::auto_update(ctx, &node_id, now),
            SchedKind::Favicon => false,
        };
        if started {
            enqueued.push(node_id.clone());
        }

        if !ctx.is_offline() && favicon_due(ctx, &node_id, now) {
            crate::favicon::discover(ctx, &node_id);
        }
    }

    enqueued
}

enum SchedKind {
    Feed,
    Source,
    Favicon,
}

fn favicon_due(ctx: &CoreCtx, node_id: &NodeId, now: i64) -> bool {
    let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
    let Some(subscription) = feedlist.subscription_mut(node_id) else {
        return false;
    };
    if subscription.discontinued {
        return false;
    }
    let last = subscription.update_state.last_favicon_poll;
    if last != 0 && now < last + FAVICON_REFRESH_SECS {
        return false;
    }
    // Stamp now so a failed probe does not retrigger every tick.
    subscription.update_state.last_favicon_poll = now;
    true
}

/// Spawn the periodic tick driving [`tick`] until the context's event
/// channel closes.
pub fn spawn(ctx: CoreCtx) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(TICK_INTERVAL_SECS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if ctx.events.is_closed() {
                return;
            }
            tick(&ctx, Utc::now().timestamp());
        }
    })
}
