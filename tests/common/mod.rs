//! Shared fixtures: an in-memory store, a live job queue with its pump
//! drained on a background task, and tree-building helpers.
#![allow(dead_code)] // not every test binary uses every helper

use std::future::Future;
use std::time::Duration;

use eddy::feedlist::{Node, NodeId, NodeKind};
use eddy::storage::Database;
use eddy::subscription::Subscription;
use eddy::update::UpdateQueue;
use eddy::{CoreCtx, CoreEvent, Settings};
use tokio::sync::mpsc::UnboundedReceiver;

/// Build a full context against an in-memory store. The result pump runs
/// on a background task, which therefore acts as the main context.
pub async fn setup() -> (CoreCtx, UnboundedReceiver<CoreEvent>) {
    let db = Database::open(":memory:").await.unwrap();
    let (queue, pump) = UpdateQueue::new(Duration::from_secs(10));
    tokio::spawn(pump.run());
    CoreCtx::new(db, queue, Settings::default())
}

/// Add a plain feed node under the tree root.
pub fn add_feed(ctx: &CoreCtx, title: &str, source: &str) -> NodeId {
    add_feed_with(ctx, title, source, |_| {})
}

/// Add a feed node, letting the caller adjust the subscription first.
pub fn add_feed_with(
    ctx: &CoreCtx,
    title: &str,
    source: &str,
    configure: impl FnOnce(&mut Subscription),
) -> NodeId {
    let mut feedlist = ctx.feedlist.lock().unwrap();
    let mut subscription = Subscription::new(source);
    configure(&mut subscription);
    let id = feedlist.generate_id();
    let node = Node::new(
        id,
        title,
        NodeKind::Feed {
            subscription: Box::new(subscription),
        },
    );
    let root = feedlist.root_id().clone();
    feedlist.add_child(&root, node, None).unwrap()
}

/// Poll an async condition until it holds or a 10 s deadline passes.
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Wait for a specific event, discarding others; false on timeout.
pub async fn wait_for_event(
    events: &mut UnboundedReceiver<CoreEvent>,
    wanted: impl Fn(&CoreEvent) -> bool,
) -> bool {
    let deadline = Duration::from_secs(10);
    loop {
        match tokio::time::timeout(deadline, events.recv()).await {
            Ok(Some(event)) if wanted(&event) => return true,
            Ok(Some(_)) => continue,
            _ => return false,
        }
    }
}
