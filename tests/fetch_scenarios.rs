//! End-to-end fetch scenarios through the full context: local files,
//! redirects with conditional requests, and permanent-gone handling.

mod common;

use std::io::Write;

use common::{add_feed, eventually, setup};
use eddy::scheduler;
use eddy::subscription;
use eddy::update::UpdateFlags;
use pretty_assertions::assert_eq;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TWO_ITEM_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Local Feed</title>
  <item><guid>A</guid><title>Alpha</title><link>https://example.com/a</link></item>
  <item><guid>B</guid><title>Beta</title><link>https://example.com/b</link></item>
</channel></rss>"#;

/// Subscribe to a local file, mark one item read, refetch unchanged.
#[tokio::test]
async fn test_basic_file_fetch_and_refetch() {
    let (ctx, _events) = setup().await;

    let mut feed_file = tempfile::NamedTempFile::new().unwrap();
    feed_file.write_all(TWO_ITEM_RSS.as_bytes()).unwrap();
    let source = format!("file://{}", feed_file.path().display());

    let node_id = add_feed(&ctx, "", &source);
    assert!(subscription::update(&ctx, &node_id, UpdateFlags::NONE));

    let db = ctx.db.clone();
    let id = node_id.clone();
    assert!(
        eventually(|| {
            let db = db.clone();
            let id = id.clone();
            async move { db.node_counts(&id).await.unwrap().item_count == 2 }
        })
        .await
    );

    let counts = ctx.db.node_counts(&node_id).await.unwrap();
    assert_eq!(counts.new_count, 2);
    assert_eq!(counts.unread_count, 2);

    // Feed metadata flowed back into the node.
    {
        let feedlist = ctx.feedlist.lock().unwrap();
        assert_eq!(feedlist.node(&node_id).unwrap().title, "Local Feed");
    }

    // Mark A read, refetch the unchanged file.
    let alpha = ctx.db.item_by_source_id(&node_id, "A").await.unwrap().unwrap();
    eddy::itemstate::set_read(&ctx, alpha.id, true).await;

    assert!(subscription::update(&ctx, &node_id, UpdateFlags::NONE));
    let db = ctx.db.clone();
    let id = node_id.clone();
    assert!(
        eventually(|| {
            let db = db.clone();
            let id = id.clone();
            async move {
                let counts = db.node_counts(&id).await.unwrap();
                counts.new_count == 0 && counts.unread_count == 1
            }
        })
        .await
    );

    let alpha = ctx.db.item_by_source_id(&node_id, "A").await.unwrap().unwrap();
    assert!(alpha.read);
}

/// A permanent redirect rewrites the source; the follow-up fetch sends
/// the stored ETag and a 304 leaves everything untouched.
#[tokio::test]
async fn test_redirect_and_conditional_fetch() {
    let (ctx, _events) = setup().await;
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(
            ResponseTemplate::new(301).insert_header("Location", format!("{}/b", server.uri())),
        )
        .mount(&server)
        .await;

    // Conditional re-request wins over the plain mock below.
    Mock::given(method("GET"))
        .and(path("/b"))
        .and(header("If-None-Match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v1\"")
                .insert_header("Content-Type", "application/rss+xml")
                .set_body_string(TWO_ITEM_RSS),
        )
        .mount(&server)
        .await;

    let node_id = add_feed(&ctx, "Feed", &format!("{}/a", server.uri()));
    assert!(subscription::update(&ctx, &node_id, UpdateFlags::NONE));

    let ctx2 = ctx.clone();
    let id = node_id.clone();
    let expected_source = format!("{}/b", server.uri());
    assert!(
        eventually(|| {
            let ctx = ctx2.clone();
            let id = id.clone();
            let expected = expected_source.clone();
            async move {
                let rewritten = {
                    let feedlist = ctx.feedlist.lock().unwrap();
                    feedlist
                        .subscription(&id)
                        .is_some_and(|s| s.source == expected && s.update_state.etag.is_some())
                };
                rewritten && ctx.db.node_counts(&id).await.unwrap().item_count == 2
            }
        })
        .await
    );

    {
        let feedlist = ctx.feedlist.lock().unwrap();
        let subscription = feedlist.subscription(&node_id).unwrap();
        assert_eq!(subscription.update_state.etag.as_deref(), Some("\"v1\""));
    }

    // Second fetch: the transport must send If-None-Match and accept 304.
    assert!(subscription::update(&ctx, &node_id, UpdateFlags::NONE));
    let requests_hit_b = || async {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == "/b")
            .count()
    };
    assert!(eventually(|| async { requests_hit_b().await >= 2 }).await);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let counts = ctx.db.node_counts(&node_id).await.unwrap();
    assert_eq!(counts.new_count, 2, "a 304 must not re-merge");
    {
        let feedlist = ctx.feedlist.lock().unwrap();
        let subscription = feedlist.subscription(&node_id).unwrap();
        assert_eq!(subscription.update_state.etag.as_deref(), Some("\"v1\""));
        assert!(subscription.available);
    }
}

/// HTTP 410 flips the discontinued flag and the scheduler never enqueues
/// the subscription again.
#[tokio::test]
async fn test_gone_discontinues_subscription() {
    let (ctx, _events) = setup().await;
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/dead"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let node_id = add_feed(&ctx, "Dead", &format!("{}/dead", server.uri()));
    assert!(subscription::update(&ctx, &node_id, UpdateFlags::NONE));

    let ctx2 = ctx.clone();
    let id = node_id.clone();
    assert!(
        eventually(|| {
            let ctx = ctx2.clone();
            let id = id.clone();
            async move {
                let feedlist = ctx.feedlist.lock().unwrap();
                feedlist.subscription(&id).is_some_and(|s| s.discontinued)
            }
        })
        .await
    );

    // Force everything due and tick: the discontinued feed stays out.
    {
        let mut feedlist = ctx.feedlist.lock().unwrap();
        let subscription = feedlist.subscription_mut(&node_id).unwrap();
        subscription.update_state.last_poll = 0;
        subscription.update_interval = 1;
    }
    let enqueued = scheduler::tick(&ctx, chrono::Utc::now().timestamp());
    assert!(!enqueued.contains(&node_id));
}

/// `updateInterval == -2` gates auto-updates entirely.
#[tokio::test]
async fn test_never_interval_not_scheduled() {
    let (ctx, _events) = setup().await;
    let node_id = add_feed(&ctx, "Never", "https://unreachable.example/feed");
    {
        let mut feedlist = ctx.feedlist.lock().unwrap();
        let subscription = feedlist.subscription_mut(&node_id).unwrap();
        subscription.update_interval = -2;
        subscription.update_state.last_poll = 0;
    }

    let enqueued = scheduler::tick(&ctx, chrono::Utc::now().timestamp());
    assert!(!enqueued.contains(&node_id));
}

/// Offline mode suppresses network sources but file sources still run.
#[tokio::test]
async fn test_offline_allows_local_sources() {
    let (ctx, _events) = setup().await;
    ctx.set_offline(true);

    let mut feed_file = tempfile::NamedTempFile::new().unwrap();
    feed_file.write_all(TWO_ITEM_RSS.as_bytes()).unwrap();

    let local_id = add_feed(&ctx, "Local", feed_file.path().to_str().unwrap());
    let remote_id = add_feed(&ctx, "Remote", "https://unreachable.example/feed");
    {
        let mut feedlist = ctx.feedlist.lock().unwrap();
        for id in [&local_id, &remote_id] {
            let subscription = feedlist.subscription_mut(id).unwrap();
            subscription.update_interval = 1;
            subscription.update_state.last_poll = 0;
        }
    }

    let enqueued = scheduler::tick(&ctx, chrono::Utc::now().timestamp());
    assert!(enqueued.contains(&local_id));
    assert!(!enqueued.contains(&remote_id));
}
