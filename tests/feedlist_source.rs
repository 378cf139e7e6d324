//! End-to-end remote-account flow against a mock Reader endpoint: login,
//! subscription-list import with category folders, stream-contents child
//! fetches, and the quick-update poll.

mod common;

use common::{eventually, setup};
use eddy::feedlist::{NodeId, NodeKind};
use eddy::remote::{source, LoginState, RemoteVariant};
use eddy::update::UpdateFlags;
use eddy::CoreCtx;
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn add_account(ctx: &CoreCtx, base: &str) -> NodeId {
    let mut feedlist = ctx.feedlist.lock().unwrap();
    source::add_source(
        &mut feedlist,
        RemoteVariant::FreshRss,
        base,
        "Account",
        "user@example.com",
        SecretString::from("hunter2".to_string()),
    )
    .unwrap()
}

const STREAM_JSON: &str = r#"{
  "items": [
    {
      "id": "tag:google.com,2005:reader/item/001",
      "title": "Remote one",
      "published": 1700000000,
      "canonical": [{"href": "https://a.example/posts/1"}],
      "summary": {"content": "first body"},
      "categories": ["user/1/state/com.google/read"]
    },
    {
      "id": "tag:google.com,2005:reader/item/002",
      "title": "Remote two",
      "published": 1700000100,
      "alternate": [{"href": "https://a.example/posts/2"}],
      "content": {"content": "second body"},
      "categories": []
    }
  ]
}"#;

#[tokio::test]
async fn test_account_sync_end_to_end() {
    let (ctx, _events) = setup().await;
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/accounts/ClientLogin"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Auth=secrettoken\n"))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/reader/api/0/subscription/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"subscriptions": [
                {"id": "feed/https://a.example/rss", "title": "Feed A",
                 "htmlUrl": "https://a.example",
                 "categories": [{"id": "user/-/label/News", "label": "News"}]}
            ]}"#,
        ))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/reader/api/0/stream/contents/.*$"))
        .respond_with(ResponseTemplate::new(200).set_body_string(STREAM_JSON))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/reader/api/0/unread-count"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"unreadcounts": [
                {"id": "feed/https://a.example/rss", "count": 1,
                 "newestItemTimestampUsec": "1700000200000000"}
            ]}"#,
        ))
        .mount(&server)
        .await;

    let account = add_account(&ctx, &server.uri());
    assert!(source::update_root(&ctx, &account, UpdateFlags::NONE));

    // Login, list fetch, child creation, and the child's stream fetch all
    // chain through the pump.
    let ctx2 = ctx.clone();
    let account2 = account.clone();
    assert!(
        eventually(|| {
            let ctx = ctx2.clone();
            let account = account2.clone();
            async move {
                let child = {
                    let feedlist = ctx.feedlist.lock().unwrap();
                    let mut found = None;
                    feedlist.for_each_child(&account, &mut |node| {
                        if matches!(node.kind, NodeKind::Feed { .. }) {
                            found = Some(node.id.clone());
                        }
                    });
                    found
                };
                match child {
                    Some(child) => ctx.db.node_counts(&child).await.unwrap().item_count == 2,
                    None => false,
                }
            }
        })
        .await
    );

    // Child sits under a "News" folder below the account root.
    let child_id = {
        let feedlist = ctx.feedlist.lock().unwrap();
        let account_node = feedlist.node(&account).unwrap();
        assert_eq!(account_node.children.len(), 1);
        let folder = feedlist.node(&account_node.children[0]).unwrap();
        assert_eq!(folder.title, "News");
        assert!(matches!(folder.kind, NodeKind::Folder));
        assert_eq!(folder.children.len(), 1);
        let child = feedlist.node(&folder.children[0]).unwrap();
        let subscription = child.subscription().unwrap();
        assert_eq!(subscription.source, "https://a.example/rss");
        assert_eq!(
            subscription.metadata_value("feed-id"),
            Some("feed/https://a.example/rss")
        );
        assert_eq!(child.title, "Feed A");
        child.id.clone()
    };

    // Remote read state landed on the merged rows.
    let one = ctx
        .db
        .item_by_source_id(&child_id, "tag:google.com,2005:reader/item/001")
        .await
        .unwrap()
        .unwrap();
    assert!(one.read);
    let two = ctx
        .db
        .item_by_source_id(&child_id, "tag:google.com,2005:reader/item/002")
        .await
        .unwrap()
        .unwrap();
    assert!(!two.read);

    // The account is active with a cached bearer token.
    {
        let feedlist = ctx.feedlist.lock().unwrap();
        let remote = feedlist.node(&account).unwrap().remote_source().unwrap();
        assert_eq!(remote.login_state, LoginState::Active);
        assert!(remote.auth_token.as_deref().unwrap().starts_with("GoogleLogin auth="));
    }

    // Quick update: with the full refresh fresh, the next root update
    // polls unread counts and re-fetches only the stale child.
    let stream_fetches_before = stream_fetch_count(&server).await;
    {
        let mut feedlist = ctx.feedlist.lock().unwrap();
        let remote = feedlist
            .node_mut(&account)
            .unwrap()
            .remote_source_mut()
            .unwrap();
        remote.last_quick_update = 0;
    }
    assert!(source::update_root(&ctx, &account, UpdateFlags::NONE));

    assert!(
        eventually(|| {
            let server = &server;
            async move { stream_fetch_count(server).await > stream_fetches_before }
        })
        .await
    );
}

async fn stream_fetch_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| {
            request
                .url
                .path()
                .starts_with("/reader/api/0/stream/contents/")
        })
        .count()
}

/// Migration converts children into plain local feeds.
#[tokio::test]
async fn test_migration_clears_remote_ids() {
    let (ctx, _events) = setup().await;
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/accounts/ClientLogin"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Auth=tok\n"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/reader/api/0/subscription/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"subscriptions": [{"id": "feed/https://a.example/rss", "title": "Feed A"}]}"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/reader/api/0/stream/contents/.*$"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"items": []}"#))
        .mount(&server)
        .await;

    let account = add_account(&ctx, &server.uri());
    source::update_root(&ctx, &account, UpdateFlags::NONE);

    let ctx2 = ctx.clone();
    let account2 = account.clone();
    assert!(
        eventually(|| {
            let ctx = ctx2.clone();
            let account = account2.clone();
            async move {
                let feedlist = ctx.feedlist.lock().unwrap();
                !feedlist.children(&account).is_empty()
            }
        })
        .await
    );

    source::migrate(&ctx, &account);

    let feedlist = ctx.feedlist.lock().unwrap();
    let remote = feedlist.node(&account).unwrap().remote_source().unwrap();
    assert_eq!(remote.login_state, LoginState::Migrate);
    let mut checked = 0;
    feedlist.for_each_child(&account, &mut |node| {
        if let Some(subscription) = node.subscription() {
            assert_eq!(
                subscription.kind,
                eddy::subscription::SubscriptionKind::Feed
            );
            assert_eq!(subscription.metadata_value("feed-id"), None);
            checked += 1;
        }
    });
    assert_eq!(checked, 1);
}
