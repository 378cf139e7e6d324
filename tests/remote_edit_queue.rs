//! Remote edit-queue protocol against a mock Reader-family endpoint:
//! token-then-edit sequencing, strict FIFO order, the mark-unread double
//! action, failure retention, and the login lockout.

mod common;

use common::{eventually, setup};
use eddy::feedlist::NodeId;
use eddy::remote::{edit, source, LoginState, RemoteVariant};
use eddy::CoreCtx;
use eddy::CoreEvent;
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A Reader-family account whose endpoints live on the mock server.
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

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/accounts/ClientLogin"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("SID=s\nLSID=l\nAuth=secrettoken\n"),
        )
        .mount(server)
        .await;
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/reader/api/0/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("edittoken"))
        .mount(server)
        .await;
}

async fn mount_edit_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/reader/api/0/edit-tag"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(server)
        .await;
}

/// Requests to the edit endpoint, in arrival order, as (path, body).
async fn edit_requests(server: &MockServer) -> Vec<(String, String)> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|request| {
            (
                request.url.path().to_string(),
                String::from_utf8_lossy(&request.body).to_string(),
            )
        })
        .collect()
}

/// Marking two items read in order transmits them in order, each edit
/// preceded by its own token fetch.
#[tokio::test]
async fn test_edit_order_with_token_fetches() {
    let (ctx, _events) = setup().await;
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_token(&server).await;
    mount_edit_ok(&server).await;

    let account = add_account(&ctx, &server.uri());

    edit::mark_read(&ctx, &account, "item-X", "http://feeds.example/one", true);
    edit::mark_read(&ctx, &account, "item-Y", "http://feeds.example/one", true);

    // The queue drains fully: both edits acknowledged.
    let ctx2 = ctx.clone();
    let account2 = account.clone();
    assert!(
        eventually(|| {
            let ctx = ctx2.clone();
            let account = account2.clone();
            async move {
                let feedlist = ctx.feedlist.lock().unwrap();
                feedlist
                    .node(&account)
                    .and_then(|node| node.remote_source())
                    .is_some_and(|source| source.edits.is_empty())
            }
        })
        .await
    );

    let requests = edit_requests(&server).await;
    let sequence: Vec<&str> = requests.iter().map(|(p, _)| p.as_str()).collect();
    assert_eq!(
        sequence,
        vec![
            "/accounts/ClientLogin",
            "/reader/api/0/token",
            "/reader/api/0/edit-tag",
            "/reader/api/0/token",
            "/reader/api/0/edit-tag",
        ]
    );

    let edits: Vec<&String> = requests
        .iter()
        .filter(|(p, _)| p == "/reader/api/0/edit-tag")
        .map(|(_, body)| body)
        .collect();
    assert!(edits[0].contains("i=item-X"));
    assert!(edits[0].contains("&T=edittoken"));
    assert!(edits[1].contains("i=item-Y"));
}

/// Marking an item unread emits the edit-tag remove plus the mandatory
/// tracking-kept-unread follow-up, in that order.
#[tokio::test]
async fn test_mark_unread_emits_double_action() {
    let (ctx, _events) = setup().await;
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_token(&server).await;
    mount_edit_ok(&server).await;

    let account = add_account(&ctx, &server.uri());
    edit::mark_read(&ctx, &account, "item-Z", "http://feeds.example/one", false);

    let ctx2 = ctx.clone();
    let account2 = account.clone();
    assert!(
        eventually(|| {
            let ctx = ctx2.clone();
            let account = account2.clone();
            async move {
                let feedlist = ctx.feedlist.lock().unwrap();
                feedlist
                    .node(&account)
                    .and_then(|node| node.remote_source())
                    .is_some_and(|source| source.edits.is_empty())
            }
        })
        .await
    );

    let requests = edit_requests(&server).await;
    let edits: Vec<&String> = requests
        .iter()
        .filter(|(p, _)| p == "/reader/api/0/edit-tag")
        .map(|(_, body)| body)
        .collect();
    assert_eq!(edits.len(), 2);
    // First the kept-unread/remove-read pair...
    assert!(edits[0].contains("a=user%2F-%2Fstate%2Fcom.google%2Fkept-unread"));
    assert!(edits[0].contains("r=user%2F-%2Fstate%2Fcom.google%2Fread"));
    // ...then the tracking tag.
    assert!(edits[1].contains("a=user%2F-%2Fstate%2Fcom.google%2Ftracking-kept-unread"));
}

/// A failing edit stays at the head; the next push retries it first.
#[tokio::test]
async fn test_failed_edit_retained_at_head() {
    let (ctx, _events) = setup().await;
    let server = MockServer::start().await;
    mount_login(&server).await;
    mount_token(&server).await;

    // First edit attempt is rejected, everything afterwards succeeds.
    Mock::given(method("POST"))
        .and(path("/reader/api/0/edit-tag"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_edit_ok(&server).await;

    let account = add_account(&ctx, &server.uri());
    edit::mark_read(&ctx, &account, "item-A", "http://feeds.example/one", true);

    // Wait for the failed attempt to settle: the POST went out, the
    // protocol is idle again, and the action is still at the head.
    let ctx2 = ctx.clone();
    let account2 = account.clone();
    assert!(
        eventually(|| {
            let ctx = ctx2.clone();
            let account = account2.clone();
            let server = &server;
            async move {
                let attempts = edit_requests(server)
                    .await
                    .iter()
                    .filter(|(p, _)| p == "/reader/api/0/edit-tag")
                    .count();
                let feedlist = ctx.feedlist.lock().unwrap();
                attempts >= 1
                    && feedlist
                        .node(&account)
                        .and_then(|node| node.remote_source())
                        .is_some_and(|source| {
                            !source.edits.in_flight()
                                && source.edits.len() == 1
                                && source.edits.contains_guid("item-A")
                        })
            }
        })
        .await
    );

    // A later push re-arms the drain; the retained head goes out first.
    edit::mark_read(&ctx, &account, "item-B", "http://feeds.example/one", true);

    let ctx2 = ctx.clone();
    let account2 = account.clone();
    assert!(
        eventually(|| {
            let ctx = ctx2.clone();
            let account = account2.clone();
            async move {
                let feedlist = ctx.feedlist.lock().unwrap();
                feedlist
                    .node(&account)
                    .and_then(|node| node.remote_source())
                    .is_some_and(|source| source.edits.is_empty())
            }
        })
        .await
    );

    let requests = edit_requests(&server).await;
    let edits: Vec<&String> = requests
        .iter()
        .filter(|(p, _)| p == "/reader/api/0/edit-tag")
        .map(|(_, body)| body)
        .collect();
    assert_eq!(edits.len(), 3);
    assert!(edits[0].contains("i=item-A"));
    assert!(edits[1].contains("i=item-A"), "retained head retries first");
    assert!(edits[2].contains("i=item-B"));
}

/// Three consecutive login failures lock the account into NO_AUTH and
/// every failure raises the auth-required signal.
#[tokio::test]
async fn test_login_failures_lock_out() {
    let (ctx, mut events) = setup().await;
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/accounts/ClientLogin"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Error=BadAuthentication"))
        .mount(&server)
        .await;

    let account = add_account(&ctx, &server.uri());

    for attempt in 1..=3u32 {
        edit::mark_read(&ctx, &account, "g", "http://feeds.example/one", true);
        assert!(
            common::wait_for_event(&mut events, |event| {
                matches!(event, CoreEvent::AuthRequired(id) if id == &account)
            })
            .await,
            "expected auth signal on attempt {}",
            attempt
        );
    }

    let feedlist = ctx.feedlist.lock().unwrap();
    let source_state = feedlist
        .node(&account)
        .and_then(|node| node.remote_source())
        .map(|source| (source.login_state, source.auth_failures))
        .unwrap();
    assert_eq!(source_state, (LoginState::NoAuth, 3));
}
