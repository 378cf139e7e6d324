//! Tiny Tiny RSS: a single JSON-RPC endpoint with `op`-discriminated
//! bodies and a `session_id` instead of a bearer token.
//!
//! The login machine and the edit queue are shared with the Reader
//! dialects; only the wire format differs. TTRSS has no token step, so
//! edits post directly, still one at a time.

use serde::Deserialize;
use serde_json::json;

use crate::feedlist::{Node, NodeId};
use crate::storage::{merge_items, MergeOptions, ParsedItem};
use crate::subscription::{self, Subscription};
use crate::update::{OwnerId, UpdateFlags, UpdateRequest, UpdateResult, UpdateState};
use crate::{CoreCtx, CoreEvent};

use super::dialect::ReaderApi;
use super::edit::EditActionKind;
use super::session::{LoginState, MAX_AUTH_FAILURES};
use super::source::{apply_remote_entries, RemoteFeedEntry};

/// Headline batch size per child fetch.
const HEADLINE_LIMIT: u32 = 100;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    status: i64,
    #[serde(default)]
    content: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct TtrssFeed {
    id: i64,
    title: String,
    feed_url: String,
    #[serde(default)]
    cat_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TtrssHeadline {
    id: i64,
    title: String,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    author: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    updated: Option<i64>,
    #[serde(default)]
    unread: bool,
    #[serde(default)]
    marked: bool,
}

fn api_url(api: &ReaderApi) -> String {
    // For TTRSS the dialect table carries the single JSON-RPC URL in the
    // login slot.
    api.login_url.clone()
}

fn rpc_request(api: &ReaderApi, state: UpdateState, body: serde_json::Value) -> UpdateRequest {
    let mut request = UpdateRequest::new(api_url(api), state, Default::default());
    request.post_data = Some(body.to_string());
    request
}

// ============================================================================
// Login
// ============================================================================

pub fn login(ctx: &CoreCtx, node_id: &NodeId, flags: UpdateFlags, only_login: bool) {
    let request = {
        let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        let Some(node) = feedlist.node_mut(node_id) else {
            return;
        };
        let (username, password, state) = match node.subscription() {
            Some(subscription) => (
                subscription.username.clone().unwrap_or_default(),
                subscription
                    .password
                    .as_ref()
                    .map(|p| {
                        use secrecy::ExposeSecret;
                        p.expose_secret().to_string()
                    })
                    .unwrap_or_default(),
                subscription.update_state.clone(),
            ),
            None => return,
        };
        let Some(source) = node.remote_source_mut() else {
            return;
        };
        source.login_state = LoginState::InProgress;
        rpc_request(
            &source.api,
            state,
            json!({"op": "login", "user": username, "password": password}),
        )
    };

    let job_flags = UpdateFlags {
        no_feed: true,
        ..flags
    };
    let ctx2 = ctx.clone();
    let node_id2 = node_id.clone();
    ctx.queue.submit(
        request,
        OwnerId(node_id.clone()),
        job_flags,
        Box::new(move |result| {
            Box::pin(async move {
                login_complete(&ctx2, &node_id2, result, flags, only_login);
            })
        }),
    );
}

#[derive(Debug, Deserialize)]
struct LoginContent {
    session_id: String,
}

fn login_complete(
    ctx: &CoreCtx,
    node_id: &NodeId,
    result: UpdateResult,
    flags: UpdateFlags,
    only_login: bool,
) {
    let session_id = if result.http_status == 200 {
        serde_json::from_slice::<RpcEnvelope>(&result.data)
            .ok()
            .filter(|envelope| envelope.status == 0)
            .and_then(|envelope| {
                serde_json::from_value::<LoginContent>(envelope.content).ok()
            })
            .map(|content| content.session_id)
    } else {
        None
    };

    let ok = {
        let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        let Some(node) = feedlist.node_mut(node_id) else {
            return;
        };
        let Some(source) = node.remote_source_mut() else {
            return;
        };
        match session_id {
            Some(session_id) => {
                source.session_id = Some(session_id);
                source.login_state = LoginState::Active;
                source.auth_failures = 0;
                true
            }
            None => {
                source.auth_failures += 1;
                source.session_id = None;
                source.login_state = if source.auth_failures >= MAX_AUTH_FAILURES {
                    LoginState::NoAuth
                } else {
                    LoginState::None
                };
                if let Some(subscription) = node.subscription_mut() {
                    subscription.available = false;
                    subscription.error.update_error = Some("Login failed!".to_string());
                }
                false
            }
        }
    };

    if ok {
        if !only_login {
            subscription::update(ctx, node_id, flags);
        }
        super::edit::process(ctx, node_id);
    } else {
        ctx.emit(CoreEvent::AuthRequired(node_id.clone()));
    }
}

// ============================================================================
// Feed list
// ============================================================================

/// Build the getFeeds request. None without a session.
pub(crate) fn build_feedlist_request(
    source: &super::RemoteSource,
    state: UpdateState,
) -> Option<UpdateRequest> {
    let session_id = source.session_id.as_deref()?;
    Some(rpc_request(
        &source.api,
        state,
        json!({
            "op": "getFeeds",
            "sid": session_id,
            "cat_id": "-3",
            "include_nested": "true"
        }),
    ))
}

pub async fn process_feedlist_result(
    ctx: &CoreCtx,
    node_id: &NodeId,
    result: UpdateResult,
    _flags: UpdateFlags,
) {
    let Some(content) = unwrap_envelope(ctx, node_id, &result) else {
        return;
    };

    let feeds: Vec<TtrssFeed> = match serde_json::from_value(content) {
        Ok(feeds) => feeds,
        Err(e) => {
            tracing::debug!(node = %node_id, error = %e, "could not parse getFeeds content");
            return;
        }
    };

    let entries: Vec<RemoteFeedEntry> = feeds
        .iter()
        // Negative ids are virtual feeds (fresh, starred, ...), not
        // subscriptions.
        .filter(|feed| feed.id > 0)
        .map(|feed| RemoteFeedEntry {
            stream_id: feed.id.to_string(),
            url: feed.feed_url.clone(),
            title: feed.title.clone(),
            html_url: None,
            category: feed
                .cat_id
                .filter(|cat| *cat > 0)
                .map(|cat| (cat.to_string(), format!("Category {}", cat))),
        })
        .collect();

    apply_remote_entries(ctx, node_id, entries).await;
}

// ============================================================================
// Headlines (child feeds)
// ============================================================================

/// Build the getHeadlines request for a child subscription.
pub(crate) fn build_headlines_request(
    api: &ReaderApi,
    session_id: Option<&str>,
    subscription: &Subscription,
) -> Option<UpdateRequest> {
    let session_id = session_id?;
    let feed_id = subscription.metadata_value("feed-id")?.to_string();
    Some(rpc_request(
        api,
        subscription.update_state.clone(),
        json!({
            "op": "getHeadlines",
            "sid": session_id,
            "feed_id": feed_id,
            "limit": HEADLINE_LIMIT.to_string(),
            "show_content": "true",
            "view_mode": "all_articles"
        }),
    ))
}

pub async fn process_headlines_result(
    ctx: &CoreCtx,
    node_id: &NodeId,
    result: UpdateResult,
    _flags: UpdateFlags,
) {
    let Some(content) = unwrap_envelope(ctx, node_id, &result) else {
        return;
    };

    let headlines: Vec<TtrssHeadline> = match serde_json::from_value(content) {
        Ok(headlines) => headlines,
        Err(e) => {
            tracing::debug!(node = %node_id, error = %e, "could not parse headlines");
            let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
            if let Some(subscription) = feedlist.subscription_mut(node_id) {
                subscription.error.parse_error = Some(e.to_string());
                subscription.available = false;
            }
            return;
        }
    };

    let merge_opts = {
        let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        let Some(subscription) = feedlist.subscription_mut(node_id) else {
            return;
        };
        subscription.update_error_status(200, None, None);
        MergeOptions {
            mark_as_read: subscription.flags.mark_as_read,
            ..Default::default()
        }
    };

    let parsed: Vec<ParsedItem> = headlines
        .iter()
        .map(|headline| ParsedItem {
            source_id: Some(headline.id.to_string()),
            title: headline.title.clone(),
            source_url: headline.link.clone(),
            description: headline.content.clone(),
            author: headline.author.clone(),
            published: headline.updated,
            metadata: Vec::new(),
        })
        .collect();

    if let Err(e) = merge_items(&ctx.db, node_id, &parsed, &merge_opts).await {
        tracing::warn!(node = %node_id, error = %e, "headline merge failed");
        return;
    }

    for headline in &headlines {
        if let Ok(Some(item)) = ctx.db.item_by_source_id(node_id, &headline.id.to_string()).await
        {
            if !headline.unread {
                let _ = ctx.db.set_item_read(item.id, true).await;
            }
            if headline.marked {
                let _ = ctx.db.set_item_flagged(item.id, true).await;
            }
        }
    }

    crate::rules::search_folder::node_items_changed(ctx, node_id).await;
    subscription::finish_node_update(ctx, node_id).await;
}

/// Common envelope handling: session expiry, error statuses.
fn unwrap_envelope(
    ctx: &CoreCtx,
    node_id: &NodeId,
    result: &UpdateResult,
) -> Option<serde_json::Value> {
    if result.http_status == 401 {
        let root_id = {
            let feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
            super::source::source_root_of(&feedlist, node_id)
        };
        if let Some(root_id) = root_id {
            super::session::session_expired(ctx, &root_id);
        }
        return None;
    }
    if result.http_status != 200 || result.data.is_empty() {
        let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        if let Some(subscription) = feedlist.subscription_mut(node_id) {
            subscription.update_error_status(result.http_status, result.error.as_deref(), None);
        }
        return None;
    }

    match serde_json::from_slice::<RpcEnvelope>(&result.data) {
        Ok(envelope) if envelope.status == 0 => Some(envelope.content),
        Ok(envelope) => {
            // {"error": "NOT_LOGGED_IN"} means the session died.
            let error = envelope
                .content
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("unknown");
            tracing::debug!(node = %node_id, error = error, "ttrss rpc error");
            if error == "NOT_LOGGED_IN" {
                let root_id = {
                    let feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
                    super::source::source_root_of(&feedlist, node_id)
                };
                if let Some(root_id) = root_id {
                    super::session::session_expired(ctx, &root_id);
                }
            }
            None
        }
        Err(e) => {
            tracing::debug!(node = %node_id, error = %e, "could not parse rpc envelope");
            None
        }
    }
}

// ============================================================================
// Edits
// ============================================================================

/// Drain the edit queue directly; no token step in this dialect.
pub(crate) fn process_edits(ctx: &CoreCtx, node_id: &NodeId) {
    enum Step {
        Nothing,
        SkipHead,
        Post(UpdateRequest),
    }

    let step = {
        let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        match feedlist.node_mut(node_id) {
            Some(node) => {
                let root_state = node
                    .subscription()
                    .map(|s| s.update_state.clone())
                    .unwrap_or_default();
                match node.remote_source_mut() {
                    Some(source)
                        if source.edits.is_empty()
                            || source.edits.in_flight()
                            || source.session_id.is_none() =>
                    {
                        Step::Nothing
                    }
                    Some(source) => {
                        let session_id = source.session_id.clone().unwrap_or_default();
                        match source.edits.peek() {
                            Some(action) => {
                                match build_edit_body(&session_id, action.kind, action) {
                                    Some(body) => {
                                        source.edits.set_in_flight(true);
                                        Step::Post(rpc_request(&source.api, root_state, body))
                                    }
                                    None => {
                                        // No TTRSS equivalent; drop silently.
                                        source.edits.drop_head();
                                        Step::SkipHead
                                    }
                                }
                            }
                            None => Step::Nothing,
                        }
                    }
                    None => Step::Nothing,
                }
            }
            None => Step::Nothing,
        }
    };

    let request = match step {
        Step::Nothing => return,
        Step::SkipHead => {
            process_edits(ctx, node_id);
            return;
        }
        Step::Post(request) => request,
    };

    let flags = UpdateFlags {
        no_feed: true,
        ..UpdateFlags::NONE
    };
    let ctx2 = ctx.clone();
    let node_id2 = node_id.clone();
    ctx.queue.submit(
        request,
        OwnerId(node_id.clone()),
        flags,
        Box::new(move |result| {
            Box::pin(async move {
                edit_complete(&ctx2, &node_id2, result);
            })
        }),
    );
}

fn build_edit_body(
    session_id: &str,
    kind: EditActionKind,
    action: &super::EditAction,
) -> Option<serde_json::Value> {
    let guid = action.guid.as_deref().unwrap_or("");
    match kind {
        // field 2 = unread flag; mode 0 clears, mode 1 sets.
        EditActionKind::MarkRead => Some(json!({
            "op": "updateArticle", "sid": session_id,
            "article_ids": guid, "mode": 0, "field": 2
        })),
        EditActionKind::MarkUnread => Some(json!({
            "op": "updateArticle", "sid": session_id,
            "article_ids": guid, "mode": 1, "field": 2
        })),
        // field 0 = starred flag.
        EditActionKind::MarkStarred => Some(json!({
            "op": "updateArticle", "sid": session_id,
            "article_ids": guid, "mode": 1, "field": 0
        })),
        EditActionKind::MarkUnstarred => Some(json!({
            "op": "updateArticle", "sid": session_id,
            "article_ids": guid, "mode": 0, "field": 0
        })),
        EditActionKind::AddSubscription => Some(json!({
            "op": "subscribeToFeed", "sid": session_id,
            "feed_url": action.feed_url.as_deref().unwrap_or("")
        })),
        EditActionKind::RemoveSubscription => Some(json!({
            "op": "unsubscribeFeed", "sid": session_id,
            "feed_id": action.feed_url.as_deref().unwrap_or("")
        })),
        // The kept-unread tracking tag and labels are Reader-only.
        EditActionKind::TrackingKeptUnread
        | EditActionKind::AddLabel
        | EditActionKind::RemoveLabel => None,
    }
}

fn edit_complete(ctx: &CoreCtx, node_id: &NodeId, result: UpdateResult) {
    let ok = result.http_status == 200
        && serde_json::from_slice::<RpcEnvelope>(&result.data)
            .map(|envelope| envelope.status == 0)
            .unwrap_or(false);

    let (finished, callback) = {
        let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        let Some(source) = feedlist
            .node_mut(node_id)
            .and_then(Node::remote_source_mut)
        else {
            return;
        };
        source.edits.set_in_flight(false);
        if ok {
            let action = source.edits.take_head();
            (action.is_some(), action.and_then(|mut a| a.callback.take()))
        } else {
            tracing::debug!(node = %node_id, status = result.http_status, "ttrss edit failed");
            (false, source.edits.take_head_callback())
        }
    };

    if let Some(callback) = callback {
        callback(ctx, ok);
    }
    if finished {
        process_edits(ctx, node_id);
    }
}
