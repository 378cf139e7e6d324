//! The OPML-backed remote root: its child set *is* the account's
//! subscription list.
//!
//! A root update pulls the remote list, diffs it against the children
//! (folders derived from the first remote category), and removes local
//! children that vanished remotely. Between full refreshes a cheap
//! unread-count poll picks the children worth fetching. Child feeds use a
//! stream subscription type that substitutes the dialect's
//! stream-contents URL and bearer token at request time.

use chrono::Utc;
use serde::Deserialize;

use crate::feedlist::{FeedList, Node, NodeId, NodeKind};
use crate::storage::{merge_items, MergeOptions, ParsedItem};
use crate::subscription::{self, Subscription, SubscriptionKind};
use crate::update::{UpdateFlags, UpdateRequest, UpdateResult};
use crate::{CoreCtx, CoreEvent};

use super::session::{self, LoginState};
use super::{RemoteSource, RemoteVariant, FULL_UPDATE_INTERVAL_SECS, QUICK_UPDATE_INTERVAL_SECS};

// ============================================================================
// Wire types (Reader dialect JSON)
// ============================================================================

#[derive(Debug, Deserialize)]
struct SubscriptionList {
    subscriptions: Vec<RemoteSubscription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteSubscription {
    /// Stream id, `feed/{url}` for feed streams.
    id: String,
    #[serde(default)]
    title: Option<String>,
    /// Some dialects carry the feed URL separately from the id.
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    categories: Vec<RemoteCategory>,
}

impl RemoteSubscription {
    fn feed_url(&self) -> &str {
        self.url
            .as_deref()
            .or_else(|| self.id.strip_prefix("feed/"))
            .unwrap_or(&self.id)
    }
}

#[derive(Debug, Deserialize)]
struct RemoteCategory {
    id: String,
    label: String,
}

#[derive(Debug, Deserialize)]
struct UnreadCounts {
    #[serde(default)]
    unreadcounts: Vec<UnreadCount>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnreadCount {
    id: String,
    #[serde(default)]
    count: i64,
    /// Microseconds as a decimal string.
    #[serde(default)]
    newest_item_timestamp_usec: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamContents {
    #[serde(default)]
    items: Vec<StreamItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamItem {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    published: Option<i64>,
    #[serde(default)]
    updated: Option<i64>,
    #[serde(default)]
    canonical: Vec<Href>,
    #[serde(default)]
    alternate: Vec<Href>,
    #[serde(default)]
    summary: Option<ContentBody>,
    #[serde(default)]
    content: Option<ContentBody>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    categories: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Href {
    href: String,
}

#[derive(Debug, Deserialize)]
struct ContentBody {
    content: String,
}

impl StreamItem {
    fn link(&self) -> Option<&str> {
        self.canonical
            .first()
            .or_else(|| self.alternate.first())
            .map(|href| href.href.as_str())
    }

    fn is_read(&self) -> bool {
        self.categories
            .iter()
            .any(|c| c.ends_with("state/com.google/read"))
    }

    fn is_starred(&self) -> bool {
        self.categories
            .iter()
            .any(|c| c.ends_with("state/com.google/starred"))
    }
}

// ============================================================================
// Source creation
// ============================================================================

/// Create a source-root node for a remote account under the tree root.
pub fn add_source(
    feedlist: &mut FeedList,
    variant: RemoteVariant,
    base_url: &str,
    title: &str,
    username: &str,
    password: secrecy::SecretString,
) -> Option<NodeId> {
    let mut subscription = Subscription::new(base_url);
    subscription.kind = match variant {
        RemoteVariant::TinyTinyRss => SubscriptionKind::TtrssRoot,
        _ => SubscriptionKind::ReaderRoot,
    };
    subscription.username = Some(username.to_string());
    subscription.password = Some(password);

    let id = feedlist.generate_id();
    let node = Node::new(
        id,
        title,
        NodeKind::SourceRoot {
            subscription: Box::new(subscription),
            source: RemoteSource::new(variant, base_url),
        },
    );
    let root = feedlist.root_id().clone();
    feedlist.add_child(&root, node, None)
}

/// Walk up from a child to its owning source root.
pub fn source_root_of(feedlist: &FeedList, node_id: &NodeId) -> Option<NodeId> {
    let mut cursor = Some(node_id.clone());
    while let Some(current) = cursor {
        let node = feedlist.node(&current)?;
        if matches!(node.kind, NodeKind::SourceRoot { .. }) {
            return Some(current);
        }
        cursor = node.parent.clone();
    }
    None
}

// ============================================================================
// Root updates
// ============================================================================

/// Update the source root, driven by its login state and the full/quick
/// cadence. Returns false when nothing was enqueued.
pub fn update_root(ctx: &CoreCtx, node_id: &NodeId, flags: UpdateFlags) -> bool {
    enum Step {
        Nothing,
        Login,
        ResetAndLogin,
        Fetch(UpdateRequest),
        Quick,
    }

    let step = {
        let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        let Some(node) = feedlist.node_mut(node_id) else {
            return false;
        };
        let root_state = node
            .subscription()
            .map(|s| s.update_state.clone())
            .unwrap_or_default();
        match node.remote_source_mut() {
            Some(source) => match source.login_state {
                LoginState::None => Step::Login,
                LoginState::InProgress => Step::Nothing,
                LoginState::Migrate => Step::Nothing,
                LoginState::NoAuth => {
                    // Only a manual user update may break the lockout.
                    if flags.priority_high {
                        Step::ResetAndLogin
                    } else {
                        Step::Nothing
                    }
                }
                LoginState::Active => {
                    let now = Utc::now().timestamp();
                    let full_due = source.last_full_update == 0
                        || now - source.last_full_update >= FULL_UPDATE_INTERVAL_SECS
                        || flags.priority_high;
                    if full_due {
                        if source.variant == RemoteVariant::TinyTinyRss {
                            match super::ttrss::build_feedlist_request(source, root_state) {
                                Some(request) => Step::Fetch(request),
                                None => Step::Nothing,
                            }
                        } else {
                            let mut request = UpdateRequest::new(
                                &source.api.subscription_list_url,
                                root_state,
                                Default::default(),
                            );
                            if let Some(auth) = &source.auth_token {
                                request.set_auth_value(auth.clone());
                            }
                            Step::Fetch(request)
                        }
                    } else if now - source.last_quick_update >= QUICK_UPDATE_INTERVAL_SECS {
                        Step::Quick
                    } else {
                        Step::Nothing
                    }
                }
            },
            None => Step::Nothing,
        }
    };

    match step {
        Step::Nothing => false,
        Step::Login => {
            session::login(ctx, node_id, flags, false);
            true
        }
        Step::ResetAndLogin => {
            session::reset_auth_lockout(ctx, node_id);
            session::login(ctx, node_id, flags, false);
            true
        }
        Step::Fetch(request) => {
            {
                let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
                if let Some(subscription) = feedlist.subscription_mut(node_id) {
                    subscription.update_state.touch_poll(Utc::now().timestamp());
                }
            }
            subscription::submit_feed_request(ctx, node_id, request, flags);
            true
        }
        Step::Quick => {
            quick_update(ctx, node_id);
            true
        }
    }
}

/// Scheduler entry for a source root.
pub fn auto_update(ctx: &CoreCtx, node_id: &NodeId, _now: i64) -> bool {
    if ctx.is_offline() {
        return false;
    }
    update_root(ctx, node_id, UpdateFlags::NONE)
}

// ============================================================================
// Subscription-list processing
// ============================================================================

/// Digest a fetched subscription list: diff it into the child set.
pub async fn process_feedlist_result(
    ctx: &CoreCtx,
    node_id: &NodeId,
    result: UpdateResult,
    _flags: UpdateFlags,
) {
    if result.http_status == 401 {
        session::session_expired(ctx, node_id);
        return;
    }
    if result.http_status != 200 || result.data.is_empty() {
        let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        if let Some(subscription) = feedlist.subscription_mut(node_id) {
            subscription.update_error_status(
                result.http_status,
                result.error.as_deref(),
                None,
            );
        }
        return;
    }

    let list: SubscriptionList = match serde_json::from_slice(&result.data) {
        Ok(list) => list,
        Err(e) => {
            tracing::debug!(node = %node_id, error = %e, "could not parse subscription list");
            let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
            if let Some(subscription) = feedlist.subscription_mut(node_id) {
                subscription.error.parse_error = Some(e.to_string());
                subscription.available = false;
            }
            return;
        }
    };

    let entries: Vec<RemoteFeedEntry> = list
        .subscriptions
        .iter()
        .map(|remote| RemoteFeedEntry {
            stream_id: remote.id.clone(),
            url: remote.feed_url().to_string(),
            title: remote
                .title
                .clone()
                .unwrap_or_else(|| remote.feed_url().to_string()),
            html_url: remote.html_url.clone(),
            category: remote
                .categories
                .first()
                .map(|c| (c.id.clone(), c.label.clone())),
        })
        .collect();

    apply_remote_entries(ctx, node_id, entries).await;
}

/// A dialect-neutral remote subscription entry, fed to the diff.
pub(crate) struct RemoteFeedEntry {
    pub stream_id: String,
    pub url: String,
    pub title: String,
    pub html_url: Option<String>,
    /// First remote category as `(id, label)`.
    pub category: Option<(String, String)>,
}

/// Diff remote entries into the child set, clean up removals, and fetch
/// fresh children. Shared by the Reader and TTRSS dialects.
pub(crate) async fn apply_remote_entries(
    ctx: &CoreCtx,
    node_id: &NodeId,
    entries: Vec<RemoteFeedEntry>,
) {
    let (added, removed_nodes) = {
        let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        merge_remote_entries(&mut feedlist, node_id, &entries)
    };

    // Per-kind cleanup for everything the diff removed.
    let removed_node_ids: Vec<NodeId> = removed_nodes.iter().map(|node| node.id.clone()).collect();
    for node_id in &removed_node_ids {
        let _ = ctx.db.remove_items(node_id).await;
        let _ = ctx.db.remove_update_state(node_id).await;
        let _ = ctx.db.remove_icon(node_id).await;
        subscription::cancel_updates(ctx, node_id);
    }

    {
        let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        if let Some(subscription) = feedlist.subscription_mut(node_id) {
            subscription.update_error_status(200, None, None);
        }
        if let Some(source) = feedlist
            .node_mut(node_id)
            .and_then(|node| node.remote_source_mut())
        {
            source.last_full_update = Utc::now().timestamp();
        }
    }

    ctx.emit(CoreEvent::FeedListChanged);

    // Fresh children have no items yet; fetch them right away.
    for child in added {
        subscription::update(ctx, &child, UpdateFlags::NONE);
    }

    subscription::finish_node_update(ctx, node_id).await;
}

/// The actual diff. Returns (new child ids, removed nodes).
fn merge_remote_entries(
    feedlist: &mut FeedList,
    root_id: &NodeId,
    entries: &[RemoteFeedEntry],
) -> (Vec<NodeId>, Vec<Node>) {
    let stream_kind = match feedlist
        .node(root_id)
        .and_then(Node::remote_source)
        .map(|s| s.variant)
    {
        Some(RemoteVariant::TinyTinyRss) => SubscriptionKind::TtrssStream,
        _ => SubscriptionKind::ReaderStream,
    };

    // Existing feed children, keyed by their source URL.
    let mut existing: Vec<(String, NodeId)> = Vec::new();
    feedlist.for_each_child(root_id, &mut |node| {
        if matches!(node.kind, NodeKind::Feed { .. }) {
            if let Some(subscription) = node.subscription() {
                existing.push((subscription.source.clone(), node.id.clone()));
            }
        }
    });

    let mut added = Vec::new();
    let mut seen: Vec<NodeId> = Vec::new();

    for remote in entries {
        if let Some((_, existing_id)) = existing.iter().find(|(url, _)| url == &remote.url) {
            // Already present: refresh the stream id, it may have changed.
            let existing_id = existing_id.clone();
            if let Some(subscription) = feedlist.subscription_mut(&existing_id) {
                subscription.set_metadata_value("feed-id", remote.stream_id.clone());
            }
            seen.push(existing_id);
            continue;
        }

        // New remotely: put it under a folder named like the first
        // category, creating the folder when needed.
        let parent_id = match &remote.category {
            Some((category_id, label)) => {
                let folder_id = find_or_create_folder(feedlist, root_id, label);
                if let Some(source) = feedlist
                    .node_mut(root_id)
                    .and_then(Node::remote_source_mut)
                {
                    source.map_category(&folder_id, category_id);
                }
                folder_id
            }
            None => root_id.clone(),
        };

        let mut subscription = Subscription::new(&remote.url);
        subscription.kind = stream_kind;
        subscription.homepage = remote.html_url.clone();
        subscription.set_metadata_value("feed-id", remote.stream_id.clone());

        let id = feedlist.generate_id();
        let node = Node::new(
            id,
            remote.title.clone(),
            NodeKind::Feed {
                subscription: Box::new(subscription),
            },
        );
        if let Some(id) = feedlist.add_child(&parent_id, node, None) {
            tracing::debug!(url = %remote.url, "remote subscription added");
            seen.push(id.clone());
            added.push(id);
        }
    }

    // Gone remotely: drop local children, unless another copy of the URL
    // lives outside this source's subtree.
    let mut removed = Vec::new();
    for (url, child_id) in existing {
        if seen.contains(&child_id) {
            continue;
        }
        let root = feedlist.root_id().clone();
        let referenced_elsewhere = {
            let in_tree = feedlist.find_by_url(&root, &url).map(|n| n.id.clone());
            match in_tree {
                Some(found) => found != child_id && source_root_of(feedlist, &found).as_ref() != Some(root_id),
                None => false,
            }
        };
        if referenced_elsewhere {
            continue;
        }
        tracing::debug!(url = %url, "remote subscription vanished, removing");
        removed.extend(feedlist.remove(&child_id));
    }

    (added, removed)
}

fn find_or_create_folder(feedlist: &mut FeedList, root_id: &NodeId, title: &str) -> NodeId {
    for child_id in feedlist.children(root_id) {
        if let Some(node) = feedlist.node(&child_id) {
            if matches!(node.kind, NodeKind::Folder) && node.title.eq_ignore_ascii_case(title) {
                return child_id;
            }
        }
    }
    let id = feedlist.generate_id();
    let node = Node::new(id, title, NodeKind::Folder);
    feedlist
        .add_child(root_id, node, None)
        .unwrap_or_else(|| root_id.clone())
}

// ============================================================================
// Quick update
// ============================================================================

/// Cheap unread-count poll: update only children with newer items.
pub fn quick_update(ctx: &CoreCtx, node_id: &NodeId) {
    let request = {
        let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        let Some(node) = feedlist.node_mut(node_id) else {
            return;
        };
        let root_state = node
            .subscription()
            .map(|s| s.update_state.clone())
            .unwrap_or_default();
        let Some(source) = node.remote_source_mut() else {
            return;
        };
        let mut request =
            UpdateRequest::new(&source.api.unread_count_url, root_state, Default::default());
        if let Some(auth) = &source.auth_token {
            request.set_auth_value(auth.clone());
        }
        request
    };

    let flags = UpdateFlags {
        no_feed: true,
        ..UpdateFlags::NONE
    };
    let ctx2 = ctx.clone();
    let node_id2 = node_id.clone();
    ctx.queue.submit(
        request,
        crate::update::OwnerId(node_id.clone()),
        flags,
        Box::new(move |result| {
            Box::pin(async move {
                process_quick_update_result(&ctx2, &node_id2, result);
            })
        }),
    );
}

fn process_quick_update_result(ctx: &CoreCtx, node_id: &NodeId, result: UpdateResult) {
    if result.http_status == 401 {
        session::session_expired(ctx, node_id);
        return;
    }
    if result.http_status != 200 {
        return;
    }
    let counts: UnreadCounts = match serde_json::from_slice(&result.data) {
        Ok(counts) => counts,
        Err(e) => {
            tracing::debug!(node = %node_id, error = %e, "could not parse unread counts");
            return;
        }
    };

    let stale: Vec<NodeId> = {
        let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");

        // Children by stream id.
        let mut by_stream: Vec<(String, NodeId)> = Vec::new();
        feedlist.for_each_child(node_id, &mut |node| {
            if let Some(subscription) = node.subscription() {
                if let Some(stream_id) = subscription.metadata_value("feed-id") {
                    by_stream.push((stream_id.to_string(), node.id.clone()));
                }
            }
        });

        let Some(source) = feedlist
            .node_mut(node_id)
            .and_then(Node::remote_source_mut)
        else {
            return;
        };
        source.last_quick_update = Utc::now().timestamp();

        let mut stale = Vec::new();
        for count in &counts.unreadcounts {
            if !count.id.starts_with("feed/") {
                continue;
            }
            let newest = count
                .newest_item_timestamp_usec
                .as_deref()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0);
            let known = source.last_timestamps.get(&count.id).copied().unwrap_or(0);
            if newest > known || (count.count > 0 && known == 0) {
                source.last_timestamps.insert(count.id.clone(), newest);
                if let Some((_, child)) = by_stream.iter().find(|(stream, _)| stream == &count.id)
                {
                    stale.push(child.clone());
                }
            }
        }
        stale
    };

    tracing::debug!(node = %node_id, stale = stale.len(), "quick update complete");
    for child in stale {
        subscription::update(ctx, &child, UpdateFlags::NONE);
    }
}

// ============================================================================
// Stream (child feed) updates
// ============================================================================

/// Start a child-feed fetch through the dialect's stream-contents URL.
pub fn update_stream(ctx: &CoreCtx, node_id: &NodeId, flags: UpdateFlags) -> bool {
    let root_id = {
        let feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        source_root_of(&feedlist, node_id)
    };
    let Some(root_id) = root_id else {
        tracing::warn!(node = %node_id, "stream subscription outside any source");
        return false;
    };

    let request = {
        let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");

        let (active, auth, api, variant, session_id) =
            match feedlist.node(&root_id).and_then(Node::remote_source) {
                Some(source) => (
                    source.login_state == LoginState::Active,
                    source.auth_token.clone(),
                    source.api.clone(),
                    source.variant,
                    source.session_id.clone(),
                ),
                None => return false,
            };
        if !active {
            drop(feedlist);
            // Defer behind the login; the list refresh will re-fetch us.
            update_root(ctx, &root_id, flags);
            return false;
        }

        let Some(subscription) = feedlist.subscription_mut(node_id) else {
            return false;
        };
        if !subscription.can_be_updated() {
            return false;
        }
        subscription.update_state.touch_poll(Utc::now().timestamp());

        if variant == RemoteVariant::TinyTinyRss {
            match super::ttrss::build_headlines_request(
                &api,
                session_id.as_deref(),
                subscription,
            ) {
                Some(request) => request,
                None => return false,
            }
        } else {
            let stream_id = subscription
                .metadata_value("feed-id")
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("feed/{}", subscription.source));
            let mut request = UpdateRequest::new(
                api.stream_contents(&stream_id),
                subscription.update_state.clone(),
                Default::default(),
            );
            if let Some(auth) = auth {
                request.set_auth_value(auth);
            }
            request
        }
    };

    subscription::submit_feed_request(ctx, node_id, request, flags);
    true
}

/// Digest fetched stream contents into the child's itemset.
pub async fn process_stream_result(
    ctx: &CoreCtx,
    node_id: &NodeId,
    result: UpdateResult,
    _flags: UpdateFlags,
) {
    if result.http_status == 401 {
        let root_id = {
            let feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
            source_root_of(&feedlist, node_id)
        };
        if let Some(root_id) = root_id {
            session::session_expired(ctx, &root_id);
        }
        return;
    }

    let merge_opts = {
        let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        let Some(subscription) = feedlist.subscription_mut(node_id) else {
            return;
        };
        subscription.update_error_status(result.http_status, result.error.as_deref(), None);
        if result.http_status != 200 || result.data.is_empty() {
            return;
        }
        MergeOptions {
            mark_as_read: subscription.flags.mark_as_read,
            ..Default::default()
        }
    };

    let stream: StreamContents = match serde_json::from_slice(&result.data) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::debug!(node = %node_id, error = %e, "could not parse stream contents");
            let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
            if let Some(subscription) = feedlist.subscription_mut(node_id) {
                subscription.error.parse_error = Some(e.to_string());
                subscription.available = false;
            }
            return;
        }
    };

    let mut parsed = Vec::new();
    let mut remote_read = Vec::new();
    let mut remote_starred = Vec::new();
    for item in &stream.items {
        parsed.push(ParsedItem {
            source_id: Some(item.id.clone()),
            title: item
                .title
                .clone()
                .unwrap_or_else(|| "Untitled".to_string()),
            source_url: item.link().map(|l| l.to_string()),
            description: item
                .summary
                .as_ref()
                .or(item.content.as_ref())
                .map(|c| c.content.clone()),
            author: item.author.clone(),
            published: item.published.or(item.updated),
            metadata: Vec::new(),
        });
        if item.is_read() {
            remote_read.push(item.id.clone());
        }
        if item.is_starred() {
            remote_starred.push(item.id.clone());
        }
    }

    if let Err(e) = merge_items(&ctx.db, node_id, &parsed, &merge_opts).await {
        tracing::warn!(node = %node_id, error = %e, "stream merge failed");
        return;
    }

    // Replicate remote state onto the merged rows. Only ever towards
    // read/starred; local unread wins are pushed through the edit queue,
    // not clobbered here.
    for guid in remote_read {
        if let Ok(Some(item)) = ctx.db.item_by_source_id(node_id, &guid).await {
            let _ = ctx.db.set_item_read(item.id, true).await;
        }
    }
    for guid in remote_starred {
        if let Ok(Some(item)) = ctx.db.item_by_source_id(node_id, &guid).await {
            let _ = ctx.db.set_item_flagged(item.id, true).await;
        }
    }

    crate::rules::search_folder::node_items_changed(ctx, node_id).await;
    subscription::finish_node_update(ctx, node_id).await;
}

// ============================================================================
// Reparenting
// ============================================================================

/// Move a stream child between folders of its source, replicating the
/// category change as remove-label / add-label edits.
///
/// Works like a plain reparent for nodes outside any source.
pub fn reparent_child(ctx: &CoreCtx, node_id: &NodeId, new_parent_id: &NodeId) -> bool {
    let labels = {
        let feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        source_root_of(&feedlist, node_id).and_then(|root| {
            let subscription = feedlist.subscription(node_id)?;
            let stream_id = subscription
                .metadata_value("feed-id")
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("feed/{}", subscription.source));

            let folder_title = |id: &NodeId| {
                feedlist
                    .node(id)
                    .filter(|node| matches!(node.kind, NodeKind::Folder))
                    .map(|node| node.title.clone())
            };
            let old_label = feedlist
                .node(node_id)
                .and_then(|node| node.parent.as_ref())
                .and_then(|parent| folder_title(parent));
            let new_label = folder_title(new_parent_id);
            Some((root, stream_id, old_label, new_label))
        })
    };

    let moved = {
        let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        feedlist.reparent(node_id, new_parent_id)
    };
    if !moved {
        return false;
    }

    if let Some((root, stream_id, old_label, new_label)) = labels {
        if let Some(label) = old_label {
            super::edit::remove_label(ctx, &root, &stream_id, &label);
        }
        if let Some(label) = new_label {
            super::edit::add_label(ctx, &root, &stream_id, &label);
        }
    }

    ctx.emit(CoreEvent::FeedListChanged);
    true
}

// ============================================================================
// Migration
// ============================================================================

/// Convert every child subscription into a plain local feed.
///
/// Entered when the user chooses to keep the feeds but drop the account;
/// the remote ids are cleared so nothing syncs back.
pub fn migrate(ctx: &CoreCtx, node_id: &NodeId) {
    let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");

    if let Some(source) = feedlist
        .node_mut(node_id)
        .and_then(Node::remote_source_mut)
    {
        source.login_state = LoginState::Migrate;
        source.auth_token = None;
        source.session_id = None;
    }

    let mut children = Vec::new();
    feedlist.for_each_child(node_id, &mut |node| {
        if matches!(node.kind, NodeKind::Feed { .. }) {
            children.push(node.id.clone());
        }
    });
    for child in children {
        if let Some(subscription) = feedlist.subscription_mut(&child) {
            subscription.kind = SubscriptionKind::Feed;
            subscription.metadata.retain(|(k, _)| k != "feed-id");
        }
    }

    drop(feedlist);
    ctx.emit(CoreEvent::FeedListChanged);
}
