//! Subscriptions: the fetch contract attached to feed and source-root nodes.
//!
//! A subscription owns a source URL, interval and cache policy, auth,
//! optional filter, and the conditional-request state. Updates run in two
//! type-dispatched halves: `prepare` builds the request (or defers, e.g.
//! behind a remote login), and `process_update_result` digests the fetched
//! bytes back into the store.

use chrono::Utc;
use secrecy::SecretString;

use crate::feedlist::{NodeId, NodeKind};
use crate::parser::{DefaultParser, FeedParser};
use crate::remote;
use crate::storage::{enforce_cache_limit, merge_items, MergeOptions};
use crate::update::{
    OwnerId, UpdateFlags, UpdateOptions, UpdateRequest, UpdateResult, UpdateState,
};
use crate::util::SourceKind;
use crate::{CoreCtx, CoreEvent};

// ============================================================================
// Cache policy
// ============================================================================

/// Per-subscription item cache policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheLimit {
    /// Use the global `default_max_items` setting.
    #[default]
    Default,
    /// Keep no items beyond the UI's view of the current update.
    Disable,
    /// Never trim.
    Unlimited,
    /// Keep at most this many items.
    Limit(u32),
}

impl CacheLimit {
    /// The effective row cap, `None` meaning unlimited.
    pub fn effective(&self, default_max_items: u32) -> Option<u32> {
        match self {
            CacheLimit::Default => {
                if default_max_items == 0 {
                    None
                } else {
                    Some(default_max_items)
                }
            }
            CacheLimit::Disable => Some(0),
            CacheLimit::Unlimited => None,
            CacheLimit::Limit(n) => Some(*n),
        }
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Behaviour toggles the properties dialog exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionFlags {
    pub auto_enclosure_download: bool,
    pub mark_as_read: bool,
    pub ignore_comments: bool,
    pub load_item_link: bool,
    pub html5_extract: bool,
}

/// Error state of the last update cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionError {
    pub http_error_code: u16,
    pub http_error: Option<String>,
    pub update_error: Option<String>,
    pub filter_error: Option<String>,
    pub parse_error: Option<String>,
}

impl SubscriptionError {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn any(&self) -> bool {
        self.http_error.is_some()
            || self.update_error.is_some()
            || self.filter_error.is_some()
            || self.parse_error.is_some()
    }
}

/// Which update handler a subscription dispatches through.
///
/// Node kinds, subscription types, and node-source types are three
/// parallel dispatches; composing a concrete value here at import time
/// replaces inheritance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubscriptionKind {
    /// A plain local/network feed.
    #[default]
    Feed,
    /// A child of a Google-Reader-family source; fetches stream contents.
    ReaderStream,
    /// The root subscription of a Google-Reader-family source; fetches
    /// the remote subscription list.
    ReaderRoot,
    /// A child of a Tiny Tiny RSS source; fetches headlines via JSON-RPC.
    TtrssStream,
    /// The root subscription of a Tiny Tiny RSS source.
    TtrssRoot,
}

/// The fetchable object attached to a feed or source-root node.
#[derive(Debug, Clone, Default)]
pub struct Subscription {
    /// Current source. `|cmd`, `scheme://...`, or a local path.
    pub source: String,
    /// Source as originally subscribed, before redirect rewrites.
    pub orig_source: String,
    pub homepage: Option<String>,
    /// Post-fetch filter: shell command or `.xsl` stylesheet path.
    pub filter_cmd: Option<String>,
    /// Minutes; −2 = never, −1 = use default, >0 = fixed.
    pub update_interval: i64,
    /// Interval hint from the feed (ttl / syn), minutes; −1 = none.
    pub default_interval: i64,
    pub cache_limit: CacheLimit,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// Dialect metadata, notably the remote `feed-id`.
    pub metadata: Vec<(String, String)>,
    pub flags: SubscriptionFlags,
    pub error: SubscriptionError,
    /// Set by HTTP 410; suppresses all further auto-updates.
    pub discontinued: bool,
    /// False for the cycle after a failed fetch.
    pub available: bool,
    pub update_state: UpdateState,
    pub kind: SubscriptionKind,
}

impl Subscription {
    pub fn new(source: &str) -> Self {
        let mut subscription = Self {
            update_interval: -1,
            default_interval: -1,
            available: true,
            ..Default::default()
        };
        subscription.set_source(source);
        subscription
    }

    /// Set the source, stripping whitespace and a `feed://` prefix.
    ///
    /// The first source ever set is remembered as the original one.
    pub fn set_source(&mut self, source: &str) {
        let source = source.trim();
        let source = source.strip_prefix("feed://").unwrap_or(source);
        self.source = source.to_string();
        if self.orig_source.is_empty() {
            self.orig_source = self.source.clone();
        }
    }

    pub fn source_kind(&self) -> SourceKind {
        SourceKind::of(&self.source)
    }

    /// Interval setter with the dialog's "0 means never" quirk folded in.
    pub fn set_update_interval(&mut self, interval: i64) {
        self.update_interval = if interval == 0 { -1 } else { interval };
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_metadata_value(&mut self, key: &str, value: String) {
        if let Some(entry) = self.metadata.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
        } else {
            self.metadata.push((key.to_string(), value));
        }
    }

    /// Effective auto-update interval in minutes; ≤0 means never.
    pub fn effective_interval(&self, global_default: i64) -> i64 {
        match self.update_interval {
            -2 => 0,
            -1 => {
                // Prefer the feed's own hint over the global default.
                let hint = self.interval_hint();
                if hint > 0 {
                    hint
                } else {
                    global_default
                }
            }
            n if n > 0 => n,
            _ => global_default,
        }
    }

    /// Largest update-interval hint the feed supplied, minutes.
    fn interval_hint(&self) -> i64 {
        let state = &self.update_state;
        [state.time_to_live, state.syn_period, state.max_age_minutes]
            .into_iter()
            .filter(|v| *v > 0)
            .max()
            .unwrap_or(self.default_interval)
    }

    /// Whether an update makes sense at all right now.
    pub fn can_be_updated(&self) -> bool {
        if self.discontinued {
            tracing::debug!(source = %self.source, "subscription was discontinued, not updating");
            return false;
        }
        if self.source.is_empty() {
            tracing::warn!("subscription without source, cannot update");
            return false;
        }
        true
    }

    /// Build the plain-feed request for this subscription.
    ///
    /// Stamps `last_poll` so a failing fetch still counts as an attempt.
    pub fn prepare_request(&mut self, flags: UpdateFlags) -> UpdateRequest {
        self.update_state.touch_poll(Utc::now().timestamp());
        if flags.reset_title {
            self.update_state.reset_conditional();
        }

        let options = UpdateOptions {
            username: self.username.clone(),
            password: self.password.clone(),
            dont_use_proxy: false,
        };
        let mut request = UpdateRequest::new(&self.source, self.update_state.clone(), options);
        request.filter_cmd = self.filter_cmd.clone();
        // Only the subscription path may run commands; favicon and
        // enclosure downloads must never execute a shell via a redirect.
        request.allow_commands(true);
        request
    }

    /// Record the outcome of an update cycle in the error fields.
    pub fn update_error_status(
        &mut self,
        http_status: u16,
        transport_error: Option<&str>,
        filter_error: Option<&str>,
    ) {
        self.error.clear();
        self.error.http_error_code = http_status;
        self.error.filter_error = filter_error.map(|s| s.to_string());

        let http_ok = (200..400).contains(&http_status);
        if !http_ok {
            self.error.http_error = Some(match http_status {
                0 => transport_error.unwrap_or("network error").to_string(),
                status => format!("HTTP error {}", status),
            });
        } else if let Some(e) = transport_error {
            self.error.update_error = Some(e.to_string());
        }

        self.available = http_ok && filter_error.is_none() && transport_error.is_none();
    }
}

// ============================================================================
// Update cycle
// ============================================================================

/// Start an update of a node's subscription.
///
/// Returns false when nothing was enqueued (unknown node, discontinued
/// subscription, or a remote source deferring behind its login).
pub fn update(ctx: &CoreCtx, node_id: &NodeId, flags: UpdateFlags) -> bool {
    let kind = {
        let feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        match feedlist.node(node_id) {
            Some(node) => match &node.kind {
                NodeKind::Feed { subscription } => Some(subscription.kind),
                NodeKind::SourceRoot { subscription, .. } => Some(subscription.kind),
                _ => None,
            },
            None => None,
        }
    };

    match kind {
        Some(SubscriptionKind::Feed) => update_plain_feed(ctx, node_id, flags),
        Some(SubscriptionKind::ReaderStream) | Some(SubscriptionKind::TtrssStream) => {
            remote::source::update_stream(ctx, node_id, flags)
        }
        Some(SubscriptionKind::ReaderRoot) | Some(SubscriptionKind::TtrssRoot) => {
            remote::source::update_root(ctx, node_id, flags)
        }
        None => false,
    }
}

fn update_plain_feed(ctx: &CoreCtx, node_id: &NodeId, flags: UpdateFlags) -> bool {
    let request = {
        let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        let Some(subscription) = feedlist.subscription_mut(node_id) else {
            return false;
        };
        if !subscription.can_be_updated() {
            return false;
        }
        subscription.prepare_request(flags)
    };

    submit_feed_request(ctx, node_id, request, flags);
    true
}

/// Submit a prepared feed request with the standard processing callback.
pub(crate) fn submit_feed_request(
    ctx: &CoreCtx,
    node_id: &NodeId,
    request: UpdateRequest,
    flags: UpdateFlags,
) {
    let ctx = ctx.clone();
    let node_id = node_id.clone();
    ctx.queue.clone().submit(
        request,
        OwnerId(node_id.clone()),
        flags,
        Box::new(move |result| {
            Box::pin(async move {
                process_update_result(&ctx, &node_id, result, flags).await;
            })
        }),
    );
}

/// Digest a finished fetch for a node. Runs on the main context.
pub async fn process_update_result(
    ctx: &CoreCtx,
    node_id: &NodeId,
    result: UpdateResult,
    flags: UpdateFlags,
) {
    let kind = {
        let feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        match feedlist.node(node_id) {
            Some(node) => match &node.kind {
                NodeKind::Feed { subscription } => Some(subscription.kind),
                NodeKind::SourceRoot { subscription, .. } => Some(subscription.kind),
                _ => None,
            },
            // Node removed while the job ran; the result is stale.
            None => None,
        }
    };

    match kind {
        Some(SubscriptionKind::Feed) => process_feed_result(ctx, node_id, result, flags).await,
        Some(SubscriptionKind::ReaderStream) => {
            remote::source::process_stream_result(ctx, node_id, result, flags).await
        }
        Some(SubscriptionKind::ReaderRoot) => {
            remote::source::process_feedlist_result(ctx, node_id, result, flags).await
        }
        Some(SubscriptionKind::TtrssStream) => {
            remote::ttrss::process_headlines_result(ctx, node_id, result, flags).await
        }
        Some(SubscriptionKind::TtrssRoot) => {
            remote::ttrss::process_feedlist_result(ctx, node_id, result, flags).await
        }
        None => {}
    }
}

/// The plain-feed half of result processing: errors, redirects, parse,
/// merge, trim, counters, hints.
async fn process_feed_result(
    ctx: &CoreCtx,
    node_id: &NodeId,
    result: UpdateResult,
    flags: UpdateFlags,
) {
    // First pass under the lock: record errors and state, decide whether
    // there is anything to parse.
    let parse_input = {
        let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        let Some(subscription) = feedlist.subscription_mut(node_id) else {
            return;
        };

        subscription.update_error_status(
            result.http_status,
            result.error.as_deref(),
            result.filter_errors.as_deref(),
        );

        match result.http_status {
            410 => {
                // Gone: the feed asked us to stop coming back.
                tracing::info!(source = %subscription.source, "feed is gone, discontinuing");
                subscription.discontinued = true;
            }
            401 | 403 if result.error.is_none() => {
                ctx.emit(CoreEvent::AuthRequired(node_id.clone()));
            }
            _ => {}
        }

        // Conditional tokens: a 304 leaves them untouched, a 200 carries
        // the server's new values inside the result state.
        if result.http_status == 200 {
            subscription.update_state.etag = result.update_state.etag.clone();
            subscription.update_state.last_modified = result.update_state.last_modified.clone();

            // Permanent redirects rewrite the subscription source.
            if !result.source.is_empty() && result.source != subscription.source {
                tracing::info!(old = %subscription.source, new = %result.source, "feed moved, rewriting source");
                subscription.source = result.source.clone();
            }
        }

        if result.http_status == 200 && !result.data.is_empty() {
            Some((
                subscription.source.clone(),
                MergeOptions {
                    mark_as_read: subscription.flags.mark_as_read,
                    ..Default::default()
                },
                subscription.cache_limit,
            ))
        } else {
            None
        }
    };

    if let Some((source, merge_opts, cache_limit)) = parse_input {
        let parsed = DefaultParser.parse(&result.data, result.content_type.as_deref(), &source);

        match parsed {
            Ok(feed) => {
                let stats = merge_items(&ctx.db, node_id, &feed.items, &merge_opts).await;
                if let Err(e) = &stats {
                    tracing::warn!(node = %node_id, error = %e, "merge failed");
                }

                if let Some(limit) = cache_limit.effective(ctx.settings.default_max_items) {
                    if limit > 0 {
                        let _ = enforce_cache_limit(&ctx.db, node_id, limit).await;
                    }
                }

                apply_feed_info(ctx, node_id, &feed.info, flags);
                crate::rules::search_folder::node_items_changed(ctx, node_id).await;
            }
            Err(e) => {
                tracing::debug!(node = %node_id, error = %e, "parse failed, existing items preserved");
                let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
                if let Some(subscription) = feedlist.subscription_mut(node_id) {
                    subscription.error.parse_error = Some(e.to_string());
                    subscription.available = false;
                }
            }
        }
    }

    finish_node_update(ctx, node_id).await;

    // A disabled cache keeps nothing once the update has been shown.
    let cache_disabled = {
        let feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        feedlist
            .subscription(node_id)
            .is_some_and(|s| s.cache_limit == CacheLimit::Disable)
    };
    if cache_disabled && result.http_status == 200 {
        let _ = ctx.db.remove_items(node_id).await;
        crate::rules::search_folder::node_items_changed(ctx, node_id).await;
    }

    // A feed without an icon yet gets a discovery pass.
    if result.http_status == 200 {
        let has_icon = ctx.db.load_icon(node_id).await.ok().flatten().is_some();
        if !has_icon {
            crate::favicon::discover(ctx, node_id);
        }
    }
}

/// Fold parsed feed-level metadata back into the node.
fn apply_feed_info(ctx: &CoreCtx, node_id: &NodeId, info: &crate::parser::FeedInfo, flags: UpdateFlags) {
    let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");

    if let Some(node) = feedlist.node_mut(node_id) {
        if node.title.is_empty() || flags.reset_title {
            if let Some(title) = &info.title {
                node.title = title.clone();
            }
        }
    }

    if let Some(subscription) = feedlist.subscription_mut(node_id) {
        if let Some(homepage) = &info.homepage {
            subscription.homepage = Some(homepage.clone());
        }
        if let Some(hint) = info.interval_hint {
            subscription.default_interval = hint;
            subscription.update_state.time_to_live = hint;
        }
        if let Some(icon) = &info.icon {
            subscription.set_metadata_value("icon", icon.clone());
        }
    }
}

/// Persist state, refresh counters, and tell the shell.
pub(crate) async fn finish_node_update(ctx: &CoreCtx, node_id: &NodeId) {
    let state = {
        let feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        feedlist
            .subscription(node_id)
            .map(|s| s.update_state.clone())
    };
    if let Some(state) = state {
        let _ = ctx.db.save_update_state(node_id, &state).await;
    }

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

/// Scheduler entry: update if the subscription is due.
pub fn auto_update(ctx: &CoreCtx, node_id: &NodeId, now: i64) -> bool {
    let due = {
        let feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        let Some(subscription) = feedlist.subscription(node_id) else {
            return false;
        };

        if subscription.discontinued {
            return false;
        }
        // Offline mode still allows command and file sources.
        let needs_network = subscription.source_kind() == SourceKind::Uri
            && !subscription.source.starts_with("file://");
        if ctx.is_offline() && needs_network {
            return false;
        }

        let interval = subscription.effective_interval(ctx.settings.default_update_interval);
        interval > 0 && now >= subscription.update_state.last_poll + interval * 60
    };

    if due {
        update(ctx, node_id, UpdateFlags::NONE)
    } else {
        false
    }
}

/// Drop per-node job state when a node goes away.
pub fn cancel_updates(ctx: &CoreCtx, node_id: &NodeId) {
    ctx.queue.cancel_by_owner(&OwnerId(node_id.clone()));
}
