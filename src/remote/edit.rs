//! The serialised edit-action queue of a remote account.
//!
//! Every mutation that must be replicated remotely (read/star state,
//! subscribe/unsubscribe, labels) is queued as an action and transmitted
//! strictly in order. The dialect's edit tokens are single-use, so the
//! protocol runs one continuation at a time: fetch a fresh token, POST the
//! head action, and only on an `OK` body pop it and move on. A failure
//! leaves the action at the head for a later retry (the next push or the
//! next login re-arms draining).

use std::collections::VecDeque;

use crate::feedlist::NodeId;
use crate::subscription;
use crate::update::{OwnerId, UpdateFlags, UpdateRequest, UpdateResult};
use crate::CoreCtx;

use super::dialect::{
    escape, fill, ReaderApi, TAG_KEPT_UNREAD, TAG_LABEL_PREFIX, TAG_READ, TAG_STARRED,
    TAG_TRACKING_KEPT_UNREAD,
};
use super::session::LoginState;
use super::RemoteVariant;

/// Invoked once when an action is accepted or rejected by the remote end.
pub type ActionCallback = Box<dyn FnOnce(&CoreCtx, bool) + Send>;

/// An edit to the remote account's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditActionKind {
    MarkRead,
    MarkUnread,
    /// Every mark-unread must be followed by this extra call; the dialect
    /// requires the tracking tag in a separate request.
    TrackingKeptUnread,
    MarkStarred,
    MarkUnstarred,
    AddSubscription,
    RemoveSubscription,
    AddLabel,
    RemoveLabel,
}

/// One queued edit.
pub struct EditAction {
    pub kind: EditActionKind,
    /// Item guid; ignored for subscription-level edits.
    pub guid: Option<String>,
    /// Feed URL or stream id the edit applies to.
    pub feed_url: Option<String>,
    /// Label name for label edits.
    pub label: Option<String>,
    pub callback: Option<ActionCallback>,
}

impl std::fmt::Debug for EditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditAction")
            .field("kind", &self.kind)
            .field("guid", &self.guid)
            .field("feed_url", &self.feed_url)
            .field("label", &self.label)
            .finish()
    }
}

impl EditAction {
    pub fn new(kind: EditActionKind) -> Self {
        Self {
            kind,
            guid: None,
            feed_url: None,
            label: None,
            callback: None,
        }
    }
}

/// Plain FIFO of pending edits plus the one-in-flight latch.
#[derive(Debug, Default)]
pub struct EditQueue {
    queue: VecDeque<EditAction>,
    in_flight: bool,
}

impl EditQueue {
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn push_tail(&mut self, action: EditAction) {
        self.queue.push_back(action);
    }

    /// Urgent edits (subscribe/unsubscribe) jump the queue.
    pub fn push_head(&mut self, action: EditAction) {
        self.queue.push_front(action);
    }

    pub fn peek(&self) -> Option<&EditAction> {
        self.queue.front()
    }

    fn peek_mut(&mut self) -> Option<&mut EditAction> {
        self.queue.front_mut()
    }

    fn pop(&mut self) -> Option<EditAction> {
        self.queue.pop_front()
    }

    /// Whether an edit for this guid is still pending.
    pub fn contains_guid(&self, guid: &str) -> bool {
        self.queue
            .iter()
            .any(|action| action.guid.as_deref() == Some(guid))
    }

    /// Whether a token-or-edit protocol step is currently out.
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub(crate) fn set_in_flight(&mut self, value: bool) {
        self.in_flight = value;
    }

    pub(crate) fn take_head(&mut self) -> Option<EditAction> {
        self.queue.pop_front()
    }

    pub(crate) fn drop_head(&mut self) {
        self.queue.pop_front();
    }

    pub(crate) fn take_head_callback(&mut self) -> Option<ActionCallback> {
        self.queue.front_mut().and_then(|action| action.callback.take())
    }
}

// ============================================================================
// Queue draining
// ============================================================================

/// Kick the queue: fetch a token and transmit the head action.
///
/// No-op when the queue is empty or a protocol step is already in flight
/// (tokens are single-use, pipelining is forbidden).
pub fn process(ctx: &CoreCtx, node_id: &NodeId) {
    enum Step {
        Nothing,
        Ttrss,
        Token(UpdateRequest),
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
                    Some(source) if source.edits.is_empty() || source.edits.in_flight => {
                        Step::Nothing
                    }
                    Some(source) if source.variant == RemoteVariant::TinyTinyRss => Step::Ttrss,
                    Some(source) => {
                        source.edits.in_flight = true;
                        let mut request = UpdateRequest::new(
                            &source.api.token_url,
                            root_state,
                            Default::default(),
                        );
                        if let Some(auth) = &source.auth_token {
                            request.set_auth_value(auth.clone());
                        }
                        Step::Token(request)
                    }
                    None => Step::Nothing,
                }
            }
            None => Step::Nothing,
        }
    };

    let token_request = match step {
        Step::Nothing => return,
        Step::Ttrss => {
            super::ttrss::process_edits(ctx, node_id);
            return;
        }
        Step::Token(request) => request,
    };

    let flags = UpdateFlags {
        no_feed: true,
        ..UpdateFlags::NONE
    };
    let ctx2 = ctx.clone();
    let node_id2 = node_id.clone();
    ctx.queue.submit(
        token_request,
        OwnerId(node_id.clone()),
        flags,
        Box::new(move |result| {
            Box::pin(async move {
                token_received(&ctx2, &node_id2, result);
            })
        }),
    );
}

/// Step two: we hold a fresh single-use token, transmit the head action.
fn token_received(ctx: &CoreCtx, node_id: &NodeId, result: UpdateResult) {
    if result.http_status != 200 || result.data.is_empty() {
        tracing::debug!(node = %node_id, status = result.http_status, "edit token fetch failed");
        release_in_flight(ctx, node_id);
        return;
    }
    let token = String::from_utf8_lossy(&result.data).trim().to_string();

    let edit_request = {
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
        let Some(action) = source.edits.peek() else {
            source.edits.in_flight = false;
            return;
        };

        let (url, post_data) = build_action_request(&source.api, action, &token);
        tracing::debug!(node = %node_id, action = ?action.kind, "transmitting edit action");

        let mut request = UpdateRequest::new(url, root_state, Default::default());
        request.post_data = Some(post_data);
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
        edit_request,
        OwnerId(node_id.clone()),
        flags,
        Box::new(move |result| {
            Box::pin(async move {
                action_complete(&ctx2, &node_id2, result);
            })
        }),
    );
}

/// Step three: the dialect answered. `OK` pops and continues the drain;
/// anything else stops it with the action retained at the head.
fn action_complete(ctx: &CoreCtx, node_id: &NodeId, result: UpdateResult) {
    let ok = result.http_status == 200
        && String::from_utf8_lossy(&result.data).trim() == "OK";

    let (finished, callback) = {
        let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        let Some(source) = feedlist
            .node_mut(node_id)
            .and_then(|node| node.remote_source_mut())
        else {
            return;
        };
        source.edits.in_flight = false;

        if ok {
            let action = source.edits.pop();
            (action.is_some(), action.and_then(|mut a| a.callback.take()))
        } else {
            tracing::debug!(node = %node_id, status = result.http_status, "edit action failed");
            (false, source.edits.peek_mut().and_then(|a| a.callback.take()))
        }
    };

    if let Some(callback) = callback {
        callback(ctx, ok);
    }

    if finished {
        // Process anything else waiting on the edit queue.
        process(ctx, node_id);
    }
}

fn release_in_flight(ctx: &CoreCtx, node_id: &NodeId) {
    let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
    if let Some(source) = feedlist
        .node_mut(node_id)
        .and_then(|node| node.remote_source_mut())
    {
        source.edits.in_flight = false;
    }
}

/// Convert an action into the dialect's URL + POST body.
fn build_action_request(api: &ReaderApi, action: &EditAction, token: &str) -> (String, String) {
    let guid = escape(action.guid.as_deref().unwrap_or(""));
    let stream = action.feed_url.as_deref().unwrap_or("");
    let prefix = ReaderApi::stream_prefix(stream);
    let stream_escaped = escape(stream);

    match action.kind {
        EditActionKind::MarkRead => (
            api.edit_tag_url.clone(),
            fill(
                &api.edit_tag_add_post,
                &[&guid, prefix, &stream_escaped, &escape(TAG_READ), token],
            ),
        ),
        EditActionKind::MarkUnread => (
            api.edit_tag_url.clone(),
            fill(
                &api.edit_tag_ar_post,
                &[
                    &guid,
                    prefix,
                    &stream_escaped,
                    &escape(TAG_KEPT_UNREAD),
                    &escape(TAG_READ),
                    token,
                ],
            ),
        ),
        EditActionKind::TrackingKeptUnread => (
            api.edit_tag_url.clone(),
            fill(
                &api.edit_tag_add_post,
                &[
                    &guid,
                    prefix,
                    &stream_escaped,
                    &escape(TAG_TRACKING_KEPT_UNREAD),
                    token,
                ],
            ),
        ),
        EditActionKind::MarkStarred => (
            api.edit_tag_url.clone(),
            fill(
                &api.edit_tag_add_post,
                &[&guid, prefix, &stream_escaped, &escape(TAG_STARRED), token],
            ),
        ),
        EditActionKind::MarkUnstarred => (
            api.edit_tag_url.clone(),
            fill(
                &api.edit_tag_remove_post,
                &[&guid, prefix, &stream_escaped, &escape(TAG_STARRED), token],
            ),
        ),
        EditActionKind::AddSubscription => (
            api.add_subscription_url.clone(),
            fill(&api.add_subscription_post, &[&stream_escaped, token]),
        ),
        EditActionKind::RemoveSubscription => (
            api.remove_subscription_url.clone(),
            fill(&api.remove_subscription_post, &[&stream_escaped, token]),
        ),
        EditActionKind::AddLabel => (
            api.edit_label_url.clone(),
            fill(
                &api.add_label_post,
                &[
                    &stream_escaped,
                    &escape(&format!(
                        "{}{}",
                        TAG_LABEL_PREFIX,
                        action.label.as_deref().unwrap_or("")
                    )),
                    token,
                ],
            ),
        ),
        EditActionKind::RemoveLabel => (
            api.edit_label_url.clone(),
            fill(
                &api.remove_label_post,
                &[
                    &stream_escaped,
                    &escape(&format!(
                        "{}{}",
                        TAG_LABEL_PREFIX,
                        action.label.as_deref().unwrap_or("")
                    )),
                    token,
                ],
            ),
        ),
    }
}

// ============================================================================
// Enqueue entry points
// ============================================================================

/// Push an action and arm the drain depending on login state.
pub fn push(ctx: &CoreCtx, node_id: &NodeId, action: EditAction, head: bool) {
    let login_state = {
        let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        let Some(source) = feedlist
            .node_mut(node_id)
            .and_then(|node| node.remote_source_mut())
        else {
            return;
        };
        if head {
            source.edits.push_head(action);
        } else {
            source.edits.push_tail(action);
        }
        source.login_state
    };

    match login_state {
        LoginState::None => super::session::login(ctx, node_id, UpdateFlags::NONE, true),
        LoginState::Active => process(ctx, node_id),
        _ => {}
    }
}

/// Replicate a read-state change. Marking unread enqueues the mandatory
/// tracking-kept-unread follow-up as a second action.
pub fn mark_read(ctx: &CoreCtx, node_id: &NodeId, guid: &str, feed_url: &str, read: bool) {
    let mut action = EditAction::new(if read {
        EditActionKind::MarkRead
    } else {
        EditActionKind::MarkUnread
    });
    action.guid = Some(guid.to_string());
    action.feed_url = Some(feed_url.to_string());
    push(ctx, node_id, action, false);

    if !read {
        let mut tracking = EditAction::new(EditActionKind::TrackingKeptUnread);
        tracking.guid = Some(guid.to_string());
        tracking.feed_url = Some(feed_url.to_string());
        push(ctx, node_id, tracking, false);
    }
}

/// Replicate a flag-state change.
pub fn mark_starred(ctx: &CoreCtx, node_id: &NodeId, guid: &str, feed_url: &str, starred: bool) {
    let mut action = EditAction::new(if starred {
        EditActionKind::MarkStarred
    } else {
        EditActionKind::MarkUnstarred
    });
    action.guid = Some(guid.to_string());
    action.feed_url = Some(feed_url.to_string());
    push(ctx, node_id, action, false);
}

/// Subscribe the account to a feed. Head-inserted: the user is waiting.
pub fn add_subscription(ctx: &CoreCtx, node_id: &NodeId, feed_url: &str) {
    let mut action = EditAction::new(EditActionKind::AddSubscription);
    action.feed_url = Some(feed_url.to_string());
    let root = node_id.clone();
    action.callback = Some(Box::new(move |ctx, success| {
        if success {
            // Pull the fresh list so the new child appears with the
            // server-assigned stream id.
            subscription::update(ctx, &root, UpdateFlags::NONE);
        } else {
            tracing::debug!("failed to add remote subscription");
        }
    }));
    push(ctx, node_id, action, true);
}

/// Unsubscribe the account from a stream. Head-inserted.
pub fn remove_subscription(ctx: &CoreCtx, node_id: &NodeId, stream_id: &str) {
    let mut action = EditAction::new(EditActionKind::RemoveSubscription);
    action.feed_url = Some(stream_id.to_string());
    push(ctx, node_id, action, true);
}

/// Attach a remote category to a stream (local reparent into a folder).
pub fn add_label(ctx: &CoreCtx, node_id: &NodeId, stream_id: &str, label: &str) {
    let mut action = EditAction::new(EditActionKind::AddLabel);
    action.feed_url = Some(stream_id.to_string());
    action.label = Some(label.to_string());
    push(ctx, node_id, action, false);
}

/// Detach a remote category from a stream.
pub fn remove_label(ctx: &CoreCtx, node_id: &NodeId, stream_id: &str, label: &str) {
    let mut action = EditAction::new(EditActionKind::RemoveLabel);
    action.feed_url = Some(stream_id.to_string());
    action.label = Some(label.to_string());
    push(ctx, node_id, action, false);
}
