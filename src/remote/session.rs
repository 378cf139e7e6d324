//! The login state machine of a remote account.

use crate::feedlist::NodeId;
use crate::subscription;
use crate::update::{OwnerId, UpdateFlags, UpdateRequest, UpdateResult};
use crate::{CoreCtx, CoreEvent};

use super::dialect::{escape, fill};
use super::RemoteVariant;

/// Auth failures tolerated before we stop bothering the user.
pub const MAX_AUTH_FAILURES: u32 = 3;

/// Login state of a remote account.
///
/// ```text
///                   login requested
///   NONE ───────────────────────────► IN_PROGRESS
///    ▲                                    │
///    │       auth fail (<3 failures)      │ 200 + token
///    │◄───────────────────────────────────┤
///    │                                    ▼
///    │        auth fail (≥3 failures)  ACTIVE ────► MIGRATE (user chose
///    └──► NO_AUTH ◄────────────────────── │          "convert")
///                                         │
///                              session gone (any 401)
///                                         └──► NONE
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoginState {
    /// No session; a login may be started.
    #[default]
    None,
    InProgress,
    Active,
    /// Too many failures; automatic refresh is suppressed until the user
    /// intervenes.
    NoAuth,
    /// Children are being converted to plain local feeds.
    Migrate,
}

/// Start a login for a Reader-family account.
///
/// On success the source holds a bearer header and, unless `only_login`
/// was set, the deferred update resumes; queued edits drain either way.
pub fn login(ctx: &CoreCtx, node_id: &NodeId, flags: UpdateFlags, only_login: bool) {
    enum Step {
        Nothing,
        Ttrss,
        Login(UpdateRequest),
    }

    let step = {
        let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        match feedlist.node_mut(node_id) {
            Some(node) => {
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
                    None => (String::new(), String::new(), Default::default()),
                };
                match node.remote_source_mut() {
                    Some(source) if source.variant == RemoteVariant::TinyTinyRss => Step::Ttrss,
                    Some(source) => {
                        if source.login_state != LoginState::None {
                            tracing::debug!(node = %node_id, state = ?source.login_state, "logging in while not idle");
                        }
                        source.login_state = LoginState::InProgress;

                        // Credentials go in the POST body, not the
                        // Authorization header.
                        let mut request =
                            UpdateRequest::new(&source.api.login_url, state, Default::default());
                        request.post_data = Some(fill(
                            &source.api.login_post,
                            &[&escape(&username), &escape(&password)],
                        ));
                        Step::Login(request)
                    }
                    None => Step::Nothing,
                }
            }
            None => Step::Nothing,
        }
    };

    let request = match step {
        Step::Nothing => return,
        Step::Ttrss => {
            super::ttrss::login(ctx, node_id, flags, only_login);
            return;
        }
        Step::Login(request) => request,
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

fn login_complete(
    ctx: &CoreCtx,
    node_id: &NodeId,
    result: UpdateResult,
    flags: UpdateFlags,
    only_login: bool,
) {
    // The body carries SID=,LSID=,Auth= lines; only Auth matters.
    let token = if result.http_status == 200 {
        String::from_utf8_lossy(&result.data)
            .lines()
            .find_map(|line| line.strip_prefix("Auth=").map(|t| t.to_string()))
    } else {
        None
    };

    let outcome = {
        let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
        let Some(node) = feedlist.node_mut(node_id) else {
            return;
        };
        let Some(source) = node.remote_source_mut() else {
            return;
        };

        match token {
            Some(token) => {
                source.auth_token = Some(format!("GoogleLogin auth={}", token));
                source.login_state = LoginState::Active;
                source.auth_failures = 0;
                tracing::debug!(node = %node_id, "remote login succeeded");
                true
            }
            None => {
                source.auth_failures += 1;
                source.auth_token = None;
                if source.auth_failures >= MAX_AUTH_FAILURES {
                    source.login_state = LoginState::NoAuth;
                } else {
                    source.login_state = LoginState::None;
                }
                tracing::debug!(
                    node = %node_id,
                    failures = source.auth_failures,
                    "remote login failed, no auth token in response"
                );
                if let Some(subscription) = node.subscription_mut() {
                    subscription.available = false;
                    subscription.error.update_error = Some("Login failed!".to_string());
                }
                false
            }
        }
    };

    if outcome {
        // Now that we are authenticated, trigger the deferred update and
        // drain any edits waiting in the queue.
        if !only_login {
            subscription::update(ctx, node_id, flags);
        }
        super::edit::process(ctx, node_id);
    } else {
        ctx.emit(CoreEvent::AuthRequired(node_id.clone()));
    }
}

/// A 401 on any authenticated call: the session is gone.
///
/// Drops back to NONE so the next auto-update logs in again.
pub fn session_expired(ctx: &CoreCtx, node_id: &NodeId) {
    let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
    if let Some(source) = feedlist
        .node_mut(node_id)
        .and_then(|node| node.remote_source_mut())
    {
        if source.login_state == LoginState::Active {
            tracing::debug!(node = %node_id, "session expired, will re-login");
            source.login_state = LoginState::None;
            source.auth_token = None;
            source.session_id = None;
        }
    }
}

/// A manual update in NO_AUTH resets to NONE to allow re-prompting.
pub fn reset_auth_lockout(ctx: &CoreCtx, node_id: &NodeId) {
    let mut feedlist = ctx.feedlist.lock().expect("feedlist poisoned");
    if let Some(source) = feedlist
        .node_mut(node_id)
        .and_then(|node| node.remote_source_mut())
    {
        if source.login_state == LoginState::NoAuth {
            source.login_state = LoginState::None;
            source.auth_failures = 0;
        }
    }
}
