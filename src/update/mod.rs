//! Fetch-attempt value types and the job machinery built on them.
//!
//! An update request represents one fetch attempt: a feed refresh, a
//! favicon probe, an enclosure download, or a remote-API call. Requests
//! always carry a private copy of the owning subscription's
//! [`UpdateState`] so the worker never races scheduler reads, plus
//! optional [`UpdateOptions`] for authentication.

mod command;
mod file;
mod filter;
mod gopher;
mod job;
mod network;
mod queue;

pub use job::{JobHandle, OwnerId, ResultCallback, ResultFuture};
pub use queue::{FinishedJob, ResultPump, UpdateQueue, MAX_ACTIVE_JOBS};

use secrecy::SecretString;

// ============================================================================
// Flags
// ============================================================================

/// Per-request processing flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateFlags {
    /// The feed title should be reset to the parser-supplied default.
    pub reset_title: bool,
    /// User-triggered request; drains ahead of scheduled work.
    pub priority_high: bool,
    /// Not a feed fetch (favicon, enclosure); excluded from job statistics.
    pub no_feed: bool,
}

impl UpdateFlags {
    pub const NONE: UpdateFlags = UpdateFlags {
        reset_title: false,
        priority_high: false,
        no_feed: false,
    };

    pub fn priority() -> Self {
        UpdateFlags {
            priority_high: true,
            ..Self::NONE
        }
    }
}

// ============================================================================
// Update options
// ============================================================================

/// Authentication and proxy options attached to a request.
#[derive(Clone, Default)]
pub struct UpdateOptions {
    /// Username for HTTP basic auth.
    pub username: Option<String>,
    /// Password for HTTP basic auth.
    pub password: Option<SecretString>,
    /// Bypass the proxy for this request.
    pub dont_use_proxy: bool,
}

/// Masks the password so option values can appear in logs.
impl std::fmt::Debug for UpdateOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateOptions")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("dont_use_proxy", &self.dont_use_proxy)
            .finish()
    }
}

// ============================================================================
// Update state
// ============================================================================

/// Bandwidth-saving state kept per subscription.
///
/// Cloning produces an independent snapshot; a job mutating its copy never
/// races the scheduler reading the subscription's own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateState {
    /// `Last-Modified` value as sent by the server, replayed verbatim.
    pub last_modified: Option<String>,
    /// `ETag` value as sent by the server.
    pub etag: Option<String>,
    /// Cookies to send with the request.
    pub cookies: Option<String>,
    /// Unix seconds of the last fetch attempt. Never moved backward.
    pub last_poll: i64,
    /// Unix seconds of the last favicon probe.
    pub last_favicon_poll: i64,
    /// Greatest cache max-age hint seen, in minutes.
    pub max_age_minutes: i64,
    /// `syn:updateFrequency` hint from the feed.
    pub syn_frequency: i64,
    /// `syn:updatePeriod` hint from the feed, in minutes.
    pub syn_period: i64,
    /// `ttl` hint from the feed, in minutes.
    pub time_to_live: i64,
}

impl UpdateState {
    /// Drop the conditional-request tokens so the next fetch is a full GET.
    ///
    /// Used by the explicit "reset title" refresh, which must see the
    /// complete feed again.
    pub fn reset_conditional(&mut self) {
        self.last_modified = None;
        self.etag = None;
    }

    /// Advance `last_poll`, never moving it backward.
    pub fn touch_poll(&mut self, now: i64) {
        if now > self.last_poll {
            self.last_poll = now;
        }
    }
}

// ============================================================================
// Update request
// ============================================================================

/// One fetch attempt, consumed exactly once by the runner.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    /// Location of the source. A leading `|` denotes a command, `://`
    /// denotes a URI, anything else a filename.
    pub source: String,
    /// HTTP POST body (None for GET requests).
    pub post_data: Option<String>,
    /// Custom value for the `Authorization:` header.
    pub auth_value: Option<String>,
    /// Authentication / proxy options.
    pub options: UpdateOptions,
    /// Post-fetch filter: a shell command or an `.xsl` stylesheet path.
    pub filter_cmd: Option<String>,
    /// Snapshot of the owner's update state (etag, last modified...).
    pub update_state: UpdateState,
    /// Whether this request may run local commands.
    ///
    /// Set only on the subscription fetch path. Favicon, enclosure, and
    /// HTML downloads keep it false so an untrusted redirect can never
    /// execute a shell command.
    pub allow_commands: bool,
}

impl UpdateRequest {
    pub fn new(source: impl Into<String>, state: UpdateState, options: UpdateOptions) -> Self {
        Self {
            source: source.into(),
            post_data: None,
            auth_value: None,
            options,
            filter_cmd: None,
            update_state: state,
            allow_commands: false,
        }
    }

    /// Replace the source when it was not known at construction time.
    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = source.into();
    }

    pub fn set_auth_value(&mut self, auth_value: impl Into<String>) {
        self.auth_value = Some(auth_value.into());
    }

    pub fn allow_commands(&mut self, allow: bool) {
        self.allow_commands = allow;
    }
}

// ============================================================================
// Update result
// ============================================================================

/// What a finished job hands to its callback.
///
/// Single-writer while the job runs; read-only inside the callback. The
/// queue releases it after the callback returns.
#[derive(Debug, Clone, Default)]
pub struct UpdateResult {
    /// Effective location after redirects; may differ from the request.
    pub source: String,
    /// HTTP status. 200 for any valid command or file access, 0 unknown.
    pub http_status: u16,
    /// Downloaded data.
    pub data: Vec<u8>,
    /// Content type of the received data.
    pub content_type: Option<String>,
    /// Error messages from filter execution.
    pub filter_errors: Option<String>,
    /// Transport-level error description for non-HTTP failures.
    pub error: Option<String>,
    /// New update state (etag, last modified) of the requested object.
    pub update_state: UpdateState,
}

impl UpdateResult {
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// True for statuses the error model treats as success (2xx/3xx).
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.http_status)
    }
}
