//! Remote accounts: the Google-Reader-API family and Tiny Tiny RSS.
//!
//! A remote account is a source-root node whose children mirror the
//! account's subscription list. The pieces: a per-dialect endpoint table,
//! a login state machine, a strictly serialised edit-action queue, and the
//! feed-list source that diffs the remote list into the local subtree.

pub mod dialect;
pub mod edit;
pub mod session;
pub mod source;
pub mod ttrss;

pub use dialect::{ReaderApi, RemoteVariant};
pub use edit::{EditAction, EditActionKind, EditQueue};
pub use session::{LoginState, MAX_AUTH_FAILURES};

use std::collections::HashMap;

/// Seconds between full subscription-list refreshes.
pub const FULL_UPDATE_INTERVAL_SECS: i64 = 24 * 60 * 60;

/// Seconds between cheap unread-count polls.
pub const QUICK_UPDATE_INTERVAL_SECS: i64 = 600;

/// State of one remote account, stored on its source-root node.
///
/// Mutated only from the main context; the action queue is a plain FIFO
/// with no cross-thread access.
pub struct RemoteSource {
    pub variant: RemoteVariant,
    pub api: ReaderApi,
    pub login_state: LoginState,
    /// Cached `Authorization:` header value (Reader family).
    pub auth_token: Option<String>,
    /// Cached JSON-RPC session id (Tiny Tiny RSS).
    pub session_id: Option<String>,
    pub auth_failures: u32,
    /// Pending edits to replicate to the account.
    pub edits: EditQueue,
    /// Local folder id → remote category id.
    pub folder_to_category: HashMap<String, String>,
    /// Remote category id → local folder id.
    pub category_to_folder: HashMap<String, String>,
    /// Stream id → newest item timestamp seen by the quick-update poll.
    pub last_timestamps: HashMap<String, i64>,
    pub last_quick_update: i64,
    pub last_full_update: i64,
}

impl RemoteSource {
    pub fn new(variant: RemoteVariant, base_url: &str) -> Self {
        Self {
            api: ReaderApi::for_variant(variant, base_url),
            variant,
            login_state: LoginState::None,
            auth_token: None,
            session_id: None,
            auth_failures: 0,
            edits: EditQueue::default(),
            folder_to_category: HashMap::new(),
            category_to_folder: HashMap::new(),
            last_timestamps: HashMap::new(),
            last_quick_update: 0,
            last_full_update: 0,
        }
    }

    /// Record a remote category for a local folder, both directions.
    pub fn map_category(&mut self, folder_id: &str, category_id: &str) {
        self.folder_to_category
            .insert(folder_id.to_string(), category_id.to_string());
        self.category_to_folder
            .insert(category_id.to_string(), folder_id.to_string());
    }
}

impl std::fmt::Debug for RemoteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSource")
            .field("variant", &self.variant)
            .field("login_state", &self.login_state)
            .field("auth_failures", &self.auth_failures)
            .field("pending_edits", &self.edits.len())
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
