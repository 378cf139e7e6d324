use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Store-specific errors with user-facing messages.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another process has the database locked.
    #[error("The item store is locked by another instance. Please close it and try again.")]
    Locked,

    /// Migration failed.
    #[error("Item store migration failed: {0}")]
    Migration(String),

    /// Generic database error.
    #[error("Item store error: {0}")]
    Other(#[from] sqlx::Error),
}

impl StoreError {
    /// Check if a sqlx error indicates database locking.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return StoreError::Locked;
        }

        StoreError::Other(err)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// One entry from a feed, as parsed off the wire.
///
/// `source_id` is the feed-supplied guid; when a feed omits it the parser
/// synthesises one so the store key `(node_id, source_id)` always exists,
/// but merge matching still distinguishes the two cases.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedItem {
    /// Feed-supplied guid, if the feed carried one.
    pub source_id: Option<String>,
    pub title: String,
    /// Item link.
    pub source_url: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    /// Publication time, unix seconds.
    pub published: Option<i64>,
    /// Ordered key → value metadata (categories, enclosures, ...).
    pub metadata: Vec<(String, String)>,
}

/// An item row from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// Local numeric id.
    pub id: i64,
    /// Owning node.
    pub node_id: String,
    /// Feed-supplied guid (or the synthesised stand-in).
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub published: Option<i64>,
    pub fetched_at: i64,
    pub read: bool,
    pub flagged: bool,
    /// Arrived in the most recent merge.
    pub new: bool,
    /// Content changed on a refetch.
    pub updated: bool,
    pub metadata: Vec<(String, String)>,
}

/// Internal row type for item queries (sqlx FromRow), converted to the
/// domain type with the metadata JSON decoded.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ItemDbRow {
    pub id: i64,
    pub node_id: String,
    pub source_id: String,
    pub source_url: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub published: Option<i64>,
    pub fetched_at: i64,
    pub read: bool,
    pub flagged: bool,
    pub new: bool,
    pub updated: bool,
    pub metadata: Option<String>,
}

impl ItemDbRow {
    pub(crate) fn into_item(self) -> Item {
        let metadata = self
            .metadata
            .as_deref()
            .and_then(|json| serde_json::from_str::<Vec<(String, String)>>(json).ok())
            .unwrap_or_default();
        Item {
            id: self.id,
            node_id: self.node_id,
            source_id: self.source_id,
            source_url: self.source_url,
            title: self.title,
            description: self.description,
            author: self.author,
            published: self.published,
            fetched_at: self.fetched_at,
            read: self.read,
            flagged: self.flagged,
            new: self.new,
            updated: self.updated,
            metadata,
        }
    }
}

/// Counters derived from the store for one node's scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeCounts {
    pub item_count: u32,
    pub unread_count: u32,
    pub new_count: u32,
}

impl Item {
    /// First metadata value for a key.
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// True if the item carries an enclosure metadata entry.
    pub fn has_enclosure(&self) -> bool {
        self.metadata.iter().any(|(k, _)| k == "enclosure")
    }

    /// All values for the `category` metadata key.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.metadata
            .iter()
            .filter(|(k, _)| k == "category")
            .map(|(_, v)| v.as_str())
    }
}
