//! Persistent item store on SQLite.
//!
//! Single authority for item rows, per-node update state, and favicon
//! blobs. The store is handed around by value (pool clone) and is always
//! written from the main context; merges are transactional per batch.

mod items;
mod merge;
mod schema;
mod state;
mod types;

pub use merge::{enforce_cache_limit, merge_items, MatchStrategy, MergeOptions, MergeStats};
pub use schema::Database;
pub use types::{Item, NodeCounts, ParsedItem, StoreError};
