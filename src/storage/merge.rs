//! State-preserving merge of a fresh parse into a node's itemset.

use anyhow::Result;
use chrono::Utc;

use super::schema::Database;
use super::types::ParsedItem;

/// How parsed items are matched against stored rows.
///
/// Feeds that omit guids are matched on the `(title, link)` tuple, which
/// is lossy for feeds that rewrite titles; the strategy is pluggable so
/// embedders can opt out of the fallback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchStrategy {
    /// Match by guid when present, else by `(title, link)`.
    #[default]
    SourceIdThenTitleLink,
    /// Match by guid only; guid-less refetches always insert.
    SourceIdOnly,
}

#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// New items arrive already read (the subscription's `mark_as_read`).
    pub mark_as_read: bool,
    pub strategy: MatchStrategy,
}

/// What one merge batch did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Items inserted by this merge.
    pub new_count: u32,
    /// Matched items whose content changed.
    pub updated_count: u32,
}

/// Fields of existing rows the matcher needs.
#[derive(Debug, sqlx::FromRow)]
struct MergeRow {
    id: i64,
    source_id: String,
    title: String,
    source_url: Option<String>,
    description: Option<String>,
}

/// Merge a freshly parsed item list into a node's itemset.
///
/// For each parsed item: match against the stored rows, insert unmatched
/// ones with `new = 1`, update the mutable fields of matched ones while
/// preserving `read` and `flagged`. A content change (title or
/// description) sets `updated = 1`. Items present in the store but absent
/// from the parse are retained — feeds routinely drop old entries from
/// the wire.
///
/// The whole batch runs in one transaction; the previous merge's `new`
/// flags are cleared first so `new_count` always describes the latest
/// fetch.
pub async fn merge_items(
    db: &Database,
    node_id: &str,
    parsed: &[ParsedItem],
    opts: &MergeOptions,
) -> Result<MergeStats> {
    let now = Utc::now().timestamp();
    let mut stats = MergeStats::default();
    let mut tx = db.pool.begin().await?;

    sqlx::query(r#"UPDATE items SET "new" = 0, "updated" = 0 WHERE node_id = ?"#)
        .bind(node_id)
        .execute(&mut *tx)
        .await?;

    let existing: Vec<MergeRow> = sqlx::query_as(
        "SELECT id, source_id, title, source_url, description FROM items WHERE node_id = ?",
    )
    .bind(node_id)
    .fetch_all(&mut *tx)
    .await?;

    for item in parsed {
        let matched = find_match(&existing, item, opts.strategy);

        match matched {
            Some(row) => {
                let content_changed =
                    row.title != item.title || row.description.as_deref() != item.description.as_deref();
                if content_changed {
                    stats.updated_count += 1;
                }

                let metadata = serde_json::to_string(&item.metadata)?;
                sqlx::query(
                    r#"
                    UPDATE items
                    SET title = ?, source_url = ?, description = ?, author = ?,
                        published = COALESCE(?, published), metadata = ?,
                        "updated" = CASE WHEN ? THEN 1 ELSE "updated" END
                    WHERE id = ?
                "#,
                )
                .bind(&item.title)
                .bind(&item.source_url)
                .bind(&item.description)
                .bind(&item.author)
                .bind(item.published)
                .bind(metadata)
                .bind(content_changed)
                .bind(row.id)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                stats.new_count += 1;
                let source_id = item
                    .source_id
                    .clone()
                    .unwrap_or_else(|| synthesise_source_id(item));
                let metadata = serde_json::to_string(&item.metadata)?;
                sqlx::query(
                    r#"
                    INSERT INTO items
                        (node_id, source_id, source_url, title, description, author,
                         published, fetched_at, read, flagged, "new", "updated", metadata)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 1, 0, ?)
                "#,
                )
                .bind(node_id)
                .bind(source_id)
                .bind(&item.source_url)
                .bind(&item.title)
                .bind(&item.description)
                .bind(&item.author)
                .bind(item.published)
                .bind(now)
                .bind(opts.mark_as_read)
                .bind(metadata)
                .execute(&mut *tx)
                .await?;
            }
        }
    }

    tx.commit().await?;

    tracing::debug!(
        node = node_id,
        new = stats.new_count,
        updated = stats.updated_count,
        parsed = parsed.len(),
        "merged itemset"
    );

    Ok(stats)
}

fn find_match<'a>(
    existing: &'a [MergeRow],
    item: &ParsedItem,
    strategy: MatchStrategy,
) -> Option<&'a MergeRow> {
    if let Some(source_id) = &item.source_id {
        return existing.iter().find(|row| &row.source_id == source_id);
    }

    match strategy {
        MatchStrategy::SourceIdThenTitleLink => existing.iter().find(|row| {
            row.title == item.title && row.source_url.as_deref() == item.source_url.as_deref()
        }),
        MatchStrategy::SourceIdOnly => None,
    }
}

/// Store key for guid-less items, so `(node_id, source_id)` stays unique.
fn synthesise_source_id(item: &ParsedItem) -> String {
    use sha2::{Digest, Sha256};
    let input = format!(
        "{}|{}|{}",
        item.source_url.as_deref().unwrap_or(""),
        item.title,
        item.published.map(|p| p.to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}

// ============================================================================
// Cache-limit enforcement
// ============================================================================

/// Trim a node's itemset to `limit` rows by deleting the oldest read and
/// unflagged items. Returns the number removed.
///
/// Unread or flagged items are never deleted, so the final count may stay
/// above the limit when too few rows are eligible.
pub async fn enforce_cache_limit(db: &Database, node_id: &str, limit: u32) -> Result<u64> {
    let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items WHERE node_id = ?")
        .bind(node_id)
        .fetch_one(&db.pool)
        .await?;

    let excess = total - limit as i64;
    if excess <= 0 {
        return Ok(0);
    }

    let result = sqlx::query(
        r#"
        DELETE FROM items WHERE id IN (
            SELECT id FROM items
            WHERE node_id = ? AND read = 1 AND flagged = 0
            ORDER BY COALESCE(published, fetched_at) ASC, id ASC
            LIMIT ?
        )
    "#,
    )
    .bind(node_id)
    .bind(excess)
    .execute(&db.pool)
    .await?;

    let removed = result.rows_affected();
    if removed > 0 {
        tracing::debug!(node = node_id, removed = removed, limit = limit, "trimmed itemset");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn parsed(source_id: &str, title: &str) -> ParsedItem {
        ParsedItem {
            source_id: Some(source_id.to_string()),
            title: title.to_string(),
            source_url: Some(format!("https://example.com/{}", source_id)),
            description: Some("body".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_merge_inserts_new_items() {
        let db = test_db().await;
        let stats = merge_items(
            &db,
            "n1",
            &[parsed("a", "A"), parsed("b", "B")],
            &MergeOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(stats.new_count, 2);
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let db = test_db().await;
        let items = [parsed("a", "A"), parsed("b", "B")];
        merge_items(&db, "n1", &items, &MergeOptions::default())
            .await
            .unwrap();
        let stats = merge_items(&db, "n1", &items, &MergeOptions::default())
            .await
            .unwrap();
        assert_eq!(stats.new_count, 0);
        assert_eq!(stats.updated_count, 0);
        assert_eq!(db.node_counts("n1").await.unwrap().item_count, 2);
    }

    #[tokio::test]
    async fn test_read_survives_refetch() {
        let db = test_db().await;
        let items = [parsed("a", "A")];
        merge_items(&db, "n1", &items, &MergeOptions::default())
            .await
            .unwrap();
        let item = db.items_for_node("n1").await.unwrap().remove(0);
        db.set_item_read(item.id, true).await.unwrap();

        merge_items(&db, "n1", &items, &MergeOptions::default())
            .await
            .unwrap();
        assert!(db.item_by_id(item.id).await.unwrap().unwrap().read);
    }

    #[tokio::test]
    async fn test_content_change_sets_updated() {
        let db = test_db().await;
        merge_items(&db, "n1", &[parsed("a", "A")], &MergeOptions::default())
            .await
            .unwrap();

        let mut changed = parsed("a", "A");
        changed.description = Some("rewritten".to_string());
        let stats = merge_items(&db, "n1", &[changed], &MergeOptions::default())
            .await
            .unwrap();
        assert_eq!(stats.new_count, 0);
        assert_eq!(stats.updated_count, 1);
        let item = db.items_for_node("n1").await.unwrap().remove(0);
        assert!(item.updated);
        assert_eq!(item.description.as_deref(), Some("rewritten"));
    }

    #[tokio::test]
    async fn test_dropped_wire_items_are_retained() {
        let db = test_db().await;
        merge_items(
            &db,
            "n1",
            &[parsed("a", "A"), parsed("b", "B")],
            &MergeOptions::default(),
        )
        .await
        .unwrap();

        // Next fetch only carries "b"; "a" stays in the store.
        merge_items(&db, "n1", &[parsed("b", "B")], &MergeOptions::default())
            .await
            .unwrap();
        assert_eq!(db.node_counts("n1").await.unwrap().item_count, 2);
    }

    #[tokio::test]
    async fn test_title_link_fallback_matching() {
        let db = test_db().await;
        let guidless = ParsedItem {
            source_id: None,
            title: "A".to_string(),
            source_url: Some("https://example.com/a".to_string()),
            ..Default::default()
        };
        merge_items(&db, "n1", &[guidless.clone()], &MergeOptions::default())
            .await
            .unwrap();
        let stats = merge_items(&db, "n1", &[guidless.clone()], &MergeOptions::default())
            .await
            .unwrap();
        assert_eq!(stats.new_count, 0);

        // With the fallback disabled the refetch inserts a duplicate.
        let opts = MergeOptions {
            strategy: MatchStrategy::SourceIdOnly,
            ..Default::default()
        };
        let stats = merge_items(&db, "n1", &[guidless], &opts).await.unwrap();
        assert_eq!(stats.new_count, 1);
    }

    #[tokio::test]
    async fn test_mark_as_read_inserts_read_items() {
        let db = test_db().await;
        let opts = MergeOptions {
            mark_as_read: true,
            ..Default::default()
        };
        merge_items(&db, "n1", &[parsed("a", "A")], &opts).await.unwrap();
        let counts = db.node_counts("n1").await.unwrap();
        assert_eq!(counts.item_count, 1);
        assert_eq!(counts.unread_count, 0);
    }

    #[tokio::test]
    async fn test_cache_trim_keeps_unread_and_flagged() {
        let db = test_db().await;
        let items: Vec<ParsedItem> = (0..6)
            .map(|i| ParsedItem {
                source_id: Some(format!("i{}", i)),
                title: format!("Item {}", i),
                published: Some(1000 + i),
                ..Default::default()
            })
            .collect();
        merge_items(&db, "n1", &items, &MergeOptions::default())
            .await
            .unwrap();

        // Read everything except i5; flag i0 (the oldest).
        let stored = db.items_for_node("n1").await.unwrap();
        for item in &stored {
            if item.source_id != "i5" {
                db.set_item_read(item.id, true).await.unwrap();
            }
            if item.source_id == "i0" {
                db.set_item_flagged(item.id, true).await.unwrap();
            }
        }

        let removed = enforce_cache_limit(&db, "n1", 3).await.unwrap();
        assert_eq!(removed, 3);

        let left: Vec<String> = db
            .items_for_node("n1")
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.source_id)
            .collect();
        // i5 unread, i0 flagged, i4 is the newest read+unflagged survivor.
        assert!(left.contains(&"i5".to_string()));
        assert!(left.contains(&"i0".to_string()));
        assert!(left.contains(&"i4".to_string()));
        assert_eq!(left.len(), 3);
    }
}
