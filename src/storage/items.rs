use anyhow::Result;

use super::schema::Database;
use super::types::{Item, ItemDbRow, NodeCounts};

/// Maximum items returned from any single query (OOM protection).
const MAX_ITEMS: i64 = 5000;

const ITEM_COLUMNS: &str = r#"id, node_id, source_id, source_url, title, description, author,
       published, fetched_at, read, flagged, "new", "updated", metadata"#;

impl Database {
    // ========================================================================
    // Item Queries
    // ========================================================================

    /// All items of a node, newest first.
    pub async fn items_for_node(&self, node_id: &str) -> Result<Vec<Item>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE node_id = ? \
             ORDER BY COALESCE(published, fetched_at) DESC, id DESC LIMIT ?"
        );
        let rows = sqlx::query_as::<_, ItemDbRow>(&sql)
            .bind(node_id)
            .bind(MAX_ITEMS)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(ItemDbRow::into_item).collect())
    }

    /// One item by its local id.
    pub async fn item_by_id(&self, item_id: i64) -> Result<Option<Item>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?");
        let row = sqlx::query_as::<_, ItemDbRow>(&sql)
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(ItemDbRow::into_item))
    }

    /// One item by its store key.
    pub async fn item_by_source_id(&self, node_id: &str, source_id: &str) -> Result<Option<Item>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE node_id = ? AND source_id = ?");
        let row = sqlx::query_as::<_, ItemDbRow>(&sql)
            .bind(node_id)
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(ItemDbRow::into_item))
    }

    /// Every item in the store, for full search-folder evaluation.
    pub async fn all_items(&self) -> Result<Vec<Item>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items \
             ORDER BY COALESCE(published, fetched_at) DESC, id DESC LIMIT ?"
        );
        let rows = sqlx::query_as::<_, ItemDbRow>(&sql)
            .bind(MAX_ITEMS)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(ItemDbRow::into_item).collect())
    }

    /// Counters for a node's own scope.
    ///
    /// These are the authoritative values behind the tree-row counters;
    /// nodes cache them but never invent them.
    pub async fn node_counts(&self, node_id: &str) -> Result<NodeCounts> {
        let row: (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(CASE WHEN read = 0 THEN 1 ELSE 0 END), 0),
                   COALESCE(SUM(CASE WHEN "new" = 1 THEN 1 ELSE 0 END), 0)
            FROM items WHERE node_id = ?
        "#,
        )
        .bind(node_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(NodeCounts {
            item_count: row.0 as u32,
            unread_count: row.1 as u32,
            new_count: row.2 as u32,
        })
    }

    // ========================================================================
    // Item Mutations
    // ========================================================================

    /// Set an item's read state (idempotent), returns whether it changed.
    pub async fn set_item_read(&self, item_id: i64, read: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE items SET read = ? WHERE id = ? AND read != ?")
            .bind(read)
            .bind(item_id)
            .bind(read)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Set an item's flag state (idempotent), returns whether it changed.
    pub async fn set_item_flagged(&self, item_id: i64, flagged: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE items SET flagged = ? WHERE id = ? AND flagged != ?")
            .bind(flagged)
            .bind(item_id)
            .bind(flagged)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark all of a node's items read, returns the number changed.
    pub async fn mark_all_read(&self, node_id: &str) -> Result<u64> {
        let result = sqlx::query("UPDATE items SET read = 1 WHERE node_id = ? AND read = 0")
            .bind(node_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Drop every item of a node (node removal, cache disable).
    pub async fn remove_items(&self, node_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM items WHERE node_id = ?")
            .bind(node_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{merge_items, MergeOptions, ParsedItem};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn parsed(source_id: &str, title: &str) -> ParsedItem {
        ParsedItem {
            source_id: Some(source_id.to_string()),
            title: title.to_string(),
            source_url: Some(format!("https://example.com/{}", source_id)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_read_state_is_idempotent() {
        let db = test_db().await;
        merge_items(&db, "n1", &[parsed("a", "A")], &MergeOptions::default())
            .await
            .unwrap();
        let item = db.items_for_node("n1").await.unwrap().remove(0);

        assert!(db.set_item_read(item.id, true).await.unwrap());
        assert!(!db.set_item_read(item.id, true).await.unwrap());
        assert!(db.item_by_id(item.id).await.unwrap().unwrap().read);
    }

    #[tokio::test]
    async fn test_node_counts() {
        let db = test_db().await;
        merge_items(
            &db,
            "n1",
            &[parsed("a", "A"), parsed("b", "B")],
            &MergeOptions::default(),
        )
        .await
        .unwrap();

        let counts = db.node_counts("n1").await.unwrap();
        assert_eq!(counts.item_count, 2);
        assert_eq!(counts.unread_count, 2);
        assert_eq!(counts.new_count, 2);

        let item = db.items_for_node("n1").await.unwrap().remove(0);
        db.set_item_read(item.id, true).await.unwrap();
        let counts = db.node_counts("n1").await.unwrap();
        assert_eq!(counts.unread_count, 1);
    }
}
