//! Per-node update-state and favicon persistence.

use anyhow::Result;

use crate::update::UpdateState;

use super::schema::Database;

impl Database {
    /// Persist a node's conditional-request state.
    pub async fn save_update_state(&self, node_id: &str, state: &UpdateState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO update_states
                (node_id, last_modified, etag, cookies, last_poll, last_favicon_poll,
                 max_age_minutes, syn_frequency, syn_period, time_to_live)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(node_id) DO UPDATE SET
                last_modified = excluded.last_modified,
                etag = excluded.etag,
                cookies = excluded.cookies,
                last_poll = excluded.last_poll,
                last_favicon_poll = excluded.last_favicon_poll,
                max_age_minutes = excluded.max_age_minutes,
                syn_frequency = excluded.syn_frequency,
                syn_period = excluded.syn_period,
                time_to_live = excluded.time_to_live
        "#,
        )
        .bind(node_id)
        .bind(&state.last_modified)
        .bind(&state.etag)
        .bind(&state.cookies)
        .bind(state.last_poll)
        .bind(state.last_favicon_poll)
        .bind(state.max_age_minutes)
        .bind(state.syn_frequency)
        .bind(state.syn_period)
        .bind(state.time_to_live)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load a node's conditional-request state, default when absent.
    pub async fn load_update_state(&self, node_id: &str) -> Result<UpdateState> {
        let row: Option<(
            Option<String>,
            Option<String>,
            Option<String>,
            i64,
            i64,
            i64,
            i64,
            i64,
            i64,
        )> = sqlx::query_as(
            r#"
            SELECT last_modified, etag, cookies, last_poll, last_favicon_poll,
                   max_age_minutes, syn_frequency, syn_period, time_to_live
            FROM update_states WHERE node_id = ?
        "#,
        )
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some((
                last_modified,
                etag,
                cookies,
                last_poll,
                last_favicon_poll,
                max_age_minutes,
                syn_frequency,
                syn_period,
                time_to_live,
            )) => UpdateState {
                last_modified,
                etag,
                cookies,
                last_poll,
                last_favicon_poll,
                max_age_minutes,
                syn_frequency,
                syn_period,
                time_to_live,
            },
            None => UpdateState::default(),
        })
    }

    /// Drop the persisted state of a removed node.
    pub async fn remove_update_state(&self, node_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM update_states WHERE node_id = ?")
            .bind(node_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ========================================================================
    // Favicons
    // ========================================================================

    /// Store a node's favicon bytes, replacing any previous icon.
    pub async fn save_icon(&self, node_id: &str, data: &[u8], source_url: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO icons (node_id, data, source_url, fetched_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(node_id) DO UPDATE SET
                data = excluded.data,
                source_url = excluded.source_url,
                fetched_at = excluded.fetched_at
        "#,
        )
        .bind(node_id)
        .bind(data)
        .bind(source_url)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_icon(&self, node_id: &str) -> Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT data FROM icons WHERE node_id = ?")
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(data,)| data))
    }

    pub async fn remove_icon(&self, node_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM icons WHERE node_id = ?")
            .bind(node_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_state_roundtrip() {
        let db = Database::open(":memory:").await.unwrap();
        let state = UpdateState {
            etag: Some("\"v1\"".into()),
            last_modified: Some("Mon, 01 Jan 2024 00:00:00 GMT".into()),
            last_poll: 1700000000,
            time_to_live: 30,
            ..Default::default()
        };
        db.save_update_state("n1", &state).await.unwrap();
        let loaded = db.load_update_state("n1").await.unwrap();
        assert_eq!(loaded, state);

        assert_eq!(db.load_update_state("other").await.unwrap(), UpdateState::default());
    }

    #[tokio::test]
    async fn test_icon_roundtrip() {
        let db = Database::open(":memory:").await.unwrap();
        db.save_icon("n1", b"\x89PNG", "https://example.com/favicon.ico")
            .await
            .unwrap();
        assert_eq!(db.load_icon("n1").await.unwrap().unwrap(), b"\x89PNG");
        db.remove_icon("n1").await.unwrap();
        assert!(db.load_icon("n1").await.unwrap().is_none());
    }
}
