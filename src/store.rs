//! Metadata store: the durable record of spaces, items, and queries.
//!
//! This is the sole source of truth for identity, ownership, timestamps,
//! and item content. The pipeline relies on exactly the contracts exposed
//! here: single-row atomicity for updates and deletes, ordered listing
//! with pagination, and point lookups for hydration. Cross-row consistency
//! is deliberately not promised; the retrieval path tolerates stale reads
//! between search and hydrate.
//!
//! One database file exists per user (see [`crate::context`]); every method
//! on [`MetadataStore`] therefore operates within a single user's data.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::{Error, Result};
use crate::models::{Item, ItemDetails, ItemKind, ItemStatus, Query, QuerySource, Space};

/// Handle over one user's metadata database.
#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ============ Spaces ============

    pub async fn insert_space(&self, space: &Space) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO spaces (id, user_id, name, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&space.id)
        .bind(&space.user_id)
        .bind(&space.name)
        .bind(&space.description)
        .bind(space.created_at.timestamp())
        .bind(space.updated_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_space(&self, space_id: &str) -> Result<Space> {
        let row = sqlx::query(
            r#"
            SELECT s.id, s.user_id, s.name, s.description, s.created_at, s.updated_at,
                   (SELECT COUNT(*) FROM items i WHERE i.space_id = s.id) AS item_count
            FROM spaces s
            WHERE s.id = ?
            "#,
        )
        .bind(space_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("space {}", space_id)))?;

        Ok(space_from_row(&row))
    }

    pub async fn list_spaces(&self, user_id: &str) -> Result<Vec<Space>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.user_id, s.name, s.description, s.created_at, s.updated_at,
                   (SELECT COUNT(*) FROM items i WHERE i.space_id = s.id) AS item_count
            FROM spaces s
            WHERE s.user_id = ?
            ORDER BY s.created_at DESC, s.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(space_from_row).collect())
    }

    pub async fn update_space(
        &self,
        space_id: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Space> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE spaces
            SET name = COALESCE(?, name),
                description = COALESCE(?, description),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(now)
        .bind(space_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("space {}", space_id)));
        }
        self.get_space(space_id).await
    }

    /// Remove the space row plus its query history. Items are removed one by
    /// one by the cascade in [`crate::spaces`] so their vectors and file
    /// bytes come out first.
    pub async fn delete_space_rows(&self, space_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM queries WHERE space_id = ?")
            .bind(space_id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM spaces WHERE id = ?")
            .bind(space_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ============ Items ============

    /// Insert a new item in `pending` state. The vector and extracted text
    /// arrive later via [`mark_item_ready`](Self::mark_item_ready).
    pub async fn insert_item_pending(&self, item: &Item) -> Result<()> {
        let details_json = serde_json::to_string(&item.details)
            .map_err(|e| Error::Internal(format!("serialize details: {}", e)))?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO items
                (id, space_id, kind, content, details_json, notes, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 'pending', ?)
            "#,
        )
        .bind(&item.id)
        .bind(&item.space_id)
        .bind(item.kind.as_str())
        .bind(&item.content)
        .bind(&details_json)
        .bind(&item.notes)
        .bind(item.created_at.timestamp())
        .execute(&self.pool)
        .await?;

        // Duplicate ids should not occur under UUID generation.
        if result.rows_affected() == 0 {
            return Err(Error::Conflict(format!("item {} already exists", item.id)));
        }
        Ok(())
    }

    pub async fn mark_item_ready(
        &self,
        item_id: &str,
        vector_ref: i64,
        extracted_text: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE items
            SET status = 'ready', vector_ref = ?, extracted_text = ?, failure_reason = NULL
            WHERE id = ?
            "#,
        )
        .bind(vector_ref)
        .bind(extracted_text)
        .bind(item_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_item_failed(&self, item_id: &str, reason: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE items
            SET status = 'failed', failure_reason = ?, vector_ref = NULL, extracted_text = NULL
            WHERE id = ?
            "#,
        )
        .bind(reason)
        .bind(item_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_item(&self, item_id: &str) -> Result<Item> {
        let row = sqlx::query(ITEM_SELECT)
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("item {}", item_id)))?;

        item_from_row(&row)
    }

    /// Point-lookup each id, silently dropping ids whose item was deleted
    /// between search and hydrate.
    pub async fn hydrate(&self, item_ids: &[String]) -> Result<Vec<Item>> {
        let mut items = Vec::with_capacity(item_ids.len());
        for id in item_ids {
            if let Some(row) = sqlx::query(ITEM_SELECT)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
            {
                items.push(item_from_row(&row)?);
            }
        }
        Ok(items)
    }

    pub async fn list_items(&self, space_id: &str, limit: i64, offset: i64) -> Result<Vec<Item>> {
        let rows = sqlx::query(
            r#"
            SELECT id, space_id, kind, content, details_json, notes, status,
                   failure_reason, vector_ref, extracted_text, created_at
            FROM items
            WHERE space_id = ?
            ORDER BY created_at DESC, id
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(space_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(item_from_row).collect()
    }

    pub async fn list_item_ids(&self, space_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT id FROM items WHERE space_id = ?")
            .bind(space_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    pub async fn count_ready_items(&self, space_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM items WHERE space_id = ? AND status = 'ready'",
        )
        .bind(space_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Every ready item in the user's database, for global-search hydration
    /// and full reindex.
    pub async fn list_ready_items(&self) -> Result<Vec<Item>> {
        let rows = sqlx::query(
            r#"
            SELECT id, space_id, kind, content, details_json, notes, status,
                   failure_reason, vector_ref, extracted_text, created_at
            FROM items
            WHERE status = 'ready'
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(item_from_row).collect()
    }

    pub async fn remove_item_row(&self, item_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM items WHERE id = ?")
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ============ Queries ============

    pub async fn insert_query(&self, query: &Query) -> Result<()> {
        let sources_json = serde_json::to_string(&query.sources)
            .map_err(|e| Error::Internal(format!("serialize sources: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO queries (id, space_id, question, answer, sources_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&query.id)
        .bind(&query.space_id)
        .bind(&query.question)
        .bind(&query.answer)
        .bind(&sources_json)
        .bind(query.created_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_queries(&self, space_id: &str, limit: i64, offset: i64) -> Result<Vec<Query>> {
        let rows = sqlx::query(
            r#"
            SELECT id, space_id, question, answer, sources_json, created_at
            FROM queries
            WHERE space_id = ?
            ORDER BY created_at DESC, id
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(space_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let sources_json: String = row.get("sources_json");
                let sources: Vec<QuerySource> = serde_json::from_str(&sources_json)
                    .map_err(|e| Error::Internal(format!("parse sources: {}", e)))?;
                Ok(Query {
                    id: row.get("id"),
                    space_id: row.get("space_id"),
                    question: row.get("question"),
                    answer: row.get("answer"),
                    sources,
                    created_at: ts_to_datetime(row.get("created_at")),
                })
            })
            .collect()
    }
}

const ITEM_SELECT: &str = r#"
    SELECT id, space_id, kind, content, details_json, notes, status,
           failure_reason, vector_ref, extracted_text, created_at
    FROM items
    WHERE id = ?
"#;

fn ts_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}

fn space_from_row(row: &sqlx::sqlite::SqliteRow) -> Space {
    Space {
        id: row.get("id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        description: row.get("description"),
        created_at: ts_to_datetime(row.get("created_at")),
        updated_at: ts_to_datetime(row.get("updated_at")),
        item_count: row.get("item_count"),
    }
}

fn item_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Item> {
    let kind_str: String = row.get("kind");
    let kind = ItemKind::parse(&kind_str)
        .ok_or_else(|| Error::Internal(format!("unknown item kind '{}'", kind_str)))?;

    let status_str: String = row.get("status");
    let status = ItemStatus::parse(&status_str)
        .ok_or_else(|| Error::Internal(format!("unknown item status '{}'", status_str)))?;

    let details_json: String = row.get("details_json");
    let details: ItemDetails = serde_json::from_str(&details_json)
        .map_err(|e| Error::Internal(format!("parse item details: {}", e)))?;

    Ok(Item {
        id: row.get("id"),
        space_id: row.get("space_id"),
        kind,
        content: row.get("content"),
        details,
        notes: row.get("notes"),
        created_at: ts_to_datetime(row.get("created_at")),
        status,
        failure_reason: row.get("failure_reason"),
        vector_ref: row.get("vector_ref"),
        extracted_text: row.get("extracted_text"),
    })
}
