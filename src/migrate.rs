//! Metadata database schema migrations.
//!
//! Creates all required tables and ensures idempotent execution.
//! Runs once per user database via `alcove init` and again defensively
//! whenever a user context is opened.
//!
//! # Schema
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌──────────────┐
//! │   spaces     │──┐  │     items      │     │   queries    │
//! │              │  │  │                │     │              │
//! │ id (PK)      │  └──│ space_id       │  ┌──│ space_id     │
//! │ user_id      │     │ id (PK)        │  │  │ id (PK)      │
//! │ name         │     │ kind           │  │  │ question     │
//! │ description  │     │ content        │  │  │ answer       │
//! │ created_at   │     │ details_json   │  │  │ sources_json │
//! │ updated_at   │     │ notes          │  │  │ created_at   │
//! └──────┬───────┘     │ status         │  │  └──────────────┘
//!        └─────────────│ failure_reason │──┘
//!                      │ vector_ref     │
//!                      │ extracted_text │
//!                      │ created_at     │
//!                      └────────────────┘
//! ```
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `spaces` | User-owned containers; `item_count` is derived, never stored |
//! | `items` | Content units with processing status and index back-reference |
//! | `queries` | Append-only answered-question history per space |
//!
//! Timestamps are Unix epoch seconds. `details_json` holds the tagged
//! per-kind [`crate::models::ItemDetails`]; `sources_json` holds the ordered
//! [`crate::models::QuerySource`] list.

use anyhow::Result;
use sqlx::SqlitePool;

/// Run all migrations. Safe to call multiple times.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS spaces (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            space_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            content TEXT NOT NULL,
            details_json TEXT NOT NULL DEFAULT '{}',
            notes TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            failure_reason TEXT,
            vector_ref INTEGER,
            extracted_text TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (space_id) REFERENCES spaces(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queries (
            id TEXT PRIMARY KEY,
            space_id TEXT NOT NULL,
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            sources_json TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            FOREIGN KEY (space_id) REFERENCES spaces(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes for the common access paths
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_spaces_user_id ON spaces(user_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_space_id ON items(space_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_created_at ON items(created_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_queries_space_created ON queries(space_id, created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
