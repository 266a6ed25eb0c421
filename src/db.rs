use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;

/// Metadata database file inside a user's directory.
const DB_FILE: &str = "kb.sqlite";

/// Open the metadata database under `user_root`, creating the directory
/// and the file on first use.
///
/// Each database serves exactly one user, so the realistic load is a
/// single ingestion writer plus a few hydrating readers; WAL keeps those
/// readers unblocked and a small pool is all the concurrency the file
/// can use. The busy timeout covers the brief writer overlap the
/// concurrent save paths produce.
pub async fn open_user_db(user_root: &Path) -> Result<SqlitePool> {
    std::fs::create_dir_all(user_root)?;

    let options = SqliteConnectOptions::new()
        .filename(user_root.join(DB_FILE))
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    Ok(pool)
}
