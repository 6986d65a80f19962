//! Local cursor store
//!
//! The only state an operator persists: the last fully voted scan position
//! per external chain. Everything else lives in the ledger.

use chrono::Utc;
use eyre::{Result, WrapErr};
use multichain_rs::{ChainId, ScanCursor};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

pub mod models;

pub use models::*;

/// Create a connection pool, creating the database file if needed
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .wrap_err_with(|| format!("Invalid DATABASE_URL {}", database_url))?
        .create_if_missing(true);

    // every connection to an in-memory database is a separate database
    let max_connections = if database_url.contains(":memory:") {
        1
    } else {
        4
    };

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .wrap_err("Failed to open database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

pub async fn get_cursor(pool: &SqlitePool, chain_id: ChainId) -> Result<Option<ScanCursor>> {
    let row = sqlx::query_as::<_, ScanCursorRow>(
        "SELECT chain_id, cursor, updated_at FROM scan_cursors WHERE chain_id = ?",
    )
    .bind(chain_id.as_u64() as i64)
    .fetch_optional(pool)
    .await
    .wrap_err("Failed to read scan cursor")?;
    Ok(row.map(|r| r.scan_cursor()))
}

/// Insert or replace the cursor for `chain_id`
pub async fn save_cursor(pool: &SqlitePool, chain_id: ChainId, cursor: &ScanCursor) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO scan_cursors (chain_id, cursor, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(chain_id) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at
        "#,
    )
    .bind(chain_id.as_u64() as i64)
    .bind(cursor.encode())
    .bind(Utc::now())
    .execute(pool)
    .await
    .wrap_err("Failed to save scan cursor")?;
    Ok(())
}

pub async fn list_cursors(pool: &SqlitePool) -> Result<Vec<ScanCursorRow>> {
    sqlx::query_as::<_, ScanCursorRow>(
        "SELECT chain_id, cursor, updated_at FROM scan_cursors ORDER BY chain_id",
    )
    .fetch_all(pool)
    .await
    .wrap_err("Failed to list scan cursors")
}
