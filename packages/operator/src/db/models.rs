use chrono::{DateTime, Utc};
use multichain_rs::{ChainId, ScanCursor};
use serde::Serialize;
use sqlx::FromRow;

/// One row of `scan_cursors`
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ScanCursorRow {
    pub chain_id: i64,
    pub cursor: String,
    pub updated_at: DateTime<Utc>,
}

impl ScanCursorRow {
    pub fn chain(&self) -> ChainId {
        ChainId(self.chain_id as u64)
    }

    pub fn scan_cursor(&self) -> ScanCursor {
        ScanCursor::decode(&self.cursor)
    }
}
