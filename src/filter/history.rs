//! Poster history used by the first-time conditions.

use std::net::IpAddr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::datetime::to_db;
use crate::db::{Database, DbPool};
use crate::ip_range::ip_to_bytes;
use crate::{Result, WardenError};

/// Answers whether an address has posted before.
#[async_trait]
pub trait PostHistory: Send + Sync {
    /// Whether `ip` has an earlier post on `board_id`.
    async fn has_posted_on_board(&self, ip: IpAddr, board_id: i64) -> Result<bool>;

    /// Whether `ip` has an earlier post on any board.
    async fn has_posted_on_site(&self, ip: IpAddr) -> Result<bool>;
}

/// [`PostHistory`] backed by the `post_log` table.
pub struct SqlitePostHistory<'a> {
    pool: &'a DbPool,
}

impl<'a> SqlitePostHistory<'a> {
    /// Create a history reader over the given database.
    pub fn new(db: &'a Database) -> Self {
        Self { pool: db.pool() }
    }

    /// Record an accepted post.
    pub async fn record_post(
        &self,
        ip: IpAddr,
        board_id: i64,
        posted_at: DateTime<Utc>,
    ) -> Result<()> {
        let addr = ip_to_bytes(ip);
        sqlx::query("INSERT INTO post_log (ip, board_id, posted_at) VALUES (?, ?, ?)")
            .bind(addr.as_slice())
            .bind(board_id)
            .bind(to_db(&posted_at))
            .execute(self.pool)
            .await
            .map_err(|e| WardenError::Database(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl PostHistory for SqlitePostHistory<'_> {
    async fn has_posted_on_board(&self, ip: IpAddr, board_id: i64) -> Result<bool> {
        let addr = ip_to_bytes(ip);
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM post_log WHERE ip = ? AND board_id = ?)",
        )
        .bind(addr.as_slice())
        .bind(board_id)
        .fetch_one(self.pool)
        .await
        .map_err(|e| WardenError::Database(e.to_string()))?;
        Ok(exists)
    }

    async fn has_posted_on_site(&self, ip: IpAddr) -> Result<bool> {
        let addr = ip_to_bytes(ip);
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM post_log WHERE ip = ?)")
            .bind(addr.as_slice())
            .fetch_one(self.pool)
            .await
            .map_err(|e| WardenError::Database(e.to_string()))?;
        Ok(exists)
    }
}
