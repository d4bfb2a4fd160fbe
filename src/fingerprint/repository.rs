//! File ban repository.

use chrono::{DateTime, Utc};

use super::types::{FileBan, NewFileBan};
use crate::datetime::{from_db, to_db};
use crate::db::DbPool;
use crate::{Result, WardenError};

const FILE_BAN_COLUMNS: &str = "id, fingerprint, fingerprinter, board_id, staff_id, staff_note,
    issued_at, ban_ip, ban_ip_message, is_active";

/// Repository for fingerprint bans.
pub struct FileBanRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> FileBanRepository<'a> {
    /// Create a new FileBanRepository with the given database pool reference.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Insert a fingerprint ban.
    pub async fn create(
        &self,
        new_ban: &NewFileBan,
        fingerprinter: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO file_ban (fingerprint, fingerprinter, board_id, staff_id, staff_note,
                                   issued_at, ban_ip, ban_ip_message)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(&new_ban.fingerprint)
        .bind(fingerprinter)
        .bind(new_ban.board_id)
        .bind(new_ban.staff_id)
        .bind(&new_ban.staff_note)
        .bind(to_db(&issued_at))
        .bind(new_ban.ban_ip)
        .bind(&new_ban.ban_ip_message)
        .fetch_one(self.pool)
        .await
        .map_err(|e| WardenError::Database(e.to_string()))?;
        Ok(id)
    }

    /// Get a fingerprint ban by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<FileBan>> {
        let sql = format!("SELECT {FILE_BAN_COLUMNS} FROM file_ban WHERE id = ?");
        let row: Option<FileBanRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| WardenError::Database(e.to_string()))?;

        row.map(FileBanRow::into_ban).transpose()
    }

    /// Find the newest active ban with this exact fingerprint on `board_id`.
    pub async fn find_matching(
        &self,
        fingerprinter: &str,
        fingerprint: &str,
        board_id: i64,
    ) -> Result<Option<FileBan>> {
        let sql = format!(
            "SELECT {FILE_BAN_COLUMNS} FROM file_ban
             WHERE is_active = 1
               AND fingerprinter = ?
               AND fingerprint = ?
               AND (board_id IS NULL OR board_id = ?)
             ORDER BY id DESC
             LIMIT 1"
        );
        let row: Option<FileBanRow> = sqlx::query_as(&sql)
            .bind(fingerprinter)
            .bind(fingerprint)
            .bind(board_id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| WardenError::Database(e.to_string()))?;

        row.map(FileBanRow::into_ban).transpose()
    }

    /// List fingerprint bans, newest first.
    pub async fn list(&self, active_only: bool) -> Result<Vec<FileBan>> {
        let sql = format!(
            "SELECT {FILE_BAN_COLUMNS} FROM file_ban WHERE (? = 0 OR is_active = 1) ORDER BY id DESC"
        );
        let rows: Vec<FileBanRow> = sqlx::query_as(&sql)
            .bind(active_only)
            .fetch_all(self.pool)
            .await
            .map_err(|e| WardenError::Database(e.to_string()))?;

        rows.into_iter().map(FileBanRow::into_ban).collect()
    }
}

#[derive(sqlx::FromRow)]
struct FileBanRow {
    id: i64,
    fingerprint: String,
    fingerprinter: String,
    board_id: Option<i64>,
    staff_id: Option<i64>,
    staff_note: String,
    issued_at: String,
    ban_ip: bool,
    ban_ip_message: Option<String>,
    is_active: bool,
}

impl FileBanRow {
    fn into_ban(self) -> Result<FileBan> {
        Ok(FileBan {
            id: self.id,
            fingerprint: self.fingerprint,
            fingerprinter: self.fingerprinter,
            board_id: self.board_id,
            staff_id: self.staff_id,
            staff_note: self.staff_note,
            issued_at: from_db(&self.issued_at)?,
            ban_ip: self.ban_ip,
            ban_ip_message: self.ban_ip_message,
            is_active: self.is_active,
        })
    }
}
