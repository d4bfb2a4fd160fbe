//! Ban appeal repository.
//!
//! Appeals are never deleted. Approving one lifts the ban, writes an audit
//! row and flips the appeal to `approved`, all in one transaction.

use chrono::{DateTime, Utc};

use super::repository::deactivate_ip_ban;
use super::types::{AppealStatus, BanAppeal};
use crate::datetime::{from_db, to_db};
use crate::db::DbPool;
use crate::{Result, WardenError};

/// Repository for appeals against IP bans.
pub struct AppealRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> AppealRepository<'a> {
    /// Create a new AppealRepository with the given database pool reference.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Insert a pending appeal.
    pub async fn create(&self, ip_ban_id: i64, text: &str, now: DateTime<Utc>) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO ip_ban_appeal (ip_ban_id, appeal_text, status, created_at)
             VALUES (?, ?, 'pending', ?) RETURNING id",
        )
        .bind(ip_ban_id)
        .bind(text)
        .bind(to_db(&now))
        .fetch_one(self.pool)
        .await
        .map_err(|e| WardenError::Database(e.to_string()))?;
        Ok(id)
    }

    /// Get an appeal by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<BanAppeal>> {
        let row: Option<AppealRow> = sqlx::query_as(
            "SELECT id, ip_ban_id, appeal_text, staff_id, staff_response, status, created_at
             FROM ip_ban_appeal WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| WardenError::Database(e.to_string()))?;

        row.map(AppealRow::into_appeal).transpose()
    }

    /// List appeals, oldest first, optionally for one ban.
    pub async fn list(&self, ip_ban_id: Option<i64>) -> Result<Vec<BanAppeal>> {
        let rows: Vec<AppealRow> = sqlx::query_as(
            "SELECT id, ip_ban_id, appeal_text, staff_id, staff_response, status, created_at
             FROM ip_ban_appeal
             WHERE (? IS NULL OR ip_ban_id = ?)
             ORDER BY id",
        )
        .bind(ip_ban_id)
        .bind(ip_ban_id)
        .fetch_all(self.pool)
        .await
        .map_err(|e| WardenError::Database(e.to_string()))?;

        rows.into_iter().map(AppealRow::into_appeal).collect()
    }

    /// Whether the ban already has an appeal waiting for staff.
    pub async fn has_pending(&self, ip_ban_id: i64) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM ip_ban_appeal WHERE ip_ban_id = ? AND status = 'pending')",
        )
        .bind(ip_ban_id)
        .fetch_one(self.pool)
        .await
        .map_err(|e| WardenError::Database(e.to_string()))?;
        Ok(exists)
    }

    /// Approve a pending appeal and lift its ban.
    ///
    /// Returns false if the appeal is not pending.
    pub async fn approve(&self, appeal: &BanAppeal, staff_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let affected = sqlx::query(
            "UPDATE ip_ban_appeal SET status = 'approved', staff_id = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(staff_id)
        .bind(appeal.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| WardenError::Database(e.to_string()))?
        .rows_affected();

        if affected == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if !deactivate_ip_ban(&mut *tx, appeal.ip_ban_id, Some(staff_id), now).await? {
            tx.rollback().await?;
            return Err(WardenError::NotFound(format!("IP ban {}", appeal.ip_ban_id)));
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Deny a pending appeal with a response for the poster.
    ///
    /// Returns false if the appeal is not pending.
    pub async fn deny(&self, id: i64, staff_id: i64, response: &str) -> Result<bool> {
        let affected = sqlx::query(
            "UPDATE ip_ban_appeal SET status = 'denied', staff_id = ?, staff_response = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(staff_id)
        .bind(response)
        .bind(id)
        .execute(self.pool)
        .await
        .map_err(|e| WardenError::Database(e.to_string()))?
        .rows_affected();
        Ok(affected > 0)
    }
}

#[derive(sqlx::FromRow)]
struct AppealRow {
    id: i64,
    ip_ban_id: i64,
    appeal_text: String,
    staff_id: Option<i64>,
    staff_response: Option<String>,
    status: String,
    created_at: String,
}

impl AppealRow {
    fn into_appeal(self) -> Result<BanAppeal> {
        let status: AppealStatus = self.status.parse().map_err(WardenError::Database)?;
        Ok(BanAppeal {
            id: self.id,
            ip_ban_id: self.ip_ban_id,
            appeal_text: self.appeal_text,
            staff_id: self.staff_id,
            staff_response: self.staff_response,
            status,
            created_at: from_db(&self.created_at)?,
        })
    }
}
