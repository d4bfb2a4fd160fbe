//! Ban repositories.
//!
//! IP range bounds are compared as big-endian BLOBs. SQLite compares BLOBs
//! with memcmp, so for bounds of equal length the byte order is the numeric
//! order of the addresses. The `length()` guard keeps IPv4 and IPv6 apart.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use super::types::{
    offset_from, BanPattern, IpBan, IpBanAudit, NewIpBan, NewStringBan, StringBan, StringBanKind,
};
use crate::datetime::{from_db, from_db_opt, to_db};
use crate::db::DbPool;
use crate::ip_range::{ip_from_bytes, ip_to_bytes, IpRange};
use crate::{Result, WardenError};

const IP_BAN_COLUMNS: &str = "id, range_start, range_end, board_id, staff_id, banned_for_post_id,
    copy_post_text, issued_at, expires_at, permanent, can_appeal, appeal_at, is_thread_ban,
    message, staff_note, is_active";

const STRING_BAN_COLUMNS: &str =
    "id, pattern, is_regex, board_id, staff_id, staff_note, issued_at, expires_at, permanent, is_active";

/// Repository for IP range bans.
pub struct IpBanRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> IpBanRepository<'a> {
    /// Create a new IpBanRepository with the given database pool reference.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Insert a ban over an already parsed range.
    ///
    /// Returns the new ban ID.
    pub async fn create(
        &self,
        range: &IpRange,
        new_ban: &NewIpBan,
        issued_at: DateTime<Utc>,
    ) -> Result<i64> {
        let expires_at = new_ban.expiry.resolve(issued_at)?;
        let appeal_at = offset_from(issued_at, new_ban.appeal_after, "appeal delay")?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO ip_ban (range_start, range_end, board_id, staff_id, banned_for_post_id,
                                 copy_post_text, issued_at, expires_at, permanent, can_appeal,
                                 appeal_at, is_thread_ban, message, staff_note)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(ip_to_bytes(range.start))
        .bind(ip_to_bytes(range.end))
        .bind(new_ban.board_id)
        .bind(new_ban.staff_id)
        .bind(new_ban.banned_for_post_id)
        .bind(&new_ban.copy_post_text)
        .bind(to_db(&issued_at))
        .bind(expires_at.as_ref().map(to_db))
        .bind(new_ban.expiry.is_permanent())
        .bind(new_ban.can_appeal)
        .bind(to_db(&appeal_at))
        .bind(new_ban.is_thread_ban)
        .bind(&new_ban.message)
        .bind(&new_ban.staff_note)
        .fetch_one(self.pool)
        .await
        .map_err(|e| WardenError::Database(e.to_string()))?;

        Ok(id)
    }

    /// Get a ban by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<IpBan>> {
        let sql = format!("SELECT {IP_BAN_COLUMNS} FROM ip_ban WHERE id = ?");
        let row: Option<IpBanRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| WardenError::Database(e.to_string()))?;

        row.map(IpBanRow::into_ban).transpose()
    }

    /// Find the newest ban in effect that covers `ip` on `board_id`.
    ///
    /// Thread bans are skipped unless `include_thread_bans` is set.
    pub async fn find_matching(
        &self,
        ip: IpAddr,
        board_id: i64,
        now: DateTime<Utc>,
        include_thread_bans: bool,
    ) -> Result<Option<IpBan>> {
        let addr = ip_to_bytes(ip);
        let sql = format!(
            "SELECT {IP_BAN_COLUMNS} FROM ip_ban
             WHERE is_active = 1
               AND length(range_start) = length(?)
               AND range_start <= ? AND range_end >= ?
               AND (board_id IS NULL OR board_id = ?)
               AND (permanent = 1 OR expires_at > ?)
               AND (is_thread_ban = 0 OR ?)
             ORDER BY id DESC
             LIMIT 1"
        );
        let row: Option<IpBanRow> = sqlx::query_as(&sql)
            .bind(addr.as_slice())
            .bind(addr.as_slice())
            .bind(addr.as_slice())
            .bind(board_id)
            .bind(to_db(&now))
            .bind(include_thread_bans)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| WardenError::Database(e.to_string()))?;

        row.map(IpBanRow::into_ban).transpose()
    }

    /// List bans, newest first.
    ///
    /// With `board_id` set, only global bans and bans on that board are listed.
    pub async fn list(&self, active_only: bool, board_id: Option<i64>) -> Result<Vec<IpBan>> {
        let sql = format!(
            "SELECT {IP_BAN_COLUMNS} FROM ip_ban
             WHERE (? = 0 OR is_active = 1)
               AND (? IS NULL OR board_id IS NULL OR board_id = ?)
             ORDER BY id DESC"
        );
        let rows: Vec<IpBanRow> = sqlx::query_as(&sql)
            .bind(active_only)
            .bind(board_id)
            .bind(board_id)
            .fetch_all(self.pool)
            .await
            .map_err(|e| WardenError::Database(e.to_string()))?;

        rows.into_iter().map(IpBanRow::into_ban).collect()
    }

    /// Count active, unexpired bans.
    pub async fn count_in_effect(&self, now: DateTime<Utc>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM ip_ban
             WHERE is_active = 1 AND (permanent = 1 OR expires_at > ?)",
        )
        .bind(to_db(&now))
        .fetch_one(self.pool)
        .await
        .map_err(|e| WardenError::Database(e.to_string()))?;
        Ok(count)
    }

    /// Deactivate a ban and append an audit row in one transaction.
    ///
    /// Returns false if the ban does not exist.
    pub async fn deactivate(
        &self,
        id: i64,
        staff_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let found = deactivate_ip_ban(&mut *tx, id, staff_id, now).await?;
        tx.commit().await?;
        Ok(found)
    }

    /// List the audit trail of a ban, oldest first.
    pub async fn list_audit(&self, ban_id: i64) -> Result<Vec<IpBanAudit>> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            "SELECT id, ip_ban_id, changed_at, staff_id, is_active, message, staff_note
             FROM ip_ban_audit WHERE ip_ban_id = ? ORDER BY id",
        )
        .bind(ban_id)
        .fetch_all(self.pool)
        .await
        .map_err(|e| WardenError::Database(e.to_string()))?;

        rows.into_iter().map(AuditRow::into_audit).collect()
    }
}

/// Mark an IP ban inactive and record the transition.
///
/// Runs on the caller's connection so it can share a transaction.
pub(super) async fn deactivate_ip_ban(
    conn: &mut SqliteConnection,
    id: i64,
    staff_id: Option<i64>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let now = to_db(&now);
    let affected = sqlx::query(
        "UPDATE ip_ban SET is_active = 0, deactivated_by = ?, deactivated_at = ? WHERE id = ?",
    )
    .bind(staff_id)
    .bind(&now)
    .bind(id)
    .execute(&mut *conn)
    .await
    .map_err(|e| WardenError::Database(e.to_string()))?
    .rows_affected();

    if affected == 0 {
        return Ok(false);
    }

    sqlx::query(
        "INSERT INTO ip_ban_audit (ip_ban_id, changed_at, staff_id, is_active, message, staff_note)
         SELECT id, ?, ?, is_active, message, staff_note FROM ip_ban WHERE id = ?",
    )
    .bind(&now)
    .bind(staff_id)
    .bind(id)
    .execute(&mut *conn)
    .await
    .map_err(|e| WardenError::Database(e.to_string()))?;

    Ok(true)
}

/// Soft-delete a row in one of the ban tables without an audit trail.
///
/// Returns false if the row does not exist.
pub(crate) async fn deactivate_in_table(
    pool: &DbPool,
    table: &str,
    id: i64,
    staff_id: Option<i64>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let sql = format!(
        "UPDATE {table} SET is_active = 0, deactivated_by = ?, deactivated_at = ? WHERE id = ?"
    );
    let affected = sqlx::query(&sql)
        .bind(staff_id)
        .bind(to_db(&now))
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| WardenError::Database(e.to_string()))?
        .rows_affected();
    Ok(affected > 0)
}

/// Repository for name, filename and checksum bans.
pub struct StringBanRepository<'a> {
    pool: &'a DbPool,
    kind: StringBanKind,
}

impl<'a> StringBanRepository<'a> {
    /// Create a repository over the table for `kind`.
    pub fn new(pool: &'a DbPool, kind: StringBanKind) -> Self {
        Self { pool, kind }
    }

    /// Insert a ban. The pattern must already be validated.
    pub async fn create(&self, new_ban: &NewStringBan, issued_at: DateTime<Utc>) -> Result<i64> {
        let expires_at = new_ban.expiry.resolve(issued_at)?;
        let sql = format!(
            "INSERT INTO {} (pattern, is_regex, board_id, staff_id, staff_note, issued_at,
                             expires_at, permanent)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
            self.kind.table()
        );
        let id: i64 = sqlx::query_scalar(&sql)
            .bind(&new_ban.pattern)
            .bind(new_ban.is_regex)
            .bind(new_ban.board_id)
            .bind(new_ban.staff_id)
            .bind(&new_ban.staff_note)
            .bind(to_db(&issued_at))
            .bind(expires_at.as_ref().map(to_db))
            .bind(new_ban.expiry.is_permanent())
            .fetch_one(self.pool)
            .await
            .map_err(|e| WardenError::Database(e.to_string()))?;
        Ok(id)
    }

    /// Get a ban by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<StringBan>> {
        let sql = format!(
            "SELECT {STRING_BAN_COLUMNS} FROM {} WHERE id = ?",
            self.kind.table()
        );
        let row: Option<StringBanRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| WardenError::Database(e.to_string()))?;

        row.map(|r| r.into_ban(self.kind)).transpose()
    }

    /// Find the newest ban in effect on `board_id` that matches `value`.
    ///
    /// Literal bans are filtered in SQL; regex bans are compiled and tested
    /// here. A stored regex that no longer compiles is an error.
    pub async fn find_matching(
        &self,
        value: &str,
        board_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<StringBan>> {
        let sql = format!(
            "SELECT {STRING_BAN_COLUMNS} FROM {}
             WHERE is_active = 1
               AND (board_id IS NULL OR board_id = ?)
               AND (permanent = 1 OR expires_at > ?)
               AND (is_regex = 1 OR pattern = ?)
             ORDER BY id DESC",
            self.kind.table()
        );
        let rows: Vec<StringBanRow> = sqlx::query_as(&sql)
            .bind(board_id)
            .bind(to_db(&now))
            .bind(value)
            .fetch_all(self.pool)
            .await
            .map_err(|e| WardenError::Database(e.to_string()))?;

        for row in rows {
            let ban = row.into_ban(self.kind)?;
            if ban.is_match(value) {
                return Ok(Some(ban));
            }
        }
        Ok(None)
    }

    /// List bans, newest first.
    pub async fn list(&self, active_only: bool) -> Result<Vec<StringBan>> {
        let sql = format!(
            "SELECT {STRING_BAN_COLUMNS} FROM {} WHERE (? = 0 OR is_active = 1) ORDER BY id DESC",
            self.kind.table()
        );
        let rows: Vec<StringBanRow> = sqlx::query_as(&sql)
            .bind(active_only)
            .fetch_all(self.pool)
            .await
            .map_err(|e| WardenError::Database(e.to_string()))?;

        rows.into_iter().map(|r| r.into_ban(self.kind)).collect()
    }
}

#[derive(sqlx::FromRow)]
struct IpBanRow {
    id: i64,
    range_start: Vec<u8>,
    range_end: Vec<u8>,
    board_id: Option<i64>,
    staff_id: Option<i64>,
    banned_for_post_id: Option<i64>,
    copy_post_text: String,
    issued_at: String,
    expires_at: Option<String>,
    permanent: bool,
    can_appeal: bool,
    appeal_at: String,
    is_thread_ban: bool,
    message: String,
    staff_note: String,
    is_active: bool,
}

impl IpBanRow {
    fn into_ban(self) -> Result<IpBan> {
        let bound = |bytes: &[u8]| {
            ip_from_bytes(bytes).ok_or_else(|| {
                WardenError::Database(format!(
                    "ip_ban {} has a malformed range bound ({} bytes)",
                    self.id,
                    bytes.len()
                ))
            })
        };
        let range = IpRange {
            start: bound(&self.range_start)?,
            end: bound(&self.range_end)?,
        };

        Ok(IpBan {
            id: self.id,
            range,
            board_id: self.board_id,
            staff_id: self.staff_id,
            banned_for_post_id: self.banned_for_post_id,
            copy_post_text: self.copy_post_text,
            issued_at: from_db(&self.issued_at)?,
            expires_at: from_db_opt(self.expires_at.as_deref())?,
            permanent: self.permanent,
            can_appeal: self.can_appeal,
            appeal_at: from_db(&self.appeal_at)?,
            is_thread_ban: self.is_thread_ban,
            message: self.message,
            staff_note: self.staff_note,
            is_active: self.is_active,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StringBanRow {
    id: i64,
    pattern: String,
    is_regex: bool,
    board_id: Option<i64>,
    staff_id: Option<i64>,
    staff_note: String,
    issued_at: String,
    expires_at: Option<String>,
    permanent: bool,
    is_active: bool,
}

impl StringBanRow {
    fn into_ban(self, kind: StringBanKind) -> Result<StringBan> {
        Ok(StringBan {
            id: self.id,
            kind,
            pattern: BanPattern::compile(&self.pattern, self.is_regex)?,
            board_id: self.board_id,
            staff_id: self.staff_id,
            staff_note: self.staff_note,
            issued_at: from_db(&self.issued_at)?,
            expires_at: from_db_opt(self.expires_at.as_deref())?,
            permanent: self.permanent,
            is_active: self.is_active,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: i64,
    ip_ban_id: i64,
    changed_at: String,
    staff_id: Option<i64>,
    is_active: bool,
    message: String,
    staff_note: String,
}

impl AuditRow {
    fn into_audit(self) -> Result<IpBanAudit> {
        Ok(IpBanAudit {
            id: self.id,
            ip_ban_id: self.ip_ban_id,
            changed_at: from_db(&self.changed_at)?,
            staff_id: self.staff_id,
            is_active: self.is_active,
            message: self.message,
            staff_note: self.staff_note,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ban::types::BanExpiry;
    use crate::ip_range::parse_ip_range;
    use crate::Database;
    use chrono::{TimeDelta, TimeZone};

    async fn setup_db() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    async fn insert(repo: &IpBanRepository<'_>, ban: NewIpBan) -> i64 {
        let range = parse_ip_range(&ban.ip).unwrap();
        repo.create(&range, &ban, t0()).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_ip_ban() {
        let db = setup_db().await;
        let repo = IpBanRepository::new(db.pool());

        let id = insert(&repo, NewIpBan::new("192.168.56.0/24", "spam").with_staff(3)).await;
        let ban = repo.get_by_id(id).await.unwrap().unwrap();

        assert_eq!(ban.range.start.to_string(), "192.168.56.0");
        assert_eq!(ban.range.end.to_string(), "192.168.56.255");
        assert_eq!(ban.staff_id, Some(3));
        assert!(ban.permanent);
        assert!(ban.is_active);
        assert_eq!(ban.issued_at, t0());
        assert_eq!(ban.appeal_at, t0());
        assert!(repo.get_by_id(id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_matching_bounds() {
        let db = setup_db().await;
        let repo = IpBanRepository::new(db.pool());
        insert(&repo, NewIpBan::new("10.0.0.0/16", "range")).await;

        let hit = |ip: &str| ip.parse::<IpAddr>().unwrap();
        for (ip, expected) in [
            ("9.255.255.255", false),
            ("10.0.0.0", true),
            ("10.0.200.7", true),
            ("10.0.255.255", true),
            ("10.1.0.0", false),
            ("::ffff:10.0.3.3", true),
            ("::a00:1", false),
        ] {
            let found = repo.find_matching(hit(ip), 1, t0(), true).await.unwrap();
            assert_eq!(found.is_some(), expected, "{ip}");
        }
    }

    #[tokio::test]
    async fn test_find_matching_board_scope() {
        let db = setup_db().await;
        let repo = IpBanRepository::new(db.pool());
        insert(&repo, NewIpBan::new("10.0.0.1", "board two").with_board(2)).await;
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        assert!(repo.find_matching(ip, 2, t0(), true).await.unwrap().is_some());
        assert!(repo.find_matching(ip, 3, t0(), true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_matching_expiry() {
        let db = setup_db().await;
        let repo = IpBanRepository::new(db.pool());
        insert(
            &repo,
            NewIpBan::new("10.0.0.1", "hour").with_expiry(BanExpiry::After(TimeDelta::hours(1))),
        )
        .await;
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        let before = t0() + TimeDelta::minutes(59);
        let at = t0() + TimeDelta::hours(1);
        assert!(repo.find_matching(ip, 1, before, true).await.unwrap().is_some());
        assert!(repo.find_matching(ip, 1, at, true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_matching_newest_first_and_thread_bans() {
        let db = setup_db().await;
        let repo = IpBanRepository::new(db.pool());
        let full = insert(&repo, NewIpBan::new("10.0.0.0/8", "full")).await;
        let thread = insert(&repo, NewIpBan::new("10.0.0.1", "thread").thread_ban()).await;
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        let newest = repo.find_matching(ip, 1, t0(), true).await.unwrap().unwrap();
        assert_eq!(newest.id, thread);
        let non_thread = repo.find_matching(ip, 1, t0(), false).await.unwrap().unwrap();
        assert_eq!(non_thread.id, full);
    }

    #[tokio::test]
    async fn test_deactivate_writes_audit() {
        let db = setup_db().await;
        let repo = IpBanRepository::new(db.pool());
        let id = insert(&repo, NewIpBan::new("10.0.0.1", "bye").with_note("note")).await;

        assert!(repo.deactivate(id, Some(9), t0()).await.unwrap());
        assert!(!repo.deactivate(id + 100, Some(9), t0()).await.unwrap());

        let ban = repo.get_by_id(id).await.unwrap().unwrap();
        assert!(!ban.is_active);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(repo.find_matching(ip, 1, t0(), true).await.unwrap().is_none());

        let audit = repo.list_audit(id).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert!(!audit[0].is_active);
        assert_eq!(audit[0].staff_id, Some(9));
        assert_eq!(audit[0].message, "bye");
        assert_eq!(audit[0].staff_note, "note");
    }

    #[tokio::test]
    async fn test_list_and_count() {
        let db = setup_db().await;
        let repo = IpBanRepository::new(db.pool());
        let a = insert(&repo, NewIpBan::new("10.0.0.1", "a")).await;
        insert(&repo, NewIpBan::new("10.0.0.2", "b").with_board(5)).await;
        insert(&repo, NewIpBan::new("10.0.0.3", "c").with_board(6)).await;
        repo.deactivate(a, None, t0()).await.unwrap();

        assert_eq!(repo.list(false, None).await.unwrap().len(), 3);
        assert_eq!(repo.list(true, None).await.unwrap().len(), 2);
        assert_eq!(repo.list(false, Some(5)).await.unwrap().len(), 2);
        assert_eq!(repo.count_in_effect(t0()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_string_ban_exact_and_regex() {
        let db = setup_db().await;
        let repo = StringBanRepository::new(db.pool(), StringBanKind::Name);
        repo.create(&NewStringBan::new(StringBanKind::Name, "Spammer"), t0())
            .await
            .unwrap();
        repo.create(
            &NewStringBan::new(StringBanKind::Name, "^bot[0-9]+$").regex(),
            t0(),
        )
        .await
        .unwrap();

        assert!(repo.find_matching("Spammer", 1, t0()).await.unwrap().is_some());
        assert!(repo.find_matching("spammer", 1, t0()).await.unwrap().is_none());
        assert!(repo.find_matching("bot123", 1, t0()).await.unwrap().is_some());
        assert!(repo.find_matching("robot1", 1, t0()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_string_ban_tables_are_separate() {
        let db = setup_db().await;
        StringBanRepository::new(db.pool(), StringBanKind::Filename)
            .create(&NewStringBan::new(StringBanKind::Filename, "bad.png"), t0())
            .await
            .unwrap();

        let names = StringBanRepository::new(db.pool(), StringBanKind::Name);
        assert!(names.find_matching("bad.png", 1, t0()).await.unwrap().is_none());
        let files = StringBanRepository::new(db.pool(), StringBanKind::Filename);
        assert!(files.find_matching("bad.png", 1, t0()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stored_bad_regex_fails_closed() {
        let db = setup_db().await;
        sqlx::query(
            "INSERT INTO name_ban (pattern, is_regex, issued_at) VALUES ('(', 1, '2024-01-01T00:00:00Z')",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let repo = StringBanRepository::new(db.pool(), StringBanKind::Name);
        let result = repo.find_matching("anything", 1, t0()).await;
        assert!(matches!(result, Err(WardenError::Pattern(_))));
    }

    #[tokio::test]
    async fn test_deactivate_in_table() {
        let db = setup_db().await;
        let repo = StringBanRepository::new(db.pool(), StringBanKind::Checksum);
        let id = repo
            .create(&NewStringBan::new(StringBanKind::Checksum, "abc"), t0())
            .await
            .unwrap();

        assert!(deactivate_in_table(db.pool(), "checksum_ban", id, Some(1), t0())
            .await
            .unwrap());
        assert!(!deactivate_in_table(db.pool(), "checksum_ban", 999, Some(1), t0())
            .await
            .unwrap());
        assert!(repo.find_matching("abc", 1, t0()).await.unwrap().is_none());
        assert!(!repo.get_by_id(id).await.unwrap().unwrap().is_active);
    }
}
