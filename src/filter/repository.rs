//! Filter repository.
//!
//! Filters are stored uncompiled. Listing loads the conditions and boards of
//! every returned filter with one query per relation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqliteConnection};

use super::types::{ActiveSelector, FilterAction, FilterHit};
use crate::datetime::{from_db, to_db};
use crate::db::DbPool;
use crate::{Result, WardenError};

const FILTER_COLUMNS: &str =
    "id, staff_id, staff_note, issued_at, match_action, match_detail, is_active";

/// A condition as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionRecord {
    /// Field name.
    pub field: String,
    /// Match mode name.
    pub match_mode: String,
    /// Search text.
    pub search: String,
}

/// A filter row with its conditions and boards, not yet validated.
#[derive(Debug, Clone)]
pub struct FilterRecord {
    /// Unique filter ID.
    pub id: i64,
    /// Creating staff member.
    pub staff_id: Option<i64>,
    /// Staff-only note.
    pub staff_note: String,
    /// When the filter was created.
    pub issued_at: DateTime<Utc>,
    /// Stored action name.
    pub match_action: String,
    /// Rejection text, ban message or replacement.
    pub match_detail: String,
    /// Whether the filter is enabled.
    pub is_active: bool,
    /// Conditions in position order.
    pub conditions: Vec<ConditionRecord>,
    /// Board scope; empty means every board.
    pub board_ids: Vec<i64>,
}

/// Everything written when a filter is created or replaced.
#[derive(Debug, Clone)]
pub struct FilterDraft {
    /// Stored action name.
    pub match_action: String,
    /// Rejection text, ban message or replacement.
    pub match_detail: String,
    /// Creating staff member.
    pub staff_id: Option<i64>,
    /// Staff-only note.
    pub staff_note: String,
    /// Conditions in position order.
    pub conditions: Vec<ConditionRecord>,
    /// Board scope; empty means every board.
    pub board_ids: Vec<i64>,
}

/// Repository for filters, wordfilters and filter hits.
pub struct FilterRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> FilterRepository<'a> {
    /// Create a new FilterRepository with the given database pool reference.
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Insert a filter with its conditions and boards.
    pub async fn create(&self, draft: &FilterDraft, issued_at: DateTime<Utc>) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO filters (staff_id, staff_note, issued_at, match_action, match_detail)
             VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(draft.staff_id)
        .bind(&draft.staff_note)
        .bind(to_db(&issued_at))
        .bind(&draft.match_action)
        .bind(&draft.match_detail)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| WardenError::Database(e.to_string()))?;

        insert_relations(&mut *tx, id, draft).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Replace a filter's action, detail, note, conditions and boards.
    ///
    /// Returns false if no reject, ban or log filter has this ID. Wordfilters
    /// are never touched.
    pub async fn update(&self, id: i64, draft: &FilterDraft) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE filters SET match_action = ?, match_detail = ?, staff_note = ?
             WHERE id = ? AND match_action != ?",
        )
        .bind(&draft.match_action)
        .bind(&draft.match_detail)
        .bind(&draft.staff_note)
        .bind(id)
        .bind(FilterAction::REPLACE)
        .execute(&mut *tx)
        .await
        .map_err(|e| WardenError::Database(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("DELETE FROM filter_conditions WHERE filter_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| WardenError::Database(e.to_string()))?;
        sqlx::query("DELETE FROM filter_boards WHERE filter_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| WardenError::Database(e.to_string()))?;

        insert_relations(&mut *tx, id, draft).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Get a filter by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<FilterRecord>> {
        let sql = format!("SELECT {FILTER_COLUMNS} FROM filters WHERE id = ?");
        let row: Option<FilterRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await
            .map_err(|e| WardenError::Database(e.to_string()))?;

        match row {
            Some(row) => Ok(self.attach_relations(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    /// List filters in creation order.
    ///
    /// `wordfilters` selects replacement filters instead of reject, ban and
    /// log filters. With a board, only filters scoped to it or to every board
    /// are returned.
    pub async fn list(
        &self,
        selector: ActiveSelector,
        board_id: Option<i64>,
        wordfilters: bool,
    ) -> Result<Vec<FilterRecord>> {
        let sql = format!(
            "SELECT {FILTER_COLUMNS} FROM filters f
             WHERE (f.match_action = ?) = ?
               AND (? IS NULL OR f.is_active = ?)
               AND (? IS NULL
                    OR NOT EXISTS (SELECT 1 FROM filter_boards fb WHERE fb.filter_id = f.id)
                    OR EXISTS (SELECT 1 FROM filter_boards fb
                               WHERE fb.filter_id = f.id AND fb.board_id = ?))
             ORDER BY f.id"
        );
        let is_active = selector.is_active();
        let rows: Vec<FilterRow> = sqlx::query_as(&sql)
            .bind(FilterAction::REPLACE)
            .bind(wordfilters)
            .bind(is_active)
            .bind(is_active)
            .bind(board_id)
            .bind(board_id)
            .fetch_all(self.pool)
            .await
            .map_err(|e| WardenError::Database(e.to_string()))?;

        self.attach_relations(rows).await
    }

    /// Enable or disable a filter. Returns false if it does not exist.
    pub async fn set_active(&self, id: i64, active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE filters SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(self.pool)
            .await
            .map_err(|e| WardenError::Database(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    /// Record that a post matched a filter.
    pub async fn record_hit(
        &self,
        filter_id: i64,
        post_data: &serde_json::Value,
        match_time: DateTime<Utc>,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO filter_hits (filter_id, post_data, match_time) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(filter_id)
        .bind(serde_json::to_string(post_data)?)
        .bind(to_db(&match_time))
        .fetch_one(self.pool)
        .await
        .map_err(|e| WardenError::Database(e.to_string()))?;
        Ok(id)
    }

    /// Count the hits of a filter.
    pub async fn count_hits(&self, filter_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM filter_hits WHERE filter_id = ?")
            .bind(filter_id)
            .fetch_one(self.pool)
            .await
            .map_err(|e| WardenError::Database(e.to_string()))?;
        Ok(count)
    }

    /// List the hits of a filter, newest first.
    pub async fn list_hits(&self, filter_id: i64, limit: i64) -> Result<Vec<FilterHit>> {
        let rows: Vec<HitRow> = sqlx::query_as(
            "SELECT id, filter_id, post_data, match_time FROM filter_hits
             WHERE filter_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(filter_id)
        .bind(limit)
        .fetch_all(self.pool)
        .await
        .map_err(|e| WardenError::Database(e.to_string()))?;

        rows.into_iter().map(HitRow::into_hit).collect()
    }

    async fn attach_relations(&self, rows: Vec<FilterRow>) -> Result<Vec<FilterRecord>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();

        let mut query: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "SELECT filter_id, field, match_mode, search FROM filter_conditions WHERE filter_id IN (",
        );
        let mut separated = query.separated(", ");
        for id in &ids {
            separated.push_bind(*id);
        }
        query.push(") ORDER BY filter_id, position");
        let condition_rows: Vec<ConditionRow> = query
            .build_query_as()
            .fetch_all(self.pool)
            .await
            .map_err(|e| WardenError::Database(e.to_string()))?;

        let mut query: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("SELECT filter_id, board_id FROM filter_boards WHERE filter_id IN (");
        let mut separated = query.separated(", ");
        for id in &ids {
            separated.push_bind(*id);
        }
        query.push(") ORDER BY filter_id, board_id");
        let board_rows: Vec<(i64, i64)> = query
            .build_query_as()
            .fetch_all(self.pool)
            .await
            .map_err(|e| WardenError::Database(e.to_string()))?;

        let mut conditions: HashMap<i64, Vec<ConditionRecord>> = HashMap::new();
        for row in condition_rows {
            conditions.entry(row.filter_id).or_default().push(ConditionRecord {
                field: row.field,
                match_mode: row.match_mode,
                search: row.search,
            });
        }
        let mut boards: HashMap<i64, Vec<i64>> = HashMap::new();
        for (filter_id, board_id) in board_rows {
            boards.entry(filter_id).or_default().push(board_id);
        }

        rows.into_iter()
            .map(|row| {
                let id = row.id;
                row.into_record(
                    conditions.remove(&id).unwrap_or_default(),
                    boards.remove(&id).unwrap_or_default(),
                )
            })
            .collect()
    }
}

async fn insert_relations(conn: &mut SqliteConnection, id: i64, draft: &FilterDraft) -> Result<()> {
    for (position, condition) in draft.conditions.iter().enumerate() {
        sqlx::query(
            "INSERT INTO filter_conditions (filter_id, position, field, match_mode, search)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(position as i64)
        .bind(&condition.field)
        .bind(&condition.match_mode)
        .bind(&condition.search)
        .execute(&mut *conn)
        .await
        .map_err(|e| WardenError::Database(e.to_string()))?;
    }

    for board_id in &draft.board_ids {
        sqlx::query("INSERT OR IGNORE INTO filter_boards (filter_id, board_id) VALUES (?, ?)")
            .bind(id)
            .bind(*board_id)
            .execute(&mut *conn)
            .await
            .map_err(|e| WardenError::Database(e.to_string()))?;
    }
    Ok(())
}

#[derive(sqlx::FromRow)]
struct FilterRow {
    id: i64,
    staff_id: Option<i64>,
    staff_note: String,
    issued_at: String,
    match_action: String,
    match_detail: String,
    is_active: bool,
}

impl FilterRow {
    fn into_record(
        self,
        conditions: Vec<ConditionRecord>,
        board_ids: Vec<i64>,
    ) -> Result<FilterRecord> {
        Ok(FilterRecord {
            id: self.id,
            staff_id: self.staff_id,
            staff_note: self.staff_note,
            issued_at: from_db(&self.issued_at)?,
            match_action: self.match_action,
            match_detail: self.match_detail,
            is_active: self.is_active,
            conditions,
            board_ids,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ConditionRow {
    filter_id: i64,
    field: String,
    match_mode: String,
    search: String,
}

#[derive(sqlx::FromRow)]
struct HitRow {
    id: i64,
    filter_id: i64,
    post_data: String,
    match_time: String,
}

impl HitRow {
    fn into_hit(self) -> Result<FilterHit> {
        Ok(FilterHit {
            id: self.id,
            filter_id: self.filter_id,
            post_data: serde_json::from_str(&self.post_data)?,
            match_time: from_db(&self.match_time)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn condition(field: &str, mode: &str, search: &str) -> ConditionRecord {
        ConditionRecord {
            field: field.to_string(),
            match_mode: mode.to_string(),
            search: search.to_string(),
        }
    }

    fn draft(action: &str, conditions: Vec<ConditionRecord>, boards: Vec<i64>) -> FilterDraft {
        FilterDraft {
            match_action: action.to_string(),
            match_detail: "detail".to_string(),
            staff_id: Some(1),
            staff_note: String::new(),
            conditions,
            board_ids: boards,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = FilterRepository::new(db.pool());

        let id = repo
            .create(
                &draft(
                    "reject",
                    vec![
                        condition("body", "substr", "spam"),
                        condition("isop", "exact", "1"),
                    ],
                    vec![4, 2],
                ),
                Utc::now(),
            )
            .await
            .unwrap();

        let record = repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(record.match_action, "reject");
        assert!(record.is_active);
        assert_eq!(record.conditions.len(), 2);
        assert_eq!(record.conditions[0].field, "body");
        assert_eq!(record.conditions[1].field, "isop");
        assert_eq!(record.board_ids, vec![2, 4]);

        assert!(repo.get_by_id(id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_scoping_and_selectors() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = FilterRepository::new(db.pool());
        let now = Utc::now();

        let global = repo
            .create(&draft("log", vec![condition("name", "exact", "a")], vec![]), now)
            .await
            .unwrap();
        let board1 = repo
            .create(&draft("ban", vec![condition("name", "exact", "b")], vec![1]), now)
            .await
            .unwrap();
        let board2 = repo
            .create(&draft("reject", vec![condition("name", "exact", "c")], vec![2]), now)
            .await
            .unwrap();
        let word = repo
            .create(&draft("replace", vec![condition("body", "substr", "x")], vec![]), now)
            .await
            .unwrap();

        let on_board1: Vec<i64> = repo
            .list(ActiveSelector::Active, Some(1), false)
            .await
            .unwrap()
            .iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(on_board1, vec![global, board1]);

        let everywhere = repo.list(ActiveSelector::All, None, false).await.unwrap();
        assert_eq!(everywhere.len(), 3);
        assert_eq!(everywhere[2].id, board2);
        assert_eq!(everywhere[2].board_ids, vec![2]);

        let words = repo.list(ActiveSelector::Active, Some(1), true).await.unwrap();
        assert_eq!(words.len(), 1);
        assert_eq!(words[0].id, word);

        assert!(repo.set_active(board1, false).await.unwrap());
        let inactive = repo.list(ActiveSelector::Inactive, None, false).await.unwrap();
        assert_eq!(inactive.len(), 1);
        assert_eq!(inactive[0].id, board1);
        assert!(!repo.set_active(9999, false).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_replaces_relations() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = FilterRepository::new(db.pool());

        let id = repo
            .create(
                &draft("reject", vec![condition("body", "substr", "old")], vec![1]),
                Utc::now(),
            )
            .await
            .unwrap();

        let updated = repo
            .update(
                id,
                &draft(
                    "log",
                    vec![
                        condition("subject", "exact", "new"),
                        condition("hasfile", "exact", "1"),
                    ],
                    vec![],
                ),
            )
            .await
            .unwrap();
        assert!(updated);

        let record = repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(record.match_action, "log");
        assert_eq!(record.conditions.len(), 2);
        assert_eq!(record.conditions[0].search, "new");
        assert!(record.board_ids.is_empty());

        assert!(!repo
            .update(id + 100, &draft("log", vec![], vec![]))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_hits() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = FilterRepository::new(db.pool());
        let id = repo
            .create(&draft("log", vec![condition("body", "substr", "x")], vec![]), Utc::now())
            .await
            .unwrap();

        assert_eq!(repo.count_hits(id).await.unwrap(), 0);
        let data = serde_json::json!({"post": {"message_raw": "xx"}});
        repo.record_hit(id, &data, Utc::now()).await.unwrap();
        repo.record_hit(id, &data, Utc::now()).await.unwrap();

        assert_eq!(repo.count_hits(id).await.unwrap(), 2);
        let hits = repo.list_hits(id, 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].post_data["post"]["message_raw"], "xx");
    }
}
