//! Filter engine.
//!
//! Staff-defined filters are re-read from the store on every request and
//! evaluated in creation order. The first filter whose conditions all hold
//! decides the post's fate and gets a hit recorded.

use std::net::IpAddr;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::history::PostHistory;
use super::repository::FilterRepository;
use super::types::{
    ActiveSelector, Filter, FilterAction, FilterHit, FilterInput, NewFilter, PosterHistory,
};
use super::wordfilter::{NewWordfilter, Wordfilter};
use crate::context::QueryContext;
use crate::db::Database;
use crate::post::{Post, Upload};
use crate::{Result, WardenError};

/// Most recent hits returned by [`FilterEngine::list_hits`].
pub const HIT_LIST_LIMIT: i64 = 100;

#[derive(Serialize)]
struct UploadSummary<'a> {
    filename: &'a str,
    checksum: &'a str,
    width: u32,
    height: u32,
    size: usize,
}

#[derive(Serialize)]
struct HitSnapshot<'a> {
    post: &'a Post,
    upload: Option<UploadSummary<'a>>,
    fingerprint: Option<&'a str>,
}

impl<'a> HitSnapshot<'a> {
    fn new(input: &FilterInput<'a>) -> Self {
        Self {
            post: input.post,
            upload: input.upload.map(|u: &'a Upload| UploadSummary {
                filename: &u.original_filename,
                checksum: &u.checksum,
                width: u.width,
                height: u.height,
                size: u.data.len(),
            }),
            fingerprint: input.fingerprint,
        }
    }
}

/// Service for managing and applying filters and wordfilters.
pub struct FilterEngine<'a> {
    db: &'a Database,
    history: Option<&'a dyn PostHistory>,
}

impl<'a> FilterEngine<'a> {
    /// Create a new FilterEngine without poster history.
    ///
    /// First-time conditions never match until a history source is attached.
    pub fn new(db: &'a Database) -> Self {
        Self { db, history: None }
    }

    /// Attach the source used by the first-time conditions.
    pub fn with_history(mut self, history: &'a dyn PostHistory) -> Self {
        self.history = Some(history);
        self
    }

    /// Create a filter.
    pub async fn create_filter(&self, ctx: &QueryContext, new_filter: NewFilter) -> Result<Filter> {
        if new_filter.conditions.is_empty() {
            return Err(WardenError::Validation(
                "filter must have at least one condition".to_string(),
            ));
        }
        let conditions = new_filter.compile_conditions()?;
        let draft = new_filter.to_draft(&conditions);

        let repo = FilterRepository::new(self.db.pool());
        let id = ctx.run(repo.create(&draft, ctx.now())).await?;
        let filter = self.get_filter(ctx, id).await?;

        info!(
            filter_id = filter.id,
            action = %filter.action,
            conditions = filter.conditions.len(),
            boards = ?filter.board_ids,
            "filter created"
        );
        Ok(filter)
    }

    /// Replace a filter's action, detail, note, conditions and boards.
    pub async fn update_filter(
        &self,
        ctx: &QueryContext,
        id: i64,
        new_filter: NewFilter,
    ) -> Result<Filter> {
        if new_filter.conditions.is_empty() {
            return Err(WardenError::Validation(
                "filter must have at least one condition".to_string(),
            ));
        }
        let conditions = new_filter.compile_conditions()?;
        let draft = new_filter.to_draft(&conditions);

        let repo = FilterRepository::new(self.db.pool());
        if !ctx.run(repo.update(id, &draft)).await? {
            return Err(WardenError::NotFound(format!("filter {id}")));
        }
        info!(filter_id = id, "filter updated");
        self.get_filter(ctx, id).await
    }

    /// Get a filter by ID. Wordfilter IDs are not found here.
    pub async fn get_filter(&self, ctx: &QueryContext, id: i64) -> Result<Filter> {
        let repo = FilterRepository::new(self.db.pool());
        let record = ctx
            .run(repo.get_by_id(id))
            .await?
            .filter(|r| r.match_action != FilterAction::REPLACE)
            .ok_or_else(|| WardenError::NotFound(format!("filter {id}")))?;
        Filter::try_from(record)
    }

    /// List reject, ban and log filters in creation order.
    ///
    /// With a board, only filters that apply to it are listed.
    pub async fn list_filters(
        &self,
        ctx: &QueryContext,
        selector: ActiveSelector,
        board_id: Option<i64>,
    ) -> Result<Vec<Filter>> {
        let repo = FilterRepository::new(self.db.pool());
        let records = ctx.run(repo.list(selector, board_id, false)).await?;
        records.into_iter().map(Filter::try_from).collect()
    }

    /// Enable or disable a filter or wordfilter.
    pub async fn set_filter_active(&self, ctx: &QueryContext, id: i64, active: bool) -> Result<()> {
        let repo = FilterRepository::new(self.db.pool());
        if !ctx.run(repo.set_active(id, active)).await? {
            return Err(WardenError::NotFound(format!("filter {id}")));
        }
        info!(filter_id = id, active, "filter active state changed");
        Ok(())
    }

    /// Evaluate the active filters of `board_id` against a post.
    ///
    /// Returns the first matching filter after recording its hit. A stored
    /// filter that no longer parses aborts evaluation.
    pub async fn apply_filters(
        &self,
        ctx: &QueryContext,
        input: &FilterInput<'_>,
        board_id: i64,
    ) -> Result<Option<Filter>> {
        let filters = self
            .list_filters(ctx, ActiveSelector::Active, Some(board_id))
            .await?;
        if filters.is_empty() {
            return Ok(None);
        }

        let mut input = *input;
        if input.history.is_none() && filters.iter().any(Filter::uses_history) {
            input.history = self.resolve_history(ctx, input.post.ip, board_id).await?;
        }

        let Some(filter) = filters.into_iter().find(|f| f.evaluate(&input)) else {
            return Ok(None);
        };

        let snapshot = serde_json::to_value(HitSnapshot::new(&input))?;
        let repo = FilterRepository::new(self.db.pool());
        ctx.run(repo.record_hit(filter.id, &snapshot, ctx.now()))
            .await?;

        info!(
            filter_id = filter.id,
            action = %filter.action,
            ip = %input.post.ip,
            board_id,
            "filter matched"
        );
        Ok(Some(filter))
    }

    async fn resolve_history(
        &self,
        ctx: &QueryContext,
        ip: IpAddr,
        board_id: i64,
    ) -> Result<Option<PosterHistory>> {
        let Some(history) = self.history else {
            warn!(
                board_id,
                "filters use first-time conditions but no post history is configured"
            );
            return Ok(None);
        };
        let on_board = ctx.run(history.has_posted_on_board(ip, board_id)).await?;
        let on_site = ctx.run(history.has_posted_on_site(ip)).await?;
        Ok(Some(PosterHistory {
            first_on_board: !on_board,
            first_on_site: !on_site,
        }))
    }

    /// Count the recorded hits of a filter.
    pub async fn count_hits(&self, ctx: &QueryContext, filter_id: i64) -> Result<i64> {
        let repo = FilterRepository::new(self.db.pool());
        ctx.run(repo.count_hits(filter_id)).await
    }

    /// List the most recent hits of a filter, newest first.
    pub async fn list_hits(&self, ctx: &QueryContext, filter_id: i64) -> Result<Vec<FilterHit>> {
        let repo = FilterRepository::new(self.db.pool());
        ctx.run(repo.list_hits(filter_id, HIT_LIST_LIMIT)).await
    }

    /// Create a wordfilter.
    pub async fn create_wordfilter(
        &self,
        ctx: &QueryContext,
        new_wordfilter: NewWordfilter,
    ) -> Result<Wordfilter> {
        let draft = new_wordfilter.to_draft()?;
        let repo = FilterRepository::new(self.db.pool());
        let id = ctx.run(repo.create(&draft, ctx.now())).await?;
        let record = ctx
            .run(repo.get_by_id(id))
            .await?
            .ok_or_else(|| WardenError::NotFound(format!("wordfilter {id}")))?;
        let wordfilter = Wordfilter::try_from(record)?;

        info!(filter_id = wordfilter.id, regex = wordfilter.is_regex(), "wordfilter created");
        Ok(wordfilter)
    }

    /// List wordfilters in creation order.
    pub async fn list_wordfilters(
        &self,
        ctx: &QueryContext,
        selector: ActiveSelector,
        board_id: Option<i64>,
    ) -> Result<Vec<Wordfilter>> {
        let repo = FilterRepository::new(self.db.pool());
        let records = ctx.run(repo.list(selector, board_id, true)).await?;
        records.into_iter().map(Wordfilter::try_from).collect()
    }

    /// Apply the active wordfilters of `board_id` to `text`, in creation order.
    pub async fn apply_wordfilters(
        &self,
        ctx: &QueryContext,
        text: &str,
        board_id: i64,
    ) -> Result<String> {
        let wordfilters = self
            .list_wordfilters(ctx, ActiveSelector::Active, Some(board_id))
            .await?;
        let mut text = text.to_string();
        for wordfilter in &wordfilters {
            text = wordfilter.apply(&text);
        }
        debug!(board_id, applied = wordfilters.len(), "wordfilters applied");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::history::SqlitePostHistory;
    use crate::filter::types::{FilterAction, FilterField, MatchMode, NewCondition};
    use crate::ErrorKind;
    use chrono::Utc;

    fn post(body: &str) -> Post {
        Post::new("198.51.100.7".parse().unwrap(), 1).with_message(body)
    }

    fn body_filter(action: FilterAction, mode: MatchMode, search: &str) -> NewFilter {
        NewFilter::new(action)
            .with_detail("filtered")
            .with_condition(NewCondition::new(FilterField::Body, mode, search))
    }

    #[tokio::test]
    async fn test_create_requires_conditions() {
        let db = Database::open_in_memory().await.unwrap();
        let engine = FilterEngine::new(&db);
        let ctx = QueryContext::default();

        let err = engine
            .create_filter(&ctx, NewFilter::new(FilterAction::Reject))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = engine
            .create_filter(&ctx, body_filter(FilterAction::Reject, MatchMode::Regex, "(["))
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::Pattern(_)));
        assert!(engine
            .list_filters(&ctx, ActiveSelector::All, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_get_filter_not_found() {
        let db = Database::open_in_memory().await.unwrap();
        let engine = FilterEngine::new(&db);
        let err = engine
            .get_filter(&QueryContext::default(), 42)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_wordfilter_ids_are_not_filters() {
        let db = Database::open_in_memory().await.unwrap();
        let engine = FilterEngine::new(&db);
        let ctx = QueryContext::default();

        let wordfilter = engine
            .create_wordfilter(&ctx, NewWordfilter::new("cat", "dog"))
            .await
            .unwrap();

        let err = engine.get_filter(&ctx, wordfilter.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let replacement = NewFilter::new(FilterAction::Reject).with_condition(NewCondition::new(
            FilterField::Body,
            MatchMode::Substr,
            "cat",
        ));
        let err = engine
            .update_filter(&ctx, wordfilter.id, replacement)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        assert_eq!(engine.apply_wordfilters(&ctx, "a cat", 1).await.unwrap(), "a dog");
        assert!(engine
            .list_filters(&ctx, ActiveSelector::All, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_first_match_in_creation_order() {
        let db = Database::open_in_memory().await.unwrap();
        let engine = FilterEngine::new(&db);
        let ctx = QueryContext::default();

        let first = engine
            .create_filter(&ctx, body_filter(FilterAction::Log, MatchMode::Substr, "buy"))
            .await
            .unwrap();
        let second = engine
            .create_filter(&ctx, body_filter(FilterAction::Reject, MatchMode::Substr, "buy"))
            .await
            .unwrap();

        let post = post("buy now");
        let matched = engine
            .apply_filters(&ctx, &FilterInput::new(&post), 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(matched.id, first.id);
        assert_eq!(engine.count_hits(&ctx, first.id).await.unwrap(), 1);
        assert_eq!(engine.count_hits(&ctx, second.id).await.unwrap(), 0);

        let hits = engine.list_hits(&ctx, first.id).await.unwrap();
        assert_eq!(hits[0].post_data["post"]["message_raw"], "buy now");
        assert!(hits[0].post_data["upload"].is_null());
    }

    #[tokio::test]
    async fn test_and_semantics() {
        let db = Database::open_in_memory().await.unwrap();
        let engine = FilterEngine::new(&db);
        let ctx = QueryContext::default();

        engine
            .create_filter(
                &ctx,
                body_filter(FilterAction::Reject, MatchMode::Substr, "spam")
                    .with_condition(NewCondition::flag(FilterField::HasFile)),
            )
            .await
            .unwrap();

        let text_only = post("spam spam");
        assert!(engine
            .apply_filters(&ctx, &FilterInput::new(&text_only), 1)
            .await
            .unwrap()
            .is_none());

        let upload = Upload::new("a.txt", b"x".to_vec());
        let with_file = FilterInput::new(&text_only).with_upload(Some(&upload));
        let matched = engine.apply_filters(&ctx, &with_file, 1).await.unwrap();
        assert_eq!(matched.unwrap().action, FilterAction::Reject);
    }

    #[tokio::test]
    async fn test_board_scope_and_inactive() {
        let db = Database::open_in_memory().await.unwrap();
        let engine = FilterEngine::new(&db);
        let ctx = QueryContext::default();

        let scoped = engine
            .create_filter(
                &ctx,
                body_filter(FilterAction::Reject, MatchMode::Exact, "hi").with_board(2),
            )
            .await
            .unwrap();

        let post = post("hi");
        let input = FilterInput::new(&post);
        assert!(engine.apply_filters(&ctx, &input, 1).await.unwrap().is_none());
        assert!(engine.apply_filters(&ctx, &input, 2).await.unwrap().is_some());

        engine.set_filter_active(&ctx, scoped.id, false).await.unwrap();
        assert!(engine.apply_filters(&ctx, &input, 2).await.unwrap().is_none());

        let err = engine.set_filter_active(&ctx, 999, true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_update_filter() {
        let db = Database::open_in_memory().await.unwrap();
        let engine = FilterEngine::new(&db);
        let ctx = QueryContext::default();

        let filter = engine
            .create_filter(&ctx, body_filter(FilterAction::Reject, MatchMode::Exact, "a"))
            .await
            .unwrap();
        let updated = engine
            .update_filter(
                &ctx,
                filter.id,
                body_filter(FilterAction::Log, MatchMode::Substr, "b"),
            )
            .await
            .unwrap();
        assert_eq!(updated.action, FilterAction::Log);
        assert_eq!(updated.conditions[0].search(), "b");

        let err = engine
            .update_filter(&ctx, 500, body_filter(FilterAction::Log, MatchMode::Substr, "b"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_unknown_stored_field_fails_closed() {
        let db = Database::open_in_memory().await.unwrap();
        let engine = FilterEngine::new(&db);
        let ctx = QueryContext::default();

        let filter = engine
            .create_filter(&ctx, body_filter(FilterAction::Reject, MatchMode::Substr, "x"))
            .await
            .unwrap();
        sqlx::query("UPDATE filter_conditions SET field = 'colour' WHERE filter_id = ?")
            .bind(filter.id)
            .execute(db.pool())
            .await
            .unwrap();

        let post = post("x");
        let err = engine
            .apply_filters(&ctx, &FilterInput::new(&post), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::InvalidConditionField(_)));
    }

    #[tokio::test]
    async fn test_first_time_conditions() {
        let db = Database::open_in_memory().await.unwrap();
        let history = SqlitePostHistory::new(&db);
        let engine = FilterEngine::new(&db).with_history(&history);
        let ctx = QueryContext::default();

        engine
            .create_filter(
                &ctx,
                NewFilter::new(FilterAction::Reject)
                    .with_detail("lurk moar")
                    .with_condition(NewCondition::flag(FilterField::FirstTimeBoard))
                    .with_condition(NewCondition::flag(FilterField::IsOp)),
            )
            .await
            .unwrap();

        let post = post("new thread");
        assert!(engine
            .apply_filters(&ctx, &FilterInput::new(&post), 1)
            .await
            .unwrap()
            .is_some());

        history.record_post(post.ip, 1, Utc::now()).await.unwrap();
        assert!(engine
            .apply_filters(&ctx, &FilterInput::new(&post), 1)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_first_time_without_history_never_matches() {
        let db = Database::open_in_memory().await.unwrap();
        let engine = FilterEngine::new(&db);
        let ctx = QueryContext::default();

        engine
            .create_filter(
                &ctx,
                NewFilter::new(FilterAction::Reject)
                    .with_condition(NewCondition::flag(FilterField::FirstTimeSite)),
            )
            .await
            .unwrap();
        let post = post("hello");
        assert!(engine
            .apply_filters(&ctx, &FilterInput::new(&post), 1)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_wordfilters_in_order_and_scoped() {
        let db = Database::open_in_memory().await.unwrap();
        let engine = FilterEngine::new(&db);
        let ctx = QueryContext::default();

        engine
            .create_wordfilter(&ctx, NewWordfilter::new("cat", "dog"))
            .await
            .unwrap();
        engine
            .create_wordfilter(&ctx, NewWordfilter::new("dog", "wolf"))
            .await
            .unwrap();
        engine
            .create_wordfilter(&ctx, NewWordfilter::new(r"(\d+)", "[$1]").regex().with_board(2))
            .await
            .unwrap();

        assert_eq!(
            engine.apply_wordfilters(&ctx, "cat 42", 1).await.unwrap(),
            "wolf 42"
        );
        assert_eq!(
            engine.apply_wordfilters(&ctx, "cat 42", 2).await.unwrap(),
            "wolf [42]"
        );

        // wordfilters are not evaluated as reject/ban/log filters
        assert!(engine
            .list_filters(&ctx, ActiveSelector::All, None)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            engine
                .list_wordfilters(&ctx, ActiveSelector::Active, None)
                .await
                .unwrap()
                .len(),
            3
        );
    }

    #[tokio::test]
    async fn test_wordfilter_rejects_empty_search() {
        let db = Database::open_in_memory().await.unwrap();
        let engine = FilterEngine::new(&db);
        let err = engine
            .create_wordfilter(&QueryContext::default(), NewWordfilter::new("", "x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
