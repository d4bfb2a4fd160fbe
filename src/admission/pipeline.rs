//! Admission pipeline.
//!
//! Runs a candidate post through the ban checks, wordfilters and filters in
//! a fixed order, stopping at the first check that refuses it. Any error
//! refuses the post too: the caller gets the error, never a silent accept.

use tracing::{error, info, warn};

use super::outcome::{BanCause, BanIssued, Outcome, RejectReason, Rejection};
use crate::ban::{BanExpiry, BanRegistry, IpBan, NewIpBan};
use crate::config::Config;
use crate::context::QueryContext;
use crate::db::Database;
use crate::filter::{FilterAction, FilterEngine, FilterInput, PostHistory};
use crate::fingerprint::{FileBan, FingerprintEngine};
use crate::post::{Post, Upload};
use crate::Result;

/// Message for bans issued without a configured text.
const DEFAULT_AUTO_BAN_MESSAGE: &str = "Automatically banned";

/// Decides whether posts are accepted.
pub struct AdmissionPipeline<'a> {
    db: &'a Database,
    config: &'a Config,
    history: Option<&'a dyn PostHistory>,
}

impl<'a> AdmissionPipeline<'a> {
    /// Create a pipeline over the given database and configuration.
    pub fn new(db: &'a Database, config: &'a Config) -> Self {
        Self {
            db,
            config,
            history: None,
        }
    }

    /// Attach the poster history used by first-time filter conditions.
    pub fn with_history(mut self, history: &'a dyn PostHistory) -> Self {
        self.history = Some(history);
        self
    }

    /// A fresh query context with the configured timeout.
    pub fn query_context(&self) -> QueryContext {
        QueryContext::with_timeout_ms(self.config.admission.query_timeout_ms)
    }

    /// Decide whether `post` may be stored.
    ///
    /// Wordfilters rewrite `post.message_raw` in place when the post gets
    /// that far.
    pub async fn admit(
        &self,
        ctx: &QueryContext,
        post: &mut Post,
        upload: Option<&Upload>,
    ) -> Result<Outcome> {
        let result = self.evaluate(ctx, post, upload).await;
        match &result {
            Ok(Outcome::Continue) => {}
            Ok(Outcome::Reject(rejection)) => warn!(
                ip = %post.ip,
                board_id = post.board_id,
                reason = rejection.reason().as_str(),
                "post rejected"
            ),
            Ok(Outcome::Ban(issued)) => warn!(
                ip = %post.ip,
                board_id = post.board_id,
                ban_id = issued.ban().id,
                "post rejected, poster banned"
            ),
            Err(e) => error!(
                ip = %post.ip,
                board_id = post.board_id,
                error = %e,
                "admission check failed"
            ),
        }
        result
    }

    async fn evaluate(
        &self,
        ctx: &QueryContext,
        post: &mut Post,
        upload: Option<&Upload>,
    ) -> Result<Outcome> {
        let bans = BanRegistry::new(self.db);
        let board_id = post.board_id;

        if let Some(ban) = bans
            .check_post_ip_ban(ctx, post.ip, board_id, !post.is_top_post())
            .await?
        {
            return Ok(self.reject(ctx, RejectReason::IpBanned(ban)));
        }

        if !post.name.is_empty() {
            if let Some(ban) = bans.check_name_ban(ctx, &post.name, board_id).await? {
                return Ok(self.reject(ctx, RejectReason::NameBanned(ban)));
            }
        }
        if self.config.admission.check_tripcode && !post.tripcode.is_empty() {
            if let Some(ban) = bans.check_name_ban(ctx, &post.tripcode, board_id).await? {
                return Ok(self.reject(ctx, RejectReason::NameBanned(ban)));
            }
        }

        let mut fingerprint = None;
        if let Some(upload) = upload {
            if let Some(ban) = bans
                .check_filename_ban(ctx, &upload.original_filename, board_id)
                .await?
            {
                return Ok(self.reject(ctx, RejectReason::FilenameBanned(ban)));
            }
            if let Some(ban) = bans
                .check_file_checksum_ban(ctx, &upload.checksum, board_id)
                .await?
            {
                return Ok(self.reject(ctx, RejectReason::ChecksumBanned(ban)));
            }

            let engine = FingerprintEngine::new(self.db, &self.config.fingerprint);
            fingerprint = engine.fingerprint_upload(ctx, upload).await?;
            if let Some(fp) = &fingerprint {
                if let Some(file_ban) = engine.match_fingerprint(ctx, fp, board_id).await? {
                    if file_ban.ban_ip {
                        return self.ban_for_fingerprint(ctx, post, file_ban).await;
                    }
                    return Ok(self.reject(ctx, RejectReason::FingerprintBanned(file_ban)));
                }
            }
        }

        let mut filters = FilterEngine::new(self.db);
        if let Some(history) = self.history {
            filters = filters.with_history(history);
        }

        post.message_raw = filters
            .apply_wordfilters(ctx, &post.message_raw, board_id)
            .await?;

        let input = FilterInput::new(post)
            .with_upload(upload)
            .with_fingerprint(fingerprint.as_deref());
        let Some(filter) = filters.apply_filters(ctx, &input, board_id).await? else {
            return Ok(Outcome::Continue);
        };

        match filter.action {
            FilterAction::Log => Ok(Outcome::Continue),
            FilterAction::Reject => Ok(self.reject(ctx, RejectReason::Filtered(filter))),
            FilterAction::Ban => {
                let admission = &self.config.admission;
                let mut new_ban = NewIpBan::new(
                    post.ip.to_string(),
                    auto_ban_message(&filter.match_detail),
                )
                .for_post(None, post.message_raw.clone())
                .with_expiry(BanExpiry::from_secs(admission.auto_ban_duration_secs))
                .with_note(format!("issued by filter {}", filter.id));
                if !admission.auto_ban_appealable {
                    new_ban = new_ban.unappealable();
                }
                let ban = bans.create_ip_ban(ctx, new_ban).await?;
                Ok(self.banned(ctx, ban, BanCause::Filter(filter)))
            }
        }
    }

    async fn ban_for_fingerprint(
        &self,
        ctx: &QueryContext,
        post: &Post,
        file_ban: FileBan,
    ) -> Result<Outcome> {
        let message = file_ban
            .ban_ip_message
            .as_deref()
            .map(auto_ban_message)
            .unwrap_or_else(|| DEFAULT_AUTO_BAN_MESSAGE.to_string());
        let mut new_ban = NewIpBan::new(post.ip.to_string(), message)
            .for_post(None, post.message_raw.clone())
            .with_note(format!("issued by fingerprint ban {}", file_ban.id));
        if let Some(board) = file_ban.board_id {
            new_ban = new_ban.with_board(board);
        }
        if !self.config.admission.auto_ban_appealable {
            new_ban = new_ban.unappealable();
        }

        let ban = BanRegistry::new(self.db).create_ip_ban(ctx, new_ban).await?;
        Ok(self.banned(ctx, ban, BanCause::Fingerprint(file_ban)))
    }

    fn reject(&self, ctx: &QueryContext, reason: RejectReason) -> Outcome {
        Outcome::Reject(Rejection::new(reason, &self.config.display, ctx.now()))
    }

    fn banned(&self, ctx: &QueryContext, ban: IpBan, cause: BanCause) -> Outcome {
        info!(ban_id = ban.id, range = %ban.range_display(), "automatic IP ban issued");
        Outcome::Ban(BanIssued::new(ban, cause, &self.config.display, ctx.now()))
    }
}

fn auto_ban_message(detail: &str) -> String {
    if detail.trim().is_empty() {
        DEFAULT_AUTO_BAN_MESSAGE.to_string()
    } else {
        detail.to_string()
    }
}
