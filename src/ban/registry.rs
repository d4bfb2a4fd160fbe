//! Ban registry.
//!
//! High-level ban operations used by the admission pipeline and by staff
//! tooling. Every call runs under a [`QueryContext`] so that a slow or
//! unreachable store turns into an error instead of an admitted post.

use std::net::IpAddr;

use chrono::TimeDelta;
use tracing::{debug, info};

use super::appeal::AppealRepository;
use super::repository::{deactivate_in_table, IpBanRepository, StringBanRepository};
use super::types::{
    AppealStatus, BanAppeal, BanExpiry, BanKind, BanPattern, IpBan, IpBanAudit, NewIpBan,
    NewStringBan, StringBan, StringBanKind,
};
use crate::context::QueryContext;
use crate::db::Database;
use crate::ip_range::{parse_ip, parse_ip_range};
use crate::{Result, WardenError};

/// Maximum length of an appeal, in characters.
pub const MAX_APPEAL_LENGTH: usize = 3000;

fn validate_expiry(expiry: &BanExpiry, ctx: &QueryContext) -> Result<()> {
    match expiry {
        BanExpiry::Permanent => Ok(()),
        BanExpiry::At(at) if *at <= ctx.now() => Err(WardenError::Validation(
            "ban expiry must be in the future".to_string(),
        )),
        BanExpiry::After(delta) if *delta <= TimeDelta::zero() => Err(WardenError::Validation(
            "ban duration must be positive".to_string(),
        )),
        _ => expiry.resolve(ctx.now()).map(|_| ()),
    }
}

/// Service for querying and managing bans.
pub struct BanRegistry<'a> {
    db: &'a Database,
}

impl<'a> BanRegistry<'a> {
    /// Create a new BanRegistry with the given database reference.
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Find the newest IP ban in effect for `ip` on `board_id`.
    ///
    /// Thread bans are included. Returns `None` when nothing matches.
    pub async fn check_ip_ban(
        &self,
        ctx: &QueryContext,
        ip: &str,
        board_id: i64,
    ) -> Result<Option<IpBan>> {
        let ip = parse_ip(ip)?;
        self.check_post_ip_ban(ctx, ip, board_id, true).await
    }

    /// Find the IP ban that blocks a post.
    ///
    /// Thread bans only block replies, so they are ignored for new threads.
    pub async fn check_post_ip_ban(
        &self,
        ctx: &QueryContext,
        ip: IpAddr,
        board_id: i64,
        is_reply: bool,
    ) -> Result<Option<IpBan>> {
        let repo = IpBanRepository::new(self.db.pool());
        ctx.run(repo.find_matching(ip, board_id, ctx.now(), is_reply))
            .await
    }

    /// Find a username ban matching `name` on `board_id`.
    pub async fn check_name_ban(
        &self,
        ctx: &QueryContext,
        name: &str,
        board_id: i64,
    ) -> Result<Option<StringBan>> {
        self.check_string_ban(ctx, StringBanKind::Name, name, board_id)
            .await
    }

    /// Find a filename ban matching `filename` on `board_id`.
    pub async fn check_filename_ban(
        &self,
        ctx: &QueryContext,
        filename: &str,
        board_id: i64,
    ) -> Result<Option<StringBan>> {
        self.check_string_ban(ctx, StringBanKind::Filename, filename, board_id)
            .await
    }

    /// Find a checksum ban matching `checksum` on `board_id`.
    pub async fn check_file_checksum_ban(
        &self,
        ctx: &QueryContext,
        checksum: &str,
        board_id: i64,
    ) -> Result<Option<StringBan>> {
        self.check_string_ban(ctx, StringBanKind::Checksum, checksum, board_id)
            .await
    }

    async fn check_string_ban(
        &self,
        ctx: &QueryContext,
        kind: StringBanKind,
        value: &str,
        board_id: i64,
    ) -> Result<Option<StringBan>> {
        let repo = StringBanRepository::new(self.db.pool(), kind);
        ctx.run(repo.find_matching(value, board_id, ctx.now()))
            .await
    }

    /// Create an IP ban from a bare address or CIDR.
    pub async fn create_ip_ban(&self, ctx: &QueryContext, new_ban: NewIpBan) -> Result<IpBan> {
        let range = parse_ip_range(&new_ban.ip)?;
        if new_ban.message.trim().is_empty() {
            return Err(WardenError::Validation("ban message is empty".to_string()));
        }
        validate_expiry(&new_ban.expiry, ctx)?;

        let repo = IpBanRepository::new(self.db.pool());
        let id = ctx.run(repo.create(&range, &new_ban, ctx.now())).await?;
        let ban = ctx
            .run(repo.get_by_id(id))
            .await?
            .ok_or_else(|| WardenError::NotFound(format!("IP ban {id}")))?;

        info!(
            ban_id = ban.id,
            range = %ban.range_display(),
            board_id = ?ban.board_id,
            staff_id = ?ban.staff_id,
            "IP ban created"
        );
        Ok(ban)
    }

    /// Create a username, filename or checksum ban.
    ///
    /// Regex patterns are compiled here so that a bad pattern never reaches
    /// the store.
    pub async fn create_string_ban(
        &self,
        ctx: &QueryContext,
        new_ban: NewStringBan,
    ) -> Result<StringBan> {
        if new_ban.pattern.is_empty() {
            return Err(WardenError::Validation("ban pattern is empty".to_string()));
        }
        BanPattern::compile(&new_ban.pattern, new_ban.is_regex)?;
        validate_expiry(&new_ban.expiry, ctx)?;

        let repo = StringBanRepository::new(self.db.pool(), new_ban.kind);
        let id = ctx.run(repo.create(&new_ban, ctx.now())).await?;
        let ban = ctx
            .run(repo.get_by_id(id))
            .await?
            .ok_or_else(|| WardenError::NotFound(format!("{} {id}", new_ban.kind.ban_kind())))?;

        info!(
            ban_id = ban.id,
            kind = %new_ban.kind.ban_kind(),
            board_id = ?ban.board_id,
            "ban created"
        );
        Ok(ban)
    }

    /// Get an IP ban by ID.
    pub async fn get_ip_ban(&self, ctx: &QueryContext, id: i64) -> Result<IpBan> {
        let repo = IpBanRepository::new(self.db.pool());
        ctx.run(repo.get_by_id(id))
            .await?
            .ok_or_else(|| WardenError::NotFound(format!("IP ban {id}")))
    }

    /// List IP bans, newest first.
    pub async fn list_ip_bans(
        &self,
        ctx: &QueryContext,
        active_only: bool,
        board_id: Option<i64>,
    ) -> Result<Vec<IpBan>> {
        let repo = IpBanRepository::new(self.db.pool());
        ctx.run(repo.list(active_only, board_id)).await
    }

    /// List string bans of one kind, newest first.
    pub async fn list_string_bans(
        &self,
        ctx: &QueryContext,
        kind: StringBanKind,
        active_only: bool,
    ) -> Result<Vec<StringBan>> {
        let repo = StringBanRepository::new(self.db.pool(), kind);
        ctx.run(repo.list(active_only)).await
    }

    /// Count IP bans currently in effect.
    pub async fn count_ip_bans_in_effect(&self, ctx: &QueryContext) -> Result<i64> {
        let repo = IpBanRepository::new(self.db.pool());
        ctx.run(repo.count_in_effect(ctx.now())).await
    }

    /// Soft-delete a ban, attributed to a staff member.
    pub async fn deactivate(
        &self,
        ctx: &QueryContext,
        kind: BanKind,
        ban_id: i64,
        staff_id: i64,
    ) -> Result<()> {
        let found = match kind {
            BanKind::Ip => {
                let repo = IpBanRepository::new(self.db.pool());
                ctx.run(repo.deactivate(ban_id, Some(staff_id), ctx.now()))
                    .await?
            }
            _ => {
                ctx.run(deactivate_in_table(
                    self.db.pool(),
                    kind.table(),
                    ban_id,
                    Some(staff_id),
                    ctx.now(),
                ))
                .await?
            }
        };

        if !found {
            return Err(WardenError::NotFound(format!("{kind} {ban_id}")));
        }
        info!(ban_id, staff_id, kind = %kind, "ban deactivated");
        Ok(())
    }

    /// The audit trail of an IP ban.
    pub async fn ip_ban_audit(&self, ctx: &QueryContext, ban_id: i64) -> Result<Vec<IpBanAudit>> {
        let repo = IpBanRepository::new(self.db.pool());
        ctx.run(repo.list_audit(ban_id)).await
    }

    /// Submit an appeal against an IP ban.
    ///
    /// The appellant's address must lie in the banned range, the ban must be
    /// active and appealable at `ctx.now()`, and only one appeal may be
    /// pending at a time.
    pub async fn submit_appeal(
        &self,
        ctx: &QueryContext,
        ban_id: i64,
        ip: &str,
        text: &str,
    ) -> Result<BanAppeal> {
        let ban = self.get_ip_ban(ctx, ban_id).await?;
        let ip = parse_ip(ip)?;

        if !ban.range.contains(ip) {
            return Err(WardenError::Validation(
                "this ban does not apply to your address".to_string(),
            ));
        }
        if !ban.is_active {
            return Err(WardenError::Validation("this ban is no longer active".to_string()));
        }
        if !ban.can_appeal {
            return Err(WardenError::Validation("this ban cannot be appealed".to_string()));
        }
        if ctx.now() < ban.appeal_at {
            return Err(WardenError::Validation(
                "this ban cannot be appealed yet".to_string(),
            ));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(WardenError::Validation("appeal text is empty".to_string()));
        }
        if text.chars().count() > MAX_APPEAL_LENGTH {
            return Err(WardenError::Validation(format!(
                "appeal text is too long ({MAX_APPEAL_LENGTH} characters max)"
            )));
        }

        let repo = AppealRepository::new(self.db.pool());
        if ctx.run(repo.has_pending(ban_id)).await? {
            return Err(WardenError::Validation(
                "an appeal for this ban is already pending".to_string(),
            ));
        }

        let id = ctx.run(repo.create(ban_id, text, ctx.now())).await?;
        info!(ban_id, appeal_id = id, "ban appeal submitted");
        self.get_appeal(ctx, id).await
    }

    /// Get an appeal by ID.
    pub async fn get_appeal(&self, ctx: &QueryContext, appeal_id: i64) -> Result<BanAppeal> {
        let repo = AppealRepository::new(self.db.pool());
        ctx.run(repo.get_by_id(appeal_id))
            .await?
            .ok_or_else(|| WardenError::NotFound(format!("appeal {appeal_id}")))
    }

    /// Approve an appeal: the ban is lifted and the appeal kept as approved.
    pub async fn approve_appeal(
        &self,
        ctx: &QueryContext,
        appeal_id: i64,
        staff_id: i64,
    ) -> Result<()> {
        let appeal = self.get_appeal(ctx, appeal_id).await?;
        if appeal.status != AppealStatus::Pending {
            return Err(WardenError::Validation(format!(
                "appeal {appeal_id} is already {}",
                appeal.status
            )));
        }

        let repo = AppealRepository::new(self.db.pool());
        if !ctx.run(repo.approve(&appeal, staff_id, ctx.now())).await? {
            return Err(WardenError::Validation(format!(
                "appeal {appeal_id} is no longer pending"
            )));
        }
        info!(appeal_id, ban_id = appeal.ip_ban_id, staff_id, "ban appeal approved");
        Ok(())
    }

    /// Deny an appeal with a response for the poster.
    pub async fn deny_appeal(
        &self,
        ctx: &QueryContext,
        appeal_id: i64,
        staff_id: i64,
        response: &str,
    ) -> Result<()> {
        let appeal = self.get_appeal(ctx, appeal_id).await?;
        let repo = AppealRepository::new(self.db.pool());
        if !ctx.run(repo.deny(appeal.id, staff_id, response)).await? {
            return Err(WardenError::Validation(format!(
                "appeal {appeal_id} is already {}",
                appeal.status
            )));
        }
        debug!(appeal_id, staff_id, "ban appeal denied");
        Ok(())
    }

    /// List appeals, optionally for one ban.
    pub async fn list_appeals(
        &self,
        ctx: &QueryContext,
        ban_id: Option<i64>,
    ) -> Result<Vec<BanAppeal>> {
        let repo = AppealRepository::new(self.db.pool());
        ctx.run(repo.list(ban_id)).await
    }
}
