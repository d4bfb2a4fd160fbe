//! Admission outcomes and the notices shown to posters.

use chrono::{DateTime, Utc};

use crate::ban::{IpBan, StringBan};
use crate::config::DisplayConfig;
use crate::datetime::format_utc_datetime;
use crate::filter::Filter;
use crate::fingerprint::FileBan;

/// Result of running a post through admission.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Accept the post.
    Continue,
    /// Refuse the post.
    Reject(Rejection),
    /// Refuse the post; the poster's address was banned.
    Ban(BanIssued),
}

impl Outcome {
    /// Whether the post may be stored.
    pub fn is_continue(&self) -> bool {
        matches!(self, Outcome::Continue)
    }

    /// Text to show the poster, `None` when the post is accepted.
    pub fn message(&self) -> Option<&str> {
        match self {
            Outcome::Continue => None,
            Outcome::Reject(rejection) => Some(rejection.message()),
            Outcome::Ban(issued) => Some(issued.message()),
        }
    }
}

/// Why a post was refused.
#[derive(Debug, Clone)]
pub enum RejectReason {
    /// Poster's address is banned.
    IpBanned(IpBan),
    /// Name or tripcode is banned.
    NameBanned(StringBan),
    /// Upload filename is banned.
    FilenameBanned(StringBan),
    /// Upload checksum is banned.
    ChecksumBanned(StringBan),
    /// Upload fingerprint is banned.
    FingerprintBanned(FileBan),
    /// A reject filter matched.
    Filtered(Filter),
}

impl RejectReason {
    /// Short name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::IpBanned(_) => "ip_ban",
            RejectReason::NameBanned(_) => "name_ban",
            RejectReason::FilenameBanned(_) => "filename_ban",
            RejectReason::ChecksumBanned(_) => "checksum_ban",
            RejectReason::FingerprintBanned(_) => "fingerprint_ban",
            RejectReason::Filtered(_) => "filter",
        }
    }
}

/// A refused post with the notice for the poster.
#[derive(Debug, Clone)]
pub struct Rejection {
    reason: RejectReason,
    message: String,
}

impl Rejection {
    /// Build a rejection, rendering its notice.
    pub fn new(reason: RejectReason, display: &DisplayConfig, now: DateTime<Utc>) -> Self {
        let message = match &reason {
            RejectReason::IpBanned(ban) => ban_notice(ban, display, now),
            RejectReason::NameBanned(ban) => {
                with_expiry("The name or tripcode you entered is banned.", ban, display)
            }
            RejectReason::FilenameBanned(ban) => {
                with_expiry("Files with this name are not allowed.", ban, display)
            }
            RejectReason::ChecksumBanned(ban) => {
                with_expiry("This file is not allowed.", ban, display)
            }
            RejectReason::FingerprintBanned(_) => "This image is not allowed.".to_string(),
            RejectReason::Filtered(filter) if filter.match_detail.trim().is_empty() => {
                "Your post was rejected by a filter.".to_string()
            }
            RejectReason::Filtered(filter) => filter.match_detail.clone(),
        };
        Self { reason, message }
    }

    /// Why the post was refused.
    pub fn reason(&self) -> &RejectReason {
        &self.reason
    }

    /// Notice for the poster.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// What caused an automatic IP ban.
#[derive(Debug, Clone)]
pub enum BanCause {
    /// A fingerprint ban that also bans the uploader.
    Fingerprint(FileBan),
    /// A ban filter.
    Filter(Filter),
}

/// An IP ban issued during admission.
#[derive(Debug, Clone)]
pub struct BanIssued {
    ban: IpBan,
    cause: BanCause,
    message: String,
}

impl BanIssued {
    /// Record an issued ban, rendering its notice.
    pub fn new(ban: IpBan, cause: BanCause, display: &DisplayConfig, now: DateTime<Utc>) -> Self {
        let message = ban_notice(&ban, display, now);
        Self {
            ban,
            cause,
            message,
        }
    }

    /// The new ban.
    pub fn ban(&self) -> &IpBan {
        &self.ban
    }

    /// What triggered it.
    pub fn cause(&self) -> &BanCause {
        &self.cause
    }

    /// Notice for the poster.
    pub fn message(&self) -> &str {
        &self.message
    }
}

fn format_date(dt: &DateTime<Utc>, display: &DisplayConfig) -> String {
    format_utc_datetime(dt, &display.timezone, &display.date_format)
}

fn ban_notice(ban: &IpBan, display: &DisplayConfig, now: DateTime<Utc>) -> String {
    let scope = if ban.is_thread_ban {
        "from replying to threads"
    } else {
        "from posting"
    };
    let board = if ban.board_id.is_some() {
        " on this board"
    } else {
        ""
    };
    let reason = ban.message.trim_end_matches('.');
    let mut notice = format!("You are banned {scope}{board}. Reason: {reason}.");

    match (ban.permanent, ban.expires_at) {
        (false, Some(at)) => {
            notice.push_str(&format!(" This ban expires {}.", format_date(&at, display)))
        }
        _ => notice.push_str(" This ban does not expire."),
    }

    if !ban.can_appeal {
        notice.push_str(" This ban cannot be appealed.");
    } else if ban.is_appealable(now) {
        notice.push_str(" You may appeal this ban.");
    } else {
        notice.push_str(&format!(
            " You may appeal this ban after {}.",
            format_date(&ban.appeal_at, display)
        ));
    }
    notice
}

fn with_expiry(base: &str, ban: &StringBan, display: &DisplayConfig) -> String {
    match (ban.permanent, ban.expires_at) {
        (false, Some(at)) => format!("{base} This ban expires {}.", format_date(&at, display)),
        _ => base.to_string(),
    }
}
