//! Ban models.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;

use crate::ip_range::{range_subnet, IpRange};
use crate::WardenError;

/// How long a ban lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BanExpiry {
    /// Never expires.
    #[default]
    Permanent,
    /// Expires at a fixed instant.
    At(DateTime<Utc>),
    /// Expires this long after it is issued.
    After(TimeDelta),
}

impl BanExpiry {
    /// Build an expiry from a duration in seconds, 0 meaning permanent.
    pub fn from_secs(secs: u64) -> Self {
        if secs == 0 {
            BanExpiry::Permanent
        } else {
            let delta = i64::try_from(secs)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .unwrap_or(TimeDelta::MAX);
            BanExpiry::After(delta)
        }
    }

    /// Whether the ban is permanent.
    pub fn is_permanent(&self) -> bool {
        matches!(self, BanExpiry::Permanent)
    }

    /// The expiry instant for a ban issued at `issued_at`.
    ///
    /// Fails when the duration runs past the representable date range.
    pub fn resolve(&self, issued_at: DateTime<Utc>) -> crate::Result<Option<DateTime<Utc>>> {
        match self {
            BanExpiry::Permanent => Ok(None),
            BanExpiry::At(at) => Ok(Some(*at)),
            BanExpiry::After(delta) => offset_from(issued_at, *delta, "ban duration").map(Some),
        }
    }
}

/// `issued_at + delta`, or a validation error when the sum overflows.
pub(crate) fn offset_from(
    issued_at: DateTime<Utc>,
    delta: TimeDelta,
    what: &str,
) -> crate::Result<DateTime<Utc>> {
    issued_at
        .checked_add_signed(delta)
        .ok_or_else(|| WardenError::Validation(format!("{what} is too long")))
}

/// Ban tables that support soft deactivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanKind {
    /// IP range ban.
    Ip,
    /// Username/tripcode ban.
    Name,
    /// Upload filename ban.
    Filename,
    /// Upload checksum ban.
    Checksum,
    /// Perceptual fingerprint ban.
    Fingerprint,
}

impl BanKind {
    /// Table holding bans of this kind.
    pub fn table(&self) -> &'static str {
        match self {
            BanKind::Ip => "ip_ban",
            BanKind::Name => "name_ban",
            BanKind::Filename => "filename_ban",
            BanKind::Checksum => "checksum_ban",
            BanKind::Fingerprint => "file_ban",
        }
    }
}

impl fmt::Display for BanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BanKind::Ip => "IP ban",
            BanKind::Name => "name ban",
            BanKind::Filename => "filename ban",
            BanKind::Checksum => "checksum ban",
            BanKind::Fingerprint => "fingerprint ban",
        };
        write!(f, "{s}")
    }
}

/// An IP range ban.
#[derive(Debug, Clone)]
pub struct IpBan {
    /// Unique ban ID.
    pub id: i64,
    /// Banned address range.
    pub range: IpRange,
    /// Board the ban applies to, `None` for all boards.
    pub board_id: Option<i64>,
    /// Issuing staff member, `None` for bans issued by a filter.
    pub staff_id: Option<i64>,
    /// Post that caused the ban.
    pub banned_for_post_id: Option<i64>,
    /// Text of the offending post, kept for the ban page.
    pub copy_post_text: String,
    /// When the ban was issued.
    pub issued_at: DateTime<Utc>,
    /// When the ban expires. Ignored for permanent bans.
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether the ban never expires.
    pub permanent: bool,
    /// Whether the ban may be appealed.
    pub can_appeal: bool,
    /// Earliest time an appeal may be submitted.
    pub appeal_at: DateTime<Utc>,
    /// Only prohibits replying within existing threads.
    pub is_thread_ban: bool,
    /// Reason shown to the poster.
    pub message: String,
    /// Staff-only note.
    pub staff_note: String,
    /// Whether the ban is active.
    pub is_active: bool,
}

impl IpBan {
    /// Whether the ban has run out at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.permanent && self.expires_at.map_or(true, |at| now >= at)
    }

    /// Whether the ban blocks posting at `now`.
    pub fn is_in_effect(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_expired(now)
    }

    /// Whether an appeal may be submitted at `now`.
    pub fn is_appealable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.can_appeal && now >= self.appeal_at
    }

    /// The range as shown to staff: a single address or a CIDR.
    pub fn range_display(&self) -> String {
        if self.range.is_single() {
            return self.range.start.to_string();
        }
        match range_subnet(self.range.start, self.range.end) {
            Ok(subnet) => subnet.to_string(),
            Err(_) => self.range.to_string(),
        }
    }
}

/// Data for creating a new IP ban.
#[derive(Debug, Clone)]
pub struct NewIpBan {
    /// Bare address or CIDR.
    pub ip: String,
    /// Board scope, `None` for global.
    pub board_id: Option<i64>,
    /// Issuing staff member.
    pub staff_id: Option<i64>,
    /// Post that caused the ban.
    pub banned_for_post_id: Option<i64>,
    /// Text of the offending post.
    pub copy_post_text: String,
    /// Ban duration.
    pub expiry: BanExpiry,
    /// Whether the ban may be appealed.
    pub can_appeal: bool,
    /// Delay after issue before an appeal is allowed.
    pub appeal_after: TimeDelta,
    /// Only prohibits replies.
    pub is_thread_ban: bool,
    /// Reason shown to the poster.
    pub message: String,
    /// Staff-only note.
    pub staff_note: String,
}

impl NewIpBan {
    /// Create a permanent, appealable, global ban.
    pub fn new(ip: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            board_id: None,
            staff_id: None,
            banned_for_post_id: None,
            copy_post_text: String::new(),
            expiry: BanExpiry::Permanent,
            can_appeal: true,
            appeal_after: TimeDelta::zero(),
            is_thread_ban: false,
            message: message.into(),
            staff_note: String::new(),
        }
    }

    /// Restrict the ban to one board.
    pub fn with_board(mut self, board_id: i64) -> Self {
        self.board_id = Some(board_id);
        self
    }

    /// Attribute the ban to a staff member.
    pub fn with_staff(mut self, staff_id: i64) -> Self {
        self.staff_id = Some(staff_id);
        self
    }

    /// Record the post that caused the ban.
    pub fn for_post(mut self, post_id: Option<i64>, text: impl Into<String>) -> Self {
        self.banned_for_post_id = post_id;
        self.copy_post_text = text.into();
        self
    }

    /// Set the ban duration.
    pub fn with_expiry(mut self, expiry: BanExpiry) -> Self {
        self.expiry = expiry;
        self
    }

    /// Forbid appeals.
    pub fn unappealable(mut self) -> Self {
        self.can_appeal = false;
        self
    }

    /// Allow appeals only after the given delay.
    pub fn appeal_after(mut self, delay: TimeDelta) -> Self {
        self.appeal_after = delay;
        self
    }

    /// Only prohibit replies within existing threads.
    pub fn thread_ban(mut self) -> Self {
        self.is_thread_ban = true;
        self
    }

    /// Set the staff-only note.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.staff_note = note.into();
        self
    }
}

/// String ban tables sharing one shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringBanKind {
    /// Username or tripcode.
    Name,
    /// Upload filename.
    Filename,
    /// Upload checksum.
    Checksum,
}

impl StringBanKind {
    /// Table holding bans of this kind.
    pub fn table(&self) -> &'static str {
        self.ban_kind().table()
    }

    /// The corresponding [`BanKind`].
    pub fn ban_kind(&self) -> BanKind {
        match self {
            StringBanKind::Name => BanKind::Name,
            StringBanKind::Filename => BanKind::Filename,
            StringBanKind::Checksum => BanKind::Checksum,
        }
    }
}

/// How a string ban matches its value.
#[derive(Debug, Clone)]
pub enum BanPattern {
    /// Case-sensitive equality.
    Exact(String),
    /// Compiled regular expression.
    Regex(Regex),
}

impl BanPattern {
    /// Compile a stored pattern.
    pub fn compile(pattern: &str, is_regex: bool) -> Result<Self, regex::Error> {
        if is_regex {
            Ok(BanPattern::Regex(Regex::new(pattern)?))
        } else {
            Ok(BanPattern::Exact(pattern.to_string()))
        }
    }

    /// Whether `value` is banned by this pattern.
    pub fn is_match(&self, value: &str) -> bool {
        match self {
            BanPattern::Exact(p) => p == value,
            BanPattern::Regex(re) => re.is_match(value),
        }
    }

    /// Source text of the pattern.
    pub fn as_str(&self) -> &str {
        match self {
            BanPattern::Exact(p) => p,
            BanPattern::Regex(re) => re.as_str(),
        }
    }

    /// Whether the pattern is a regex.
    pub fn is_regex(&self) -> bool {
        matches!(self, BanPattern::Regex(_))
    }
}

/// A username, filename or checksum ban.
#[derive(Debug, Clone)]
pub struct StringBan {
    /// Unique ban ID.
    pub id: i64,
    /// Which table the ban lives in.
    pub kind: StringBanKind,
    /// Compiled pattern.
    pub pattern: BanPattern,
    /// Board scope, `None` for global.
    pub board_id: Option<i64>,
    /// Issuing staff member.
    pub staff_id: Option<i64>,
    /// Staff-only note.
    pub staff_note: String,
    /// When the ban was issued.
    pub issued_at: DateTime<Utc>,
    /// When the ban expires. Ignored for permanent bans.
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether the ban never expires.
    pub permanent: bool,
    /// Whether the ban is active.
    pub is_active: bool,
}

impl StringBan {
    /// Whether `value` is banned.
    pub fn is_match(&self, value: &str) -> bool {
        self.pattern.is_match(value)
    }
}

/// Data for creating a string ban.
#[derive(Debug, Clone)]
pub struct NewStringBan {
    /// Which table the ban goes into.
    pub kind: StringBanKind,
    /// Literal value or regex source.
    pub pattern: String,
    /// Whether `pattern` is a regex.
    pub is_regex: bool,
    /// Board scope, `None` for global.
    pub board_id: Option<i64>,
    /// Issuing staff member.
    pub staff_id: Option<i64>,
    /// Staff-only note.
    pub staff_note: String,
    /// Ban duration.
    pub expiry: BanExpiry,
}

impl NewStringBan {
    /// Create a permanent, global, literal ban.
    pub fn new(kind: StringBanKind, pattern: impl Into<String>) -> Self {
        Self {
            kind,
            pattern: pattern.into(),
            is_regex: false,
            board_id: None,
            staff_id: None,
            staff_note: String::new(),
            expiry: BanExpiry::Permanent,
        }
    }

    /// Treat the pattern as a regex.
    pub fn regex(mut self) -> Self {
        self.is_regex = true;
        self
    }

    /// Restrict the ban to one board.
    pub fn with_board(mut self, board_id: i64) -> Self {
        self.board_id = Some(board_id);
        self
    }

    /// Attribute the ban to a staff member.
    pub fn with_staff(mut self, staff_id: i64) -> Self {
        self.staff_id = Some(staff_id);
        self
    }

    /// Set the staff-only note.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.staff_note = note.into();
        self
    }

    /// Set the ban duration.
    pub fn with_expiry(mut self, expiry: BanExpiry) -> Self {
        self.expiry = expiry;
        self
    }
}

/// Appeal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppealStatus {
    /// Waiting for staff.
    #[default]
    Pending,
    /// Ban lifted.
    Approved,
    /// Ban upheld.
    Denied,
}

impl AppealStatus {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AppealStatus::Pending => "pending",
            AppealStatus::Approved => "approved",
            AppealStatus::Denied => "denied",
        }
    }
}

impl fmt::Display for AppealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AppealStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AppealStatus::Pending),
            "approved" => Ok(AppealStatus::Approved),
            "denied" => Ok(AppealStatus::Denied),
            _ => Err(format!("unknown appeal status: {s}")),
        }
    }
}

/// An appeal against an IP ban.
#[derive(Debug, Clone)]
pub struct BanAppeal {
    /// Unique appeal ID.
    pub id: i64,
    /// Appealed ban.
    pub ip_ban_id: i64,
    /// Text written by the poster.
    pub appeal_text: String,
    /// Staff member who handled the appeal.
    pub staff_id: Option<i64>,
    /// Response shown to the poster.
    pub staff_response: Option<String>,
    /// Current status.
    pub status: AppealStatus,
    /// When the appeal was submitted.
    pub created_at: DateTime<Utc>,
}

/// One state transition of an IP ban.
#[derive(Debug, Clone)]
pub struct IpBanAudit {
    /// Audit row ID.
    pub id: i64,
    /// Ban that changed.
    pub ip_ban_id: i64,
    /// When it changed.
    pub changed_at: DateTime<Utc>,
    /// Who changed it.
    pub staff_id: Option<i64>,
    /// Active flag after the change.
    pub is_active: bool,
    /// Ban message at the time of the change.
    pub message: String,
    /// Staff note at the time of the change.
    pub staff_note: String,
}
