//! Filter models.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use super::condition::FilterCondition;
use super::repository::{ConditionRecord, FilterDraft, FilterRecord};
use crate::post::{Post, Upload};
use crate::WardenError;

/// Post field a filter condition inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterField {
    /// Display name.
    Name,
    /// Tripcode.
    Trip,
    /// Email field.
    Email,
    /// Subject line.
    Subject,
    /// Post body.
    Body,
    /// Upload filename.
    Filename,
    /// Upload checksum.
    Checksum,
    /// Upload fingerprint.
    Ahash,
    /// Client user agent.
    UserAgent,
    /// Post starts a thread.
    IsOp,
    /// Post is a reply.
    NotOp,
    /// Post has an upload.
    HasFile,
    /// Post has no upload.
    NoFile,
    /// First post from this address on the board.
    FirstTimeBoard,
    /// Address has posted on the board before.
    NotFirstTimeBoard,
    /// First post from this address anywhere.
    FirstTimeSite,
    /// Address has posted somewhere before.
    NotFirstTimeSite,
}

impl FilterField {
    /// Every field, in the order staff tooling lists them.
    pub const ALL: [FilterField; 17] = [
        FilterField::Name,
        FilterField::Trip,
        FilterField::Email,
        FilterField::Subject,
        FilterField::Body,
        FilterField::Filename,
        FilterField::Checksum,
        FilterField::Ahash,
        FilterField::UserAgent,
        FilterField::IsOp,
        FilterField::NotOp,
        FilterField::HasFile,
        FilterField::NoFile,
        FilterField::FirstTimeBoard,
        FilterField::NotFirstTimeBoard,
        FilterField::FirstTimeSite,
        FilterField::NotFirstTimeSite,
    ];

    /// Search value stored for flag fields.
    pub const FLAG_SEARCH: &'static str = "1";

    /// Convert to the stored string.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterField::Name => "name",
            FilterField::Trip => "trip",
            FilterField::Email => "email",
            FilterField::Subject => "subject",
            FilterField::Body => "body",
            FilterField::Filename => "filename",
            FilterField::Checksum => "checksum",
            FilterField::Ahash => "ahash",
            FilterField::UserAgent => "useragent",
            FilterField::IsOp => "isop",
            FilterField::NotOp => "notop",
            FilterField::HasFile => "hasfile",
            FilterField::NoFile => "nofile",
            FilterField::FirstTimeBoard => "firsttimeboard",
            FilterField::NotFirstTimeBoard => "notfirsttimeboard",
            FilterField::FirstTimeSite => "firsttimesite",
            FilterField::NotFirstTimeSite => "notfirsttimesite",
        }
    }

    /// Whether the field is a yes/no flag with no search text.
    pub fn is_flag(&self) -> bool {
        matches!(
            self,
            FilterField::IsOp
                | FilterField::NotOp
                | FilterField::HasFile
                | FilterField::NoFile
                | FilterField::FirstTimeBoard
                | FilterField::NotFirstTimeBoard
                | FilterField::FirstTimeSite
                | FilterField::NotFirstTimeSite
        )
    }

    /// Whether evaluating the field needs the poster's history.
    pub fn uses_history(&self) -> bool {
        matches!(
            self,
            FilterField::FirstTimeBoard
                | FilterField::NotFirstTimeBoard
                | FilterField::FirstTimeSite
                | FilterField::NotFirstTimeSite
        )
    }

    /// Whether the field always compares exactly, whatever the match mode.
    pub fn is_exact_only(&self) -> bool {
        matches!(self, FilterField::Checksum | FilterField::Ahash)
    }
}

impl fmt::Display for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterField {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FilterField::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| WardenError::InvalidConditionField(s.to_string()))
    }
}

/// How a condition compares its search text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// Case-sensitive equality.
    Exact,
    /// Case-sensitive substring.
    #[default]
    Substr,
    /// Case-insensitive substring.
    SubstrCaseInsensitive,
    /// Regular expression.
    Regex,
}

impl MatchMode {
    /// Convert to the stored string.
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMode::Exact => "exact",
            MatchMode::Substr => "substr",
            MatchMode::SubstrCaseInsensitive => "substrci",
            MatchMode::Regex => "regex",
        }
    }

    /// Map the older boolean regex flag.
    pub fn from_is_regex(is_regex: bool) -> Self {
        if is_regex {
            MatchMode::Regex
        } else {
            MatchMode::Substr
        }
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchMode {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(MatchMode::Exact),
            "substr" => Ok(MatchMode::Substr),
            "substrci" => Ok(MatchMode::SubstrCaseInsensitive),
            "regex" => Ok(MatchMode::Regex),
            _ => Err(WardenError::InvalidStringMatchMode(s.to_string())),
        }
    }
}

/// What happens to a post that matches a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    /// Refuse the post, showing the match detail.
    Reject,
    /// Refuse the post and ban the poster's address.
    Ban,
    /// Accept the post and record the hit.
    Log,
}

impl FilterAction {
    /// Stored action of wordfilters.
    pub const REPLACE: &'static str = "replace";

    /// Convert to the stored string.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterAction::Reject => "reject",
            FilterAction::Ban => "ban",
            FilterAction::Log => "log",
        }
    }

    /// Whether the action stops the post.
    pub fn blocks(&self) -> bool {
        !matches!(self, FilterAction::Log)
    }
}

impl fmt::Display for FilterAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterAction {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reject" => Ok(FilterAction::Reject),
            "ban" => Ok(FilterAction::Ban),
            "log" => Ok(FilterAction::Log),
            _ => Err(WardenError::InvalidMatchAction(s.to_string())),
        }
    }
}

/// Which filters a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveSelector {
    /// Only active filters.
    #[default]
    Active,
    /// Only disabled filters.
    Inactive,
    /// Everything.
    All,
}

impl ActiveSelector {
    /// The `is_active` value to filter on, `None` for no restriction.
    pub fn is_active(&self) -> Option<bool> {
        match self {
            ActiveSelector::Active => Some(true),
            ActiveSelector::Inactive => Some(false),
            ActiveSelector::All => None,
        }
    }
}

/// Whether a poster's address has been seen before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PosterHistory {
    /// No earlier post from the address on this board.
    pub first_on_board: bool,
    /// No earlier post from the address anywhere.
    pub first_on_site: bool,
}

/// Everything a filter condition can look at.
#[derive(Debug, Clone, Copy)]
pub struct FilterInput<'a> {
    /// The post, after wordfilters.
    pub post: &'a Post,
    /// The upload, if any.
    pub upload: Option<&'a Upload>,
    /// Fingerprint of the upload, if it could be computed.
    pub fingerprint: Option<&'a str>,
    /// Poster history, resolved on demand.
    pub history: Option<PosterHistory>,
}

impl<'a> FilterInput<'a> {
    /// Input for a post without an upload.
    pub fn new(post: &'a Post) -> Self {
        Self {
            post,
            upload: None,
            fingerprint: None,
            history: None,
        }
    }

    /// Attach an upload.
    pub fn with_upload(mut self, upload: Option<&'a Upload>) -> Self {
        self.upload = upload;
        self
    }

    /// Attach the upload fingerprint.
    pub fn with_fingerprint(mut self, fingerprint: Option<&'a str>) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    /// Attach already known poster history.
    pub fn with_history(mut self, history: PosterHistory) -> Self {
        self.history = Some(history);
        self
    }
}

/// A reject, ban or log filter with compiled conditions.
#[derive(Debug, Clone)]
pub struct Filter {
    /// Unique filter ID.
    pub id: i64,
    /// Staff member who created the filter.
    pub staff_id: Option<i64>,
    /// Staff-only note.
    pub staff_note: String,
    /// When the filter was created.
    pub issued_at: DateTime<Utc>,
    /// What a match does.
    pub action: FilterAction,
    /// Rejection text or ban message.
    pub match_detail: String,
    /// Whether the filter is enabled.
    pub is_active: bool,
    /// Conditions, all of which must match.
    pub conditions: Vec<FilterCondition>,
    /// Boards the filter applies to; empty means every board.
    pub board_ids: Vec<i64>,
}

impl Filter {
    /// Whether the post matches every condition.
    ///
    /// A filter with no conditions never matches.
    pub fn evaluate(&self, input: &FilterInput<'_>) -> bool {
        !self.conditions.is_empty() && self.conditions.iter().all(|c| c.matches(input))
    }

    /// Whether any condition needs poster history.
    pub fn uses_history(&self) -> bool {
        self.conditions.iter().any(|c| c.field().uses_history())
    }

    /// Whether the filter applies on `board_id`.
    pub fn applies_to_board(&self, board_id: i64) -> bool {
        self.board_ids.is_empty() || self.board_ids.contains(&board_id)
    }
}

impl TryFrom<FilterRecord> for Filter {
    type Error = WardenError;

    fn try_from(record: FilterRecord) -> Result<Self, Self::Error> {
        let action = record.match_action.parse()?;
        if record.conditions.is_empty() {
            return Err(WardenError::Validation(format!(
                "filter {} has no conditions",
                record.id
            )));
        }
        let conditions = record
            .conditions
            .iter()
            .map(|c| FilterCondition::from_stored(&c.field, &c.match_mode, &c.search))
            .collect::<crate::Result<Vec<_>>>()?;

        Ok(Filter {
            id: record.id,
            staff_id: record.staff_id,
            staff_note: record.staff_note,
            issued_at: record.issued_at,
            action,
            match_detail: record.match_detail,
            is_active: record.is_active,
            conditions,
            board_ids: record.board_ids,
        })
    }
}

/// A condition as submitted by staff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCondition {
    /// Inspected field.
    pub field: FilterField,
    /// Comparison mode.
    pub mode: MatchMode,
    /// Search text; ignored for flag fields.
    pub search: String,
}

impl NewCondition {
    /// Create a condition.
    pub fn new(field: FilterField, mode: MatchMode, search: impl Into<String>) -> Self {
        Self {
            field,
            mode,
            search: search.into(),
        }
    }

    /// Create a flag condition.
    pub fn flag(field: FilterField) -> Self {
        Self::new(field, MatchMode::Exact, FilterField::FLAG_SEARCH)
    }
}

/// Data for creating or replacing a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFilter {
    /// What a match does.
    pub action: FilterAction,
    /// Rejection text or ban message.
    pub match_detail: String,
    /// Creating staff member.
    pub staff_id: Option<i64>,
    /// Staff-only note.
    pub staff_note: String,
    /// Conditions, all of which must match.
    pub conditions: Vec<NewCondition>,
    /// Boards; empty means every board.
    pub board_ids: Vec<i64>,
}

impl NewFilter {
    /// Create a global filter without conditions.
    pub fn new(action: FilterAction) -> Self {
        Self {
            action,
            match_detail: String::new(),
            staff_id: None,
            staff_note: String::new(),
            conditions: Vec::new(),
            board_ids: Vec::new(),
        }
    }

    /// Set the rejection text or ban message.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.match_detail = detail.into();
        self
    }

    /// Attribute the filter to a staff member.
    pub fn with_staff(mut self, staff_id: i64) -> Self {
        self.staff_id = Some(staff_id);
        self
    }

    /// Set the staff-only note.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.staff_note = note.into();
        self
    }

    /// Add a condition.
    pub fn with_condition(mut self, condition: NewCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Restrict the filter to a board. May be called repeatedly.
    pub fn with_board(mut self, board_id: i64) -> Self {
        self.board_ids.push(board_id);
        self
    }
}

impl NewFilter {
    /// Compile every condition, failing on the first invalid one.
    pub fn compile_conditions(&self) -> crate::Result<Vec<FilterCondition>> {
        self.conditions
            .iter()
            .map(|c| FilterCondition::compile(c.field, c.mode, &c.search))
            .collect()
    }

    pub(crate) fn to_draft(&self, conditions: &[FilterCondition]) -> FilterDraft {
        FilterDraft {
            match_action: self.action.as_str().to_string(),
            match_detail: self.match_detail.clone(),
            staff_id: self.staff_id,
            staff_note: self.staff_note.clone(),
            conditions: conditions.iter().map(ConditionRecord::from).collect(),
            board_ids: self.board_ids.clone(),
        }
    }
}

impl From<&FilterCondition> for ConditionRecord {
    fn from(condition: &FilterCondition) -> Self {
        ConditionRecord {
            field: condition.field().as_str().to_string(),
            match_mode: condition.mode().as_str().to_string(),
            search: condition.search().to_string(),
        }
    }
}

/// A recorded filter match.
#[derive(Debug, Clone)]
pub struct FilterHit {
    /// Unique hit ID.
    pub id: i64,
    /// Filter that matched.
    pub filter_id: i64,
    /// Snapshot of the post and upload.
    pub post_data: serde_json::Value,
    /// When the match happened.
    pub match_time: DateTime<Utc>,
}
