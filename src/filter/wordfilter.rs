//! Wordfilters: body rewrites applied before filter evaluation.

use chrono::{DateTime, Utc};

use super::condition::FilterCondition;
use super::repository::{ConditionRecord, FilterDraft, FilterRecord};
use super::types::{FilterAction, FilterField, MatchMode};
use crate::{Result, WardenError};

/// A replacement rule on the post body.
#[derive(Debug, Clone)]
pub struct Wordfilter {
    /// Unique filter ID.
    pub id: i64,
    /// Creating staff member.
    pub staff_id: Option<i64>,
    /// Staff-only note.
    pub staff_note: String,
    /// When the wordfilter was created.
    pub issued_at: DateTime<Utc>,
    /// Replacement text. `$n` refers to capture groups of regex wordfilters.
    pub replacement: String,
    /// Whether the wordfilter is enabled.
    pub is_active: bool,
    /// Boards the wordfilter applies to; empty means every board.
    pub board_ids: Vec<i64>,
    condition: FilterCondition,
}

impl Wordfilter {
    /// Literal text or regex source being replaced.
    pub fn search(&self) -> &str {
        self.condition.search()
    }

    /// Whether the search is a regex.
    pub fn is_regex(&self) -> bool {
        self.condition.regex().is_some()
    }

    /// Rewrite `text`.
    ///
    /// Text without an occurrence of the search comes back unchanged.
    pub fn apply(&self, text: &str) -> String {
        match self.condition.regex() {
            Some(re) => re.replace_all(text, self.replacement.as_str()).into_owned(),
            None => text.replace(self.condition.search(), &self.replacement),
        }
    }
}

impl TryFrom<FilterRecord> for Wordfilter {
    type Error = WardenError;

    fn try_from(record: FilterRecord) -> Result<Self> {
        if record.match_action != FilterAction::REPLACE {
            return Err(WardenError::Validation(format!(
                "filter {} is not a wordfilter",
                record.id
            )));
        }
        let [stored] = record.conditions.as_slice() else {
            return Err(WardenError::Validation(format!(
                "wordfilter {} must have exactly one condition, found {}",
                record.id,
                record.conditions.len()
            )));
        };
        let condition =
            FilterCondition::from_stored(&stored.field, &stored.match_mode, &stored.search)?;
        if condition.field() != FilterField::Body {
            return Err(WardenError::Validation(format!(
                "wordfilter {} does not target the body",
                record.id
            )));
        }

        Ok(Wordfilter {
            id: record.id,
            staff_id: record.staff_id,
            staff_note: record.staff_note,
            issued_at: record.issued_at,
            replacement: record.match_detail,
            is_active: record.is_active,
            board_ids: record.board_ids,
            condition,
        })
    }
}

/// Data for creating a wordfilter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWordfilter {
    /// Literal text or regex source.
    pub search: String,
    /// Replacement text.
    pub replacement: String,
    /// Whether `search` is a regex.
    pub is_regex: bool,
    /// Creating staff member.
    pub staff_id: Option<i64>,
    /// Staff-only note.
    pub staff_note: String,
    /// Boards; empty means every board.
    pub board_ids: Vec<i64>,
}

impl NewWordfilter {
    /// Create a literal wordfilter on every board.
    pub fn new(search: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            search: search.into(),
            replacement: replacement.into(),
            is_regex: false,
            staff_id: None,
            staff_note: String::new(),
            board_ids: Vec::new(),
        }
    }

    /// Treat the search as a regex.
    pub fn regex(mut self) -> Self {
        self.is_regex = true;
        self
    }

    /// Attribute the wordfilter to a staff member.
    pub fn with_staff(mut self, staff_id: i64) -> Self {
        self.staff_id = Some(staff_id);
        self
    }

    /// Set the staff-only note.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.staff_note = note.into();
        self
    }

    /// Restrict the wordfilter to a board. May be called repeatedly.
    pub fn with_board(mut self, board_id: i64) -> Self {
        self.board_ids.push(board_id);
        self
    }

    pub(crate) fn to_draft(&self) -> Result<FilterDraft> {
        let condition = FilterCondition::compile(
            FilterField::Body,
            MatchMode::from_is_regex(self.is_regex),
            &self.search,
        )?;
        Ok(FilterDraft {
            match_action: FilterAction::REPLACE.to_string(),
            match_detail: self.replacement.clone(),
            staff_id: self.staff_id,
            staff_note: self.staff_note.clone(),
            conditions: vec![ConditionRecord::from(&condition)],
            board_ids: self.board_ids.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(action: &str, conditions: Vec<(&str, &str, &str)>, detail: &str) -> FilterRecord {
        FilterRecord {
            id: 7,
            staff_id: None,
            staff_note: String::new(),
            issued_at: Utc::now(),
            match_action: action.to_string(),
            match_detail: detail.to_string(),
            is_active: true,
            conditions: conditions
                .into_iter()
                .map(|(field, mode, search)| ConditionRecord {
                    field: field.to_string(),
                    match_mode: mode.to_string(),
                    search: search.to_string(),
                })
                .collect(),
            board_ids: vec![],
        }
    }

    #[test]
    fn test_literal_replace() {
        let wf = Wordfilter::try_from(record(
            "replace",
            vec![("body", "substr", "darn")],
            "d*rn",
        ))
        .unwrap();
        assert!(!wf.is_regex());
        assert_eq!(wf.apply("darn it, darn"), "d*rn it, d*rn");
    }

    #[test]
    fn test_literal_absent_is_identity() {
        let wf = Wordfilter::try_from(record("replace", vec![("body", "substr", "xyz")], "abc"))
            .unwrap();
        let text = "nothing to see here ☃";
        assert_eq!(wf.apply(text), text);
    }

    #[test]
    fn test_literal_is_not_a_pattern() {
        let wf = Wordfilter::try_from(record("replace", vec![("body", "substr", "a.c")], "X"))
            .unwrap();
        assert_eq!(wf.apply("abc a.c"), "abc X");
    }

    #[test]
    fn test_regex_group_expansion() {
        let wf = Wordfilter::try_from(record(
            "replace",
            vec![("body", "regex", r"(\w+)@(\w+)\.com")],
            "$2 at $1",
        ))
        .unwrap();
        assert!(wf.is_regex());
        assert_eq!(wf.apply("mail bob@example.com now"), "mail example at bob now");
    }

    #[test]
    fn test_record_validation() {
        assert!(Wordfilter::try_from(record("reject", vec![("body", "substr", "a")], "")).is_err());
        assert!(Wordfilter::try_from(record(
            "replace",
            vec![("body", "substr", "a"), ("body", "substr", "b")],
            ""
        ))
        .is_err());
        assert!(Wordfilter::try_from(record("replace", vec![], "")).is_err());
        assert!(Wordfilter::try_from(record("replace", vec![("name", "substr", "a")], "")).is_err());
        assert!(matches!(
            Wordfilter::try_from(record("replace", vec![("body", "regex", "(")], "")),
            Err(WardenError::Pattern(_))
        ));
    }

    #[test]
    fn test_new_wordfilter_draft() {
        let draft = NewWordfilter::new("foo", "bar").regex().with_board(3).to_draft().unwrap();
        assert_eq!(draft.match_action, "replace");
        assert_eq!(draft.match_detail, "bar");
        assert_eq!(draft.conditions[0].match_mode, "regex");
        assert_eq!(draft.conditions[0].field, "body");
        assert_eq!(draft.board_ids, vec![3]);

        assert!(NewWordfilter::new("", "bar").to_draft().is_err());
    }
}
