//! Staff filter form parsing.

use std::collections::{BTreeMap, HashMap};

use super::types::{FilterAction, FilterField, MatchMode, NewCondition, NewFilter};
use crate::{Result, WardenError};

const FIELD_PREFIX: &str = "field";
const BOARD_PREFIX: &str = "applyboard";

/// Submitted fields of the staff filter form.
///
/// Conditions arrive as numbered groups: `field<n>` names the post field,
/// `matchmode<n>` (or the older checkbox `isregex<n>`) the comparison and
/// `search<n>` the text. Boards are checkboxes named `applyboard<id>`.
pub struct FilterForm<'a> {
    fields: &'a HashMap<String, String>,
}

impl<'a> FilterForm<'a> {
    /// Wrap submitted form fields.
    pub fn new(fields: &'a HashMap<String, String>) -> Self {
        Self { fields }
    }

    /// Parse the form into a validated filter.
    pub fn parse(fields: &HashMap<String, String>) -> Result<NewFilter> {
        FilterForm::new(fields).into_filter()
    }

    fn value(&self, key: &str) -> &'a str {
        self.fields.get(key).map(String::as_str).unwrap_or("")
    }

    fn into_filter(self) -> Result<NewFilter> {
        let action: FilterAction = self.value("action").trim().parse()?;
        let mut filter = NewFilter::new(action)
            .with_detail(self.value("detail"))
            .with_note(self.value("note"));

        // ordered by condition number so reloading the form is stable
        let mut conditions: BTreeMap<u32, NewCondition> = BTreeMap::new();
        let mut boards: Vec<i64> = Vec::new();

        for (key, value) in self.fields {
            if let Some(board) = key.strip_prefix(BOARD_PREFIX) {
                if value != "on" {
                    continue;
                }
                let board_id: i64 = board.parse().map_err(|_| {
                    WardenError::Validation(format!("unable to parse board ID {board:?}"))
                })?;
                boards.push(board_id);
            } else if let Some(number) = key.strip_prefix(FIELD_PREFIX) {
                let n: u32 = number.parse().map_err(|_| {
                    WardenError::Validation(format!("failed to get field data for {key:?}"))
                })?;
                conditions.insert(n, self.condition(number, value)?);
            }
        }

        if conditions.is_empty() {
            return Err(WardenError::Validation(
                "filter must have at least one condition".to_string(),
            ));
        }
        boards.sort_unstable();
        boards.dedup();

        for condition in conditions.into_values() {
            filter = filter.with_condition(condition);
        }
        for board_id in boards {
            filter = filter.with_board(board_id);
        }
        Ok(filter)
    }

    fn condition(&self, number: &str, field: &str) -> Result<NewCondition> {
        let field: FilterField = field.parse()?;
        if field.is_flag() {
            return Ok(NewCondition::flag(field));
        }

        let mode = match self.fields.get(&format!("matchmode{number}")) {
            Some(mode) => mode.parse()?,
            None => MatchMode::from_is_regex(self.value(&format!("isregex{number}")) == "on"),
        };
        let search = self.value(&format!("search{number}"));
        if search.is_empty() {
            return Err(WardenError::Validation(format!(
                "condition {number} on {field} has no search text"
            )));
        }
        Ok(NewCondition::new(field, mode, search))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_full_form() {
        let fields = form(&[
            ("action", "reject"),
            ("detail", "no spam"),
            ("note", "seen on /b/"),
            ("field2", "isop"),
            ("search2", "ignored"),
            ("field1", "body"),
            ("matchmode1", "substrci"),
            ("search1", "casino"),
            ("applyboard3", "on"),
            ("applyboard1", "on"),
            ("applyboard9", ""),
        ]);
        let filter = FilterForm::parse(&fields).unwrap();

        assert_eq!(filter.action, FilterAction::Reject);
        assert_eq!(filter.match_detail, "no spam");
        assert_eq!(filter.staff_note, "seen on /b/");
        assert_eq!(
            filter.conditions,
            vec![
                NewCondition::new(FilterField::Body, MatchMode::SubstrCaseInsensitive, "casino"),
                NewCondition::flag(FilterField::IsOp),
            ]
        );
        assert_eq!(filter.conditions[1].search, "1");
        assert_eq!(filter.board_ids, vec![1, 3]);
    }

    #[test]
    fn test_legacy_isregex() {
        let fields = form(&[
            ("action", "log"),
            ("field0", "name"),
            ("isregex0", "on"),
            ("search0", "^spam"),
            ("field1", "email"),
            ("search1", "sage"),
        ]);
        let filter = FilterForm::parse(&fields).unwrap();
        assert_eq!(filter.conditions[0].mode, MatchMode::Regex);
        assert_eq!(filter.conditions[1].mode, MatchMode::Substr);
        assert!(filter.board_ids.is_empty());
    }

    #[test]
    fn test_rejects_bad_input() {
        let no_conditions = form(&[("action", "reject")]);
        assert!(matches!(
            FilterForm::parse(&no_conditions),
            Err(WardenError::Validation(_))
        ));

        let bad_action = form(&[("action", "explode"), ("field0", "isop")]);
        assert!(matches!(
            FilterForm::parse(&bad_action),
            Err(WardenError::InvalidMatchAction(_))
        ));

        let bad_field = form(&[("action", "ban"), ("field0", "colour"), ("search0", "x")]);
        assert!(matches!(
            FilterForm::parse(&bad_field),
            Err(WardenError::InvalidConditionField(_))
        ));

        let bad_mode = form(&[
            ("action", "ban"),
            ("field0", "body"),
            ("matchmode0", "glob"),
            ("search0", "x"),
        ]);
        assert!(matches!(
            FilterForm::parse(&bad_mode),
            Err(WardenError::InvalidStringMatchMode(_))
        ));

        let bad_number = form(&[("action", "ban"), ("fieldx", "isop")]);
        assert!(matches!(
            FilterForm::parse(&bad_number),
            Err(WardenError::Validation(_))
        ));

        let bad_board = form(&[("action", "ban"), ("field0", "isop"), ("applyboardb", "on")]);
        assert!(matches!(
            FilterForm::parse(&bad_board),
            Err(WardenError::Validation(_))
        ));

        let empty_search = form(&[("action", "ban"), ("field0", "subject")]);
        assert!(matches!(
            FilterForm::parse(&empty_search),
            Err(WardenError::Validation(_))
        ));
    }
}
