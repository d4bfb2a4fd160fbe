//! Compiled filter conditions.

use regex::Regex;

use super::types::{FilterField, FilterInput, MatchMode};
use crate::{Result, WardenError};

#[derive(Debug, Clone)]
enum Matcher {
    Flag,
    Exact(String),
    Substr(String),
    /// Needle is stored lowercased.
    SubstrCaseInsensitive(String),
    Regex(Regex),
}

impl Matcher {
    fn is_match(&self, value: &str) -> bool {
        match self {
            Matcher::Flag => false,
            Matcher::Exact(search) => value == search,
            Matcher::Substr(search) => value.contains(search.as_str()),
            Matcher::SubstrCaseInsensitive(search) => {
                value.to_lowercase().contains(search.as_str())
            }
            Matcher::Regex(re) => re.is_match(value),
        }
    }
}

/// One condition of a filter, ready to evaluate.
#[derive(Debug, Clone)]
pub struct FilterCondition {
    field: FilterField,
    mode: MatchMode,
    search: String,
    matcher: Matcher,
}

impl FilterCondition {
    /// Compile a condition.
    ///
    /// Flag fields store the sentinel search `"1"`. String fields need a
    /// non-empty search, and regexes are compiled here so that evaluation
    /// cannot fail.
    pub fn compile(field: FilterField, mode: MatchMode, search: &str) -> Result<Self> {
        if field.is_flag() {
            return Ok(Self {
                field,
                mode,
                search: FilterField::FLAG_SEARCH.to_string(),
                matcher: Matcher::Flag,
            });
        }
        if search.is_empty() {
            return Err(WardenError::Validation(format!(
                "condition on {field} has an empty search"
            )));
        }

        let matcher = if field.is_exact_only() {
            Matcher::Exact(search.to_string())
        } else {
            match mode {
                MatchMode::Exact => Matcher::Exact(search.to_string()),
                MatchMode::Substr => Matcher::Substr(search.to_string()),
                MatchMode::SubstrCaseInsensitive => {
                    Matcher::SubstrCaseInsensitive(search.to_lowercase())
                }
                MatchMode::Regex => Matcher::Regex(Regex::new(search)?),
            }
        };

        Ok(Self {
            field,
            mode,
            search: search.to_string(),
            matcher,
        })
    }

    /// Compile a condition from stored strings.
    pub fn from_stored(field: &str, mode: &str, search: &str) -> Result<Self> {
        Self::compile(field.parse()?, mode.parse()?, search)
    }

    /// Inspected field.
    pub fn field(&self) -> FilterField {
        self.field
    }

    /// Comparison mode as configured.
    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Search text as configured.
    pub fn search(&self) -> &str {
        &self.search
    }

    pub(crate) fn regex(&self) -> Option<&Regex> {
        match &self.matcher {
            Matcher::Regex(re) => Some(re),
            _ => None,
        }
    }

    /// Whether the condition holds for `input`.
    ///
    /// A string field with nothing to inspect, such as the filename of a
    /// post without an upload, never matches.
    pub fn matches(&self, input: &FilterInput<'_>) -> bool {
        let post = input.post;
        let value = match self.field {
            FilterField::IsOp => return post.is_top_post(),
            FilterField::NotOp => return !post.is_top_post(),
            FilterField::HasFile => return input.upload.is_some(),
            FilterField::NoFile => return input.upload.is_none(),
            FilterField::FirstTimeBoard => {
                return input.history.is_some_and(|h| h.first_on_board)
            }
            FilterField::NotFirstTimeBoard => {
                return input.history.is_some_and(|h| !h.first_on_board)
            }
            FilterField::FirstTimeSite => return input.history.is_some_and(|h| h.first_on_site),
            FilterField::NotFirstTimeSite => {
                return input.history.is_some_and(|h| !h.first_on_site)
            }
            FilterField::Name => Some(post.name.as_str()),
            FilterField::Trip => Some(post.tripcode.as_str()),
            FilterField::Email => Some(post.email.as_str()),
            FilterField::Subject => Some(post.subject.as_str()),
            FilterField::Body => Some(post.message_raw.as_str()),
            FilterField::UserAgent => Some(post.user_agent.as_str()),
            FilterField::Filename => input.upload.map(|u| u.original_filename.as_str()),
            FilterField::Checksum => input.upload.map(|u| u.checksum.as_str()),
            FilterField::Ahash => input.fingerprint,
        };

        value.is_some_and(|v| self.matcher.is_match(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::types::PosterHistory;
    use crate::post::{Post, Upload};
    use std::net::{IpAddr, Ipv4Addr};

    fn post() -> Post {
        Post::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 1)
            .with_name("Anon")
            .with_tripcode("!Tr1p")
            .with_message("Buy CHEAP pills now")
    }

    #[test]
    fn test_substr_modes() {
        let post = post();
        let input = FilterInput::new(&post);

        let cs = FilterCondition::compile(FilterField::Body, MatchMode::Substr, "cheap").unwrap();
        assert!(!cs.matches(&input));

        let ci = FilterCondition::compile(
            FilterField::Body,
            MatchMode::SubstrCaseInsensitive,
            "cheap",
        )
        .unwrap();
        assert!(ci.matches(&input));

        let upper =
            FilterCondition::compile(FilterField::Body, MatchMode::SubstrCaseInsensitive, "PILLS")
                .unwrap();
        assert!(upper.matches(&input));
    }

    #[test]
    fn test_exact_and_regex() {
        let post = post();
        let input = FilterInput::new(&post);

        let exact = FilterCondition::compile(FilterField::Name, MatchMode::Exact, "Anon").unwrap();
        assert!(exact.matches(&input));
        let partial = FilterCondition::compile(FilterField::Name, MatchMode::Exact, "Ano").unwrap();
        assert!(!partial.matches(&input));

        let re = FilterCondition::compile(FilterField::Body, MatchMode::Regex, r"(?i)buy\s+cheap")
            .unwrap();
        assert!(re.matches(&input));
        assert!(re.regex().is_some());
    }

    #[test]
    fn test_trip_uses_tripcode() {
        let post = post();
        let input = FilterInput::new(&post);
        let trip = FilterCondition::compile(FilterField::Trip, MatchMode::Exact, "!Tr1p").unwrap();
        assert!(trip.matches(&input));
        let name_as_trip =
            FilterCondition::compile(FilterField::Trip, MatchMode::Exact, "Anon").unwrap();
        assert!(!name_as_trip.matches(&input));
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let result = FilterCondition::compile(FilterField::Body, MatchMode::Regex, "(unclosed");
        assert!(matches!(result, Err(WardenError::Pattern(_))));
    }

    #[test]
    fn test_empty_search_rejected() {
        let result = FilterCondition::compile(FilterField::Subject, MatchMode::Substr, "");
        assert!(matches!(result, Err(WardenError::Validation(_))));
    }

    #[test]
    fn test_flag_search_forced() {
        let cond = FilterCondition::compile(FilterField::IsOp, MatchMode::Regex, "(").unwrap();
        assert_eq!(cond.search(), "1");
        let post = post();
        assert!(cond.matches(&FilterInput::new(&post)));
        let reply = post.clone().in_thread(5);
        assert!(!cond.matches(&FilterInput::new(&reply)));
    }

    #[test]
    fn test_upload_fields_absent_never_match() {
        let post = post();
        let input = FilterInput::new(&post);
        let name = FilterCondition::compile(FilterField::Filename, MatchMode::Regex, ".*").unwrap();
        assert!(!name.matches(&input));
        let nofile = FilterCondition::compile(FilterField::NoFile, MatchMode::Exact, "").unwrap();
        assert!(nofile.matches(&input));

        let upload = Upload::new("cat.png", b"meow".to_vec());
        let with_file = input.with_upload(Some(&upload));
        assert!(name.matches(&with_file));
        assert!(!nofile.matches(&with_file));
    }

    #[test]
    fn test_checksum_ignores_mode() {
        let post = post();
        let upload = Upload::new("cat.png", b"meow".to_vec());
        let input = FilterInput::new(&post).with_upload(Some(&upload));

        let prefix = &upload.checksum[..8];
        let substr =
            FilterCondition::compile(FilterField::Checksum, MatchMode::Substr, prefix).unwrap();
        assert!(!substr.matches(&input));

        let full =
            FilterCondition::compile(FilterField::Checksum, MatchMode::Regex, &upload.checksum)
                .unwrap();
        assert!(full.matches(&input));
    }

    #[test]
    fn test_ahash_needs_fingerprint() {
        let post = post();
        let cond = FilterCondition::compile(FilterField::Ahash, MatchMode::Exact, "ff00").unwrap();
        assert!(!cond.matches(&FilterInput::new(&post)));
        assert!(cond.matches(&FilterInput::new(&post).with_fingerprint(Some("ff00"))));
    }

    #[test]
    fn test_history_flags() {
        let post = post();
        let first = FilterCondition::compile(FilterField::FirstTimeBoard, MatchMode::Exact, "1")
            .unwrap();
        let not_first_site =
            FilterCondition::compile(FilterField::NotFirstTimeSite, MatchMode::Exact, "1").unwrap();

        // unresolved history never matches
        assert!(!first.matches(&FilterInput::new(&post)));
        assert!(!not_first_site.matches(&FilterInput::new(&post)));

        let input = FilterInput::new(&post).with_history(PosterHistory {
            first_on_board: true,
            first_on_site: false,
        });
        assert!(first.matches(&input));
        assert!(not_first_site.matches(&input));
    }

    #[test]
    fn test_from_stored_errors() {
        assert!(matches!(
            FilterCondition::from_stored("colour", "exact", "x"),
            Err(WardenError::InvalidConditionField(_))
        ));
        assert!(matches!(
            FilterCondition::from_stored("body", "fuzzy", "x"),
            Err(WardenError::InvalidStringMatchMode(_))
        ));
    }
}
