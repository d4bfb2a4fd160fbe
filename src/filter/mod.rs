//! Filter module for chanwarden.
//!
//! Staff-defined post filters:
//! - Reject, ban and log filters made of AND-ed field conditions
//! - Wordfilters that rewrite the post body
//! - Hit recording and the staff form that creates filters
//!
//! Conditions are compiled when a filter is created or loaded, so matching a
//! post never fails once the filters are in memory.

mod condition;
mod engine;
mod form;
mod history;
mod repository;
mod types;
mod wordfilter;

pub use condition::FilterCondition;
pub use engine::{FilterEngine, HIT_LIST_LIMIT};
pub use form::FilterForm;
pub use history::{PostHistory, SqlitePostHistory};
pub use repository::{ConditionRecord, FilterDraft, FilterRecord, FilterRepository};
pub use types::{
    ActiveSelector, Filter, FilterAction, FilterField, FilterHit, FilterInput, MatchMode,
    NewCondition, NewFilter, PosterHistory,
};
pub use wordfilter::{NewWordfilter, Wordfilter};
