//! Post admission.
//!
//! The pipeline checks, in order: IP bans, name and tripcode bans, filename
//! bans, checksum bans and fingerprint bans. It then applies wordfilters to
//! the body and evaluates the reject/ban/log filters. The first check that
//! refuses the post ends evaluation.

mod outcome;
mod pipeline;

pub use outcome::{BanCause, BanIssued, Outcome, RejectReason, Rejection};
pub use pipeline::AdmissionPipeline;
