//! chanwarden - post admission filter and ban engine for imageboards.
//!
//! Decides whether a submitted post is accepted, rejected, or gets its
//! poster banned, from staff-maintained IP range bans, string bans,
//! perceptual image fingerprints and post filters.

pub mod admission;
pub mod ban;
pub mod config;
pub mod context;
pub mod datetime;
pub mod db;
pub mod error;
pub mod filter;
pub mod fingerprint;
pub mod ip_range;
pub mod logging;
pub mod post;

pub use admission::{AdmissionPipeline, BanCause, BanIssued, Outcome, RejectReason, Rejection};
pub use ban::{
    BanAppeal, BanExpiry, BanKind, BanRegistry, IpBan, NewIpBan, NewStringBan, StringBan,
    StringBanKind,
};
pub use config::Config;
pub use context::QueryContext;
pub use db::Database;
pub use error::{ErrorKind, Result, WardenError};
pub use filter::{
    ActiveSelector, Filter, FilterAction, FilterEngine, FilterField, FilterForm, FilterInput,
    MatchMode, NewCondition, NewFilter, NewWordfilter, PostHistory, SqlitePostHistory,
    Wordfilter,
};
pub use fingerprint::{compute_fingerprint, FileBan, FingerprintEngine, NewFileBan};
pub use ip_range::{get_ip_range_subnet, normalize_ip, parse_ip_range, IpRange, Subnet};
pub use post::{Post, Upload};
