//! Ban module for chanwarden.
//!
//! This module stores and queries bans:
//! - IP range bans (global or per board, optionally reply-only)
//! - Username, filename and checksum bans (literal or regex)
//! - Appeals against IP bans and the IP ban audit trail
//!
//! Bans are never hard deleted; deactivation records who lifted the ban.

mod appeal;
mod registry;
mod repository;
mod types;

pub use appeal::AppealRepository;
pub use registry::{BanRegistry, MAX_APPEAL_LENGTH};
pub use repository::{IpBanRepository, StringBanRepository};
pub(crate) use repository::deactivate_in_table;
pub use types::{
    AppealStatus, BanAppeal, BanExpiry, BanKind, BanPattern, IpBan, IpBanAudit, NewIpBan,
    NewStringBan, StringBan, StringBanKind,
};
