//! Perceptual fingerprinting of uploaded images.
//!
//! Uploads are reduced to an average hash and compared exactly against
//! staff-issued fingerprint bans, which catches re-encoded and rescaled
//! copies of a banned image that a checksum would miss.

mod engine;
mod hash;
mod repository;
mod types;

pub use engine::FingerprintEngine;
pub use hash::{compute_fingerprint, compute_fingerprint_bytes};
pub use repository::FileBanRepository;
pub use types::{FileBan, NewFileBan, AHASH};
