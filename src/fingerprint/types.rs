//! Fingerprint ban models.

use chrono::{DateTime, Utc};

/// Tag stored with average-hash bans.
pub const AHASH: &str = "ahash";

/// A ban on a perceptual fingerprint.
#[derive(Debug, Clone)]
pub struct FileBan {
    /// Unique ban ID.
    pub id: i64,
    /// Hex fingerprint.
    pub fingerprint: String,
    /// Algorithm that produced the fingerprint.
    pub fingerprinter: String,
    /// Board scope, `None` for global.
    pub board_id: Option<i64>,
    /// Issuing staff member.
    pub staff_id: Option<i64>,
    /// Staff-only note.
    pub staff_note: String,
    /// When the ban was issued.
    pub issued_at: DateTime<Utc>,
    /// Also ban the uploader's address.
    pub ban_ip: bool,
    /// Message for the IP ban issued when `ban_ip` is set.
    pub ban_ip_message: Option<String>,
    /// Whether the ban is active.
    pub is_active: bool,
}

/// Data for creating a fingerprint ban.
#[derive(Debug, Clone)]
pub struct NewFileBan {
    /// Hex fingerprint.
    pub fingerprint: String,
    /// Board scope, `None` for global.
    pub board_id: Option<i64>,
    /// Issuing staff member.
    pub staff_id: Option<i64>,
    /// Staff-only note.
    pub staff_note: String,
    /// Also ban the uploader's address.
    pub ban_ip: bool,
    /// Message for the resulting IP ban.
    pub ban_ip_message: Option<String>,
}

impl NewFileBan {
    /// Create a global ban on a fingerprint.
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            board_id: None,
            staff_id: None,
            staff_note: String::new(),
            ban_ip: false,
            ban_ip_message: None,
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

    /// Set the staff-only note.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.staff_note = note.into();
        self
    }

    /// Ban the uploader's address too, with the given message.
    pub fn ban_ip(mut self, message: impl Into<String>) -> Self {
        self.ban_ip = true;
        self.ban_ip_message = Some(message.into());
        self
    }
}
