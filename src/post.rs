//! Incoming post and upload.
//!
//! These are produced by the request handler after it has parsed the form;
//! the admission pipeline only reads them, apart from the body which
//! wordfilters may rewrite.

use std::net::IpAddr;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::ip_range::normalize_ip;

/// A candidate post.
#[derive(Debug, Clone, Serialize)]
pub struct Post {
    /// Poster address, normalized on construction.
    pub ip: IpAddr,
    /// Display name.
    pub name: String,
    /// Tripcode computed from the name field, if any.
    pub tripcode: String,
    /// Email field.
    pub email: String,
    /// Subject line.
    pub subject: String,
    /// Body as submitted.
    pub message_raw: String,
    /// Target board.
    pub board_id: i64,
    /// Thread being replied to, `None` for a new thread.
    pub thread_id: Option<i64>,
    /// Client user agent.
    pub user_agent: String,
}

impl Post {
    /// Create a new-thread post with empty fields.
    pub fn new(ip: IpAddr, board_id: i64) -> Self {
        Self {
            ip: normalize_ip(ip),
            name: String::new(),
            tripcode: String::new(),
            email: String::new(),
            subject: String::new(),
            message_raw: String::new(),
            board_id,
            thread_id: None,
            user_agent: String::new(),
        }
    }

    /// Set the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the tripcode.
    pub fn with_tripcode(mut self, tripcode: impl Into<String>) -> Self {
        self.tripcode = tripcode.into();
        self
    }

    /// Set the email field.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    /// Set the subject.
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Set the body.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message_raw = message.into();
        self
    }

    /// Make the post a reply.
    pub fn in_thread(mut self, thread_id: i64) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    /// Set the user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Whether the post starts a new thread.
    pub fn is_top_post(&self) -> bool {
        self.thread_id.is_none()
    }
}

/// A file attached to a post.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Filename as sent by the client.
    pub original_filename: String,
    /// Lowercase hex SHA-256 of `data`.
    pub checksum: String,
    /// Image width in pixels, 0 if unknown.
    pub width: u32,
    /// Image height in pixels, 0 if unknown.
    pub height: u32,
    /// File contents.
    pub data: Vec<u8>,
    /// Encoded thumbnail frame for video uploads.
    pub thumbnail: Option<Vec<u8>>,
}

impl Upload {
    /// Create an upload, computing its checksum.
    pub fn new(original_filename: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            original_filename: original_filename.into(),
            checksum: file_checksum(&data),
            width: 0,
            height: 0,
            data,
            thumbnail: None,
        }
    }

    /// Set the image dimensions.
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Attach a video thumbnail frame.
    pub fn with_thumbnail(mut self, thumbnail: Vec<u8>) -> Self {
        self.thumbnail = Some(thumbnail);
        self
    }

    /// Lowercased extension of the original filename, without the dot.
    pub fn extension(&self) -> Option<String> {
        file_extension(&self.original_filename)
    }
}

/// Lowercase hex SHA-256 of file contents.
pub fn file_checksum(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Lowercased extension of a filename, without the dot.
pub fn file_extension(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_builder() {
        let ip: IpAddr = "::ffff:203.0.113.5".parse().unwrap();
        let post = Post::new(ip, 3)
            .with_name("Anon")
            .with_message("hello")
            .in_thread(10);

        assert_eq!(post.ip.to_string(), "203.0.113.5");
        assert_eq!(post.name, "Anon");
        assert!(!post.is_top_post());
    }

    #[test]
    fn test_upload_checksum() {
        let upload = Upload::new("a.txt", b"abc".to_vec());
        assert_eq!(
            upload.checksum,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_extension() {
        assert_eq!(file_extension("Photo.JPG").as_deref(), Some("jpg"));
        assert_eq!(file_extension("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(file_extension("noext"), None);
        assert_eq!(Upload::new("clip.WebM", vec![]).extension().as_deref(), Some("webm"));
    }
}
