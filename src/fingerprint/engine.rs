//! Fingerprint engine.

use image::DynamicImage;
use tracing::{debug, info};

use super::hash::{compute_fingerprint, compute_fingerprint_bytes};
use super::repository::FileBanRepository;
use super::types::{FileBan, NewFileBan, AHASH};
use crate::config::FingerprintConfig;
use crate::context::QueryContext;
use crate::db::Database;
use crate::post::{file_extension, Upload};
use crate::{Result, WardenError};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "tif", "tiff", "bmp", "webp"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm"];

/// Computes upload fingerprints and matches them against fingerprint bans.
pub struct FingerprintEngine<'a> {
    db: &'a Database,
    hash_length: u32,
    video_thumbnails: bool,
}

impl<'a> FingerprintEngine<'a> {
    /// Create an engine with the configured hash length and video handling.
    pub fn new(db: &'a Database, config: &FingerprintConfig) -> Self {
        Self {
            db,
            hash_length: config.hash_length,
            video_thumbnails: config.video_thumbnails,
        }
    }

    /// Hash length in use.
    pub fn hash_length(&self) -> u32 {
        self.hash_length
    }

    /// Fingerprint a decoded image.
    pub fn compute_fingerprint(&self, img: &DynamicImage) -> String {
        compute_fingerprint(img, self.hash_length)
    }

    /// Decode and fingerprint an encoded image.
    pub fn compute_fingerprint_bytes(&self, data: &[u8]) -> Result<String> {
        compute_fingerprint_bytes(data, self.hash_length)
    }

    /// Whether a file with this name can be fingerprinted.
    ///
    /// Videos qualify only when thumbnail fingerprinting is enabled.
    pub fn is_compatible(&self, filename: &str) -> bool {
        match file_extension(filename) {
            Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => true,
            Some(ext) if VIDEO_EXTENSIONS.contains(&ext.as_str()) => self.video_thumbnails,
            _ => false,
        }
    }

    /// Fingerprint an upload.
    ///
    /// Returns `None` for incompatible files. Videos are hashed through their
    /// thumbnail frame, which must be present. Decoding runs on the blocking
    /// pool and is bounded by the context's deadline and cancellation token.
    pub async fn fingerprint_upload(
        &self,
        ctx: &QueryContext,
        upload: &Upload,
    ) -> Result<Option<String>> {
        if !self.is_compatible(&upload.original_filename) {
            return Ok(None);
        }

        let is_video = upload
            .extension()
            .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()));
        let source = if is_video {
            upload.thumbnail.clone().ok_or_else(|| {
                WardenError::Validation(format!(
                    "video upload {:?} has no thumbnail to fingerprint",
                    upload.original_filename
                ))
            })?
        } else {
            upload.data.clone()
        };

        self.fingerprint_blocking(ctx, source).await.map(Some)
    }

    /// Decode and hash `data` on the blocking pool under `ctx`.
    async fn fingerprint_blocking(&self, ctx: &QueryContext, data: Vec<u8>) -> Result<String> {
        let hash_length = self.hash_length;
        let task =
            tokio::task::spawn_blocking(move || compute_fingerprint_bytes(&data, hash_length));
        ctx.run(async move { task.await.map_err(|e| WardenError::Task(e.to_string()))? })
            .await
    }

    /// Find an active fingerprint ban for `fingerprint` on `board_id`.
    pub async fn match_fingerprint(
        &self,
        ctx: &QueryContext,
        fingerprint: &str,
        board_id: i64,
    ) -> Result<Option<FileBan>> {
        let repo = FileBanRepository::new(self.db.pool());
        let found = ctx
            .run(repo.find_matching(AHASH, fingerprint, board_id))
            .await?;
        if let Some(ban) = &found {
            debug!(ban_id = ban.id, board_id, "fingerprint ban matched");
        }
        Ok(found)
    }

    /// Create a fingerprint ban.
    pub async fn create_fingerprint_ban(
        &self,
        ctx: &QueryContext,
        new_ban: NewFileBan,
    ) -> Result<FileBan> {
        let fingerprint = new_ban.fingerprint.trim();
        if fingerprint.is_empty() || !fingerprint.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(WardenError::Validation(format!(
                "fingerprint {:?} is not a hex string",
                new_ban.fingerprint
            )));
        }
        let new_ban = NewFileBan {
            fingerprint: fingerprint.to_ascii_lowercase(),
            ..new_ban
        };

        let repo = FileBanRepository::new(self.db.pool());
        let id = ctx.run(repo.create(&new_ban, AHASH, ctx.now())).await?;
        let ban = ctx
            .run(repo.get_by_id(id))
            .await?
            .ok_or_else(|| WardenError::NotFound(format!("fingerprint ban {id}")))?;

        info!(ban_id = ban.id, board_id = ?ban.board_id, ban_ip = ban.ban_ip, "fingerprint ban created");
        Ok(ban)
    }

    /// Ban the fingerprint of an image directly.
    pub async fn ban_image(
        &self,
        ctx: &QueryContext,
        data: &[u8],
        template: NewFileBan,
    ) -> Result<FileBan> {
        let fingerprint = self.fingerprint_blocking(ctx, data.to_vec()).await?;
        self.create_fingerprint_ban(
            ctx,
            NewFileBan {
                fingerprint,
                ..template
            },
        )
        .await
    }

    /// List fingerprint bans, newest first.
    pub async fn list_fingerprint_bans(
        &self,
        ctx: &QueryContext,
        active_only: bool,
    ) -> Result<Vec<FileBan>> {
        let repo = FileBanRepository::new(self.db.pool());
        ctx.run(repo.list(active_only)).await
    }
}
