//! Test helpers for integration tests.
//!
//! Provides an in-memory database, query contexts and sample uploads.

#![allow(dead_code)]

use std::io::Cursor;
use std::net::IpAddr;

use image::{DynamicImage, GrayImage, ImageFormat, Luma};

use chanwarden::config::Config;
use chanwarden::{Database, Post, QueryContext, Upload};

/// Board used by most tests.
pub const BOARD: i64 = 1;

/// Open a migrated in-memory database.
pub async fn setup_db() -> Database {
    Database::open_in_memory().await.unwrap()
}

/// Default configuration with an 8x8 fingerprint for speed.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.fingerprint.hash_length = 8;
    config
}

/// A query context with the default timeout.
pub fn ctx() -> QueryContext {
    QueryContext::default()
}

/// Parse an address, panicking on bad test input.
pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// A new-thread post on [`BOARD`].
pub fn new_thread(addr: &str, body: &str) -> Post {
    Post::new(ip(addr), BOARD).with_message(body)
}

/// A reply in thread 1 on [`BOARD`].
pub fn reply(addr: &str, body: &str) -> Post {
    new_thread(addr, body).in_thread(1)
}

/// PNG-encoded checkerboard, distinct per cell size.
pub fn checkerboard_png(cell: u32) -> Vec<u8> {
    let img = DynamicImage::ImageLuma8(GrayImage::from_fn(64, 64, |x, y| {
        if (x / cell + y / cell) % 2 == 0 {
            Luma([20])
        } else {
            Luma([230])
        }
    }));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// An image upload holding a checkerboard.
pub fn image_upload(name: &str, cell: u32) -> Upload {
    Upload::new(name, checkerboard_png(cell)).with_dimensions(64, 64)
}
