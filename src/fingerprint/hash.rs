//! Average hash ("ahash") of an image.

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader};

use crate::Result;

/// Compute the average hash of an image.
///
/// The image is converted to grayscale and scaled to `hash_length` ×
/// `hash_length` with a Lanczos3 filter. Bit `i` of the hash is set when
/// pixel `i` (row-major) is brighter than the mean. Bits are packed
/// most-significant first and rendered as lowercase hex, so the default
/// length of 16 gives 256 bits, 64 hex digits.
pub fn compute_fingerprint(img: &DynamicImage, hash_length: u32) -> String {
    let side = hash_length.max(1);
    let gray = img.to_luma8();
    let small = imageops::resize(&gray, side, side, FilterType::Lanczos3);

    let pixels: Vec<u8> = small.pixels().map(|p| p.0[0]).collect();
    let sum: u64 = pixels.iter().map(|&v| u64::from(v)).sum();
    let count = pixels.len().max(1) as u64;

    let mut bytes = vec![0u8; pixels.len().div_ceil(8)];
    for (i, &v) in pixels.iter().enumerate() {
        // v > sum / count, kept in integers
        if u64::from(v) * count > sum {
            bytes[i / 8] |= 0x80 >> (i % 8);
        }
    }

    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decode an encoded image and compute its average hash.
pub fn compute_fingerprint_bytes(data: &[u8], hash_length: u32) -> Result<String> {
    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .decode()?;
    Ok(compute_fingerprint(&img, hash_length))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Luma, Rgb, RgbImage};

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, _| {
            let v = (x * 255 / width.max(1)) as u8;
            Rgb([v, v, v])
        }))
    }

    fn encode_png(img: &DynamicImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_hash_length_controls_width() {
        let img = gradient(64, 64);
        assert_eq!(compute_fingerprint(&img, 16).len(), 64);
        assert_eq!(compute_fingerprint(&img, 8).len(), 16);
    }

    #[test]
    fn test_deterministic() {
        let img = gradient(100, 80);
        assert_eq!(compute_fingerprint(&img, 16), compute_fingerprint(&img, 16));
    }

    #[test]
    fn test_uniform_image_hashes_to_zero() {
        let img = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(32, 32, Luma([128])));
        assert_eq!(compute_fingerprint(&img, 8), "0".repeat(16));
    }

    #[test]
    fn test_left_dark_right_bright() {
        // Left half black, right half white: each row reads 0000 1111.
        let img = DynamicImage::ImageLuma8(image::GrayImage::from_fn(64, 64, |x, _| {
            if x < 32 {
                Luma([0])
            } else {
                Luma([255])
            }
        }));
        assert_eq!(compute_fingerprint(&img, 8), "0f".repeat(8));
    }

    #[test]
    fn test_scaled_copy_matches() {
        let big = gradient(256, 256);
        let small = big.resize_exact(128, 128, FilterType::Triangle);
        assert_eq!(compute_fingerprint(&big, 8), compute_fingerprint(&small, 8));
    }

    #[test]
    fn test_bytes_roundtrip_through_png() {
        let img = gradient(40, 40);
        let from_bytes = compute_fingerprint_bytes(&encode_png(&img), 16).unwrap();
        assert_eq!(from_bytes, compute_fingerprint(&img, 16));
    }

    #[test]
    fn test_bytes_rejects_garbage() {
        assert!(compute_fingerprint_bytes(b"definitely not an image", 16).is_err());
    }
}
