//! Thumbnail normalization: any decodable image in, 1280x720 RGB PNG out.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{ImageFormat, Rgb, RgbImage, RgbaImage};

use crate::api::OpenAiError;

pub const THUMBNAIL_WIDTH: u32 = 1280;
pub const THUMBNAIL_HEIGHT: u32 = 720;

/// Composite `rgba` onto an opaque white background.
pub fn flatten_onto_white(rgba: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = u16::from(a);
        let blend = |c: u8| ((u16::from(c) * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

/// Decode `bytes`, drop any alpha channel and resize to exactly
/// [`THUMBNAIL_WIDTH`] x [`THUMBNAIL_HEIGHT`].
pub fn normalize(bytes: &[u8]) -> Result<RgbImage, image::ImageError> {
    let decoded = image::load_from_memory(bytes)?;
    let flattened = flatten_onto_white(&decoded.to_rgba8());
    Ok(image::imageops::resize(
        &flattened,
        THUMBNAIL_WIDTH,
        THUMBNAIL_HEIGHT,
        FilterType::Lanczos3,
    ))
}

/// Normalize `bytes` and write the PNG to `dest` atomically.
///
/// Decoding and resampling run on the blocking pool.
pub async fn write_thumbnail(bytes: Vec<u8>, dest: &Path) -> Result<(), OpenAiError> {
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || write_thumbnail_blocking(&bytes, &dest))
        .await
        .map_err(|e| OpenAiError::Io(std::io::Error::other(e)))?
}

fn write_thumbnail_blocking(bytes: &[u8], dest: &Path) -> Result<(), OpenAiError> {
    let thumbnail = normalize(bytes)?;
    let tmp = tmp_path(dest);
    let saved = thumbnail
        .save_with_format(&tmp, ImageFormat::Png)
        .map_err(OpenAiError::from)
        .and_then(|()| std::fs::rename(&tmp, dest).map_err(OpenAiError::from));
    if saved.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    saved
}

fn tmp_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    dest.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use assert_matches::assert_matches;
    use image::{DynamicImage, Rgba};

    use super::*;

    fn png_bytes(image: DynamicImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn transparent_pixels_become_white() {
        let mut rgba = RgbaImage::new(2, 1);
        rgba.put_pixel(0, 0, Rgba([0, 0, 0, 0]));
        rgba.put_pixel(1, 0, Rgba([10, 20, 30, 255]));

        let flat = flatten_onto_white(&rgba);
        assert_eq!(flat.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(flat.get_pixel(1, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn half_transparent_black_is_mid_grey() {
        let rgba = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 128]));
        let [r, _, _] = flatten_onto_white(&rgba).get_pixel(0, 0).0;
        assert!((126..=128).contains(&r));
    }

    #[test]
    fn generated_size_is_resized_to_thumbnail() {
        let source = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            1792,
            1024,
            Rgba([40, 80, 120, 255]),
        ));
        let thumb = normalize(&png_bytes(source)).unwrap();
        assert_eq!(thumb.dimensions(), (THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT));
    }

    #[test]
    fn undecodable_bytes_are_rejected() {
        assert!(normalize(b"definitely not an image").is_err());
    }

    #[tokio::test]
    async fn write_thumbnail_leaves_only_final_png() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("thumb_20261016_093000.png");
        let source = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 36, Rgb([1, 2, 3])));

        write_thumbnail(png_bytes(source), &dest).await.unwrap();

        assert_eq!(
            image::image_dimensions(&dest).unwrap(),
            (THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT)
        );
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn failed_rename_removes_temporary_png() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("thumb.png");
        std::fs::create_dir(&dest).unwrap();
        std::fs::write(dest.join("occupied"), b"x").unwrap();
        let source = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 36, Rgb([1, 2, 3])));

        let err = write_thumbnail(png_bytes(source), &dest).await.unwrap_err();

        assert_matches!(err, OpenAiError::Io(_));
        assert!(!dir.path().join("thumb.png.tmp").exists());
        assert!(dest.is_dir());
    }

    #[tokio::test]
    async fn failed_decode_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("thumb.png");

        let err = write_thumbnail(b"garbage".to_vec(), &dest).await.unwrap_err();

        assert_matches!(err, OpenAiError::Image(_));
        assert!(!dest.exists());
    }
}
