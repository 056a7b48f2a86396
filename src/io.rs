// ============================================================================
// FILE I/O: images, masks and .spr patch records
// ============================================================================

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};

use crate::buffer::{MaskBuffer, PixelBuffer, Rect};
use crate::error::IoError;
use crate::history::{PatchRecord, RECORD_MAGIC};

/// Maximum supported image dimension in pixels (per axis).
/// Prevents memory exhaustion from crafted files.
const MAX_IMAGE_DIM: u32 = 32_768;

// ============================================================================
// SAVE FORMATS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SaveFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
    Bmp,
    Tga,
    Tiff,
}

impl SaveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SaveFormat::Png => "png",
            SaveFormat::Jpeg => "jpg",
            SaveFormat::Webp => "webp",
            SaveFormat::Bmp => "bmp",
            SaveFormat::Tga => "tga",
            SaveFormat::Tiff => "tiff",
        }
    }

    /// Parse a format name or file extension. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "png" => Some(SaveFormat::Png),
            "jpg" | "jpeg" => Some(SaveFormat::Jpeg),
            "webp" => Some(SaveFormat::Webp),
            "bmp" => Some(SaveFormat::Bmp),
            "tga" => Some(SaveFormat::Tga),
            "tif" | "tiff" => Some(SaveFormat::Tiff),
            _ => None,
        }
    }

    /// Infer from a path's extension, defaulting to PNG.
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_name)
            .unwrap_or_default()
    }
}

// ============================================================================
// IMAGES AND MASKS
// ============================================================================

/// Decode any image the `image` crate understands.
pub fn load_image(path: &Path) -> Result<PixelBuffer, IoError> {
    let img = image::open(path)?;
    if img.width() > MAX_IMAGE_DIM || img.height() > MAX_IMAGE_DIM {
        return Err(IoError::InvalidFormat(format!(
            "{}x{} exceeds the {} pixel limit",
            img.width(),
            img.height(),
            MAX_IMAGE_DIM
        )));
    }
    Ok(PixelBuffer::from_dynamic(&img))
}

/// Decode a mask image (converted to grayscale, `>= threshold` = hole) and
/// check that it covers `rect` exactly.
pub fn load_mask(path: &Path, threshold: u8, rect: Rect) -> Result<MaskBuffer, IoError> {
    let gray = image::open(path)?.to_luma8();
    if gray.width() != rect.width || gray.height() != rect.height {
        return Err(IoError::DimensionMismatch {
            image_w: rect.width,
            image_h: rect.height,
            mask_w: gray.width(),
            mask_h: gray.height(),
        });
    }
    Ok(MaskBuffer::from_gray(&gray, threshold))
}

/// Encode `buffer` to `path`. PNG and TIFF keep 16-bit data; JPEG drops
/// alpha; the remaining formats are written as 8-bit RGBA.
pub fn encode_and_write(
    buffer: &PixelBuffer,
    path: &Path,
    format: SaveFormat,
    quality: u8,
) -> Result<(), IoError> {
    let img = buffer.to_dynamic();
    match format {
        SaveFormat::Png => img.save_with_format(path, ImageFormat::Png)?,
        SaveFormat::Tiff => img.save_with_format(path, ImageFormat::Tiff)?,
        SaveFormat::Jpeg => {
            let rgb = img.to_rgb8();
            let mut writer = BufWriter::new(File::create(path)?);
            let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100));
            encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ColorType::Rgb8)?;
        }
        SaveFormat::Webp => {
            DynamicImage::ImageRgba8(img.to_rgba8()).save_with_format(path, ImageFormat::WebP)?
        }
        SaveFormat::Bmp => {
            DynamicImage::ImageRgba8(img.to_rgba8()).save_with_format(path, ImageFormat::Bmp)?
        }
        SaveFormat::Tga => {
            DynamicImage::ImageRgba8(img.to_rgba8()).save_with_format(path, ImageFormat::Tga)?
        }
    }
    Ok(())
}

// ============================================================================
// PATCH RECORDS (.spr)
// ============================================================================

/// Serialize a record to disk.
pub fn save_record(record: &PatchRecord, path: &Path) -> Result<(), IoError> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    bincode::serialize_into(writer, record)?;
    Ok(())
}

/// Load a record written by [`save_record`].
pub fn load_record(path: &Path) -> Result<PatchRecord, IoError> {
    let raw = std::fs::read(path)?;
    if raw.len() < 12 {
        return Err(IoError::InvalidFormat("File too small".into()));
    }

    // bincode encodes a String as: 8-byte length prefix + UTF-8 data.
    // The magic string is 4 chars, so bytes 8..12 hold it.
    let magic = std::str::from_utf8(&raw[8..12]).unwrap_or("");
    if magic != RECORD_MAGIC {
        return Err(IoError::InvalidFormat(format!("Unknown magic '{}'", magic)));
    }

    let record: PatchRecord = bincode::deserialize(&raw)?;
    if !record.is_consistent() {
        return Err(IoError::InvalidFormat(
            "sample count does not match record rect".into(),
        ));
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BitDepth;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("smartpatch-io-{}-{}", std::process::id(), name))
    }

    #[test]
    fn format_inference() {
        assert_eq!(SaveFormat::from_path(Path::new("a/b.JPEG")), SaveFormat::Jpeg);
        assert_eq!(SaveFormat::from_path(Path::new("a/b.tif")), SaveFormat::Tiff);
        assert_eq!(SaveFormat::from_path(Path::new("a/b")), SaveFormat::Png);
        assert_eq!(SaveFormat::from_name("gif"), None);
    }

    #[test]
    fn png_round_trip_keeps_sixteen_bits() {
        let mut buf = PixelBuffer::new(Rect::from_size(3, 2), 4, BitDepth::Sixteen).unwrap();
        buf.fill(&[1000, 20000, 65535, 65535]);
        let path = temp_path("rt16.png");
        encode_and_write(&buf, &path, SaveFormat::Png, 90).unwrap();
        let back = load_image(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(back, buf);
    }

    #[test]
    fn mask_dimensions_must_match() {
        let path = temp_path("mask.png");
        image::GrayImage::from_pixel(4, 4, image::Luma([255])).save(&path).unwrap();
        let ok = load_mask(&path, 128, Rect::from_size(4, 4)).unwrap();
        assert_eq!(ok.count(), 16);
        let err = load_mask(&path, 128, Rect::from_size(5, 4)).unwrap_err();
        let _ = std::fs::remove_file(&path);
        assert!(matches!(err, IoError::DimensionMismatch { mask_w: 4, .. }));
    }

    #[test]
    fn record_round_trip_and_bad_magic() {
        let before = PixelBuffer::new(Rect::from_size(4, 4), 1, BitDepth::Eight).unwrap();
        let mut after = before.clone();
        after.set(1, 1, &[200]);
        let record = PatchRecord::capture(&before, &after, Rect::new(1, 1, 2, 2)).unwrap();

        let path = temp_path("rec.spr");
        save_record(&record, &path).unwrap();
        let back = load_record(&path).unwrap();
        assert_eq!(back, record);

        std::fs::write(&path, b"\x04\0\0\0\0\0\0\0NOPEjunkjunk").unwrap();
        let err = load_record(&path).unwrap_err();
        let _ = std::fs::remove_file(&path);
        assert!(matches!(err, IoError::InvalidFormat(_)));
    }

    #[test]
    fn record_with_oversized_rect_is_rejected() {
        let before = PixelBuffer::new(Rect::from_size(2, 2), 4, BitDepth::Eight).unwrap();
        let mut after = before.clone();
        after.set(0, 0, &[7, 7, 7, 7]);
        let record = PatchRecord::capture(&before, &after, Rect::new(0, 0, 1, 1)).unwrap();

        let path = temp_path("huge.spr");
        save_record(&record, &path).unwrap();
        // magic (8 + 4 bytes), x, y, then width and height at 20..28.
        let mut raw = std::fs::read(&path).unwrap();
        raw[20..28].fill(0xff);
        std::fs::write(&path, &raw).unwrap();

        let err = load_record(&path).unwrap_err();
        let _ = std::fs::remove_file(&path);
        assert!(matches!(err, IoError::InvalidFormat(_)));
    }
}
