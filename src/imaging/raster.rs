//! Decoded raster images and their data-URL codec.
//!
//! Hosts hand captures over as `data:image/png;base64,...` strings (the
//! shape `captureVisibleTab` returns), and snapshots are persisted the same
//! way. [`Raster`] is the decoded RGBA form every comparison works on.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64Standard;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage, imageops};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{Error, Result};

// ============================================================================
// Types
// ============================================================================

/// Encoding used when persisting a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SnapshotFormat {
    /// PNG format (lossless, larger payload).
    #[default]
    Png,
    /// JPEG format with quality (0-100).
    Jpeg(u8),
}

impl SnapshotFormat {
    /// Creates PNG format.
    #[inline]
    #[must_use]
    pub fn png() -> Self {
        Self::Png
    }

    /// Creates JPEG format with quality (0-100).
    #[inline]
    #[must_use]
    pub fn jpeg(quality: u8) -> Self {
        Self::Jpeg(quality.min(100))
    }

    /// Returns the MIME type for this format.
    #[must_use]
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg(_) => "image/jpeg",
        }
    }
}

// ============================================================================
// Raster
// ============================================================================

/// A decoded RGBA image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    pixels: RgbaImage,
}

impl Raster {
    /// Wraps decoded pixels.
    #[inline]
    #[must_use]
    pub fn new(pixels: RgbaImage) -> Self {
        Self { pixels }
    }

    /// Creates an image filled with one color.
    #[must_use]
    pub fn solid(width: u32, height: u32, color: [u8; 4]) -> Self {
        Self::new(RgbaImage::from_pixel(width, height, Rgba(color)))
    }

    /// Decodes PNG or JPEG bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let decoded = image::load_from_memory(bytes)?;
        Ok(Self::new(decoded.to_rgba8()))
    }

    /// Decodes a `data:<mime>;base64,<payload>` URL.
    pub fn from_data_url(data_url: &str) -> Result<Self> {
        let (header, payload) = data_url
            .split_once(',')
            .ok_or_else(|| Error::invalid_image("data URL has no payload separator"))?;

        if !header.starts_with("data:image/") || !header.ends_with(";base64") {
            return Err(Error::invalid_image(format!(
                "unsupported data URL header: {header}"
            )));
        }

        let bytes = Base64Standard
            .decode(payload)
            .map_err(|e| Error::invalid_image(format!("Failed to decode base64: {e}")))?;

        Self::from_bytes(&bytes)
    }

    /// Encodes the image in the given format.
    pub fn encode(&self, format: SnapshotFormat) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        match format {
            SnapshotFormat::Png => {
                DynamicImage::ImageRgba8(self.pixels.clone())
                    .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
            }
            SnapshotFormat::Jpeg(quality) => {
                let rgb = DynamicImage::ImageRgba8(self.pixels.clone()).to_rgb8();
                let encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
                rgb.write_with_encoder(encoder)?;
            }
        }

        trace!(
            width = self.width(),
            height = self.height(),
            format = ?format,
            encoded_len = bytes.len(),
            "Encoded raster"
        );
        Ok(bytes)
    }

    /// Encodes the image as a base64 data URL.
    pub fn to_data_url(&self, format: SnapshotFormat) -> Result<String> {
        let bytes = self.encode(format)?;
        Ok(format!(
            "data:{};base64,{}",
            format.mime_type(),
            Base64Standard.encode(bytes)
        ))
    }
}

// ============================================================================
// Raster - Accessors
// ============================================================================

impl Raster {
    /// Returns the width in pixels.
    #[inline]
    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Returns the height in pixels.
    #[inline]
    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Returns `(width, height)`.
    #[inline]
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// Returns the underlying pixel buffer.
    #[inline]
    #[must_use]
    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Copies out a rectangular region, clamped to the image bounds.
    #[must_use]
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Raster {
        let x = x.min(self.width());
        let y = y.min(self.height());
        let width = width.min(self.width() - x);
        let height = height.min(self.height() - y);
        Self::new(imageops::crop_imm(&self.pixels, x, y, width, height).to_image())
    }

    /// Overwrites a rectangle with one color, clamped to the image bounds.
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, color: [u8; 4]) {
        let x_end = x.saturating_add(width).min(self.width());
        let y_end = y.saturating_add(height).min(self.height());
        for py in y.min(y_end)..y_end {
            for px in x.min(x_end)..x_end {
                self.pixels.put_pixel(px, py, Rgba(color));
            }
        }
    }
}

impl From<RgbaImage> for Raster {
    fn from(pixels: RgbaImage) -> Self {
        Self::new(pixels)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_data_url_preserves_pixels() {
        let mut raster = Raster::solid(8, 6, [10, 20, 30, 255]);
        raster.fill_rect(2, 2, 3, 2, [200, 0, 0, 255]);

        let url = raster.to_data_url(SnapshotFormat::Png).unwrap();
        assert!(url.starts_with("data:image/png;base64,"));

        let decoded = Raster::from_data_url(&url).unwrap();
        assert_eq!(decoded, raster);
    }

    #[test]
    fn test_jpeg_keeps_dimensions() {
        let raster = Raster::solid(16, 9, [120, 120, 120, 255]);
        let url = raster.to_data_url(SnapshotFormat::jpeg(80)).unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));

        let decoded = Raster::from_data_url(&url).unwrap();
        assert_eq!(decoded.dimensions(), (16, 9));
    }

    #[test]
    fn test_rejects_malformed_data_url() {
        assert!(matches!(
            Raster::from_data_url("not a data url"),
            Err(Error::InvalidImage { .. })
        ));
        assert!(matches!(
            Raster::from_data_url("data:text/plain;base64,aGVsbG8="),
            Err(Error::InvalidImage { .. })
        ));
        assert!(Raster::from_data_url("data:image/png;base64,!!!").is_err());
    }

    #[test]
    fn test_crop_is_clamped() {
        let raster = Raster::solid(10, 10, [0, 0, 0, 255]);
        assert_eq!(raster.crop(8, 8, 5, 5).dimensions(), (2, 2));
        assert_eq!(raster.crop(20, 0, 5, 5).dimensions(), (0, 5));
    }

    #[test]
    fn test_fill_rect_is_clamped() {
        let mut raster = Raster::solid(4, 4, [0, 0, 0, 255]);
        raster.fill_rect(3, 3, 10, 10, [255, 255, 255, 255]);
        assert_eq!(raster.pixels().get_pixel(3, 3).0, [255, 255, 255, 255]);
        assert_eq!(raster.pixels().get_pixel(2, 2).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_jpeg_quality_is_capped() {
        assert_eq!(SnapshotFormat::jpeg(150), SnapshotFormat::Jpeg(100));
        assert_eq!(SnapshotFormat::png().mime_type(), "image/png");
    }
}
