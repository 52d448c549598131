//! Whole-image mismatch scoring.
//!
//! Pixels are compared channel-by-channel against a [`Tolerance`]. When
//! anti-aliasing suppression is on, a pixel that differs only because it
//! sits on a rendered edge in either image is accepted as long as its
//! brightness stayed close. The edge test looks at the 8 neighbours and
//! is applied to both inputs, so the score is symmetric.
//!
//! Images of different sizes are compared over the union canvas
//! (`max width x max height`); a pixel that exists in only one image
//! always counts as a mismatch.

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use super::raster::Raster;

// ============================================================================
// Constants
// ============================================================================

/// Hue distance (on a 0..1 wheel) above which two neighbours differ in hue.
const HUE_SPLIT: f64 = 0.3;

// ============================================================================
// Types
// ============================================================================

/// Per-channel tolerances applied before a pixel counts as changed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    /// Max red delta.
    pub red: u8,
    /// Max green delta.
    pub green: u8,
    /// Max blue delta.
    pub blue: u8,
    /// Max alpha delta.
    pub alpha: u8,
    /// Max brightness delta for an anti-aliased pixel to still match.
    pub min_brightness: f64,
    /// Brightness delta that makes a neighbour "high contrast".
    pub max_brightness: f64,
}

impl Tolerance {
    /// Tight tolerances for exact rendering comparisons.
    #[must_use]
    pub const fn strict() -> Self {
        Self {
            red: 16,
            green: 16,
            blue: 16,
            alpha: 16,
            min_brightness: 16.0,
            max_brightness: 240.0,
        }
    }

    /// Looser tolerances used together with anti-aliasing suppression.
    #[must_use]
    pub const fn antialiasing() -> Self {
        Self {
            red: 32,
            green: 32,
            blue: 32,
            alpha: 32,
            min_brightness: 64.0,
            max_brightness: 96.0,
        }
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::antialiasing()
    }
}

/// Result of comparing two images.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Comparison {
    /// Share of mismatching pixels, 0 to 100.
    pub mismatch_percent: f64,
    /// Whether both images had identical pixel dimensions.
    pub same_dimensions: bool,
}

// ============================================================================
// ImageComparator
// ============================================================================

/// Pure, deterministic image comparator.
///
/// # Example
///
/// ```
/// use tabnab_guard::imaging::{ImageComparator, Raster};
///
/// let white = Raster::solid(32, 32, [255, 255, 255, 255]);
/// let black = Raster::solid(32, 32, [0, 0, 0, 255]);
///
/// let comparator = ImageComparator::new();
/// assert_eq!(comparator.compare(&white, &white).mismatch_percent, 0.0);
/// assert_eq!(comparator.compare(&white, &black).mismatch_percent, 100.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageComparator {
    tolerance: Tolerance,
    ignore_antialiasing: bool,
}

impl Default for ImageComparator {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageComparator {
    /// Creates a comparator with anti-aliasing suppression enabled.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tolerance: Tolerance::antialiasing(),
            ignore_antialiasing: true,
        }
    }

    /// Creates a comparator that counts every out-of-tolerance pixel.
    #[must_use]
    pub const fn strict() -> Self {
        Self {
            tolerance: Tolerance::strict(),
            ignore_antialiasing: false,
        }
    }

    /// Replaces the tolerances.
    #[must_use]
    pub const fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Returns the active tolerances.
    #[inline]
    #[must_use]
    pub fn tolerance(&self) -> Tolerance {
        self.tolerance
    }

    /// Compares two images.
    #[must_use]
    pub fn compare(&self, a: &Raster, b: &Raster) -> Comparison {
        self.compare_pixels(a.pixels(), b.pixels())
    }

    /// Compares two pixel buffers.
    #[must_use]
    pub fn compare_pixels(&self, a: &RgbaImage, b: &RgbaImage) -> Comparison {
        let same_dimensions = a.dimensions() == b.dimensions();
        let width = a.width().max(b.width());
        let height = a.height().max(b.height());
        let total = u64::from(width) * u64::from(height);

        if total == 0 {
            return Comparison {
                mismatch_percent: 0.0,
                same_dimensions,
            };
        }

        let mut mismatched: u64 = 0;
        for y in 0..height {
            for x in 0..width {
                let inside_a = x < a.width() && y < a.height();
                let inside_b = x < b.width() && y < b.height();
                if !(inside_a && inside_b) {
                    mismatched += 1;
                    continue;
                }
                if !self.pixel_matches(a, b, x, y) {
                    mismatched += 1;
                }
            }
        }

        Comparison {
            mismatch_percent: mismatched as f64 * 100.0 / total as f64,
            same_dimensions,
        }
    }

    /// Returns `true` if the pixel at `(x, y)` is considered unchanged.
    fn pixel_matches(&self, a: &RgbaImage, b: &RgbaImage, x: u32, y: u32) -> bool {
        let pa = a.get_pixel(x, y);
        let pb = b.get_pixel(x, y);

        if self.is_rgb_similar(pa, pb) {
            return true;
        }

        self.ignore_antialiasing
            && (self.is_antialiased(a, x, y) || self.is_antialiased(b, x, y))
            && self.is_brightness_similar(pa, pb)
    }

    fn is_rgb_similar(&self, a: &Rgba<u8>, b: &Rgba<u8>) -> bool {
        let t = &self.tolerance;
        a[0].abs_diff(b[0]) <= t.red
            && a[1].abs_diff(b[1]) <= t.green
            && a[2].abs_diff(b[2]) <= t.blue
            && a[3].abs_diff(b[3]) <= t.alpha
    }

    fn is_brightness_similar(&self, a: &Rgba<u8>, b: &Rgba<u8>) -> bool {
        (brightness(a) - brightness(b)).abs() <= self.tolerance.min_brightness
            && a[3].abs_diff(b[3]) <= self.tolerance.alpha
    }

    /// Edge-pixel heuristic over the 8-neighbourhood of one image.
    ///
    /// Two high-contrast or two different-hue neighbours mark an edge.
    /// Otherwise a pixel with fewer than two identical neighbours is
    /// isolated rendering noise.
    fn is_antialiased(&self, img: &RgbaImage, x: u32, y: u32) -> bool {
        let center = img.get_pixel(x, y);
        let center_brightness = brightness(center);
        let center_hue = hue(center);

        let mut equivalent = 0u32;
        let mut high_contrast = 0u32;
        let mut different_hue = 0u32;

        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let nx = i64::from(x) + dx;
                let ny = i64::from(y) + dy;
                if nx < 0 || ny < 0 || nx >= i64::from(img.width()) || ny >= i64::from(img.height())
                {
                    continue;
                }

                let neighbour = img.get_pixel(nx as u32, ny as u32);
                if neighbour == center {
                    equivalent += 1;
                }
                if (brightness(neighbour) - center_brightness).abs() > self.tolerance.max_brightness
                {
                    high_contrast += 1;
                }
                if (hue(neighbour) - center_hue).abs() > HUE_SPLIT {
                    different_hue += 1;
                }
                if high_contrast > 1 || different_hue > 1 {
                    return true;
                }
            }
        }

        equivalent < 2
    }
}

// ============================================================================
// Color Helpers
// ============================================================================

/// Perceived brightness, 0 to 255.
fn brightness(p: &Rgba<u8>) -> f64 {
    0.3 * f64::from(p[0]) + 0.59 * f64::from(p[1]) + 0.11 * f64::from(p[2])
}

/// HSL hue on a 0..1 wheel; grays map to 0.
fn hue(p: &Rgba<u8>) -> f64 {
    let r = f64::from(p[0]) / 255.0;
    let g = f64::from(p[1]) / 255.0;
    let b = f64::from(p[2]) / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    if delta == 0.0 {
        return 0.0;
    }

    let h = if max == r {
        ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        (b - r) / delta + 2.0
    } else {
        (r - g) / delta + 4.0
    };
    h / 6.0
}

// ============================================================================
// Tests
// ============================================================================
