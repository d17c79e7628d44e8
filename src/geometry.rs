//! Geometry transform: planar YUV to RGB, crop-rect derivation, rotate + crop.
//!
//! Crop percentages are defined relative to the displayed orientation, while
//! the crop rect is expressed in sensor (pre-rotation) pixel axes. For quarter
//! turns the two percentages therefore trade places before the inset is
//! computed.

use anyhow::{bail, Result};
use image::{imageops, Rgb, RgbImage};

use crate::frame::{Rotation, YuvImage};

// ----------------------------------------------------------------------------
// Rect
// ----------------------------------------------------------------------------

/// Integer rectangle, `right`/`bottom` exclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Rect covering a full `width` x `height` image.
    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    /// Shrink symmetrically by `dx` on the left and right, `dy` on top and bottom.
    pub fn inset(&self, dx: i32, dy: i32) -> Self {
        Self::new(
            self.left + dx,
            self.top + dy,
            self.right - dx,
            self.bottom - dy,
        )
    }

    /// Intersect with a `width` x `height` image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as i32, height as i32);
        Self::new(
            self.left.clamp(0, w),
            self.top.clamp(0, h),
            self.right.clamp(0, w),
            self.bottom.clamp(0, h),
        )
    }
}

// ----------------------------------------------------------------------------
// CropSpec
// ----------------------------------------------------------------------------

/// Fixed percentages of the displayed height/width excluded from analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropSpec {
    height_percent: u32,
    width_percent: u32,
}

impl CropSpec {
    pub fn new(height_percent: u32, width_percent: u32) -> Result<Self> {
        if height_percent >= 100 {
            bail!("height crop percent must be in [0, 100), got {}", height_percent);
        }
        if width_percent >= 100 {
            bail!("width crop percent must be in [0, 100), got {}", width_percent);
        }
        Ok(Self {
            height_percent,
            width_percent,
        })
    }

    /// No crop: the full frame is analyzed.
    pub fn none() -> Self {
        Self {
            height_percent: 0,
            width_percent: 0,
        }
    }

    pub fn height_percent(&self) -> u32 {
        self.height_percent
    }

    pub fn width_percent(&self) -> u32 {
        self.width_percent
    }
}

/// Crop fractions `(width, height)` in pre-rotation axes.
pub fn crop_fractions(spec: CropSpec, rotation: Rotation) -> (f32, f32) {
    let height = spec.height_percent as f32 / 100.0;
    let width = spec.width_percent as f32 / 100.0;
    if rotation.is_quarter_turn() {
        (height, width)
    } else {
        (width, height)
    }
}

/// Region of interest inside a `width` x `height` sensor image.
///
/// Insets are truncated toward zero.
pub fn crop_rect(width: u32, height: u32, rotation: Rotation, spec: CropSpec) -> Rect {
    let (width_crop, height_crop) = crop_fractions(spec, rotation);
    Rect::from_size(width, height).inset(
        (width as f32 * width_crop / 2.0) as i32,
        (height as f32 * height_crop / 2.0) as i32,
    )
}

// ----------------------------------------------------------------------------
// Pixel conversion
// ----------------------------------------------------------------------------

/// Convert a planar 4:2:0 image to packed RGB at native resolution (BT.601, full range).
pub fn to_bitmap(image: &YuvImage) -> RgbImage {
    let (y_plane, u_plane, v_plane) = (image.y(), image.u(), image.v());
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let (x, y) = (x as usize, y as usize);
        let luma = y_plane.sample(x, y) as f32;
        let u = u_plane.sample(x / 2, y / 2) as f32 - 128.0;
        let v = v_plane.sample(x / 2, y / 2) as f32 - 128.0;

        let r = luma + 1.402_f32 * v;
        let g = luma - 0.344_136_f32 * u - 0.714_136_f32 * v;
        let b = luma + 1.772_f32 * u;

        Rgb([clamp_to_u8(r), clamp_to_u8(g), clamp_to_u8(b)])
    })
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Extract `crop` (pre-rotation axes, clamped to bounds), then rotate clockwise.
///
/// Panics when the clamped crop is empty: `crop_rect` never produces one for a
/// valid `CropSpec`, so an empty rect is a caller bug.
pub fn rotate_and_crop(bitmap: &RgbImage, rotation: Rotation, crop: Rect) -> RgbImage {
    let bounds = crop.clamp_to(bitmap.width(), bitmap.height());
    assert!(
        !bounds.is_empty(),
        "crop rect {:?} does not intersect {}x{} bitmap",
        crop,
        bitmap.width(),
        bitmap.height()
    );

    let cropped = imageops::crop_imm(
        bitmap,
        bounds.left as u32,
        bounds.top as u32,
        bounds.width() as u32,
        bounds.height() as u32,
    )
    .to_image();

    match rotation {
        Rotation::Deg0 => cropped,
        Rotation::Deg90 => imageops::rotate90(&cropped),
        Rotation::Deg180 => imageops::rotate180(&cropped),
        Rotation::Deg270 => imageops::rotate270(&cropped),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
