//! Renderer-backed detection listener.
//!
//! Keeps the latest detected/undetected state and describes the overlay the
//! renderer should draw: a rounded box over the analyzed region, outlined green
//! while the target is visible. The box uses the same crop percentages as the
//! analyzer so the drawn region matches the analyzed one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::geometry::CropSpec;
use crate::listener::DetectionListener;

pub const OUTLINE_DETECTED: [u8; 4] = [0, 255, 0, 255];
pub const OUTLINE_IDLE: [u8; 4] = [255, 255, 255, 255];
pub const BACKGROUND_ALPHA: u8 = 140;
pub const CORNER_RADIUS: f32 = 25.0;
pub const STROKE_WIDTH: f32 = 4.0;
pub const CAPTION: &str = "Overlay text";

/// Float rectangle in surface coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RectF {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

/// Everything a renderer needs to draw one overlay state.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlayFrame {
    pub rect: RectF,
    pub outline: [u8; 4],
    pub background_alpha: u8,
    pub corner_radius: f32,
    pub stroke_width: f32,
    pub caption: &'static str,
    pub detected: bool,
    /// Number of listener calls applied so far.
    pub generation: u64,
}

/// Region box over a `surface_width` x `surface_height` surface.
///
/// Percentages are in display orientation, so no rotation swap applies here.
/// Insets use integer halving the way the on-screen box always has: the
/// left/top edge halves `surface * percent`, the right/bottom edge halves
/// `percent` alone, so odd percentages leave the box slightly off centre.
pub fn overlay_rect(surface_width: u32, surface_height: u32, crop: CropSpec) -> RectF {
    let (w, h) = (surface_width as u64, surface_height as u64);
    let (wp, hp) = (crop.width_percent() as u64, crop.height_percent() as u64);
    RectF {
        left: (w * wp / 2) as f32 / 100.0,
        top: (h * hp / 2) as f32 / 100.0,
        right: w as f32 * (1.0 - (wp / 2) as f32 / 100.0),
        bottom: h as f32 * (1.0 - (hp / 2) as f32 / 100.0),
    }
}

/// Listener that stores the latest state for a renderer to pick up.
///
/// Last call wins. Safe to call from the analysis worker while the renderer
/// polls `snapshot` from its own thread.
pub struct OverlayListener {
    crop: CropSpec,
    detected: AtomicBool,
    generation: AtomicU64,
}

impl OverlayListener {
    pub fn new(crop: CropSpec) -> Self {
        Self {
            crop,
            detected: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    pub fn is_detected(&self) -> bool {
        self.detected.load(Ordering::Acquire)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn snapshot(&self, surface_width: u32, surface_height: u32) -> OverlayFrame {
        let detected = self.is_detected();
        OverlayFrame {
            rect: overlay_rect(surface_width, surface_height, self.crop),
            outline: if detected {
                OUTLINE_DETECTED
            } else {
                OUTLINE_IDLE
            },
            background_alpha: BACKGROUND_ALPHA,
            corner_radius: CORNER_RADIUS,
            stroke_width: STROKE_WIDTH,
            caption: CAPTION,
            detected,
            generation: self.generation(),
        }
    }

    fn set(&self, detected: bool) {
        let previous = self.detected.swap(detected, Ordering::AcqRel);
        self.generation.fetch_add(1, Ordering::AcqRel);
        if previous != detected {
            log::debug!("overlay state -> {}", if detected { "detected" } else { "idle" });
        }
    }
}

impl DetectionListener for OverlayListener {
    fn on_object_detected(&self) {
        self.set(true);
    }

    fn on_object_undetected(&self) {
        self.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_rect_mirrors_crop_percentages() {
        let rect = overlay_rect(1000, 2000, CropSpec::new(54, 8).unwrap());
        assert!((rect.left - 40.0).abs() < 1e-3);
        assert!((rect.right - 960.0).abs() < 1e-3);
        assert!((rect.top - 540.0).abs() < 1e-3);
        assert!((rect.bottom - 1460.0).abs() < 1e-3);
    }

    #[test]
    fn overlay_rect_halves_odd_percentages_per_edge() {
        let rect = overlay_rect(101, 200, CropSpec::new(9, 7).unwrap());
        // 101 * 7 / 2 = 353 on the left; 7 / 2 = 3 on the right.
        assert!((rect.left - 3.53).abs() < 1e-3);
        assert!((rect.right - 97.97).abs() < 1e-3);
        assert!((rect.top - 9.0).abs() < 1e-3);
        assert!((rect.bottom - 192.0).abs() < 1e-3);
    }

    #[test]
    fn last_call_wins() {
        let overlay = OverlayListener::new(CropSpec::none());
        assert!(!overlay.snapshot(10, 10).detected);

        overlay.on_object_detected();
        overlay.on_object_undetected();
        overlay.on_object_detected();

        let frame = overlay.snapshot(10, 10);
        assert!(frame.detected);
        assert_eq!(frame.outline, OUTLINE_DETECTED);
        assert_eq!(frame.generation, 3);
    }
}
