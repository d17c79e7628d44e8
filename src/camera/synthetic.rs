use anyhow::Result;

use super::CameraConfig;
use crate::frame::{Frame, YuvImage};

/// Synthetic camera for `stub://` URLs.
///
/// Produces I420 frames with a drifting luma gradient and a coloured square
/// that moves across the scene.
pub(super) struct SyntheticCamera {
    config: CameraConfig,
    frame_count: u64,
}

impl SyntheticCamera {
    pub(super) fn new(config: CameraConfig) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }

    /// Synthetic cameras are always connected.
    pub(super) fn connect(&mut self) -> Result<()> {
        log::info!("CameraSource: connected to {} (synthetic)", self.config.url);
        Ok(())
    }

    pub(super) fn next_frame(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        let pixels = self.generate_i420();
        let image = YuvImage::from_i420(self.config.width, self.config.height, &pixels)?;
        Ok(Frame::from_image(self.frame_count, image, self.config.rotation))
    }

    fn generate_i420(&self) -> Vec<u8> {
        let (w, h) = (self.config.width as usize, self.config.height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        let mut pixels = vec![128u8; w * h + 2 * cw * ch];

        let shift = self.frame_count as usize * 4;
        for (i, luma) in pixels[..w * h].iter_mut().enumerate() {
            let (x, y) = (i % w, i / w);
            *luma = ((x + y + shift) % 256) as u8;
        }

        // Square a quarter of the height wide, travelling left to right.
        let side = (ch / 4).max(1);
        let left = (self.frame_count as usize * 2) % cw.max(1);
        let top = ch.saturating_sub(side) / 2;
        let (u_plane, v_plane) = pixels[w * h..].split_at_mut(cw * ch);
        for y in top..(top + side).min(ch) {
            for x in left..(left + side).min(cw) {
                u_plane[y * cw + x] = 90;
                v_plane[y * cw + x] = 240;
            }
        }
        pixels
    }

    pub(super) fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}
