//! Camera boundary.
//!
//! Sources produce `Frame`s for the analysis pipeline:
//! - `stub://...` synthetic scenes (testing, demos)
//! - local raw I420 files (recorded footage)
//!
//! Every frame holds a slot from the source's `BufferPool` until it is
//! released. A consumer that forgets to release frames starves the pool and
//! the source reports a stall instead of capturing.
//!
//! The camera layer validates plane layout and rotation when it builds a
//! frame; downstream code never sees a malformed image.

mod file;
mod pool;
mod synthetic;

use std::time::Duration;

use anyhow::{bail, Result};

use crate::frame::{Frame, Rotation};
use file::FileCamera;
pub use pool::{BufferPool, PoolSlot};
use synthetic::SyntheticCamera;

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// `stub://name` for a synthetic scene, or a local raw I420 file path.
    pub url: String,
    pub width: u32,
    pub height: u32,
    /// Sensor-to-display rotation stamped on every frame.
    pub rotation: Rotation,
    /// Target frame rate (frames per second).
    pub target_fps: u32,
    /// Number of frames that may be outstanding at once.
    pub buffer_slots: usize,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            url: "stub://back_camera".to_string(),
            width: 1280,
            height: 720,
            rotation: Rotation::Deg0,
            target_fps: 30,
            buffer_slots: 4,
        }
    }
}

/// Statistics for a camera source.
#[derive(Clone, Debug)]
pub struct CameraStats {
    pub frames_captured: u64,
    pub stalls: u64,
    pub buffers_available: usize,
    pub url: String,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    File(FileCamera),
}

pub struct CameraSource {
    backend: CameraBackend,
    pool: BufferPool,
    url: String,
    frame_timeout: Duration,
    stalls: u64,
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            bail!(
                "camera dimensions must be non-zero, got {}x{}",
                config.width,
                config.height
            );
        }
        if !is_local_source(&config.url) {
            bail!("camera source must be stub:// or a local file path (no URL schemes)");
        }

        let pool = BufferPool::new(config.buffer_slots)?;
        let url = config.url.clone();
        let frame_timeout = frame_timeout(config.target_fps);
        let backend = if config.url.starts_with("stub://") {
            CameraBackend::Synthetic(SyntheticCamera::new(config))
        } else {
            CameraBackend::File(FileCamera::new(config)?)
        };

        Ok(Self {
            backend,
            pool,
            url,
            frame_timeout,
            stalls: 0,
        })
    }

    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.connect(),
            CameraBackend::File(source) => source.connect(),
        }
    }

    /// Capture the next frame.
    ///
    /// Waits for a free buffer slot first; if every slot stays held past the
    /// frame timeout the capture fails with a stall error.
    pub fn next_frame(&mut self) -> Result<Frame> {
        let slot = match self.pool.acquire(self.frame_timeout) {
            Ok(slot) => slot,
            Err(err) => {
                self.stalls += 1;
                return Err(err);
            }
        };
        let frame = match &mut self.backend {
            CameraBackend::Synthetic(source) => source.next_frame()?,
            CameraBackend::File(source) => source.next_frame()?,
        };
        Ok(slot.attach(frame))
    }

    pub fn is_healthy(&self) -> bool {
        let backend_ok = match &self.backend {
            CameraBackend::Synthetic(_) => true,
            CameraBackend::File(source) => source.is_healthy(),
        };
        backend_ok && self.pool.available() > 0
    }

    pub fn stats(&self) -> CameraStats {
        let frames_captured = match &self.backend {
            CameraBackend::Synthetic(source) => source.frames_captured(),
            CameraBackend::File(source) => source.frames_captured(),
        };
        CameraStats {
            frames_captured,
            stalls: self.stalls,
            buffers_available: self.pool.available(),
            url: self.url.clone(),
        }
    }
}

fn frame_timeout(target_fps: u32) -> Duration {
    let base_ms = if target_fps == 0 {
        500
    } else {
        (1000 / target_fps).saturating_mul(4)
    };
    Duration::from_millis(base_ms.max(500) as u64)
}

fn is_local_source(url: &str) -> bool {
    if url.trim().is_empty() {
        return false;
    }
    if url.starts_with("stub://") {
        return true;
    }
    !url.contains("://")
}
