//! Raw I420 file camera.
//!
//! Replays consecutive `width x height` I420 frames from a local file, looping
//! at end of file. Useful for running the pipeline on recorded footage
//! without a device.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};

use anyhow::{anyhow, bail, Context, Result};

use super::CameraConfig;
use crate::frame::{Frame, YuvImage};

pub(super) struct FileCamera {
    config: CameraConfig,
    reader: Option<BufReader<File>>,
    frame_len: usize,
    frame_count: u64,
    loops: u64,
}

impl FileCamera {
    pub(super) fn new(config: CameraConfig) -> Result<Self> {
        let (w, h) = (config.width as usize, config.height as usize);
        let frame_len = w * h + 2 * (w.div_ceil(2) * h.div_ceil(2));
        Ok(Self {
            config,
            reader: None,
            frame_len,
            frame_count: 0,
            loops: 0,
        })
    }

    pub(super) fn connect(&mut self) -> Result<()> {
        let path = &self.config.url;
        let file = File::open(path).with_context(|| format!("open raw frame file {}", path))?;
        let len = file
            .metadata()
            .with_context(|| format!("stat raw frame file {}", path))?
            .len();
        if len < self.frame_len as u64 {
            bail!(
                "raw frame file {} holds {} bytes, less than one {}x{} I420 frame ({} bytes)",
                path,
                len,
                self.config.width,
                self.config.height,
                self.frame_len
            );
        }
        if len % self.frame_len as u64 != 0 {
            log::warn!(
                "raw frame file {} has a trailing partial frame; it will be skipped",
                path
            );
        }
        self.reader = Some(BufReader::new(file));
        log::info!("CameraSource: connected to {} (file)", path);
        Ok(())
    }

    pub(super) fn next_frame(&mut self) -> Result<Frame> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| anyhow!("file camera is not connected"))?;

        let mut pixels = vec![0u8; self.frame_len];
        match reader.read_exact(&mut pixels) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                reader.seek(SeekFrom::Start(0)).context("rewind raw frame file")?;
                reader
                    .read_exact(&mut pixels)
                    .context("read raw frame after rewind")?;
                self.loops += 1;
                log::debug!("file camera looped ({} passes)", self.loops);
            }
            Err(err) => return Err(err).context("read raw frame"),
        }

        self.frame_count += 1;
        let image = YuvImage::from_i420(self.config.width, self.config.height, &pixels)?;
        Ok(Frame::from_image(self.frame_count, image, self.config.rotation))
    }

    pub(super) fn is_healthy(&self) -> bool {
        self.reader.is_some()
    }

    pub(super) fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}
