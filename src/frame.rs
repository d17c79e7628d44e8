//! Camera frame layer.
//!
//! - `Plane` / `YuvImage`: planar 4:2:0 color buffer as delivered by the camera.
//! - `Rotation`: sensor-to-display rotation, restricted to quarter turns.
//! - `Frame`: one delivered capture. Owns a release hook that hands the buffer
//!   slot back to the producer exactly once.
//!
//! Layout and rotation are validated when a frame is built at the camera
//! boundary. Everything downstream may assume a well-formed image.

use anyhow::{anyhow, bail, Result};

// ----------------------------------------------------------------------------
// Rotation
// ----------------------------------------------------------------------------

/// Clockwise rotation needed to bring the sensor image upright.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: u32) -> Result<Self> {
        match degrees {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(anyhow!(
                "rotation must be one of 0/90/180/270 degrees, got {}",
                other
            )),
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// True for 90 and 270: the displayed axes are swapped relative to the sensor.
    pub fn is_quarter_turn(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

// ----------------------------------------------------------------------------
// Planes
// ----------------------------------------------------------------------------

/// One plane of a planar image buffer.
///
/// `row_stride` is the byte distance between rows, `pixel_stride` the byte
/// distance between horizontally adjacent samples (1 for planar chroma, 2 for
/// interleaved NV12/NV21 chroma).
#[derive(Clone, Debug)]
pub struct Plane {
    data: Vec<u8>,
    row_stride: usize,
    pixel_stride: usize,
}

impl Plane {
    pub fn new(data: Vec<u8>, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data,
            row_stride,
            pixel_stride,
        }
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    pub fn pixel_stride(&self) -> usize {
        self.pixel_stride
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Sample at column `x`, row `y`. Coordinates are in plane units.
    #[inline]
    pub(crate) fn sample(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.row_stride + x * self.pixel_stride]
    }

    fn validate(&self, name: &str, cols: usize, rows: usize) -> Result<()> {
        if self.pixel_stride == 0 {
            bail!("{} plane pixel stride must be non-zero", name);
        }
        let row_bytes = (cols - 1)
            .checked_mul(self.pixel_stride)
            .and_then(|v| v.checked_add(1))
            .ok_or_else(|| anyhow!("{} plane dimensions overflow", name))?;
        if self.row_stride < row_bytes {
            bail!(
                "{} plane row stride {} is shorter than a {}-sample row (pixel stride {})",
                name,
                self.row_stride,
                cols,
                self.pixel_stride
            );
        }
        let required = (rows - 1)
            .checked_mul(self.row_stride)
            .and_then(|v| v.checked_add(row_bytes))
            .ok_or_else(|| anyhow!("{} plane dimensions overflow", name))?;
        if self.data.len() < required {
            bail!(
                "{} plane length mismatch: need at least {} bytes, got {}",
                name,
                required,
                self.data.len()
            );
        }
        Ok(())
    }
}

/// Planar 4:2:0 image: full resolution luma, chroma subsampled 2x2.
///
/// Construction validates the plane layout, so conversion code can index
/// without bounds surprises.
#[derive(Clone, Debug)]
pub struct YuvImage {
    width: u32,
    height: u32,
    y: Plane,
    u: Plane,
    v: Plane,
}

impl YuvImage {
    pub fn new(width: u32, height: u32, y: Plane, u: Plane, v: Plane) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("YUV image dimensions must be non-zero, got {}x{}", width, height);
        }
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        if y.pixel_stride != 1 {
            bail!("Y plane pixel stride must be 1, got {}", y.pixel_stride);
        }
        y.validate("Y", w, h)?;
        u.validate("U", cw, ch)?;
        v.validate("V", cw, ch)?;
        if u.row_stride != v.row_stride || u.pixel_stride != v.pixel_stride {
            bail!("U and V planes must share row and pixel strides");
        }
        Ok(Self {
            width,
            height,
            y,
            u,
            v,
        })
    }

    /// Build from a tightly packed I420 buffer (Y, then U, then V).
    pub fn from_i420(width: u32, height: u32, bytes: &[u8]) -> Result<Self> {
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        let luma = w * h;
        let chroma = cw * ch;
        if bytes.len() != luma + 2 * chroma {
            bail!(
                "I420 frame length mismatch: expected {}, got {}",
                luma + 2 * chroma,
                bytes.len()
            );
        }
        Self::new(
            width,
            height,
            Plane::new(bytes[..luma].to_vec(), w, 1),
            Plane::new(bytes[luma..luma + chroma].to_vec(), cw, 1),
            Plane::new(bytes[luma + chroma..].to_vec(), cw, 1),
        )
    }

    /// Build from an NV12 buffer (Y, then interleaved UV).
    pub fn from_nv12(width: u32, height: u32, bytes: &[u8]) -> Result<Self> {
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        let luma = w * h;
        let chroma = cw * 2 * ch;
        if bytes.len() != luma + chroma {
            bail!(
                "NV12 frame length mismatch: expected {}, got {}",
                luma + chroma,
                bytes.len()
            );
        }
        let uv = &bytes[luma..];
        Self::new(
            width,
            height,
            Plane::new(bytes[..luma].to_vec(), w, 1),
            Plane::new(uv.to_vec(), cw * 2, 2),
            Plane::new(uv[1..].to_vec(), cw * 2, 2),
        )
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn y(&self) -> &Plane {
        &self.y
    }

    pub fn u(&self) -> &Plane {
        &self.u
    }

    pub fn v(&self) -> &Plane {
        &self.v
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Callback that returns a frame's buffer slot to the producer.
pub type ReleaseHook = Box<dyn FnOnce(u64) + Send>;

/// One camera capture handed to the analysis worker.
///
/// Deliberately not `Clone`: the worker owns the handle until it is released.
/// The release hook runs exactly once, from `close()` or from `Drop`, so every
/// exit path (including unwinding) gives the slot back.
pub struct Frame {
    id: u64,
    width: u32,
    height: u32,
    rotation: Rotation,
    image: Option<YuvImage>,
    release: Option<ReleaseHook>,
}

impl Frame {
    /// Frame carrying a decoded planar image.
    pub fn from_image(id: u64, image: YuvImage, rotation: Rotation) -> Self {
        Self {
            id,
            width: image.width(),
            height: image.height(),
            rotation,
            image: Some(image),
            release: None,
        }
    }

    /// Frame whose underlying image handle is absent.
    pub fn without_image(id: u64, width: u32, height: u32, rotation: Rotation) -> Self {
        Self {
            id,
            width,
            height,
            rotation,
            image: None,
            release: None,
        }
    }

    /// Attach the callback that hands the buffer back to the producer.
    pub fn with_release_hook(mut self, hook: impl FnOnce(u64) + Send + 'static) -> Self {
        self.release = Some(Box::new(hook));
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Width of the attached image, or the advertised width when there is none.
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn image(&self) -> Option<&YuvImage> {
        self.image.as_ref()
    }

    /// Release the underlying buffer. Consumes the handle.
    pub fn close(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if let Some(hook) = self.release.take() {
            hook(self.id);
        }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("rotation", &self.rotation)
            .field("has_image", &self.image.is_some())
            .field("released", &self.release.is_none())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
