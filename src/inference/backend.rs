use anyhow::Result;
use image::RgbImage;

use crate::frame::Rotation;

use super::result::DetectedObject;

/// Synchronous classifier engine.
///
/// Backends see one image at a time and return raw objects; threshold and
/// ranking policy is applied afterwards by `ClassifierOptions`. The image is
/// borrowed for the duration of the call only.
pub trait ClassifierBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Classify one image. `rotation` is orientation metadata for the engine;
    /// the bitmap has already been rotated upright.
    fn classify(&mut self, image: &RgbImage, rotation: Rotation) -> Result<Vec<DetectedObject>>;

    /// Optional warm-up hook, run once before the first request.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<B: ClassifierBackend + ?Sized> ClassifierBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn classify(&mut self, image: &RgbImage, rotation: Rotation) -> Result<Vec<DetectedObject>> {
        (**self).classify(image, rotation)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
