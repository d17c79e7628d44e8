#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops, RgbImage};
use tract_onnx::prelude::*;

use crate::frame::Rotation;
use crate::geometry::Rect;
use crate::inference::backend::ClassifierBackend;
use crate::inference::result::{DetectedObject, Label};

/// Tract-based image classifier for ONNX models.
///
/// The model takes a `1x3xHxW` float tensor in `[0, 1]` and yields one score
/// per class. The whole submitted image is reported as a single object whose
/// labels are every class score; ranking and thresholding happen in
/// `ClassifierOptions`. Loads the model from local disk only.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
    labels: Vec<String>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            labels: Vec::new(),
        })
    }

    /// Read class names, one per line, line number = class index.
    pub fn with_labels_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read labels file {}", path.display()))?;
        self.labels = raw.lines().map(|line| line.trim().to_string()).collect();
        Ok(self)
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let resized;
        let image = if image.dimensions() == (self.width, self.height) {
            image
        } else {
            resized = imageops::resize(
                image,
                self.width,
                self.height,
                imageops::FilterType::Triangle,
            );
            &resized
        };

        tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| image.get_pixel(x as u32, y as u32).0[channel] as f32 / 255.0,
        )
        .into_tensor()
    }

    fn extract_scores(&self, outputs: TVec<TValue>) -> Result<Vec<f32>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let scores: Vec<f32> = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .iter()
            .copied()
            .collect();
        if scores.iter().all(|s| (0.0..=1.0).contains(s)) {
            return Ok(scores);
        }
        // Raw logits: normalise to probabilities.
        let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exp: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
        let sum: f32 = exp.iter().sum();
        Ok(exp.into_iter().map(|e| e / sum).collect())
    }

    fn label_text(&self, index: usize) -> String {
        self.labels
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", index))
    }
}

impl ClassifierBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn classify(&mut self, image: &RgbImage, _rotation: Rotation) -> Result<Vec<DetectedObject>> {
        let input = self.build_input(image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let scores = self.extract_scores(outputs)?;

        let labels = scores
            .into_iter()
            .enumerate()
            .filter(|(_, score)| score.is_finite())
            .map(|(index, score)| Label::new(self.label_text(index), score, index as u32))
            .collect();

        Ok(vec![DetectedObject {
            bounding_box: Rect::from_size(image.width(), image.height()),
            labels,
            tracking_id: None,
        }])
    }
}
