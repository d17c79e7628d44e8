use std::path::PathBuf;

use anyhow::{bail, Result};

use super::result::{DetectedObject, DetectionResult};

/// Labels scoring below this are dropped from the ranked list.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.8;

/// Upper bound on labels kept per object.
pub const DEFAULT_MAX_LABELS: usize = 5;

/// Opaque reference to a pre-trained model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelRef {
    /// Model file on local disk.
    Path(PathBuf),
    /// Model compiled into or provided by the engine itself.
    Builtin(String),
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelRef::Path(path) => write!(f, "{}", path.display()),
            ModelRef::Builtin(name) => write!(f, "builtin:{}", name),
        }
    }
}

/// Engine scheduling mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DetectorMode {
    /// Low per-call latency on a live stream; tracking ids are kept.
    Stream,
    /// Independent images; tracking ids are meaningless and stripped.
    #[default]
    SingleImage,
}

/// Classifier configuration, fixed for the lifetime of a client.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassifierOptions {
    model: ModelRef,
    mode: DetectorMode,
    classification_enabled: bool,
    confidence_threshold: f32,
    max_labels: usize,
}

impl ClassifierOptions {
    pub fn builder(model: ModelRef) -> ClassifierOptionsBuilder {
        ClassifierOptionsBuilder {
            model,
            mode: DetectorMode::default(),
            classification_enabled: false,
            confidence_threshold: 0.0,
            max_labels: DEFAULT_MAX_LABELS,
        }
    }

    pub fn model(&self) -> &ModelRef {
        &self.model
    }

    pub fn mode(&self) -> DetectorMode {
        self.mode
    }

    pub fn classification_enabled(&self) -> bool {
        self.classification_enabled
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn max_labels(&self) -> usize {
        self.max_labels
    }

    /// Apply the configured label policy to raw engine output.
    ///
    /// Labels under the threshold are suppressed, survivors ranked best-first
    /// and truncated to `max_labels`. With classification disabled every
    /// object comes back unlabeled.
    pub fn post_process(&self, objects: Vec<DetectedObject>) -> DetectionResult {
        let objects = objects
            .into_iter()
            .map(|mut object| {
                if self.classification_enabled {
                    object
                        .labels
                        .retain(|label| label.confidence >= self.confidence_threshold);
                    object
                        .labels
                        .sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
                    object.labels.truncate(self.max_labels);
                } else {
                    object.labels.clear();
                }
                if self.mode == DetectorMode::SingleImage {
                    object.tracking_id = None;
                }
                object
            })
            .collect();
        DetectionResult::new(objects)
    }
}

pub struct ClassifierOptionsBuilder {
    model: ModelRef,
    mode: DetectorMode,
    classification_enabled: bool,
    confidence_threshold: f32,
    max_labels: usize,
}

impl ClassifierOptionsBuilder {
    pub fn detector_mode(mut self, mode: DetectorMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn stream_mode(self) -> Self {
        self.detector_mode(DetectorMode::Stream)
    }

    pub fn enable_classification(mut self) -> Self {
        self.classification_enabled = true;
        self
    }

    pub fn confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn max_labels(mut self, max_labels: usize) -> Self {
        self.max_labels = max_labels;
        self
    }

    pub fn build(self) -> Result<ClassifierOptions> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            bail!(
                "confidence threshold must be within [0, 1], got {}",
                self.confidence_threshold
            );
        }
        if self.max_labels == 0 {
            bail!("max_labels must be at least 1");
        }
        Ok(ClassifierOptions {
            model: self.model,
            mode: self.mode,
            classification_enabled: self.classification_enabled,
            confidence_threshold: self.confidence_threshold,
            max_labels: self.max_labels,
        })
    }
}
