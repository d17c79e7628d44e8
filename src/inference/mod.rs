//! Inference client boundary.
//!
//! The classifier engine itself is opaque. This module fixes the contract the
//! analyzer relies on: one image in, one asynchronous `DetectionResult` (or
//! error) out, delivered exactly once with no implicit retry.

mod backend;
pub mod backends;
mod client;
mod options;
mod result;

pub use backend::ClassifierBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use client::{Completer, InferenceClient, PendingClassification, ThreadedClassifier};
pub use options::{
    ClassifierOptions, ClassifierOptionsBuilder, DetectorMode, ModelRef,
    DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_MAX_LABELS,
};
pub use result::{DetectedObject, DetectionResult, Label};
