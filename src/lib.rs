//! ROI Detector
//!
//! Real-time region-of-interest detection over a live camera stream.
//!
//! # Architecture
//!
//! Every frame goes through the same cycle on a single analysis worker:
//!
//! 1. **Release early**: the camera buffer is returned as soon as the RGB
//!    bitmap has been derived, on every path, exactly once.
//! 2. **Crop by rotation**: the configured height/width crop percentages are
//!    swapped for quarter-turn frames so the region stays fixed on screen.
//! 3. **Classify**: the upright crop goes to the inference client; the result
//!    arrives asynchronously and is never retried.
//! 4. **Notify**: the listener hears a binary detected/undetected signal for
//!    the configured target classes.
//!
//! A newer frame always supersedes an unconsumed older one, so analysis
//! latency never turns into backlog.
//!
//! # Module Structure
//!
//! - `frame`: YUV buffers and release-once frames
//! - `geometry`: crop rectangle and rotate-and-crop transform
//! - `inference`: classifier options, backends, asynchronous client
//! - `listener`: detection listener capability
//! - `overlay`: renderer-facing listener and overlay geometry
//! - `analyzer`: per-frame analysis cycle
//! - `pipeline`: keep-latest slot and analysis worker
//! - `camera`: frame sources and buffer pool
//! - `config`: file + environment configuration

pub mod analyzer;
pub mod camera;
pub mod config;
pub mod frame;
pub mod geometry;
pub mod inference;
pub mod listener;
pub mod overlay;
pub mod pipeline;
pub mod ui;

pub use analyzer::{
    display_text, AnalysisOutcome, FrameAnalyzer, FrameReport, LabeledBox, TargetClasses,
    DEFAULT_TARGET_CLASS,
};
pub use camera::{BufferPool, CameraConfig, CameraSource, CameraStats};
pub use config::DetectorConfig;
pub use frame::{Frame, Plane, ReleaseHook, Rotation, YuvImage};
pub use geometry::{crop_fractions, crop_rect, rotate_and_crop, to_bitmap, CropSpec, Rect};
pub use inference::{
    ClassifierBackend, ClassifierOptions, DetectedObject, DetectionResult, DetectorMode,
    InferenceClient, Label, ModelRef, PendingClassification, StubBackend, ThreadedClassifier,
};
pub use listener::{DetectionEvent, DetectionListener, NoopListener, RecordingListener};
pub use overlay::OverlayListener;
pub use pipeline::{AnalysisWorker, LatestFrameSlot, Offer, PipelineStats};
