//! Per-frame analysis.
//!
//! `FrameAnalyzer::analyze` takes one camera frame through the whole cycle:
//! crop-rect derivation, YUV conversion, rotate + crop, frame release,
//! classification, and listener notification. The only state carried between
//! frames is a request abandoned by a timeout; overlapping calls are ruled
//! out by the single worker that owns the analyzer.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::frame::Frame;
use crate::geometry::{self, CropSpec, Rect};
use crate::inference::{DetectedObject, DetectionResult, InferenceClient, PendingClassification};
use crate::listener::{DetectionEvent, DetectionListener};

/// Class index treated as the target when nothing else is configured.
pub const DEFAULT_TARGET_CLASS: u32 = 510;

/// Label indices that count as a positive detection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetClasses(BTreeSet<u32>);

impl TargetClasses {
    pub fn new(indices: impl IntoIterator<Item = u32>) -> Self {
        Self(indices.into_iter().collect())
    }

    pub fn contains(&self, index: u32) -> bool {
        self.0.contains(&index)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }
}

impl Default for TargetClasses {
    fn default() -> Self {
        Self::new([DEFAULT_TARGET_CLASS])
    }
}

/// Object box with its display caption, if it had any label.
#[derive(Clone, Debug, PartialEq)]
pub struct LabeledBox {
    pub bounding_box: Rect,
    pub text: Option<String>,
}

/// What one successful analysis cycle produced.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameReport {
    pub frame_id: u64,
    /// Crop rect in sensor axes.
    pub crop: Rect,
    /// Size of the image submitted for classification.
    pub image_size: (u32, u32),
    pub result: DetectionResult,
    pub boxes: Vec<LabeledBox>,
    /// Listener calls fired for this frame, in order.
    pub notifications: Vec<DetectionEvent>,
}

impl FrameReport {
    /// State an observer holds after this frame (last call wins).
    pub fn final_state(&self) -> Option<DetectionEvent> {
        self.notifications.last().copied()
    }
}

#[derive(Debug)]
pub enum AnalysisOutcome {
    /// Frame had no image; nothing was transformed or classified.
    Skipped { frame_id: u64 },
    Completed(FrameReport),
    /// Engine reported an error. No listener call was made.
    Failed { frame_id: u64, error: anyhow::Error },
    /// No answer within the configured timeout. No listener call was made.
    TimedOut { frame_id: u64 },
    /// A timed-out request still occupies the engine; the frame was released
    /// without being classified.
    EngineBusy { frame_id: u64 },
}

impl AnalysisOutcome {
    pub fn frame_id(&self) -> u64 {
        match self {
            AnalysisOutcome::Skipped { frame_id }
            | AnalysisOutcome::Failed { frame_id, .. }
            | AnalysisOutcome::TimedOut { frame_id }
            | AnalysisOutcome::EngineBusy { frame_id } => *frame_id,
            AnalysisOutcome::Completed(report) => report.frame_id,
        }
    }
}

/// Caption for an object's best label: `"<label>, <percent>%"`.
pub fn display_text(object: &DetectedObject) -> Option<String> {
    object.top_label().map(|label| {
        format!(
            "{}, {}%",
            label.text,
            (label.confidence * 100.0).round() as i32
        )
    })
}

pub struct FrameAnalyzer<C, L> {
    crop: CropSpec,
    targets: TargetClasses,
    client: C,
    listener: L,
    inference_timeout: Option<Duration>,
    /// Request abandoned by a timeout, with the frame it was for.
    abandoned: Option<(u64, PendingClassification)>,
}

impl<C: InferenceClient, L: DetectionListener> FrameAnalyzer<C, L> {
    pub fn new(crop: CropSpec, targets: TargetClasses, client: C, listener: L) -> Self {
        Self {
            crop,
            targets,
            client,
            listener,
            inference_timeout: None,
            abandoned: None,
        }
    }

    /// Give up on a classification after `timeout`. A late result is discarded,
    /// and no new request is started until it has arrived.
    pub fn with_inference_timeout(mut self, timeout: Duration) -> Self {
        self.inference_timeout = Some(timeout);
        self
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    /// Run one analysis cycle. The frame is released exactly once on every path.
    pub fn analyze(&mut self, frame: Frame) -> AnalysisOutcome {
        let frame_id = frame.id();
        let rotation = frame.rotation();

        let image = match frame.image() {
            Some(image) => image,
            None => {
                log::trace!("frame {}: no image attached, skipping", frame_id);
                frame.close();
                return AnalysisOutcome::Skipped { frame_id };
            }
        };
        if self.engine_busy(frame_id) {
            frame.close();
            return AnalysisOutcome::EngineBusy { frame_id };
        }

        // Crop against the buffer actually delivered, not the advertised size.
        let crop = geometry::crop_rect(image.width(), image.height(), rotation, self.crop);
        let bitmap = geometry::to_bitmap(image);
        let cropped = geometry::rotate_and_crop(&bitmap, rotation, crop);
        drop(bitmap);
        frame.close();

        let image_size = cropped.dimensions();
        // Rotation is already applied to the bitmap; the engine still gets it as metadata.
        let pending = self.client.classify(cropped, rotation);
        let completion = match self.inference_timeout {
            Some(timeout) => match pending.wait_timeout(timeout) {
                Some(completion) => completion,
                None => {
                    log::warn!("frame {}: inference timed out after {:?}", frame_id, timeout);
                    self.abandoned = Some((frame_id, pending));
                    return AnalysisOutcome::TimedOut { frame_id };
                }
            },
            None => pending.wait(),
        };

        match completion {
            Err(error) => {
                log::error!("frame {}: inference failed: {:#}", frame_id, error);
                AnalysisOutcome::Failed { frame_id, error }
            }
            Ok(result) => {
                let notifications = self.notify(frame_id, &result);
                let boxes = result
                    .iter()
                    .map(|object| LabeledBox {
                        bounding_box: object.bounding_box,
                        text: display_text(object),
                    })
                    .collect();
                AnalysisOutcome::Completed(FrameReport {
                    frame_id,
                    crop,
                    image_size,
                    result,
                    boxes,
                    notifications,
                })
            }
        }
    }

    /// Whether an abandoned request still holds the engine. A late result is
    /// dropped here, freeing the engine for the current frame.
    fn engine_busy(&mut self, frame_id: u64) -> bool {
        let late = match &self.abandoned {
            Some((_, pending)) => pending.try_wait(),
            None => return false,
        };
        match late {
            None => {
                log::debug!(
                    "frame {}: engine still busy with a timed-out request, releasing",
                    frame_id
                );
                true
            }
            Some(result) => {
                if let Some((stale_id, _)) = self.abandoned.take() {
                    log::debug!(
                        "frame {}: discarding late inference result ({})",
                        stale_id,
                        if result.is_ok() { "ok" } else { "error" }
                    );
                }
                false
            }
        }
    }

    /// One listener call per (object, label); unlabeled objects count as undetected.
    fn notify(&self, frame_id: u64, result: &DetectionResult) -> Vec<DetectionEvent> {
        let mut events = Vec::new();
        for (index, object) in result.iter().enumerate() {
            let b = object.bounding_box;
            log::debug!(
                "frame {} object {}: tracking_id={:?} box=({}, {}) - ({}, {})",
                frame_id,
                index,
                object.tracking_id,
                b.left,
                b.top,
                b.right,
                b.bottom
            );

            if object.labels.is_empty() {
                self.listener.on_object_undetected();
                events.push(DetectionEvent::Undetected);
                continue;
            }

            for label in &object.labels {
                log::debug!(
                    "  label {:?} index={} confidence={:.3}",
                    label.text,
                    label.index,
                    label.confidence
                );
                if self.targets.contains(label.index) {
                    self.listener.on_object_detected();
                    events.push(DetectionEvent::Detected);
                } else {
                    self.listener.on_object_undetected();
                    events.push(DetectionEvent::Undetected);
                }
            }
        }
        events
    }
}
