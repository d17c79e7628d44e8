//! Detection listener capability.
//!
//! The analyzer reports a two-state signal and nothing else. Calls arrive on
//! the analysis worker; implementations hand off to their own rendering
//! context if they need one.

use std::sync::{Arc, Mutex};

pub trait DetectionListener: Send + Sync {
    fn on_object_detected(&self);
    fn on_object_undetected(&self);
}

impl<L: DetectionListener + ?Sized> DetectionListener for Arc<L> {
    fn on_object_detected(&self) {
        (**self).on_object_detected()
    }

    fn on_object_undetected(&self) {
        (**self).on_object_undetected()
    }
}

/// Listener that ignores every call. Used for headless runs.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopListener;

impl DetectionListener for NoopListener {
    fn on_object_detected(&self) {}
    fn on_object_undetected(&self) {}
}

/// One listener notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionEvent {
    Detected,
    Undetected,
}

/// Listener that records every call in order.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<DetectionEvent>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DetectionEvent> {
        self.lock().clone()
    }

    /// Most recent call, which is the state an observer would show.
    pub fn last(&self) -> Option<DetectionEvent> {
        self.lock().last().copied()
    }

    fn record(&self, event: DetectionEvent) {
        self.lock().push(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<DetectionEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DetectionListener for RecordingListener {
    fn on_object_detected(&self) {
        self.record(DetectionEvent::Detected);
    }

    fn on_object_undetected(&self) {
        self.record(DetectionEvent::Undetected);
    }
}
