use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::frame::Rotation;
use crate::inference::backend::ClassifierBackend;
use crate::inference::result::DetectedObject;

/// One request observed by a `StubBackend`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StubCall {
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
}

#[derive(Clone, Debug)]
enum StubReply {
    Objects(Vec<DetectedObject>),
    Error(String),
}

#[derive(Default)]
struct StubState {
    script: VecDeque<StubReply>,
    cycle: bool,
    calls: Vec<StubCall>,
}

/// Scripted backend for tests and model-less runs.
///
/// Replies are consumed in order; once the script runs dry every request
/// finds nothing. A cycling stub replays its script forever. Clones share
/// state, so a test can keep a handle after moving the backend into a client.
#[derive(Clone, Default)]
pub struct StubBackend {
    state: Arc<Mutex<StubState>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay `replies` in a loop.
    pub fn cycling(replies: Vec<Vec<DetectedObject>>) -> Self {
        let backend = Self::new();
        {
            let mut state = backend.lock();
            state.cycle = true;
            state.script = replies.into_iter().map(StubReply::Objects).collect();
        }
        backend
    }

    pub fn push_objects(&self, objects: Vec<DetectedObject>) {
        self.lock().script.push_back(StubReply::Objects(objects));
    }

    pub fn push_error(&self, message: impl Into<String>) {
        self.lock().script.push_back(StubReply::Error(message.into()));
    }

    /// Requests seen so far, oldest first.
    pub fn calls(&self) -> Vec<StubCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, StubState> {
        // A panicking test thread must not hide the script from the others.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ClassifierBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn classify(&mut self, image: &RgbImage, rotation: Rotation) -> Result<Vec<DetectedObject>> {
        let mut state = self.lock();
        state.calls.push(StubCall {
            width: image.width(),
            height: image.height(),
            rotation,
        });

        let Some(reply) = state.script.pop_front() else {
            return Ok(Vec::new());
        };
        if state.cycle {
            state.script.push_back(reply.clone());
        }
        match reply {
            StubReply::Objects(objects) => Ok(objects),
            StubReply::Error(message) => Err(anyhow!(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use crate::inference::result::Label;

    fn cat() -> Vec<DetectedObject> {
        vec![DetectedObject::new(Rect::new(0, 0, 4, 4)).with_label(Label::new("cat", 0.9, 510))]
    }

    #[test]
    fn stub_replays_script_then_finds_nothing() -> Result<()> {
        let mut backend = StubBackend::new();
        backend.push_objects(cat());
        backend.push_error("boom");

        let image = RgbImage::new(4, 2);
        assert_eq!(backend.classify(&image, Rotation::Deg0)?.len(), 1);
        assert!(backend.classify(&image, Rotation::Deg0).is_err());
        assert!(backend.classify(&image, Rotation::Deg90)?.is_empty());

        let calls = backend.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(
            calls[2],
            StubCall {
                width: 4,
                height: 2,
                rotation: Rotation::Deg90
            }
        );
        Ok(())
    }

    #[test]
    fn cycling_stub_repeats() -> Result<()> {
        let mut backend = StubBackend::cycling(vec![cat(), Vec::new()]);
        let image = RgbImage::new(1, 1);
        let sizes: Vec<usize> = (0..4)
            .map(|_| backend.classify(&image, Rotation::Deg0).map(|o| o.len()))
            .collect::<Result<_>>()?;
        assert_eq!(sizes, vec![1, 0, 1, 0]);
        Ok(())
    }
}
