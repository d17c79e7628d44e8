//! Analysis worker and keep-latest backpressure.
//!
//! The camera producer hands frames to `AnalysisWorker::submit`, which never
//! blocks. Frames land in a single-slot mailbox: a newer frame replaces an
//! unconsumed older one, and the older one is released on the spot. A single
//! dedicated thread takes frames from the slot and runs the analyzer on them
//! strictly in sequence, so backlog can never grow beyond one frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use anyhow::{Context, Result};

use crate::analyzer::{AnalysisOutcome, FrameAnalyzer};
use crate::frame::Frame;
use crate::inference::InferenceClient;
use crate::listener::DetectionListener;

// ----------------------------------------------------------------------------
// Latest-frame slot
// ----------------------------------------------------------------------------

/// What happened to a submitted frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Offer {
    /// Slot was empty; the frame waits for the worker.
    Queued,
    /// An unconsumed frame was dropped (and released) in favour of this one.
    Replaced,
    /// Pipeline is shut down; the frame was released unanalyzed.
    Rejected,
}

#[derive(Default)]
struct SlotState {
    frame: Option<Frame>,
    closed: bool,
}

/// Single-slot mailbox holding the most recent unconsumed frame.
#[derive(Default)]
pub struct LatestFrameSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl LatestFrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frame`, releasing whatever it supersedes. Never blocks on the consumer.
    pub fn offer(&self, frame: Frame) -> Offer {
        let superseded;
        {
            let mut state = self.lock();
            if state.closed {
                drop(state);
                frame.close();
                return Offer::Rejected;
            }
            superseded = state.frame.replace(frame);
        }
        self.ready.notify_one();

        match superseded {
            Some(old) => {
                log::trace!("dropping unconsumed frame {}", old.id());
                old.close();
                Offer::Replaced
            }
            None => Offer::Queued,
        }
    }

    /// Wait for the next frame. `None` once the slot is closed.
    pub fn take(&self) -> Option<Frame> {
        let mut state = self.lock();
        loop {
            if let Some(frame) = state.frame.take() {
                return Some(frame);
            }
            if state.closed {
                return None;
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Stop accepting frames. Returns the frame still waiting, if any.
    pub fn close(&self) -> Option<Frame> {
        let pending = {
            let mut state = self.lock();
            state.closed = true;
            state.frame.take()
        };
        self.ready.notify_all();
        pending
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ----------------------------------------------------------------------------
// Stats
// ----------------------------------------------------------------------------

/// Counters for one pipeline run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub offered: u64,
    pub dropped: u64,
    pub analyzed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub timed_out: u64,
    /// Frames released unanalyzed while a timed-out request still held the engine.
    pub busy: u64,
}

#[derive(Default)]
struct Counters {
    offered: AtomicU64,
    dropped: AtomicU64,
    analyzed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    busy: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: &AnalysisOutcome) {
        let counter = match outcome {
            AnalysisOutcome::Skipped { .. } => &self.skipped,
            AnalysisOutcome::Completed(_) => &self.analyzed,
            AnalysisOutcome::Failed { .. } => &self.failed,
            AnalysisOutcome::TimedOut { .. } => &self.timed_out,
            AnalysisOutcome::EngineBusy { .. } => &self.busy,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            offered: self.offered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            analyzed: self.analyzed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            busy: self.busy.load(Ordering::Relaxed),
        }
    }
}

// ----------------------------------------------------------------------------
// Worker
// ----------------------------------------------------------------------------

/// Dedicated single-threaded analysis worker.
///
/// Shutdown stops intake, releases the queued frame (if any) without
/// analyzing it, lets the in-flight cycle finish, and joins the thread.
pub struct AnalysisWorker {
    slot: Arc<LatestFrameSlot>,
    counters: Arc<Counters>,
    join: Option<JoinHandle<()>>,
}

impl AnalysisWorker {
    pub fn spawn<C, L>(analyzer: FrameAnalyzer<C, L>) -> Result<Self>
    where
        C: InferenceClient + 'static,
        L: DetectionListener + 'static,
    {
        Self::spawn_with_observer(analyzer, |_| {})
    }

    /// Like `spawn`, calling `observer` with every outcome on the worker thread.
    pub fn spawn_with_observer<C, L, F>(
        mut analyzer: FrameAnalyzer<C, L>,
        mut observer: F,
    ) -> Result<Self>
    where
        C: InferenceClient + 'static,
        L: DetectionListener + 'static,
        F: FnMut(&AnalysisOutcome) + Send + 'static,
    {
        let slot = Arc::new(LatestFrameSlot::new());
        let counters = Arc::new(Counters::default());

        let worker_slot = slot.clone();
        let worker_counters = counters.clone();
        let join = std::thread::Builder::new()
            .name("frame-analyzer".to_string())
            .spawn(move || {
                while let Some(frame) = worker_slot.take() {
                    let outcome = analyzer.analyze(frame);
                    worker_counters.record(&outcome);
                    observer(&outcome);
                }
                log::debug!("analysis worker exiting");
            })
            .context("spawn analysis worker")?;

        Ok(Self {
            slot,
            counters,
            join: Some(join),
        })
    }

    /// Hand a frame to the worker. Never blocks on analysis.
    pub fn submit(&self, frame: Frame) -> Offer {
        self.counters.offered.fetch_add(1, Ordering::Relaxed);
        let offer = self.slot.offer(frame);
        if offer != Offer::Queued {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        }
        offer
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    /// Stop the worker and return the final counters.
    pub fn shutdown(mut self) -> PipelineStats {
        self.stop();
        self.stats()
    }

    fn stop(&mut self) {
        if let Some(pending) = self.slot.close() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            pending.close();
        }
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("analysis worker panicked");
            }
        }
    }
}

impl Drop for AnalysisWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::TargetClasses;
    use crate::frame::{Rotation, YuvImage};
    use crate::geometry::CropSpec;
    use crate::inference::{Completer, DetectionResult, PendingClassification};
    use crate::listener::NoopListener;
    use image::RgbImage;
    use std::sync::mpsc;

    /// Hands every request's completer to the test, which decides when it finishes.
    struct GateClient(mpsc::Sender<Completer>);

    impl InferenceClient for GateClient {
        fn classify(&mut self, _image: RgbImage, _rotation: Rotation) -> PendingClassification {
            let (completer, pending) = PendingClassification::new();
            self.0.send(completer).expect("test receiver alive");
            pending
        }
    }

    fn frame(id: u64, released: &Arc<AtomicU64>) -> Frame {
        let image = YuvImage::from_i420(4, 4, &[128u8; 24]).unwrap();
        let counter = released.clone();
        Frame::from_image(id, image, Rotation::Deg0).with_release_hook(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn slot_keeps_only_latest() {
        let slot = LatestFrameSlot::new();
        let released = Arc::new(AtomicU64::new(0));
        assert_eq!(slot.offer(frame(1, &released)), Offer::Queued);
        assert_eq!(slot.offer(frame(2, &released)), Offer::Replaced);
        assert_eq!(released.load(Ordering::SeqCst), 1);

        let next = slot.take().expect("frame");
        assert_eq!(next.id(), 2);
        next.close();

        assert!(slot.close().is_none());
        assert!(slot.take().is_none());
        assert_eq!(slot.offer(frame(3, &released)), Offer::Rejected);
        assert_eq!(released.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn busy_worker_drops_intermediate_frames() {
        let (tx, rx) = mpsc::channel();
        let (outcome_tx, outcome_rx) = mpsc::channel();
        let analyzer = FrameAnalyzer::new(
            CropSpec::none(),
            TargetClasses::default(),
            GateClient(tx),
            NoopListener,
        );
        let worker = AnalysisWorker::spawn_with_observer(analyzer, move |outcome| {
            outcome_tx.send(outcome.frame_id()).ok();
        })
        .unwrap();
        let released = Arc::new(AtomicU64::new(0));

        worker.submit(frame(1, &released));
        let first = rx.recv().unwrap();
        // Frame 1 is in inference; 2 and 3 arrive meanwhile.
        assert_eq!(worker.submit(frame(2, &released)), Offer::Queued);
        assert_eq!(worker.submit(frame(3, &released)), Offer::Replaced);

        first.complete(Ok(DetectionResult::default()));
        let second = rx.recv().unwrap();
        second.complete(Ok(DetectionResult::default()));

        let analyzed: Vec<u64> = outcome_rx.iter().take(2).collect();
        assert_eq!(analyzed, vec![1, 3]);

        let stats = worker.shutdown();
        assert_eq!(stats.offered, 3);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.analyzed, 2);
        assert_eq!(released.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn shutdown_releases_queued_frame() {
        let (tx, rx) = mpsc::channel();
        let analyzer = FrameAnalyzer::new(
            CropSpec::none(),
            TargetClasses::default(),
            GateClient(tx),
            NoopListener,
        );
        let worker = AnalysisWorker::spawn(analyzer).unwrap();
        let released = Arc::new(AtomicU64::new(0));

        worker.submit(frame(1, &released));
        let in_flight = rx.recv().unwrap();
        worker.submit(frame(2, &released));

        let slot = worker.slot.clone();
        let stopper = std::thread::spawn(move || worker.shutdown());
        // Finish the in-flight request only once intake is closed.
        while !slot.lock().closed {
            std::thread::yield_now();
        }
        in_flight.complete(Ok(DetectionResult::default()));
        let stats = stopper.join().unwrap();

        assert_eq!(stats.analyzed, 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }
}
