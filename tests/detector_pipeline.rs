use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use anyhow::Result;
use image::RgbImage;
use roi_detector::inference::backends::StubCall;
use roi_detector::{
    AnalysisOutcome, AnalysisWorker, ClassifierBackend, ClassifierOptions, CropSpec, DetectedObject,
    DetectionEvent, Frame, FrameAnalyzer, FrameReport, Label, ModelRef, Rect, RecordingListener,
    Rotation, StubBackend, TargetClasses, ThreadedClassifier, YuvImage,
};

fn options() -> ClassifierOptions {
    ClassifierOptions::builder(ModelRef::Builtin("stub".to_string()))
        .stream_mode()
        .enable_classification()
        .confidence_threshold(0.8)
        .max_labels(5)
        .build()
        .expect("valid options")
}

fn analyzer(stub: &StubBackend) -> FrameAnalyzer<ThreadedClassifier, Arc<RecordingListener>> {
    let client = ThreadedClassifier::spawn(stub.clone(), options()).expect("classifier");
    FrameAnalyzer::new(
        CropSpec::new(54, 8).expect("crop"),
        TargetClasses::default(),
        client,
        Arc::new(RecordingListener::new()),
    )
}

fn camera_frame(
    id: u64,
    width: u32,
    height: u32,
    rotation: Rotation,
    releases: &Arc<AtomicUsize>,
) -> Frame {
    let (w, h) = (width as usize, height as usize);
    let bytes = vec![128u8; w * h + 2 * (w.div_ceil(2) * h.div_ceil(2))];
    let image = YuvImage::from_i420(width, height, &bytes).expect("i420 layout");
    let counter = releases.clone();
    Frame::from_image(id, image, rotation).with_release_hook(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

fn completed(outcome: AnalysisOutcome) -> FrameReport {
    match outcome {
        AnalysisOutcome::Completed(report) => report,
        other => panic!("expected a completed analysis, got {:?}", other),
    }
}

fn cat(index: u32) -> DetectedObject {
    DetectedObject::new(Rect::new(10, 10, 100, 80)).with_label(Label::new("cat", 0.95, index))
}

#[test]
fn upright_frame_crops_to_the_centre_band() {
    let stub = StubBackend::new();
    let mut analyzer = analyzer(&stub);
    let releases = Arc::new(AtomicUsize::new(0));

    let report =
        completed(analyzer.analyze(camera_frame(1, 1280, 720, Rotation::Deg0, &releases)));

    assert_eq!(report.crop, Rect::new(51, 194, 1229, 526));
    assert_eq!(report.image_size, (1178, 332));
    assert_eq!(
        stub.calls(),
        vec![StubCall {
            width: 1178,
            height: 332,
            rotation: Rotation::Deg0
        }]
    );
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[test]
fn quarter_turn_frame_swaps_crop_fractions() {
    let stub = StubBackend::new();
    let mut analyzer = analyzer(&stub);
    let releases = Arc::new(AtomicUsize::new(0));

    let report =
        completed(analyzer.analyze(camera_frame(1, 1280, 720, Rotation::Deg90, &releases)));

    // Insets truncate: 1280 * 0.54 / 2 = 345.6 and 720 * 0.08 / 2 = 28.8.
    assert_eq!(report.crop, Rect::new(345, 28, 935, 692));
    // Crop is taken in sensor axes, then turned upright.
    assert_eq!(report.image_size, (664, 590));
    assert_eq!(stub.calls()[0].rotation, Rotation::Deg90);
}

#[test]
fn target_label_reports_detection_with_caption() {
    let stub = StubBackend::new();
    stub.push_objects(vec![cat(510)]);
    let mut analyzer = analyzer(&stub);
    let releases = Arc::new(AtomicUsize::new(0));

    let report = completed(analyzer.analyze(camera_frame(1, 64, 48, Rotation::Deg0, &releases)));

    assert_eq!(report.notifications, vec![DetectionEvent::Detected]);
    assert_eq!(report.boxes[0].text.as_deref(), Some("cat, 95%"));
    assert_eq!(analyzer.listener().events(), vec![DetectionEvent::Detected]);
}

#[test]
fn unlabeled_object_reports_undetected_without_caption() {
    let stub = StubBackend::new();
    stub.push_objects(vec![DetectedObject::new(Rect::new(0, 0, 8, 8))]);
    let mut analyzer = analyzer(&stub);
    let releases = Arc::new(AtomicUsize::new(0));

    let report = completed(analyzer.analyze(camera_frame(1, 64, 48, Rotation::Deg0, &releases)));

    assert_eq!(analyzer.listener().events(), vec![DetectionEvent::Undetected]);
    assert_eq!(report.boxes[0].text, None);
}

#[test]
fn low_confidence_target_is_suppressed_before_notification() {
    let stub = StubBackend::new();
    stub.push_objects(vec![DetectedObject::new(Rect::new(0, 0, 8, 8))
        .with_label(Label::new("cat", 0.5, 510))]);
    let mut analyzer = analyzer(&stub);
    let releases = Arc::new(AtomicUsize::new(0));

    completed(analyzer.analyze(camera_frame(1, 64, 48, Rotation::Deg0, &releases)));

    assert_eq!(analyzer.listener().events(), vec![DetectionEvent::Undetected]);
}

#[test]
fn mixed_objects_fire_once_per_label_and_last_call_wins() {
    // The listener hears every (object, label) pair, not one aggregate per
    // frame, so a target followed by a non-target ends up "undetected".
    let stub = StubBackend::new();
    stub.push_objects(vec![cat(510), cat(42)]);
    let mut analyzer = analyzer(&stub);
    let releases = Arc::new(AtomicUsize::new(0));

    let report = completed(analyzer.analyze(camera_frame(1, 64, 48, Rotation::Deg0, &releases)));

    assert_eq!(
        report.notifications,
        vec![DetectionEvent::Detected, DetectionEvent::Undetected]
    );
    assert_eq!(report.final_state(), Some(DetectionEvent::Undetected));
}

#[test]
fn inference_failure_is_dropped_and_next_frame_still_runs() {
    let stub = StubBackend::new();
    stub.push_error("engine unavailable");
    stub.push_objects(vec![cat(510)]);
    let mut analyzer = analyzer(&stub);
    let releases = Arc::new(AtomicUsize::new(0));

    match analyzer.analyze(camera_frame(1, 64, 48, Rotation::Deg0, &releases)) {
        AnalysisOutcome::Failed { frame_id, error } => {
            assert_eq!(frame_id, 1);
            assert!(error.to_string().contains("engine unavailable"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(analyzer.listener().events().is_empty());
    assert_eq!(releases.load(Ordering::SeqCst), 1);

    completed(analyzer.analyze(camera_frame(2, 64, 48, Rotation::Deg0, &releases)));
    assert_eq!(analyzer.listener().events(), vec![DetectionEvent::Detected]);
    assert_eq!(releases.load(Ordering::SeqCst), 2);
}

#[test]
fn frame_without_image_is_released_and_never_classified() {
    let stub = StubBackend::new();
    let mut analyzer = analyzer(&stub);
    let releases = Arc::new(AtomicUsize::new(0));
    let counter = releases.clone();
    let frame = Frame::without_image(7, 1280, 720, Rotation::Deg0).with_release_hook(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let outcome = analyzer.analyze(frame);

    assert!(matches!(outcome, AnalysisOutcome::Skipped { frame_id: 7 }));
    assert!(stub.calls().is_empty());
    assert!(analyzer.listener().events().is_empty());
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[test]
fn worker_releases_every_submitted_frame_exactly_once() {
    let stub = StubBackend::cycling(vec![vec![cat(510)], Vec::new()]);
    let (tx, rx) = mpsc::channel();
    let worker = AnalysisWorker::spawn_with_observer(analyzer(&stub), move |outcome| {
        tx.send(outcome.frame_id()).ok();
    })
    .expect("worker");
    let releases = Arc::new(AtomicUsize::new(0));

    for id in 1..=20 {
        worker.submit(camera_frame(id, 32, 24, Rotation::Deg270, &releases));
    }
    // The last submission is never superseded, so it is always analyzed.
    let mut seen = Vec::new();
    while seen.last() != Some(&20) {
        seen.push(rx.recv_timeout(Duration::from_secs(10)).expect("analysis outcome"));
    }
    let stats = worker.shutdown();

    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(stats.offered, 20);
    assert_eq!(stats.analyzed + stats.dropped, 20);
    assert_eq!(releases.load(Ordering::SeqCst), 20);
}

/// Stub engine whose first request takes `first_delay`.
struct SlowStart {
    inner: StubBackend,
    first_delay: Option<Duration>,
}

impl ClassifierBackend for SlowStart {
    fn name(&self) -> &'static str {
        "slow-start"
    }

    fn classify(&mut self, image: &RgbImage, rotation: Rotation) -> Result<Vec<DetectedObject>> {
        if let Some(delay) = self.first_delay.take() {
            std::thread::sleep(delay);
        }
        self.inner.classify(image, rotation)
    }
}

#[test]
fn slow_engine_is_not_flooded_after_a_timeout() {
    let stub = StubBackend::new();
    let backend = SlowStart {
        inner: stub.clone(),
        first_delay: Some(Duration::from_millis(200)),
    };
    let client = ThreadedClassifier::spawn(backend, options()).expect("classifier");
    let mut analyzer = FrameAnalyzer::new(
        CropSpec::new(54, 8).expect("crop"),
        TargetClasses::default(),
        client,
        Arc::new(RecordingListener::new()),
    )
    .with_inference_timeout(Duration::from_millis(40));
    let releases = Arc::new(AtomicUsize::new(0));

    let first = analyzer.analyze(camera_frame(1, 64, 48, Rotation::Deg0, &releases));
    assert!(matches!(first, AnalysisOutcome::TimedOut { frame_id: 1 }));

    // While the engine is still on frame 1, later frames are released unclassified.
    for id in 2..=10 {
        let outcome = analyzer.analyze(camera_frame(id, 64, 48, Rotation::Deg0, &releases));
        assert!(matches!(outcome, AnalysisOutcome::EngineBusy { .. }), "{outcome:?}");
    }
    assert_eq!(releases.load(Ordering::SeqCst), 10);

    std::thread::sleep(Duration::from_millis(400));
    stub.push_objects(vec![cat(510)]);
    let report = completed(analyzer.analyze(camera_frame(11, 64, 48, Rotation::Deg0, &releases)));

    assert_eq!(report.notifications, vec![DetectionEvent::Detected]);
    assert_eq!(stub.calls().len(), 2);
    assert_eq!(releases.load(Ordering::SeqCst), 11);
}
