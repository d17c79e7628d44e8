//! roi_detectd - region-of-interest detector daemon
//!
//! This daemon:
//! 1. Loads configuration (file named by ROI_DETECT_CONFIG, then env overrides)
//! 2. Starts the classifier (stub engine, or an ONNX model with `backend-tract`)
//! 3. Captures frames from the configured camera source at the target rate
//! 4. Hands every frame to the keep-latest analysis worker
//! 5. Logs captions, detection state changes, and periodic health

use anyhow::Result;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use roi_detector::ui::{Ui, UiMode};
use roi_detector::{
    AnalysisOutcome, AnalysisWorker, CameraSource, ClassifierBackend, DetectedObject,
    DetectionEvent, DetectorConfig, FrameAnalyzer, Label, Offer, OverlayListener, Rect,
    StubBackend, ThreadedClassifier,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const DEMO_TARGET_LABEL: &str = "target";

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Stop after this many captured frames (runs until Ctrl-C otherwise).
    #[arg(long)]
    frames: Option<u64>,
    /// Terminal output style.
    #[arg(long, value_enum, default_value_t = UiMode::Auto)]
    ui: UiMode,
    /// Config file (overrides ROI_DETECT_CONFIG).
    #[arg(long, env = "ROI_DETECT_CONFIG")]
    config: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = Ui::detect(args.ui);

    let cfg = {
        let _stage = ui.stage("Load configuration");
        if let Some(path) = &args.config {
            std::env::set_var("ROI_DETECT_CONFIG", path);
        }
        DetectorConfig::load()?
    };

    let crop = cfg.crop_spec()?;
    let targets = cfg.targets();
    log::info!(
        "crop: height {}% width {}%, target classes {:?}",
        crop.height_percent(),
        crop.width_percent(),
        targets.iter().collect::<Vec<_>>()
    );

    let classifier = {
        let _stage = ui.stage("Start classifier");
        ThreadedClassifier::spawn(build_backend(&cfg)?, cfg.classifier_options()?)?
    };
    log::info!(
        "classifier backend={} model={}",
        classifier.backend_name(),
        classifier.options().model()
    );

    let overlay = Arc::new(OverlayListener::new(crop));
    let mut analyzer = FrameAnalyzer::new(crop, targets, classifier, overlay.clone());
    if let Some(timeout) = cfg.inference_timeout {
        analyzer = analyzer.with_inference_timeout(timeout);
    }

    let mut last_state = None;
    let worker = AnalysisWorker::spawn_with_observer(analyzer, move |outcome| {
        if let AnalysisOutcome::Completed(report) = outcome {
            for text in report.boxes.iter().filter_map(|b| b.text.as_deref()) {
                log::debug!("frame {}: {}", report.frame_id, text);
            }
            let state = report.final_state();
            if state.is_some() && state != last_state {
                match state {
                    Some(DetectionEvent::Detected) => {
                        log::info!("frame {}: target detected", report.frame_id)
                    }
                    Some(DetectionEvent::Undetected) => {
                        log::info!("frame {}: target lost", report.frame_id)
                    }
                    None => {}
                }
                last_state = state;
            }
        }
    })?;

    let mut source = {
        let _stage = ui.stage("Connect camera");
        let mut source = CameraSource::new(cfg.camera_config()?)?;
        source.connect()?;
        source
    };

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))?;
    }

    let frame_interval = Duration::from_secs(1) / cfg.camera.target_fps.max(1);
    let counter = ui.frame_counter(args.frames);
    let mut last_health_log = Instant::now();
    let mut captured = 0u64;

    log::info!("roi_detectd running on {}", cfg.camera.url);

    while running.load(Ordering::SeqCst) && args.frames.map_or(true, |limit| captured < limit) {
        let tick = Instant::now();

        match source.next_frame() {
            Ok(frame) => {
                captured += 1;
                if worker.submit(frame) == Offer::Replaced {
                    log::trace!("analysis busy; replaced pending frame");
                }
                counter.tick(if overlay.is_detected() { "detected" } else { "" });
            }
            Err(err) => log::warn!("capture failed: {:#}", err),
        }

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let stats = worker.stats();
            let camera = source.stats();
            log::info!(
                "health: source_healthy={}, captured={}, stalls={}, offered={}, dropped={}, analyzed={}, failed={}, timed_out={}, busy={}",
                source.is_healthy(),
                camera.frames_captured,
                camera.stalls,
                stats.offered,
                stats.dropped,
                stats.analyzed,
                stats.failed,
                stats.timed_out,
                stats.busy
            );
            last_health_log = Instant::now();
        }

        if let Some(rest) = frame_interval.checked_sub(tick.elapsed()) {
            std::thread::sleep(rest);
        }
    }
    counter.finish();

    let stats = {
        let _stage = ui.stage("Drain analysis");
        worker.shutdown()
    };
    log::info!(
        "stopped: offered={}, dropped={}, analyzed={}, skipped={}, failed={}, timed_out={}, busy={}",
        stats.offered,
        stats.dropped,
        stats.analyzed,
        stats.skipped,
        stats.failed,
        stats.timed_out,
        stats.busy
    );
    Ok(())
}

fn build_backend(cfg: &DetectorConfig) -> Result<Box<dyn ClassifierBackend>> {
    match &cfg.classifier.model_path {
        Some(path) => build_model_backend(cfg, path),
        None => {
            log::warn!("no model configured; using the scripted stub classifier");
            Ok(Box::new(demo_stub(cfg)))
        }
    }
}

#[cfg(feature = "backend-tract")]
fn build_model_backend(
    cfg: &DetectorConfig,
    path: &std::path::Path,
) -> Result<Box<dyn ClassifierBackend>> {
    let mut backend = roi_detector::inference::TractBackend::new(
        path,
        cfg.classifier.input_width,
        cfg.classifier.input_height,
    )?;
    if let Some(labels) = &cfg.classifier.labels_path {
        backend = backend.with_labels_file(labels)?;
    }
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn build_model_backend(
    _cfg: &DetectorConfig,
    path: &std::path::Path,
) -> Result<Box<dyn ClassifierBackend>> {
    anyhow::bail!("model {} requires the backend-tract feature", path.display())
}

/// Alternates a confident target sighting, a non-target object, and an empty scene.
fn demo_stub(cfg: &DetectorConfig) -> StubBackend {
    let class = cfg.target_classes.first().copied().unwrap_or_default();
    let whole = Rect::from_size(cfg.classifier.input_width, cfg.classifier.input_height);
    let sighting = DetectedObject::new(whole)
        .with_label(Label::new(DEMO_TARGET_LABEL, 0.92, class))
        .with_tracking_id(1);
    let other =
        DetectedObject::new(whole).with_label(Label::new("other", 0.85, class.wrapping_add(1)));
    let script = std::iter::repeat(vec![sighting])
        .take(30)
        .chain(std::iter::repeat(vec![other]).take(30))
        .chain(std::iter::repeat(Vec::new()).take(30))
        .collect();
    StubBackend::cycling(script)
}

