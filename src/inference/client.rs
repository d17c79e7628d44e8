use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use image::RgbImage;

use crate::frame::Rotation;

use super::backend::ClassifierBackend;
use super::options::ClassifierOptions;
use super::result::DetectionResult;

/// Asynchronous classifier as seen by the analyzer.
///
/// Each call starts exactly one request and returns its pending result.
pub trait InferenceClient: Send {
    fn classify(&mut self, image: RgbImage, rotation: Rotation) -> PendingClassification;
}

impl<C: InferenceClient + ?Sized> InferenceClient for Box<C> {
    fn classify(&mut self, image: RgbImage, rotation: Rotation) -> PendingClassification {
        (**self).classify(image, rotation)
    }
}

// ----------------------------------------------------------------------------
// Pending result
// ----------------------------------------------------------------------------

/// Result of one in-flight request. Delivered at most once.
pub struct PendingClassification {
    rx: Receiver<Result<DetectionResult>>,
}

/// Completion side of a `PendingClassification`.
pub struct Completer {
    tx: SyncSender<Result<DetectionResult>>,
}

impl PendingClassification {
    /// A request/completion pair.
    pub fn new() -> (Completer, Self) {
        let (tx, rx) = mpsc::sync_channel(1);
        (Completer { tx }, Self { rx })
    }

    /// An already completed request.
    pub fn ready(result: Result<DetectionResult>) -> Self {
        let (completer, pending) = Self::new();
        completer.complete(result);
        pending
    }

    /// Block until the engine answers. A dropped completer is reported as an error.
    pub fn wait(self) -> Result<DetectionResult> {
        self.rx.recv().map_err(|_| dropped_request())?
    }

    /// Block for at most `timeout`. `None` means the request is still running.
    ///
    /// The request stays pending after a timeout, so the caller can keep it
    /// and find out later when the engine is free again.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<DetectionResult>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(dropped_request())),
        }
    }

    /// Non-blocking poll. `None` means the request is still running.
    pub fn try_wait(&self) -> Option<Result<DetectionResult>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(dropped_request())),
        }
    }
}

fn dropped_request() -> anyhow::Error {
    anyhow!("inference engine dropped the request without a result")
}

impl Completer {
    /// Deliver the result. Consumes the completer so a request completes once.
    pub fn complete(self, result: Result<DetectionResult>) {
        // The waiter may have given up (timeout); nothing to do then.
        let _ = self.tx.send(result);
    }
}

// ----------------------------------------------------------------------------
// Threaded client
// ----------------------------------------------------------------------------

struct Request {
    image: RgbImage,
    rotation: Rotation,
    completer: Completer,
}

/// Runs a `ClassifierBackend` on a dedicated inference thread.
///
/// Requests are processed in submission order. Dropping the client closes the
/// request channel and joins the thread after the in-flight request finishes.
pub struct ThreadedClassifier {
    tx: Option<mpsc::Sender<Request>>,
    join: Option<JoinHandle<()>>,
    backend_name: &'static str,
    options: ClassifierOptions,
}

impl ThreadedClassifier {
    pub fn spawn<B: ClassifierBackend + 'static>(
        mut backend: B,
        options: ClassifierOptions,
    ) -> Result<Self> {
        let backend_name = backend.name();
        backend
            .warm_up()
            .with_context(|| format!("warm up {} backend", backend_name))?;

        let (tx, rx) = mpsc::channel::<Request>();
        let thread_options = options.clone();
        let join = std::thread::Builder::new()
            .name(format!("inference-{}", backend_name))
            .spawn(move || {
                for request in rx {
                    let result = backend
                        .classify(&request.image, request.rotation)
                        .map(|objects| thread_options.post_process(objects));
                    request.completer.complete(result);
                }
                log::debug!("inference thread for {} backend exiting", backend_name);
            })
            .context("spawn inference thread")?;

        log::info!(
            "classifier ready: backend={} model={} mode={:?} threshold={:.2}",
            backend_name,
            options.model(),
            options.mode(),
            options.confidence_threshold()
        );

        Ok(Self {
            tx: Some(tx),
            join: Some(join),
            backend_name,
            options,
        })
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    pub fn options(&self) -> &ClassifierOptions {
        &self.options
    }
}

impl InferenceClient for ThreadedClassifier {
    fn classify(&mut self, image: RgbImage, rotation: Rotation) -> PendingClassification {
        let (completer, pending) = PendingClassification::new();
        let request = Request {
            image,
            rotation,
            completer,
        };
        match &self.tx {
            Some(tx) => {
                if let Err(mpsc::SendError(request)) = tx.send(request) {
                    request
                        .completer
                        .complete(Err(anyhow!("inference thread is not running")));
                }
            }
            None => request
                .completer
                .complete(Err(anyhow!("classifier has been shut down"))),
        }
        pending
    }
}

impl Drop for ThreadedClassifier {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("inference thread for {} backend panicked", self.backend_name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use crate::inference::backends::StubBackend;
    use crate::inference::options::ModelRef;
    use crate::inference::result::{DetectedObject, Label};

    fn options() -> ClassifierOptions {
        ClassifierOptions::builder(ModelRef::Builtin("stub".into()))
            .stream_mode()
            .enable_classification()
            .confidence_threshold(0.8)
            .build()
            .unwrap()
    }

    #[test]
    fn ready_pending_delivers_result() -> Result<()> {
        let pending = PendingClassification::ready(Ok(DetectionResult::default()));
        assert!(pending.wait()?.is_empty());
        Ok(())
    }

    #[test]
    fn dropped_completer_is_an_error() {
        let (completer, pending) = PendingClassification::new();
        drop(completer);
        assert!(pending.wait().is_err());
    }

    #[test]
    fn wait_timeout_reports_running_request() {
        let (_completer, pending) = PendingClassification::new();
        assert!(pending.wait_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn timed_out_request_can_still_be_collected() -> Result<()> {
        let (completer, pending) = PendingClassification::new();
        assert!(pending.wait_timeout(Duration::from_millis(5)).is_none());
        assert!(pending.try_wait().is_none());

        completer.complete(Ok(DetectionResult::default()));
        let late = pending.try_wait().expect("completed request");
        assert!(late?.is_empty());
        Ok(())
    }

    #[test]
    fn threaded_classifier_applies_options() -> Result<()> {
        let backend = StubBackend::new();
        backend.push_objects(vec![DetectedObject::new(Rect::new(0, 0, 2, 2))
            .with_label(Label::new("low", 0.2, 1))
            .with_label(Label::new("cat", 0.95, 510))]);
        let mut client = ThreadedClassifier::spawn(backend, options())?;

        let result = client.classify(RgbImage::new(2, 2), Rotation::Deg0).wait()?;
        assert_eq!(result.len(), 1);
        assert_eq!(result.objects[0].labels, vec![Label::new("cat", 0.95, 510)]);
        Ok(())
    }

    #[test]
    fn threaded_classifier_forwards_backend_errors() -> Result<()> {
        let backend = StubBackend::new();
        backend.push_error("model exploded");
        let mut client = ThreadedClassifier::spawn(backend, options())?;

        let err = client
            .classify(RgbImage::new(2, 2), Rotation::Deg90)
            .wait()
            .unwrap_err();
        assert!(err.to_string().contains("model exploded"));
        Ok(())
    }
}
