use crate::config::{Config, TriggerMode};
use crate::sink::open_sink;
use attend_core::detector::{Detector, DetectorError};
use attend_core::recognizer::{Gallery, Recognizer, RecognizerError};
use attend_core::registry::RegistryError;
use attend_core::{
    AttendanceSink, DecisionEngine, EngineState, FaceDetector, FaceKeyer, FaceObservation,
    FaceRecognizer, GridKeyer, IdentityRegistry, LogOutcome, LogStatus, ScanReport, SinkError,
};
use attend_hw::{Camera, Frame, FrameSource, SerialTrigger, TriggerSource};
use chrono::{DateTime, Local};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// Sleep between trigger polls while no window is open.
const IDLE_POLL: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum ScannerError {
    #[error("camera error: {0}")]
    Camera(#[from] attend_hw::CameraError),
    #[error("identity registry: {0}")]
    Registry(#[from] RegistryError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("attendance sink: {0}")]
    Sink(#[from] SinkError),
    #[error("failed to spawn scanner thread: {0}")]
    Spawn(std::io::Error),
    #[error("scanner thread panicked")]
    Panicked,
}

/// Messages from the async side to the scanner thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerCommand {
    /// Manual scan request, same effect as a motion signal.
    Trigger,
    Quit,
}

/// Handle to the scanner thread.
pub struct ScannerHandle {
    tx: mpsc::Sender<ScannerCommand>,
    thread: std::thread::JoinHandle<()>,
}

impl ScannerHandle {
    /// A sender for other tasks (stdin reader, signal handler).
    pub fn sender(&self) -> mpsc::Sender<ScannerCommand> {
        self.tx.clone()
    }

    /// Block until the thread exits. A panic on the thread is an error.
    pub fn join(self) -> Result<(), ScannerError> {
        self.thread.join().map_err(|_| {
            tracing::error!("scanner thread panicked");
            ScannerError::Panicked
        })
    }
}

/// Camera -> detector -> recognizer -> decision engine, one frame per step.
pub struct ScanLoop<F, D, R, S, K = GridKeyer> {
    source: F,
    detector: D,
    recognizer: R,
    engine: DecisionEngine<S, K>,
    trigger: Option<Box<dyn TriggerSource + Send>>,
    post_scan_pause: Duration,
}

/// What one step produced.
#[derive(Debug, Default)]
pub struct Step {
    /// Continuous-mode decisions for this frame.
    pub outcomes: Vec<LogOutcome>,
    /// Set when a scan window closed during this step.
    pub scan: Option<ScanReport>,
}

impl<F, D, R, S, K> ScanLoop<F, D, R, S, K>
where
    F: FrameSource,
    D: Detector,
    R: Recognizer,
    S: AttendanceSink,
    K: FaceKeyer,
{
    pub fn new(
        source: F,
        detector: D,
        recognizer: R,
        engine: DecisionEngine<S, K>,
        trigger: Option<Box<dyn TriggerSource + Send>>,
    ) -> Self {
        Self {
            source,
            detector,
            recognizer,
            engine,
            trigger,
            post_scan_pause: Duration::ZERO,
        }
    }

    pub fn with_post_scan_pause(mut self, pause: Duration) -> Self {
        self.post_scan_pause = pause;
        self
    }

    #[cfg(test)]
    pub fn engine(&self) -> &DecisionEngine<S, K> {
        &self.engine
    }

    /// Poll triggers, then process one frame if a scan is in progress.
    ///
    /// Per-frame failures are logged and never end the loop.
    pub fn step(&mut self, now: DateTime<Local>, manual_trigger: bool) -> Step {
        let motion = self.trigger.as_mut().and_then(|t| t.poll()).is_some();
        if manual_trigger {
            tracing::info!("manual scan requested");
        }
        if (motion || manual_trigger) && !self.engine.trigger(now) {
            if let Some(left) = self.engine.window_remaining(now) {
                tracing::debug!(remaining_ms = left.num_milliseconds(), "scan already in progress");
            }
        }

        if self.engine.state() == EngineState::Idle {
            return Step::default();
        }

        let mut step = Step::default();
        match self.source.next_frame() {
            Ok(frame) => {
                let faces = self.observe(&frame);
                let report = self.engine.process_frame(now, &faces);
                for (face, label) in faces.iter().zip(&report.labels) {
                    tracing::debug!(
                        frame = frame.sequence,
                        x = face.bbox.x,
                        y = face.bbox.y,
                        id = face.prediction.identity_id,
                        distance = face.prediction.confidence,
                        %label,
                        "face"
                    );
                }
                step.outcomes = report.outcomes;
            }
            Err(e) => tracing::warn!(error = %e, "frame capture failed; skipping"),
        }

        step.scan = self.engine.tick(now);
        if let Some(report) = &step.scan {
            if report.tallies.is_empty() {
                tracing::info!(frames = report.frames, "no faces recognized during scan");
            }
            for (name, count) in &report.tallies {
                tracing::debug!(name = %name, frames = count, "scan tally");
            }
            for outcome in &report.outcomes {
                if let LogStatus::CoolingDown { remaining } = &outcome.status {
                    tracing::info!(
                        name = %outcome.name,
                        remaining_secs = remaining.num_seconds(),
                        "already logged recently"
                    );
                }
            }
        }

        let logged = step
            .outcomes
            .iter()
            .chain(step.scan.iter().flat_map(|r| r.outcomes.iter()))
            .filter(|o| o.is_logged())
            .count();
        if let Some(trigger) = self.trigger.as_mut() {
            for _ in 0..logged {
                trigger.acknowledge();
            }
        }
        step
    }

    /// Detect and classify every face in a frame. Faces that fail
    /// recognition are dropped.
    fn observe(&mut self, frame: &Frame) -> Vec<FaceObservation> {
        if frame.is_dark() {
            tracing::debug!(
                frame = frame.sequence,
                brightness = frame.avg_brightness(),
                "dark frame"
            );
            return Vec::new();
        }

        let boxes = match self.detector.detect(&frame.data, frame.width, frame.height) {
            Ok(boxes) => boxes,
            Err(e) => {
                tracing::warn!(error = %e, "face detection failed");
                return Vec::new();
            }
        };

        boxes
            .into_iter()
            .filter_map(|bbox| {
                match self
                    .recognizer
                    .predict(&frame.data, frame.width, frame.height, &bbox)
                {
                    Ok(prediction) => Some(FaceObservation { bbox, prediction }),
                    Err(e) => {
                        tracing::debug!(error = %e, "recognition failed for face");
                        None
                    }
                }
            })
            .collect()
    }

    /// Run until `Quit` arrives or every sender is dropped.
    pub fn run(mut self, mut rx: mpsc::Receiver<ScannerCommand>) {
        tracing::info!("scanner thread started");
        loop {
            let mut manual = false;
            loop {
                match rx.try_recv() {
                    Ok(ScannerCommand::Trigger) => manual = true,
                    Ok(ScannerCommand::Quit) | Err(TryRecvError::Disconnected) => {
                        tracing::info!("scanner thread exiting");
                        return;
                    }
                    Err(TryRecvError::Empty) => break,
                }
            }

            let step = self.step(Local::now(), manual);

            if step.scan.is_some() && !self.post_scan_pause.is_zero() {
                std::thread::sleep(self.post_scan_pause);
                // Motion reported during the pause is stale.
                if let Some(trigger) = self.trigger.as_mut() {
                    let _ = trigger.poll();
                }
            } else if self.engine.state() == EngineState::Idle {
                std::thread::sleep(IDLE_POLL);
            }
        }
    }
}

/// Open the motion sensor link. Failure leaves the daemon in manual-only mode.
fn open_trigger(config: &Config) -> Option<Box<dyn TriggerSource + Send>> {
    if config.trigger != TriggerMode::Motion {
        return None;
    }

    let path = match &config.serial_port {
        Some(path) => path.clone(),
        None => match attend_hw::ports::discover_serial_bridge() {
            Some(candidate) => candidate.path,
            None => {
                tracing::warn!("no serial trigger found; manual triggering only");
                return None;
            }
        },
    };

    match SerialTrigger::open(&path, config.serial_baud) {
        Ok(trigger) => Some(Box::new(trigger)),
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "serial trigger unavailable; manual triggering only");
            None
        }
    }
}

/// Spawn the scanner on a dedicated OS thread.
///
/// Opens the camera, loads the registry, gallery and both ONNX models, and
/// opens the attendance sink. Fails fast if any of these is unavailable.
/// A missing motion sensor is not fatal.
pub fn spawn_scanner(config: &Config) -> Result<ScannerHandle, ScannerError> {
    let mut camera = Camera::open(&config.camera_device)?;
    if config.warmup_frames > 0 {
        let delivered = camera.discard_frames(config.warmup_frames);
        tracing::debug!(requested = config.warmup_frames, delivered, "warmup frames discarded");
    }

    let registry = IdentityRegistry::load(&config.registry_path)?;

    let detector = FaceDetector::load(&config.scrfd_model_path())?
        .with_min_score(config.detector_min_score)
        .with_min_face_size(config.min_face_size);

    let gallery = Gallery::load(&config.gallery_path)?;
    let recognizer = FaceRecognizer::load(&config.arcface_model_path(), gallery)?;

    let sink = open_sink(config)?;
    let engine = DecisionEngine::with_keyer(
        config.engine_config(),
        registry,
        sink,
        GridKeyer::new(config.grid_cell_size),
    );

    let trigger = open_trigger(config);
    let scan_loop = ScanLoop::new(camera, detector, recognizer, engine, trigger)
        .with_post_scan_pause(Duration::from_millis(config.post_scan_pause_ms));

    let (tx, rx) = mpsc::channel::<ScannerCommand>(8);
    let thread = std::thread::Builder::new()
        .name("attend-scanner".into())
        .spawn(move || scan_loop.run(rx))
        .map_err(ScannerError::Spawn)?;

    Ok(ScannerHandle { tx, thread })
}
