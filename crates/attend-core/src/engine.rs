//! Attendance decision engine.
//!
//! Turns a stream of noisy per-frame recognition results into de-duplicated
//! "person X is present" events. Two variants share the cooldown gate:
//!
//! - **Windowed**: a trigger opens a scan window; each name's frame count is
//!   tallied and names seen in at least `min_occurrence_count` frames qualify
//!   when the window closes.
//! - **Continuous**: always scanning; a name qualifies the moment the
//!   smoothing buffer settles on it.
//!
//! All state (smoothing history, cooldown ledger, open window) is owned by a
//! single [`DecisionEngine`] and must be driven from one thread, frames in
//! arrival order.

use crate::cooldown::{CooldownLedger, DEFAULT_COOLDOWN_SECS};
use crate::gate::{RecognitionGate, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::registry::IdentityRegistry;
use crate::sink::AttendanceSink;
use crate::smoothing::{
    FaceKeyer, GridKeyer, SmoothingBuffer, DEFAULT_CAPACITY, DEFAULT_MIN_VOTES,
};
use crate::types::{AttendanceEvent, FaceObservation, IdentityId, Outcome, Vote};
use chrono::{DateTime, Local, TimeDelta};
use std::collections::{HashMap, HashSet};
use std::fmt;

pub const DEFAULT_SCAN_WINDOW_SECS: u64 = 5;
pub const DEFAULT_MIN_OCCURRENCES: usize = 3;
pub const DEFAULT_RESET_INTERVAL_FRAMES: u64 = 30;

/// Which qualification rule the engine applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Continuous,
    Windowed,
}

/// Engine tuning. Injected at construction, never read from globals.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub mode: ScanMode,
    /// Maximum recognition distance accepted as a match (exclusive).
    pub confidence_threshold: f32,
    pub cooldown_secs: u64,
    /// Windowed mode only.
    pub scan_window_secs: u64,
    /// Windowed mode only: frames a name must appear in to qualify.
    pub min_occurrence_count: usize,
    /// Continuous mode only: when false, any raw `Known` qualifies at once.
    pub smoothing_enabled: bool,
    pub smoothing_capacity: usize,
    pub smoothing_min_votes: usize,
    /// Continuous mode only: smoothing history is dropped every this many
    /// frames. Zero disables the periodic reset.
    pub history_reset_interval_frames: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ScanMode::Windowed,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            scan_window_secs: DEFAULT_SCAN_WINDOW_SECS,
            min_occurrence_count: DEFAULT_MIN_OCCURRENCES,
            smoothing_enabled: true,
            smoothing_capacity: DEFAULT_CAPACITY,
            smoothing_min_votes: DEFAULT_MIN_VOTES,
            history_reset_interval_frames: DEFAULT_RESET_INTERVAL_FRAMES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Scanning,
}

/// What happened to one qualifying name.
#[derive(Debug, Clone, PartialEq)]
pub enum LogStatus {
    Logged(AttendanceEvent),
    CoolingDown { remaining: TimeDelta },
    /// The sink rejected the write; the cooldown was not advanced.
    SinkFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogOutcome {
    pub name: String,
    pub status: LogStatus,
}

impl LogOutcome {
    pub fn is_logged(&self) -> bool {
        matches!(self.status, LogStatus::Logged(_))
    }
}

/// Display label for a face in the current frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaceLabel {
    Name(String),
    /// Smoothing has not gathered enough votes yet.
    Detecting,
    Unknown,
}

impl fmt::Display for FaceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaceLabel::Name(name) => f.write_str(name),
            FaceLabel::Detecting => f.write_str("Detecting..."),
            FaceLabel::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Result of feeding one frame to the engine.
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    /// One label per input face, same order.
    pub labels: Vec<FaceLabel>,
    /// Continuous mode only; windowed decisions arrive via [`DecisionEngine::tick`].
    pub outcomes: Vec<LogOutcome>,
}

/// Summary of a closed scan window.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Frames processed while the window was open.
    pub frames: u64,
    /// Per-name frame counts, highest first, ties by name.
    pub tallies: Vec<(String, usize)>,
    /// One entry per qualifying name.
    pub outcomes: Vec<LogOutcome>,
}

impl ScanReport {
    pub fn logged_names(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.is_logged())
            .map(|o| o.name.as_str())
            .collect()
    }
}

#[derive(Debug)]
struct ScanWindow {
    deadline: DateTime<Local>,
    frames: u64,
    tallies: HashMap<String, usize>,
}

/// Owns every piece of mutable attendance state.
pub struct DecisionEngine<S, K = GridKeyer> {
    config: EngineConfig,
    registry: IdentityRegistry,
    gate: RecognitionGate,
    keyer: K,
    smoothing: SmoothingBuffer,
    ledger: CooldownLedger,
    sink: S,
    window: Option<ScanWindow>,
    frames_seen: u64,
}

impl<S: AttendanceSink> DecisionEngine<S, GridKeyer> {
    pub fn new(config: EngineConfig, registry: IdentityRegistry, sink: S) -> Self {
        Self::with_keyer(config, registry, sink, GridKeyer::default())
    }
}

impl<S: AttendanceSink, K: FaceKeyer> DecisionEngine<S, K> {
    pub fn with_keyer(config: EngineConfig, registry: IdentityRegistry, sink: S, keyer: K) -> Self {
        Self {
            gate: RecognitionGate::new(config.confidence_threshold),
            smoothing: SmoothingBuffer::new(config.smoothing_capacity, config.smoothing_min_votes),
            ledger: CooldownLedger::new(config.cooldown_secs),
            config,
            registry,
            keyer,
            sink,
            window: None,
            frames_seen: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &CooldownLedger {
        &self.ledger
    }

    pub fn smoothing(&self) -> &SmoothingBuffer {
        &self.smoothing
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Forget every cooldown entry.
    pub fn reset_cooldowns(&mut self) {
        self.ledger.clear();
    }

    pub fn state(&self) -> EngineState {
        match (self.config.mode, &self.window) {
            (ScanMode::Continuous, _) | (ScanMode::Windowed, Some(_)) => EngineState::Scanning,
            (ScanMode::Windowed, None) => EngineState::Idle,
        }
    }

    /// Open a scan window. Returns false when one is already open (the
    /// window is not extended) or in continuous mode.
    pub fn trigger(&mut self, now: DateTime<Local>) -> bool {
        if self.config.mode == ScanMode::Continuous {
            return false;
        }
        if self.window.is_some() {
            tracing::debug!("trigger ignored: scan window already open");
            return false;
        }
        let secs = i64::try_from(self.config.scan_window_secs).unwrap_or(i64::MAX / 1000);
        let length = TimeDelta::try_seconds(secs).unwrap_or(TimeDelta::MAX);
        self.window = Some(ScanWindow {
            deadline: now.checked_add_signed(length).unwrap_or(now),
            frames: 0,
            tallies: HashMap::new(),
        });
        tracing::info!(window_secs = self.config.scan_window_secs, "scan window opened");
        true
    }

    /// Time left in the open window.
    pub fn window_remaining(&self, now: DateTime<Local>) -> Option<TimeDelta> {
        self.window
            .as_ref()
            .map(|w| (w.deadline - now).max(TimeDelta::zero()))
    }

    /// Feed one frame's faces. Must be called in frame arrival order.
    pub fn process_frame(&mut self, now: DateTime<Local>, faces: &[FaceObservation]) -> FrameReport {
        match self.config.mode {
            ScanMode::Windowed => self.process_windowed(now, faces),
            ScanMode::Continuous => self.process_continuous(now, faces),
        }
    }

    /// Close the window once its deadline has passed and log every name
    /// that appeared in enough frames.
    pub fn tick(&mut self, now: DateTime<Local>) -> Option<ScanReport> {
        if now < self.window.as_ref()?.deadline {
            return None;
        }
        let window = self.window.take()?;

        let mut tallies: Vec<(String, usize)> = window.tallies.into_iter().collect();
        tallies.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let min = self.config.min_occurrence_count;
        let qualifying: Vec<String> = tallies
            .iter()
            .filter(|(_, count)| *count >= min)
            .map(|(name, _)| name.clone())
            .collect();

        tracing::info!(
            frames = window.frames,
            seen = tallies.len(),
            qualifying = qualifying.len(),
            "scan window closed"
        );

        let outcomes = qualifying
            .iter()
            .map(|name| self.try_log(name, now))
            .collect();

        Some(ScanReport {
            frames: window.frames,
            tallies,
            outcomes,
        })
    }

    fn process_windowed(&mut self, now: DateTime<Local>, faces: &[FaceObservation]) -> FrameReport {
        let labels = faces
            .iter()
            .map(|face| match self.gate.classify(&face.prediction, &self.registry) {
                Outcome::Known(id) => self.label_for(id),
                Outcome::Unknown => FaceLabel::Unknown,
            })
            .collect::<Vec<_>>();

        let Some(window) = self.window.as_mut() else {
            return FrameReport { labels, outcomes: Vec::new() };
        };
        if now >= window.deadline {
            return FrameReport { labels, outcomes: Vec::new() };
        }

        window.frames += 1;
        let mut seen_this_frame = HashSet::new();
        for label in &labels {
            if let FaceLabel::Name(name) = label {
                if seen_this_frame.insert(name.as_str()) {
                    *window.tallies.entry(name.clone()).or_default() += 1;
                }
            }
        }

        FrameReport { labels, outcomes: Vec::new() }
    }

    fn process_continuous(&mut self, now: DateTime<Local>, faces: &[FaceObservation]) -> FrameReport {
        let mut report = FrameReport::default();

        for face in faces {
            let outcome = self.gate.classify(&face.prediction, &self.registry);

            let vote = if self.config.smoothing_enabled {
                let key = self.keyer.key(&face.bbox);
                self.smoothing.observe(key, outcome);
                match outcome {
                    Outcome::Unknown => None,
                    Outcome::Known(_) => Some(self.smoothing.decide(key)),
                }
            } else {
                match outcome {
                    Outcome::Unknown => None,
                    Outcome::Known(id) => Some(Vote::Identified(id)),
                }
            };

            let label = match vote {
                None => FaceLabel::Unknown,
                Some(Vote::Pending) => FaceLabel::Detecting,
                Some(Vote::Identified(id)) => self.label_for(id),
            };

            if let FaceLabel::Name(name) = &label {
                report.outcomes.push(self.try_log(name, now));
            }
            report.labels.push(label);
        }

        self.frames_seen += 1;
        let interval = self.config.history_reset_interval_frames;
        if interval > 0 && self.frames_seen % interval == 0 {
            tracing::trace!(frames = self.frames_seen, "resetting smoothing history");
            self.smoothing.reset_all();
        }

        report
    }

    fn label_for(&self, id: IdentityId) -> FaceLabel {
        match self.registry.name(id) {
            Some(name) => FaceLabel::Name(name.to_string()),
            None => FaceLabel::Unknown,
        }
    }

    /// Cooldown check, sink write and ledger update as one decision.
    /// The ledger only moves when the sink confirms the write.
    fn try_log(&mut self, name: &str, now: DateTime<Local>) -> LogOutcome {
        if let Some(remaining) = self.ledger.remaining(name, now) {
            tracing::debug!(
                name,
                remaining_secs = remaining.num_seconds(),
                "cooldown active; not logging"
            );
            return LogOutcome {
                name: name.to_string(),
                status: LogStatus::CoolingDown { remaining },
            };
        }

        let event = AttendanceEvent::present(name, now);
        match self.sink.append(&event) {
            Ok(()) => {
                self.ledger.record(name, now);
                tracing::info!(name, date = %event.date, time = %event.time, "attendance logged");
                LogOutcome {
                    name: name.to_string(),
                    status: LogStatus::Logged(event),
                }
            }
            Err(e) => {
                tracing::warn!(name, error = %e, "attendance write failed; will retry on next detection");
                LogOutcome {
                    name: name.to_string(),
                    status: LogStatus::SinkFailed(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::types::{BoundingBox, Prediction};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Local> {
        Local.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn face(x: f32, y: f32, id: i64, confidence: f32) -> FaceObservation {
        FaceObservation {
            bbox: BoundingBox { x, y, width: 90.0, height: 90.0, confidence: 0.9 },
            prediction: Prediction { identity_id: id, confidence },
        }
    }

    fn windowed() -> DecisionEngine<MemorySink> {
        DecisionEngine::new(
            EngineConfig::default(),
            IdentityRegistry::from_names(["Alice", "Bob"]),
            MemorySink::new(),
        )
    }

    fn continuous() -> DecisionEngine<MemorySink> {
        let config = EngineConfig { mode: ScanMode::Continuous, ..EngineConfig::default() };
        DecisionEngine::new(config, IdentityRegistry::from_names(["Alice", "Bob"]), MemorySink::new())
    }

    #[test]
    fn test_windowed_starts_idle() {
        let engine = windowed();
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn test_trigger_opens_single_window() {
        let mut engine = windowed();
        assert!(engine.trigger(at(0)));
        assert_eq!(engine.state(), EngineState::Scanning);
        assert!(!engine.trigger(at(1)));
        assert_eq!(engine.window_remaining(at(1)), Some(TimeDelta::seconds(4)));
    }

    #[test]
    fn test_idle_frames_are_ignored() {
        let mut engine = windowed();
        for s in 0..5 {
            engine.process_frame(at(s), &[face(0.0, 0.0, 0, 10.0)]);
        }
        assert!(engine.tick(at(10)).is_none());
        assert!(engine.sink().events().is_empty());
    }

    #[test]
    fn test_tick_before_deadline_keeps_window_open() {
        let mut engine = windowed();
        engine.trigger(at(0));
        assert!(engine.tick(at(4)).is_none());
        assert_eq!(engine.state(), EngineState::Scanning);
        let report = engine.tick(at(5)).unwrap();
        assert_eq!(report.frames, 0);
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn test_name_counted_once_per_frame() {
        let mut engine = windowed();
        engine.trigger(at(0));
        for _ in 0..2 {
            engine.process_frame(at(1), &[face(0.0, 0.0, 0, 10.0), face(300.0, 0.0, 0, 10.0)]);
        }
        let report = engine.tick(at(5)).unwrap();
        assert_eq!(report.tallies, vec![("Alice".to_string(), 2)]);
        assert!(report.outcomes.is_empty());
    }

    #[test]
    fn test_frames_after_deadline_not_counted() {
        let mut engine = windowed();
        engine.trigger(at(0));
        engine.process_frame(at(1), &[face(0.0, 0.0, 0, 10.0)]);
        engine.process_frame(at(2), &[face(0.0, 0.0, 0, 10.0)]);
        engine.process_frame(at(6), &[face(0.0, 0.0, 0, 10.0)]);
        let report = engine.tick(at(6)).unwrap();
        assert_eq!(report.frames, 2);
        assert!(report.logged_names().is_empty());
    }

    #[test]
    fn test_windowed_labels() {
        let mut engine = windowed();
        let report = engine.process_frame(at(0), &[face(0.0, 0.0, 1, 20.0), face(0.0, 0.0, 1, 95.0)]);
        assert_eq!(report.labels, vec![FaceLabel::Name("Bob".into()), FaceLabel::Unknown]);
        assert_eq!(report.labels[1].to_string(), "Unknown");
    }

    #[test]
    fn test_continuous_is_always_scanning() {
        let mut engine = continuous();
        assert_eq!(engine.state(), EngineState::Scanning);
        assert!(!engine.trigger(at(0)));
        assert!(engine.tick(at(100)).is_none());
    }

    #[test]
    fn test_continuous_qualifies_at_min_votes() {
        let mut engine = continuous();
        let f = face(120.0, 170.0, 0, 40.0);
        let r1 = engine.process_frame(at(0), &[f]);
        assert_eq!(r1.labels, vec![FaceLabel::Detecting]);
        assert_eq!(r1.labels[0].to_string(), "Detecting...");
        engine.process_frame(at(0), &[f]);
        let r3 = engine.process_frame(at(0), &[f]);
        assert_eq!(r3.labels, vec![FaceLabel::Name("Alice".into())]);
        assert_eq!(r3.outcomes.len(), 1);
        assert!(r3.outcomes[0].is_logged());

        // Subsequent frames hit the cooldown.
        let r4 = engine.process_frame(at(1), &[f]);
        assert!(matches!(r4.outcomes[0].status, LogStatus::CoolingDown { .. }));
        assert_eq!(engine.sink().names(), vec!["Alice"]);
    }

    #[test]
    fn test_continuous_without_smoothing_logs_immediately() {
        let config = EngineConfig {
            mode: ScanMode::Continuous,
            smoothing_enabled: false,
            ..EngineConfig::default()
        };
        let mut engine =
            DecisionEngine::new(config, IdentityRegistry::from_names(["Alice"]), MemorySink::new());
        let report = engine.process_frame(at(0), &[face(0.0, 0.0, 0, 10.0)]);
        assert!(report.outcomes[0].is_logged());
    }

    #[test]
    fn test_continuous_periodic_reset() {
        let config = EngineConfig {
            mode: ScanMode::Continuous,
            history_reset_interval_frames: 3,
            ..EngineConfig::default()
        };
        let mut engine =
            DecisionEngine::new(config, IdentityRegistry::from_names(["Alice"]), MemorySink::new());
        let f = face(0.0, 0.0, 0, 10.0);
        engine.process_frame(at(0), &[f]);
        engine.process_frame(at(0), &[f]);
        assert_eq!(engine.smoothing().tracked_keys(), 1);
        let r = engine.process_frame(at(0), &[f]);
        assert!(r.outcomes[0].is_logged());
        assert_eq!(engine.smoothing().tracked_keys(), 0);
    }

    #[test]
    fn test_sink_failure_does_not_advance_cooldown() {
        let mut engine = windowed();
        engine.sink_mut().set_failing(true);
        engine.trigger(at(0));
        for s in 0..3 {
            engine.process_frame(at(s), &[face(0.0, 0.0, 0, 10.0)]);
        }
        let report = engine.tick(at(5)).unwrap();
        assert!(matches!(report.outcomes[0].status, LogStatus::SinkFailed(_)));
        assert!(engine.ledger().last_logged("Alice").is_none());
    }
}
