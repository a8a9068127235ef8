//! End-to-end behaviour of the decision engine over simulated frame streams.

use attend_core::engine::{DecisionEngine, EngineConfig, LogStatus, ScanMode};
use attend_core::registry::IdentityRegistry;
use attend_core::sink::MemorySink;
use attend_core::smoothing::{PositionKey, SmoothingBuffer};
use attend_core::types::{BoundingBox, FaceObservation, Outcome, Prediction, Vote};
use chrono::{DateTime, Local, TimeZone};

fn at(secs: i64) -> DateTime<Local> {
    Local.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// A face whose top-left corner falls in grid cell 2_3 with 50px cells.
fn face_at_2_3(id: i64, confidence: f32) -> FaceObservation {
    FaceObservation {
        bbox: BoundingBox { x: 110.0, y: 160.0, width: 100.0, height: 100.0, confidence: 0.95 },
        prediction: Prediction { identity_id: id, confidence },
    }
}

fn alice_bob() -> IdentityRegistry {
    IdentityRegistry::from_json(r#"{"0": "Alice", "1": "Bob"}"#).unwrap()
}

fn windowed_engine() -> DecisionEngine<MemorySink> {
    let config = EngineConfig {
        mode: ScanMode::Windowed,
        confidence_threshold: 80.0,
        ..EngineConfig::default()
    };
    DecisionEngine::new(config, alice_bob(), MemorySink::new())
}

/// Open a window at `start`, feed four Alice frames and one weak Bob frame,
/// then close it.
fn run_alice_window(engine: &mut DecisionEngine<MemorySink>, start: i64) -> Vec<String> {
    assert!(engine.trigger(at(start)));
    let frames = [
        face_at_2_3(0, 50.0),
        face_at_2_3(0, 50.0),
        face_at_2_3(1, 90.0),
        face_at_2_3(0, 50.0),
        face_at_2_3(0, 50.0),
    ];
    for (i, f) in frames.iter().enumerate() {
        engine.process_frame(at(start + i as i64 / 2), std::slice::from_ref(f));
    }
    let report = engine.tick(at(start + 5)).expect("window should close");
    assert_eq!(report.frames, 5);
    report.logged_names().into_iter().map(String::from).collect()
}

#[test]
fn test_window_only_confident_name_qualifies() {
    let mut engine = windowed_engine();
    assert!(engine.trigger(at(0)));
    for i in 0..4 {
        engine.process_frame(at(i), &[face_at_2_3(0, 50.0)]);
    }
    engine.process_frame(at(4), &[face_at_2_3(1, 90.0)]);

    let report = engine.tick(at(5)).unwrap();
    assert_eq!(report.tallies, vec![("Alice".to_string(), 4)]);
    assert_eq!(report.logged_names(), vec!["Alice"]);

    let events = engine.sink().events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, "Alice");
    assert_eq!(events[0].status.to_string(), "Present");
}

#[test]
fn test_below_min_occurrences_does_not_qualify() {
    let mut engine = windowed_engine();
    engine.trigger(at(0));
    engine.process_frame(at(1), &[face_at_2_3(1, 30.0)]);
    engine.process_frame(at(2), &[face_at_2_3(1, 30.0)]);
    let report = engine.tick(at(5)).unwrap();
    assert_eq!(report.tallies, vec![("Bob".to_string(), 2)]);
    assert!(report.outcomes.is_empty());
    assert!(engine.sink().events().is_empty());
}

#[test]
fn test_qualification_is_repeatable() {
    let mut engine = windowed_engine();
    let first = run_alice_window(&mut engine, 0);
    engine.reset_cooldowns();
    let second = run_alice_window(&mut engine, 10);
    assert_eq!(first, vec!["Alice".to_string()]);
    assert_eq!(first, second);
    assert_eq!(engine.sink().names(), vec!["Alice", "Alice"]);
}

#[test]
fn test_smoothing_unknown_interrupts_trust() {
    let key = PositionKey { col: 2, row: 3 };
    let mut buf = SmoothingBuffer::new(5, 3);
    buf.observe(key, Outcome::Known(0));
    buf.observe(key, Outcome::Known(0));
    buf.observe(key, Outcome::Unknown);
    assert!(buf.history(key).is_empty());
    buf.observe(key, Outcome::Known(0));
    buf.observe(key, Outcome::Known(0));
    assert_eq!(buf.history(key), vec![0, 0]);
    assert_eq!(buf.decide(key), Vote::Pending);
}

#[test]
fn test_cooldown_blocks_then_releases() {
    let mut engine = windowed_engine();

    // Logged at t=100.
    engine.trigger(at(95));
    for i in 0..3 {
        engine.process_frame(at(96 + i), &[face_at_2_3(0, 20.0)]);
    }
    let report = engine.tick(at(100)).unwrap();
    assert_eq!(report.logged_names(), vec!["Alice"]);
    assert_eq!(engine.ledger().last_logged("Alice"), Some(at(100)));

    // Qualifying again at t=110: inside the cooldown.
    engine.trigger(at(105));
    for i in 0..3 {
        engine.process_frame(at(106 + i), &[face_at_2_3(0, 20.0)]);
    }
    let report = engine.tick(at(110)).unwrap();
    assert!(report.logged_names().is_empty());
    assert!(matches!(report.outcomes[0].status, LogStatus::CoolingDown { .. }));
    assert_eq!(engine.ledger().last_logged("Alice"), Some(at(100)));

    // t=131: eligible again.
    engine.trigger(at(126));
    for i in 0..3 {
        engine.process_frame(at(127 + i), &[face_at_2_3(0, 20.0)]);
    }
    let report = engine.tick(at(131)).unwrap();
    assert_eq!(report.logged_names(), vec!["Alice"]);
    assert_eq!(engine.ledger().last_logged("Alice"), Some(at(131)));
    assert_eq!(engine.sink().events().len(), 2);
}

#[test]
fn test_failed_write_keeps_old_cooldown_baseline() {
    let config = EngineConfig {
        mode: ScanMode::Continuous,
        smoothing_enabled: false,
        ..EngineConfig::default()
    };
    let mut engine = DecisionEngine::new(config, alice_bob(), MemorySink::new());

    let logged = engine.process_frame(at(10), &[face_at_2_3(0, 20.0)]);
    assert!(logged.outcomes[0].is_logged());

    engine.sink_mut().set_failing(true);
    let failed = engine.process_frame(at(50), &[face_at_2_3(0, 20.0)]);
    assert!(matches!(failed.outcomes[0].status, LogStatus::SinkFailed(_)));
    assert_eq!(engine.sink().events().len(), 1);
    assert_eq!(engine.ledger().last_logged("Alice"), Some(at(10)));

    engine.sink_mut().set_failing(false);
    let retried = engine.process_frame(at(52), &[face_at_2_3(0, 20.0)]);
    assert!(retried.outcomes[0].is_logged());
    assert_eq!(engine.ledger().last_logged("Alice"), Some(at(52)));
    assert_eq!(engine.sink().names(), vec!["Alice", "Alice"]);
}

#[test]
fn test_duplicate_names_merge_in_window() {
    let registry = IdentityRegistry::from_json(r#"{"0": "Sam", "1": "Sam"}"#).unwrap();
    let mut engine = DecisionEngine::new(EngineConfig::default(), registry, MemorySink::new());
    engine.trigger(at(0));
    engine.process_frame(at(1), &[face_at_2_3(0, 10.0)]);
    engine.process_frame(at(2), &[face_at_2_3(1, 10.0)]);
    engine.process_frame(at(3), &[face_at_2_3(0, 10.0)]);
    let report = engine.tick(at(5)).unwrap();
    assert_eq!(report.logged_names(), vec!["Sam"]);
}

#[test]
fn test_stale_classifier_id_is_ignored() {
    let mut engine = windowed_engine();
    engine.trigger(at(0));
    for i in 0..4 {
        engine.process_frame(at(i), &[face_at_2_3(9, 5.0)]);
    }
    let report = engine.tick(at(5)).unwrap();
    assert!(report.tallies.is_empty());
}
