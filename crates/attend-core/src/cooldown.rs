//! Per-person cooldown between attendance events.

use chrono::{DateTime, Local, TimeDelta};
use std::collections::HashMap;

pub const DEFAULT_COOLDOWN_SECS: u64 = 30;

/// Last successful log time per name.
///
/// Entries are only written after the sink confirmed the write. The ledger
/// grows for the life of the process; attendance rosters are small.
#[derive(Debug, Clone)]
pub struct CooldownLedger {
    cooldown: TimeDelta,
    last_logged: HashMap<String, DateTime<Local>>,
}

impl Default for CooldownLedger {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN_SECS)
    }
}

impl CooldownLedger {
    pub fn new(cooldown_secs: u64) -> Self {
        let secs = i64::try_from(cooldown_secs).unwrap_or(i64::MAX / 1000);
        Self {
            cooldown: TimeDelta::try_seconds(secs).unwrap_or(TimeDelta::MAX),
            last_logged: HashMap::new(),
        }
    }

    /// Eligible when never logged, or strictly more than the cooldown ago.
    pub fn is_eligible(&self, name: &str, now: DateTime<Local>) -> bool {
        self.remaining(name, now).is_none()
    }

    /// Time left before `name` may be logged again, `None` when eligible.
    pub fn remaining(&self, name: &str, now: DateTime<Local>) -> Option<TimeDelta> {
        let last = self.last_logged.get(name)?;
        let elapsed = now.signed_duration_since(*last);
        if elapsed > self.cooldown {
            None
        } else {
            // A clock that moved backwards can push this past TimeDelta::MAX.
            Some(self.cooldown.checked_sub(&elapsed).unwrap_or(TimeDelta::MAX))
        }
    }

    pub fn record(&mut self, name: &str, at: DateTime<Local>) {
        self.last_logged.insert(name.to_string(), at);
    }

    pub fn last_logged(&self, name: &str) -> Option<DateTime<Local>> {
        self.last_logged.get(name).copied()
    }

    pub fn clear(&mut self) {
        self.last_logged.clear();
    }

    pub fn len(&self) -> usize {
        self.last_logged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_logged.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Local> {
        Local.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_absent_is_eligible() {
        let ledger = CooldownLedger::new(30);
        assert!(ledger.is_eligible("Alice", at(0)));
        assert!(ledger.remaining("Alice", at(0)).is_none());
    }

    #[test]
    fn test_blocked_within_cooldown() {
        let mut ledger = CooldownLedger::new(30);
        ledger.record("Alice", at(0));
        for t in [0, 1, 15, 29] {
            assert!(!ledger.is_eligible("Alice", at(t)), "t={t}");
        }
        assert_eq!(ledger.remaining("Alice", at(10)), Some(TimeDelta::seconds(20)));
    }

    #[test]
    fn test_exact_boundary_is_blocked() {
        let mut ledger = CooldownLedger::new(30);
        ledger.record("Alice", at(0));
        assert!(!ledger.is_eligible("Alice", at(30)));
        assert!(ledger.is_eligible("Alice", at(31)));
    }

    #[test]
    fn test_names_are_independent() {
        let mut ledger = CooldownLedger::new(30);
        ledger.record("Selasi", at(0));
        assert!(ledger.is_eligible("Ammanuel", at(1)));
        assert!(!ledger.is_eligible("Selasi", at(1)));
    }

    #[test]
    fn test_zero_cooldown() {
        let mut ledger = CooldownLedger::new(0);
        ledger.record("Joel", at(5));
        assert!(!ledger.is_eligible("Joel", at(5)));
        assert!(ledger.is_eligible("Joel", at(6)));
    }

    #[test]
    fn test_huge_cooldown_with_clock_going_back() {
        let mut ledger = CooldownLedger::new(u64::MAX);
        ledger.record("Alice", at(100));
        assert_eq!(ledger.remaining("Alice", at(50)), Some(TimeDelta::MAX));
        assert!(!ledger.is_eligible("Alice", at(50)));
        assert!(!ledger.is_eligible("Alice", at(10_000)));
    }
}
