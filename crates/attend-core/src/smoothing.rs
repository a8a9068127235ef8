//! Per-face temporal smoothing.
//!
//! Faces are correlated across frames by a coarse position key rather than
//! real tracking. Two faces that land in the same cell are treated as one.
//! The keying strategy sits behind [`FaceKeyer`] so a centroid or IoU tracker
//! can replace [`GridKeyer`] without touching the vote logic.

use crate::types::{BoundingBox, IdentityId, Outcome, Vote};
use std::collections::{HashMap, VecDeque};
use std::fmt;

pub const DEFAULT_CAPACITY: usize = 5;
pub const DEFAULT_MIN_VOTES: usize = 3;
pub const DEFAULT_GRID_CELL: f32 = 50.0;

/// Approximate on-screen identity of a face across consecutive frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PositionKey {
    pub col: u32,
    pub row: u32,
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.col, self.row)
    }
}

/// Strategy for assigning a stable key to a detected face.
pub trait FaceKeyer {
    fn key(&self, bbox: &BoundingBox) -> PositionKey;
}

/// Quantizes the top-left corner of a box into a square grid cell.
#[derive(Debug, Clone, Copy)]
pub struct GridKeyer {
    cell_size: f32,
}

impl Default for GridKeyer {
    fn default() -> Self {
        Self::new(DEFAULT_GRID_CELL)
    }
}

impl GridKeyer {
    /// Non-positive sizes fall back to the default cell.
    pub fn new(cell_size: f32) -> Self {
        let cell_size = if cell_size > 0.0 { cell_size } else { DEFAULT_GRID_CELL };
        Self { cell_size }
    }
}

impl FaceKeyer for GridKeyer {
    fn key(&self, bbox: &BoundingBox) -> PositionKey {
        let cell = |v: f32| (v.max(0.0) / self.cell_size).floor() as u32;
        PositionKey {
            col: cell(bbox.x),
            row: cell(bbox.y),
        }
    }
}

/// Bounded vote history per position key.
///
/// Trust builds slowly and collapses at once: a single `Unknown` wipes the
/// key's history.
#[derive(Debug, Clone)]
pub struct SmoothingBuffer {
    capacity: usize,
    min_votes: usize,
    histories: HashMap<PositionKey, VecDeque<IdentityId>>,
}

impl Default for SmoothingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_MIN_VOTES)
    }
}

impl SmoothingBuffer {
    /// `capacity` is clamped to at least 1 and `min_votes` to `1..=capacity`,
    /// otherwise no key could ever be decided.
    pub fn new(capacity: usize, min_votes: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            min_votes: min_votes.clamp(1, capacity),
            histories: HashMap::new(),
        }
    }

    pub fn observe(&mut self, key: PositionKey, outcome: Outcome) {
        match outcome {
            Outcome::Known(id) => {
                let history = self.histories.entry(key).or_default();
                history.push_back(id);
                while history.len() > self.capacity {
                    history.pop_front();
                }
            }
            Outcome::Unknown => {
                if let Some(history) = self.histories.get_mut(&key) {
                    history.clear();
                }
            }
        }
    }

    /// Majority vote over the key's history.
    ///
    /// Ties go to the candidate observed most recently.
    pub fn decide(&self, key: PositionKey) -> Vote {
        let Some(history) = self.histories.get(&key) else {
            return Vote::Pending;
        };
        if history.len() < self.min_votes {
            return Vote::Pending;
        }

        let mut counts: HashMap<IdentityId, usize> = HashMap::new();
        for id in history {
            *counts.entry(*id).or_default() += 1;
        }

        // Walk newest-first so the first candidate reaching the max count
        // is the most recently observed one.
        let mut best: Option<(IdentityId, usize)> = None;
        for id in history.iter().rev() {
            let count = counts[id];
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((*id, count));
            }
        }

        match best {
            Some((id, _)) => Vote::Identified(id),
            None => Vote::Pending,
        }
    }

    /// Drop every key's history.
    pub fn reset_all(&mut self) {
        self.histories.clear();
    }

    /// Oldest-first copy of the key's history.
    pub fn history(&self, key: PositionKey) -> Vec<IdentityId> {
        self.histories
            .get(&key)
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn history_len(&self, key: PositionKey) -> usize {
        self.histories.get(&key).map_or(0, VecDeque::len)
    }

    pub fn tracked_keys(&self) -> usize {
        self.histories.len()
    }
}
