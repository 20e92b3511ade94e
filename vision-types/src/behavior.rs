//! `ObjectState` and `BehaviorEvent` records (§3, §4.5).

use crate::detection::BBox;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

pub const TRAJECTORY_CAPACITY: usize = 100;

/// Bounded ring buffer of the last `TRAJECTORY_CAPACITY` positions
/// (§9 "Ring-buffered trajectory").
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trajectory {
    buf: VecDeque<(f32, f32)>,
}

impl Trajectory {
    pub fn push(&mut self, pos: (f32, f32)) {
        if self.buf.len() == TRAJECTORY_CAPACITY {
            self.buf.pop_front();
        }
        self.buf.push_back(pos);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(f32, f32)> {
        self.buf.iter()
    }

    pub fn last(&self) -> Option<&(f32, f32)> {
        self.buf.back()
    }
}

/// Behavior-analyzer view of a tracked object (§3).
#[derive(Debug, Clone)]
pub struct ObjectState {
    pub track_id: u64,
    pub position: (f32, f32),
    pub velocity: (f32, f32),
    pub first_seen: i64,
    pub last_seen: i64,
    pub trajectory: Trajectory,
    pub roi_entry_times: BTreeMap<String, i64>,
}

impl ObjectState {
    pub fn new(track_id: u64, position: (f32, f32), now: i64) -> Self {
        let mut trajectory = Trajectory::default();
        trajectory.push(position);
        Self {
            track_id,
            position,
            velocity: (0.0, 0.0),
            first_seen: now,
            last_seen: now,
            trajectory,
            roi_entry_times: BTreeMap::new(),
        }
    }

    /// Update position/velocity via finite difference against the
    /// previous position and timestamp (§4.5 step 1).
    pub fn observe(&mut self, position: (f32, f32), now: i64) {
        let dt_ms = (now - self.last_seen).max(1) as f32;
        self.velocity = (
            (position.0 - self.position.0) * 1000.0 / dt_ms,
            (position.1 - self.position.1) * 1000.0 / dt_ms,
        );
        self.position = position;
        self.last_seen = now;
        self.trajectory.push(position);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorEvent {
    pub event_type: String,
    pub rule_id: String,
    pub local_track_id: i64,
    pub global_track_id: Option<i64>,
    pub reid_id: Option<String>,
    pub camera_id: String,
    pub bbox: BBox,
    pub confidence: f32,
    /// ISO-8601 wall-clock timestamp, UTC with milliseconds.
    pub timestamp: String,
    pub metadata: BTreeMap<String, String>,
}

impl BehaviorEvent {
    /// `reid_id = "reid_{global_track_id}"` when present, else empty
    /// (§6 "BehaviorEvent JSON").
    pub fn reid_id_string(&self) -> String {
        match self.reid_id.as_ref() {
            Some(s) => s.clone(),
            None => String::new(),
        }
    }
}
