//! `Track` record and its lifecycle (§3, §4.4).

use crate::detection::BBox;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackState {
    New,
    Tracked,
    Lost,
    Removed,
}

/// 8-state constant-velocity Kalman state: `(cx, cy, w, h, vx, vy, vw, vh)`.
/// Owned by `tracker`; stored here only as the opaque vector the rest of
/// the pipeline treats as a black box.
pub type KalmanStateVector = [f64; 8];

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub track_id: u64,
    pub bbox: BBox,
    pub velocity: (f32, f32),
    pub confidence: f32,
    pub class_id: u32,
    pub state: TrackState,
    pub frames_since_update: u32,
    pub age: u32,
    pub kalman_state: KalmanStateVector,
    pub reid: Option<Vec<f32>>,
    pub last_reid_update_ts: Option<i64>,
}

impl Track {
    /// `Track` transitions, per §4.4 "State machine":
    /// `New -> Tracked` on first successful association,
    /// `Tracked -> Lost` on a miss, `Lost -> Tracked` on re-association
    /// within `max_lost_frames`, `* -> Removed` once
    /// `frames_since_update > max_lost_frames` while `Lost`.
    pub fn mark_updated(&mut self) {
        self.state = TrackState::Tracked;
        self.frames_since_update = 0;
        self.age += 1;
    }

    pub fn mark_missed(&mut self, max_lost_frames: u32) {
        self.frames_since_update += 1;
        self.age += 1;
        match self.state {
            TrackState::New | TrackState::Tracked => {
                if self.frames_since_update > max_lost_frames {
                    self.state = TrackState::Removed;
                } else {
                    self.state = TrackState::Lost;
                }
            }
            TrackState::Lost => {
                if self.frames_since_update > max_lost_frames {
                    self.state = TrackState::Removed;
                }
            }
            TrackState::Removed => {}
        }
    }

    pub fn is_alive(&self) -> bool {
        !matches!(self.state, TrackState::Removed)
    }
}
