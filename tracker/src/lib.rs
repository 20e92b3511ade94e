//! Motion + appearance tracker (§4.4, component C5).
//!
//! Combines an 8-state constant-velocity Kalman filter ([`kalman`]) with a
//! two-stage ByteTrack-style greedy association ([`assoc`]), optionally
//! weighted by cosine similarity of ReID embeddings.

pub mod assoc;
pub mod kalman;

use kalman::{KalmanParams, KalmanState, MeasVec};
use std::collections::HashMap;
use vision_types::{cosine_similarity, BBox, Detection, Track, TrackState};

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub high_threshold: f32,
    pub track_threshold: f32,
    pub match_threshold: f32,
    pub reid_weight: f32,
    pub reid_similarity_threshold: f32,
    pub max_lost_frames: u32,
    pub kalman: KalmanParams,
    pub use_reid: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            high_threshold: 0.6,
            track_threshold: 0.5,
            match_threshold: 0.8,
            reid_weight: 0.3,
            reid_similarity_threshold: 0.7,
            max_lost_frames: 30,
            kalman: KalmanParams::default(),
            use_reid: true,
        }
    }
}

struct TrackInternal {
    track: Track,
    kf: KalmanState,
}

impl TrackInternal {
    fn sync_bbox_from_kalman(&mut self) {
        let (cx, cy, w, h) = self.kf.bbox_cxcywh();
        self.track.bbox = BBox::new(cx - w / 2.0, cy - h / 2.0, w, h);
        self.track.velocity = self.kf.velocity();
    }
}

fn bbox_to_meas(b: &BBox) -> MeasVec {
    let (cx, cy) = b.center();
    MeasVec::new(cx as f64, cy as f64, b.w as f64, b.h as f64)
}

/// Kalman-filter + greedy-association multi-object tracker.
///
/// Owns its tracks exclusively; one instance per camera (§3
/// "Ownership").
pub struct Tracker {
    config: TrackerConfig,
    tracks: HashMap<u64, TrackInternal>,
    next_track_id: u64,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: HashMap::new(),
            next_track_id: 1,
        }
    }

    pub fn active_tracks(&self) -> Vec<Track> {
        self.tracks.values().map(|t| t.track.clone()).collect()
    }

    pub fn track_by_id(&self, id: u64) -> Option<Track> {
        self.tracks.get(&id).map(|t| t.track.clone())
    }

    /// Run one frame of tracking. Returns a vector parallel to
    /// `detections` of `track_id` (or `-1` for unmatched), per
    /// §4.4 "Outputs".
    pub fn update(
        &mut self,
        detections: &[Detection],
        embeddings: Option<&[Vec<f32>]>,
    ) -> Vec<i64> {
        let n = detections.len();
        let mut result = vec![-1i64; n];

        // Step 1: partition by confidence.
        let mut high_idx = Vec::new();
        let mut low_idx = Vec::new();
        for (i, d) in detections.iter().enumerate() {
            if d.confidence >= self.config.high_threshold {
                high_idx.push(i);
            } else if d.confidence >= self.config.track_threshold {
                low_idx.push(i);
            }
        }

        // Step 2: predict all Tracked and Lost tracks.
        let mut tracked_ids: Vec<u64> = Vec::new();
        let mut lost_ids: Vec<u64> = Vec::new();
        for (id, t) in self.tracks.iter_mut() {
            match t.track.state {
                TrackState::Tracked | TrackState::New => {
                    t.kf = t.kf.predict(&self.config.kalman);
                    t.sync_bbox_from_kalman();
                    tracked_ids.push(*id);
                }
                TrackState::Lost => {
                    t.kf = t.kf.predict(&self.config.kalman);
                    t.sync_bbox_from_kalman();
                    lost_ids.push(*id);
                }
                TrackState::Removed => {}
            }
        }

        let max_cost = 1.0 - self.config.match_threshold;

        // Step 3: first association, high dets x Tracked tracks.
        let (first_matches, unmatched_high, mut unmatched_tracked) = self.associate(
            &high_idx,
            &tracked_ids,
            detections,
            embeddings,
            max_cost,
            self.config.use_reid,
        );
        for (det_i, track_id) in &first_matches {
            result[*det_i] = *track_id as i64;
            self.apply_observation(*track_id, &detections[*det_i], embeddings.map(|e| &e[*det_i]));
        }

        // Step 4: second association, low dets x remaining unmatched Tracked, IoU-only.
        let (second_matches, _unmatched_low, still_unmatched_tracked) = self.associate(
            &low_idx,
            &unmatched_tracked,
            detections,
            None,
            max_cost,
            false,
        );
        for (det_i, track_id) in &second_matches {
            result[*det_i] = *track_id as i64;
            self.apply_observation(*track_id, &detections[*det_i], None);
        }
        unmatched_tracked = still_unmatched_tracked;

        // Step 5: lost-track recovery, remaining high dets x Lost tracks.
        let recovery_threshold = self.config.reid_similarity_threshold;
        let (recovered, unmatched_high_after_recovery, unmatched_lost) = self.associate_lost(
            &unmatched_high,
            &lost_ids,
            detections,
            embeddings,
            recovery_threshold,
        );
        for (det_i, track_id) in &recovered {
            result[*det_i] = *track_id as i64;
            self.apply_observation(*track_id, &detections[*det_i], embeddings.map(|e| &e[*det_i]));
            if let Some(t) = self.tracks.get_mut(track_id) {
                t.track.state = TrackState::Tracked;
            }
        }

        // Step 6: birth. Remaining high dets spawn New tracks.
        for det_i in unmatched_high_after_recovery {
            let id = self.spawn_track(&detections[det_i], embeddings.map(|e| &e[det_i]));
            result[det_i] = id as i64;
        }

        // Step 7: state aging for everything not touched this frame.
        for id in unmatched_tracked {
            if let Some(t) = self.tracks.get_mut(&id) {
                t.track.mark_missed(self.config.max_lost_frames);
            }
        }
        for id in unmatched_lost {
            if let Some(t) = self.tracks.get_mut(&id) {
                t.track.mark_missed(self.config.max_lost_frames);
            }
        }
        self.tracks.retain(|_, t| t.track.is_alive());

        result
    }

    fn apply_observation(&mut self, track_id: u64, det: &Detection, embedding: Option<&Vec<f32>>) {
        if let Some(t) = self.tracks.get_mut(&track_id) {
            let meas = bbox_to_meas(&det.bbox);
            t.kf = t.kf.update(meas, &self.config.kalman);
            t.sync_bbox_from_kalman();
            t.track.mark_updated();
            t.track.confidence = det.confidence;
            t.track.class_id = det.class_id;
            if let Some(emb) = embedding {
                if !emb.is_empty() {
                    t.track.reid = Some(emb.clone());
                }
            }
        }
    }

    fn spawn_track(&mut self, det: &Detection, embedding: Option<&Vec<f32>>) -> u64 {
        let id = self.next_track_id;
        self.next_track_id += 1;
        let (cx, cy) = det.bbox.center();
        let kf = KalmanState::new_from_measurement(
            cx as f64,
            cy as f64,
            det.bbox.w as f64,
            det.bbox.h as f64,
        );
        let track = Track {
            track_id: id,
            bbox: det.bbox,
            velocity: (0.0, 0.0),
            confidence: det.confidence,
            class_id: det.class_id,
            state: TrackState::New,
            frames_since_update: 0,
            age: 1,
            kalman_state: [0.0; 8],
            reid: embedding.filter(|e| !e.is_empty()).cloned(),
            last_reid_update_ts: None,
        };
        self.tracks.insert(id, TrackInternal { track, kf });
        id
    }

    /// Generic two-sided greedy association used for stages 1 and 2.
    /// Returns `(matches, unmatched_dets, unmatched_tracks)`.
    #[allow(clippy::type_complexity)]
    fn associate(
        &self,
        det_indices: &[usize],
        track_ids: &[u64],
        detections: &[Detection],
        embeddings: Option<&[Vec<f32>]>,
        max_cost: f32,
        use_reid: bool,
    ) -> (Vec<(usize, u64)>, Vec<usize>, Vec<u64>) {
        if det_indices.is_empty() || track_ids.is_empty() {
            return (Vec::new(), det_indices.to_vec(), track_ids.to_vec());
        }

        let alpha = if use_reid && self.config.use_reid {
            self.config.reid_weight
        } else {
            0.0
        };

        let mut cost = vec![vec![f32::INFINITY; track_ids.len()]; det_indices.len()];
        for (r, &det_i) in det_indices.iter().enumerate() {
            let det = &detections[det_i];
            for (c, track_id) in track_ids.iter().enumerate() {
                let t = &self.tracks[track_id];
                let iou = det.bbox.iou(&t.track.bbox);
                let value = if alpha > 0.0 {
                    if let (Some(det_emb), Some(track_emb)) = (
                        embeddings.map(|e| &e[det_i]),
                        t.track.reid.as_ref(),
                    ) {
                        if !det_emb.is_empty() {
                            let sim = cosine_similarity(det_emb, track_emb);
                            1.0 - alpha * iou - (1.0 - alpha) * sim
                        } else {
                            1.0 - iou
                        }
                    } else {
                        1.0 - iou
                    }
                } else {
                    1.0 - iou
                };
                cost[r][c] = value;
            }
        }

        let raw_matches = assoc::greedy_match(&cost, max_cost);
        let mut matches = Vec::with_capacity(raw_matches.len());
        let mut matched_dets = vec![false; det_indices.len()];
        let mut matched_tracks = vec![false; track_ids.len()];
        for (r, c) in raw_matches {
            matches.push((det_indices[r], track_ids[c]));
            matched_dets[r] = true;
            matched_tracks[c] = true;
        }

        let unmatched_dets = det_indices
            .iter()
            .zip(matched_dets.iter())
            .filter(|(_, m)| !**m)
            .map(|(i, _)| *i)
            .collect();
        let unmatched_tracks = track_ids
            .iter()
            .zip(matched_tracks.iter())
            .filter(|(_, m)| !**m)
            .map(|(id, _)| *id)
            .collect();

        (matches, unmatched_dets, unmatched_tracks)
    }

    /// Lost-track recovery (§4.4 step 5): ReID-gated, stricter
    /// threshold than ordinary association.
    #[allow(clippy::type_complexity)]
    fn associate_lost(
        &self,
        det_indices: &[usize],
        track_ids: &[u64],
        detections: &[Detection],
        embeddings: Option<&[Vec<f32>]>,
        reid_similarity_threshold: f32,
    ) -> (Vec<(usize, u64)>, Vec<usize>, Vec<u64>) {
        if det_indices.is_empty() || track_ids.is_empty() || embeddings.is_none() {
            return (Vec::new(), det_indices.to_vec(), track_ids.to_vec());
        }
        let embeddings = embeddings.unwrap();
        let alpha = self.config.reid_weight;

        let mut cost = vec![vec![f32::INFINITY; track_ids.len()]; det_indices.len()];
        for (r, &det_i) in det_indices.iter().enumerate() {
            let det_emb = &embeddings[det_i];
            if det_emb.is_empty() {
                continue;
            }
            let det = &detections[det_i];
            for (c, track_id) in track_ids.iter().enumerate() {
                let t = &self.tracks[track_id];
                let Some(track_emb) = t.track.reid.as_ref() else {
                    continue;
                };
                let sim = cosine_similarity(det_emb, track_emb);
                if sim >= reid_similarity_threshold {
                    let iou = det.bbox.iou(&t.track.bbox);
                    cost[r][c] = 1.0 - alpha * iou - (1.0 - alpha) * sim;
                }
            }
        }

        let raw_matches = assoc::greedy_match(&cost, f32::INFINITY);
        let mut matches = Vec::with_capacity(raw_matches.len());
        let mut matched_dets = vec![false; det_indices.len()];
        let mut matched_tracks = vec![false; track_ids.len()];
        for (r, c) in raw_matches {
            if !cost[r][c].is_finite() {
                continue;
            }
            matches.push((det_indices[r], track_ids[c]));
            matched_dets[r] = true;
            matched_tracks[c] = true;
        }

        let unmatched_dets = det_indices
            .iter()
            .zip(matched_dets.iter())
            .filter(|(_, m)| !**m)
            .map(|(i, _)| *i)
            .collect();
        let unmatched_tracks = track_ids
            .iter()
            .zip(matched_tracks.iter())
            .filter(|(_, m)| !**m)
            .map(|(id, _)| *id)
            .collect();

        (matches, unmatched_dets, unmatched_tracks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, w: f32, h: f32, conf: f32) -> Detection {
        Detection {
            bbox: BBox::new(x, y, w, h),
            confidence: conf,
            class_id: 0,
            class_name: "person".into(),
        }
    }

    #[test]
    fn birth_and_persistence_s3() {
        // scenario S3: frames t=0..5, single detection at roughly the same
        // location, conf 0.9.
        let mut tracker = Tracker::new(TrackerConfig::default());
        let d = det(100.0, 100.0, 50.0, 100.0, 0.9);

        let ids0 = tracker.update(&[d.clone()], None);
        assert_eq!(ids0.len(), 1);
        assert!(ids0[0] >= 0);
        let track_id = ids0[0] as u64;

        for _ in 1..=5 {
            let ids = tracker.update(&[d.clone()], None);
            assert_eq!(ids[0], track_id as i64);
            let t = tracker.track_by_id(track_id).unwrap();
            assert_eq!(t.frames_since_update, 0);
        }
    }

    #[test]
    fn unmatched_detection_yields_minus_one_only_before_birth_completes() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let low_conf = det(100.0, 100.0, 50.0, 100.0, 0.2);
        let ids = tracker.update(&[low_conf], None);
        assert_eq!(ids[0], -1);
    }

    #[test]
    fn spawned_track_starts_new_and_becomes_tracked_on_first_update() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let d = det(100.0, 100.0, 50.0, 100.0, 0.9);

        let ids0 = tracker.update(&[d.clone()], None);
        let track_id = ids0[0] as u64;
        assert_eq!(
            tracker.track_by_id(track_id).unwrap().state,
            TrackState::New
        );

        tracker.update(&[d], None);
        assert_eq!(
            tracker.track_by_id(track_id).unwrap().state,
            TrackState::Tracked
        );
    }

    #[test]
    fn track_lost_then_removed_after_max_lost_frames() {
        let mut config = TrackerConfig::default();
        config.max_lost_frames = 2;
        let mut tracker = Tracker::new(config);
        let d = det(100.0, 100.0, 50.0, 100.0, 0.9);
        let ids = tracker.update(&[d], None);
        let id = ids[0] as u64;

        tracker.update(&[], None);
        assert_eq!(tracker.track_by_id(id).unwrap().state, TrackState::Lost);
        tracker.update(&[], None);
        tracker.update(&[], None);
        assert!(tracker.track_by_id(id).is_none());
    }
}
