//! `BehaviorAnalyzer` (C7): ROI membership, dwell timing, and
//! priority/time conflict resolution over tracked objects (§4.5).

use std::collections::{BTreeMap, HashMap};

use tracing::debug;
use vision_types::{
    BBox, BehaviorEvent, Detection, IntrusionRule, ObjectState, Roi, TimeOfDay, VisionError,
    VisionResult,
};

const DEFAULT_TRACKING_TIMEOUT_S: f32 = 30.0;
const DEFAULT_MIN_OBJECT_SIZE: f32 = 1.0;
/// Synthetic event bbox side length (§9 "historical quirk",
/// preserved deliberately rather than using the object's real bbox).
const EVENT_BBOX_SIDE: f32 = 50.0;

pub struct BehaviorAnalyzerConfig {
    pub min_object_size: f32,
    pub tracking_timeout_s: f32,
}

impl Default for BehaviorAnalyzerConfig {
    fn default() -> Self {
        Self {
            min_object_size: DEFAULT_MIN_OBJECT_SIZE,
            tracking_timeout_s: DEFAULT_TRACKING_TIMEOUT_S,
        }
    }
}

struct ActiveRoi<'a> {
    roi: &'a Roi,
    rule: Option<&'a IntrusionRule>,
}

/// Evaluates intrusion rules over a camera's tracked objects. Owned
/// exclusively by one PipelineRunner (§3 "Ownership").
pub struct BehaviorAnalyzer {
    camera_id: String,
    config: BehaviorAnalyzerConfig,
    rois: Vec<Roi>,
    rules: Vec<IntrusionRule>,
    objects: HashMap<u64, ObjectState>,
}

impl BehaviorAnalyzer {
    pub fn new(camera_id: impl Into<String>) -> Self {
        Self {
            camera_id: camera_id.into(),
            config: BehaviorAnalyzerConfig::default(),
            rois: Vec::new(),
            rules: Vec::new(),
            objects: HashMap::new(),
        }
    }

    pub fn with_config(mut self, config: BehaviorAnalyzerConfig) -> Self {
        self.config = config;
        self
    }

    /// Malformed ROIs are rejected here, never during `analyze` (§4.5
    /// "Errors", §7 "RuleError: Invalid ROI/rule at admission").
    pub fn add_roi(&mut self, roi: Roi) -> VisionResult<()> {
        let n = roi.polygon.points.len();
        if !(3..=100).contains(&n) {
            return Err(VisionError::Rule(format!(
                "polygon must have 3..=100 points, got {n}"
            )));
        }
        if !(1..=5).contains(&roi.priority) {
            return Err(VisionError::Rule(format!(
                "priority must be 1..=5, got {}",
                roi.priority
            )));
        }
        self.rois.push(roi);
        Ok(())
    }

    pub fn add_rule(&mut self, rule: IntrusionRule) -> VisionResult<()> {
        if rule.min_duration_s < 0.0 {
            return Err(VisionError::Rule("min_duration_s must be >= 0".into()));
        }
        if !(0.0..=1.0).contains(&rule.confidence_threshold) {
            return Err(VisionError::Rule(
                "confidence_threshold must be in [0,1]".into(),
            ));
        }
        self.rules.push(rule);
        Ok(())
    }

    pub fn active_rois(&self, now: TimeOfDay) -> Vec<Roi> {
        self.rois
            .iter()
            .filter(|r| r.is_active_at(now))
            .cloned()
            .collect()
    }

    fn rule_for_roi<'a>(rules: &'a [IntrusionRule], roi_id: &str) -> Option<&'a IntrusionRule> {
        rules.iter().find(|r| r.enabled && r.roi_id == roi_id)
    }

    /// One analyze pass over a frame's detections (§4.5 "Update
    /// each frame"). `now_monotonic_ms` drives dwell timing;
    /// `now_time_of_day` drives ROI activeness; `now_wall_clock_iso` is
    /// stamped onto emitted events.
    pub fn analyze(
        &mut self,
        detections: &[Detection],
        track_ids: &[i64],
        global_track_ids: &[i64],
        now_monotonic_ms: i64,
        now_time_of_day: TimeOfDay,
        now_wall_clock_iso: &str,
    ) -> Vec<BehaviorEvent> {
        let active: Vec<&Roi> = self
            .rois
            .iter()
            .filter(|r| r.is_active_at(now_time_of_day))
            .collect();

        let mut events = Vec::new();

        for (idx, det) in detections.iter().enumerate() {
            let track_id = track_ids.get(idx).copied().unwrap_or(-1);
            if track_id < 0 {
                continue;
            }
            if det.bbox.w < self.config.min_object_size || det.bbox.h < self.config.min_object_size
            {
                continue;
            }
            let global_track_id = global_track_ids.get(idx).copied().unwrap_or(-1);
            let center = det.bbox.center();
            let track_id = track_id as u64;

            let state = self
                .objects
                .entry(track_id)
                .or_insert_with(|| ObjectState::new(track_id, center, now_monotonic_ms));
            if state.last_seen != now_monotonic_ms {
                state.observe(center, now_monotonic_ms);
            }

            let containing: Vec<&Roi> = active
                .iter()
                .filter(|r| r.polygon.contains(center.0 as f64, center.1 as f64))
                .copied()
                .collect();

            let containing_ids: std::collections::HashSet<&str> =
                containing.iter().map(|r| r.id.as_str()).collect();

            // Drop entries for ROIs the object no longer occupies.
            state
                .roi_entry_times
                .retain(|roi_id, _| containing_ids.contains(roi_id.as_str()));

            for roi in &containing {
                state
                    .roi_entry_times
                    .entry(roi.id.clone())
                    .or_insert(now_monotonic_ms);
            }

            if containing.is_empty() {
                continue;
            }

            let winner = pick_winner(&containing);
            let conflict_set_size = containing.len();

            let Some(entry_time) = state.roi_entry_times.get(&winner.id).copied() else {
                continue;
            };
            let Some(rule) = Self::rule_for_roi(&self.rules, &winner.id) else {
                continue;
            };

            let dwell_s = (now_monotonic_ms - entry_time) as f32 / 1000.0;
            if dwell_s < rule.min_duration_s {
                continue;
            }

            let mut metadata = BTreeMap::new();
            metadata.insert("duration_s".to_string(), format!("{dwell_s:.3}"));
            metadata.insert("roi_name".to_string(), winner.name.clone());
            metadata.insert("priority".to_string(), winner.priority.to_string());
            metadata.insert(
                "conflict_set_size".to_string(),
                conflict_set_size.to_string(),
            );

            let reid_id = if global_track_id >= 0 {
                Some(format!("reid_{global_track_id}"))
            } else {
                None
            };

            events.push(BehaviorEvent {
                event_type: "roi_intrusion".to_string(),
                rule_id: rule.id.clone(),
                local_track_id: track_id as i64,
                global_track_id: if global_track_id >= 0 {
                    Some(global_track_id)
                } else {
                    None
                },
                reid_id,
                camera_id: self.camera_id.clone(),
                bbox: BBox::new(
                    center.0 - EVENT_BBOX_SIDE / 2.0,
                    center.1 - EVENT_BBOX_SIDE / 2.0,
                    EVENT_BBOX_SIDE,
                    EVENT_BBOX_SIDE,
                ),
                confidence: rule.confidence_threshold,
                timestamp: now_wall_clock_iso.to_string(),
                metadata,
            });

            // Clear so a duplicate event isn't emitted until re-entry.
            state.roi_entry_times.remove(&winner.id);
        }

        self.objects.retain(|track_id, state| {
            let stale = (now_monotonic_ms - state.last_seen) as f32 / 1000.0
                > self.config.tracking_timeout_s;
            if stale {
                debug!(camera = %self.camera_id, track_id, "pruning stale object state");
            }
            !stale
        });

        events
    }
}

/// Choose the winning ROI among those containing the object's center:
/// highest `priority`; tie-break to the ROI with an explicit time
/// restriction; further tie-break by lexicographic `id` (§4.5
/// step 3).
fn pick_winner<'a>(containing: &[&'a Roi]) -> &'a Roi {
    containing
        .iter()
        .copied()
        .max_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.has_time_restriction().cmp(&b.has_time_restriction()))
                .then_with(|| b.id.cmp(&a.id))
        })
        .expect("containing is non-empty")
}

#[cfg(test)]
mod tests {
    use super::*;
    use vision_types::Polygon;

    fn square_roi(id: &str, priority: u8) -> Roi {
        Roi {
            id: id.to_string(),
            name: format!("roi-{id}"),
            polygon: Polygon {
                points: vec![(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)],
            },
            enabled: true,
            priority,
            start_time: None,
            end_time: None,
        }
    }

    fn detection_at(cx: f32, cy: f32) -> Detection {
        Detection {
            bbox: BBox::new(cx - 5.0, cy - 5.0, 10.0, 10.0),
            confidence: 0.9,
            class_id: 0,
            class_name: "person".into(),
        }
    }

    /// scenario S5: two ROIs overlap at priorities 5 and 3; rule min
    /// duration 2s; object dwells 3s. Expect exactly one event tied to
    /// the priority-5 rule, conflict set size 2.
    #[test]
    fn s5_roi_priority_tie_break() {
        let mut analyzer = BehaviorAnalyzer::new("cam0");
        analyzer.add_roi(square_roi("roi_high", 5)).unwrap();
        analyzer.add_roi(square_roi("roi_low", 3)).unwrap();
        analyzer
            .add_rule(IntrusionRule {
                id: "rule_high".into(),
                roi_id: "roi_high".into(),
                min_duration_s: 2.0,
                confidence_threshold: 0.8,
                enabled: true,
            })
            .unwrap();
        analyzer
            .add_rule(IntrusionRule {
                id: "rule_low".into(),
                roi_id: "roi_low".into(),
                min_duration_s: 2.0,
                confidence_threshold: 0.8,
                enabled: true,
            })
            .unwrap();

        let det = detection_at(50.0, 50.0);
        let noon = TimeOfDay::parse("12:00").unwrap();

        // t=0: enter both ROIs, no event yet.
        let events = analyzer.analyze(&[det.clone()], &[1], &[-1], 0, noon, "2026-01-01T00:00:00Z");
        assert!(events.is_empty());

        // t=3000ms: dwell exceeds min_duration.
        let events = analyzer.analyze(
            &[det],
            &[1],
            &[-1],
            3000,
            noon,
            "2026-01-01T00:00:03Z",
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].rule_id, "rule_high");
        assert_eq!(events[0].metadata["conflict_set_size"], "2");
        assert_eq!(events[0].bbox.w, 50.0);
    }

    #[test]
    fn reentry_required_for_duplicate_event() {
        let mut analyzer = BehaviorAnalyzer::new("cam0");
        analyzer.add_roi(square_roi("roi_a", 1)).unwrap();
        analyzer
            .add_rule(IntrusionRule {
                id: "rule_a".into(),
                roi_id: "roi_a".into(),
                min_duration_s: 1.0,
                confidence_threshold: 0.5,
                enabled: true,
            })
            .unwrap();

        let inside = detection_at(50.0, 50.0);
        let outside = detection_at(500.0, 500.0);
        let noon = TimeOfDay::parse("12:00").unwrap();

        analyzer.analyze(&[inside.clone()], &[1], &[-1], 0, noon, "t0");
        let events = analyzer.analyze(&[inside.clone()], &[1], &[-1], 2000, noon, "t1");
        assert_eq!(events.len(), 1);

        // still inside, no re-entry: no duplicate.
        let events = analyzer.analyze(&[inside.clone()], &[1], &[-1], 3000, noon, "t2");
        assert!(events.is_empty());

        // exit then re-enter.
        analyzer.analyze(&[outside], &[1], &[-1], 4000, noon, "t3");
        let events = analyzer.analyze(&[inside], &[1], &[-1], 4000, noon, "t4");
        assert!(events.is_empty());
        let events = analyzer.analyze(
            &[detection_at(50.0, 50.0)],
            &[1],
            &[-1],
            6100,
            noon,
            "t5",
        );
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn stale_object_state_is_pruned() {
        let mut analyzer =
            BehaviorAnalyzer::new("cam0").with_config(BehaviorAnalyzerConfig {
                min_object_size: 1.0,
                tracking_timeout_s: 1.0,
            });
        analyzer.analyze(&[detection_at(10.0, 10.0)], &[1], &[-1], 0, TimeOfDay::parse("12:00").unwrap(), "t0");
        assert_eq!(analyzer.objects.len(), 1);
        analyzer.analyze(&[], &[], &[], 5000, TimeOfDay::parse("12:00").unwrap(), "t1");
        assert!(analyzer.objects.is_empty());
    }
}
