//! `FrameResult` (§6), the value emitted by a `PipelineRunner` to
//! its sinks.

use crate::behavior::BehaviorEvent;
use crate::detection::Detection;
use crate::roi::Roi;
use serde::{Deserialize, Serialize};

/// Closed record: no "optional subsystem" fields bolted on (§9
/// "Avoid arbitrary inheritance" — the source leaks unrelated
/// person-statistics fields into its frame result; we keep this record
/// closed and let analyzer outputs join at the sink instead).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameResult {
    pub camera_id: String,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: i64,
    pub detections: Vec<Detection>,
    /// Parallel to `detections`; `-1` for unmatched.
    pub track_ids: Vec<i64>,
    /// Parallel to `detections`; `-1` if not yet globalized.
    pub global_track_ids: Vec<i64>,
    /// Parallel to `detections`; may be empty per row.
    pub reid_embeddings: Vec<Vec<f32>>,
    pub events: Vec<BehaviorEvent>,
    pub active_rois: Vec<Roi>,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// §6: FrameResult is handed to sinks (an alarm/API layer
    /// outside this workspace); it must actually serialize.
    #[test]
    fn serializes_to_json_with_parallel_arrays_intact() {
        let result = FrameResult {
            camera_id: "cam-1".to_string(),
            width: 1920,
            height: 1080,
            timestamp_ms: 42,
            detections: Vec::new(),
            track_ids: vec![-1, 3],
            global_track_ids: vec![-1, 7],
            reid_embeddings: vec![Vec::new(), vec![0.1, 0.2]],
            events: Vec::new(),
            active_rois: Vec::new(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["camera_id"], "cam-1");
        assert_eq!(json["track_ids"], serde_json::json!([-1, 3]));
        assert_eq!(json["global_track_ids"], serde_json::json!([-1, 7]));
    }
}
