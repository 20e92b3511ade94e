//! `GlobalTrackRegistry` (C8): process-wide mapping from
//! `(camera_id, local_id)` to a stable cross-camera identity (§4.6).
//!
//! Structured as a clone-handle over a single lock guarding all state,
//! the way a connected-camera manager wraps its map: cheap to clone, one
//! lock for every read/write.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;
use vision_types::{cosine_similarity, BBox, GlobalTrack};

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;
pub const DEFAULT_MAX_TRACK_AGE_S: f32 = 30.0;
pub const MAX_GLOBAL_TRACKS: usize = 10_000;
const EMA_ALPHA: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub global_id: u64,
    pub similarity: f32,
}

struct RegistryConfig {
    similarity_threshold: f32,
    max_track_age_s: f32,
    matching_enabled: bool,
    enabled: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_track_age_s: DEFAULT_MAX_TRACK_AGE_S,
            matching_enabled: true,
            enabled: true,
        }
    }
}

struct Inner {
    globals: HashMap<u64, GlobalTrack>,
    mapping: HashMap<(String, i64), u64>,
    next_id: u64,
    config: RegistryConfig,
}

impl Inner {
    fn is_expired(&self, track: &GlobalTrack, now: i64) -> bool {
        track.is_expired(now, self.config.max_track_age_s)
    }

    fn evict_expired(&mut self, now: i64) {
        if self.globals.len() <= (MAX_GLOBAL_TRACKS as f32 * 0.8) as usize {
            return;
        }
        let expired: Vec<u64> = self
            .globals
            .iter()
            .filter(|(_, t)| t.is_expired(now, self.config.max_track_age_s))
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            self.globals.remove(id);
        }
        self.mapping.retain(|_, gid| !expired.contains(gid));
        if !expired.is_empty() {
            debug!(count = expired.len(), "evicted expired global tracks");
        }
    }
}

/// Cheap-to-clone handle to the process-wide registry (§9
/// "Global state": "plain process-wide objects ... passed by
/// reference").
#[derive(Clone)]
pub struct GlobalTrackRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl Default for GlobalTrackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalTrackRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                globals: HashMap::new(),
                mapping: HashMap::new(),
                next_id: 0,
                config: RegistryConfig::default(),
            })),
        }
    }

    pub fn set_similarity_threshold(&self, threshold: f32) {
        let clamped = threshold.clamp(0.5, 0.95);
        self.inner.write().config.similarity_threshold = clamped;
    }

    pub fn set_max_track_age_s(&self, age_s: f32) {
        self.inner.write().config.max_track_age_s = age_s;
    }

    pub fn set_matching_enabled(&self, enabled: bool) {
        self.inner.write().config.matching_enabled = enabled;
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.write().config.enabled = enabled;
    }

    /// Idempotent per-frame report (§4.6 "Association rule").
    /// Bad inputs (empty features, size mismatch against an existing
    /// global) are silently ignored (§4.6 "Errors").
    pub fn report(
        &self,
        camera_id: &str,
        local_id: i64,
        features: &[f32],
        bbox: BBox,
        class_id: u32,
        confidence: f32,
        now: i64,
    ) {
        let mut inner = self.inner.write();
        if !inner.config.enabled {
            return;
        }
        if features.is_empty() {
            return;
        }

        let key = (camera_id.to_string(), local_id);

        if let Some(&global_id) = inner.mapping.get(&key) {
            if let Some(track) = inner.globals.get_mut(&global_id) {
                if track.reid_features.len() == features.len() {
                    ema_update(&mut track.reid_features, features);
                }
                track.last_bbox = bbox;
                track.last_seen = now;
                track.class_id = class_id;
                track.confidence = confidence;
                track.active = true;
            }
            return;
        }

        if inner.config.matching_enabled {
            let now_s = now;
            let best = inner
                .globals
                .iter()
                .filter(|(_, t)| {
                    !t.is_expired(now_s, inner.config.max_track_age_s)
                        && !t.local_ids.contains_key(camera_id)
                })
                .map(|(id, t)| (*id, cosine_similarity(&t.reid_features, features)))
                .filter(|(_, sim)| *sim >= inner.config.similarity_threshold)
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

            if let Some((global_id, _)) = best {
                if let Some(track) = inner.globals.get_mut(&global_id) {
                    track.local_ids.insert(camera_id.to_string(), local_id);
                    ema_update(&mut track.reid_features, features);
                    track.last_bbox = bbox;
                    track.last_seen = now;
                    track.class_id = class_id;
                    track.confidence = confidence;
                    track.active = true;
                }
                inner.mapping.insert(key, global_id);
                inner.evict_expired(now);
                return;
            }
        }

        let global_id = inner.next_id;
        inner.next_id += 1;
        let mut local_ids = std::collections::BTreeMap::new();
        local_ids.insert(camera_id.to_string(), local_id);
        inner.globals.insert(
            global_id,
            GlobalTrack {
                global_id,
                primary_camera_id: camera_id.to_string(),
                reid_features: features.to_vec(),
                local_ids,
                first_seen: now,
                last_seen: now,
                last_bbox: bbox,
                class_id,
                confidence,
                active: true,
            },
        );
        inner.mapping.insert(key, global_id);
        inner.evict_expired(now);
    }

    pub fn global_id(&self, camera_id: &str, local_id: i64) -> Option<u64> {
        self.inner
            .read()
            .mapping
            .get(&(camera_id.to_string(), local_id))
            .copied()
    }

    pub fn active_tracks(&self, now: i64) -> Vec<GlobalTrack> {
        let inner = self.inner.read();
        inner
            .globals
            .values()
            .filter(|t| !inner.is_expired(t, now))
            .cloned()
            .collect()
    }

    /// Non-expired globals that do not already contain `exclude_camera_id`,
    /// sorted by similarity descending (§4.6 "find_matches").
    pub fn find_matches(&self, features: &[f32], exclude_camera_id: &str, now: i64) -> Vec<Match> {
        if features.is_empty() {
            return Vec::new();
        }
        let inner = self.inner.read();
        let mut matches: Vec<Match> = inner
            .globals
            .values()
            .filter(|t| {
                !t.is_expired(now, inner.config.max_track_age_s)
                    && !t.local_ids.contains_key(exclude_camera_id)
            })
            .map(|t| Match {
                global_id: t.global_id,
                similarity: cosine_similarity(&t.reid_features, features),
            })
            .collect();
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches
    }
}

/// EMA update (`α = 0.3`), renormalized to keep the stored feature a
/// unit vector for subsequent cosine comparisons (§4.6 step 1).
fn ema_update(stored: &mut [f32], reported: &[f32]) {
    for (s, r) in stored.iter_mut().zip(reported.iter()) {
        *s = EMA_ALPHA * r + (1.0 - EMA_ALPHA) * *s;
    }
    let norm: f32 = stored.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for s in stored.iter_mut() {
            *s /= norm;
        }
    }
}
