//! `PipelineRunner` (C9): owns one camera's full chain (§4.7).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use chrono::Timelike;
use parking_lot::RwLock;
use tracing::{error, info, warn};

use behavior::BehaviorAnalyzer;
use detect_engine::DetectionEngine;
use frame_source::{FrameSource, MAX_RECONNECT_ATTEMPTS, RECONNECT_DELAY_MS};
use global_registry::GlobalTrackRegistry;
use reid::ReIdExtractor;
use tracker::Tracker;
use vision_types::{FrameResult, SourceError, TimeOfDay};

use crate::health::{HealthConfig, HealthTracker};

pub type SourceFactory = dyn Fn() -> Result<Box<dyn FrameSource>, SourceError> + Send + Sync;
pub type FrameSink = dyn Fn(FrameResult) + Send + Sync;

#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub camera_id: String,
    pub fps: f32,
    pub processed: u64,
    /// Submissions this camera lost to the engine's drop-oldest policy;
    /// the supervisor aggregates `DetectionEngine::dropped_total()`
    /// separately since the engine is shared across cameras.
    pub dropped: u64,
    pub uptime_s: f32,
    pub healthy: bool,
    pub last_error: Option<String>,
}

struct RunnerShared {
    stop: AtomicBool,
    started_at: Instant,
    health: RwLock<HealthTracker>,
    processed: std::sync::atomic::AtomicU64,
    dropped: std::sync::atomic::AtomicU64,
    fatal: AtomicBool,
}

/// Runs `{source → DetectionEngine → ReIDExtractor → Tracker →
/// GlobalTrackRegistry → BehaviorAnalyzer}` on its own OS thread
/// (§5 "One thread per PipelineRunner's main loop").
pub struct PipelineRunner {
    pub camera_id: String,
    shared: Arc<RunnerShared>,
    handle: Option<JoinHandle<()>>,
}

impl PipelineRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        camera_id: String,
        source_factory: Arc<SourceFactory>,
        detection_engine: Arc<DetectionEngine>,
        reid_extractor: Box<dyn ReIdExtractor>,
        mut tracker: Tracker,
        mut behavior_analyzer: BehaviorAnalyzer,
        registry: GlobalTrackRegistry,
        sink: Arc<FrameSink>,
        expected_fps: f32,
    ) -> Result<Self, SourceError> {
        let source = source_factory()?;

        let shared = Arc::new(RunnerShared {
            stop: AtomicBool::new(false),
            started_at: Instant::now(),
            health: RwLock::new(HealthTracker::new(expected_fps, HealthConfig::default())),
            processed: std::sync::atomic::AtomicU64::new(0),
            dropped: std::sync::atomic::AtomicU64::new(0),
            fatal: AtomicBool::new(false),
        });

        let thread_shared = Arc::clone(&shared);
        let thread_camera_id = camera_id.clone();
        let handle = std::thread::Builder::new()
            .name(format!("pipeline-{camera_id}"))
            .spawn(move || {
                run_loop(
                    thread_camera_id,
                    source,
                    source_factory,
                    detection_engine,
                    reid_extractor,
                    &mut tracker,
                    &mut behavior_analyzer,
                    registry,
                    sink,
                    thread_shared,
                )
            })
            .map_err(|e| SourceError::Open(format!("failed to spawn pipeline thread: {e}")))?;

        Ok(Self {
            camera_id,
            shared,
            handle: Some(handle),
        })
    }

    /// Joins the processing thread before returning (§5
    /// "PipelineRunner.stop() joins the processing thread").
    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.shared.fatal.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PipelineStats {
        let health = self.shared.health.read();
        PipelineStats {
            camera_id: self.camera_id.clone(),
            fps: health.current_fps().unwrap_or(0.0),
            processed: self.shared.processed.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            uptime_s: self.shared.started_at.elapsed().as_secs_f32(),
            healthy: health.is_healthy(),
            last_error: health.last_error().map(str::to_string),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_loop(
    camera_id: String,
    mut source: Box<dyn FrameSource>,
    source_factory: Arc<SourceFactory>,
    detection_engine: Arc<DetectionEngine>,
    reid_extractor: Box<dyn ReIdExtractor>,
    tracker: &mut Tracker,
    behavior_analyzer: &mut BehaviorAnalyzer,
    registry: GlobalTrackRegistry,
    sink: Arc<FrameSink>,
    shared: Arc<RunnerShared>,
) {
    let mut reconnect_attempts = 0u32;

    while !shared.stop.load(Ordering::SeqCst) {
        {
            let mut health = shared.health.write();
            health.maybe_recheck(now_ms(&shared));
            if !health.is_healthy() && reconnect_attempts < MAX_RECONNECT_ATTEMPTS {
                drop(health);
                reconnect_attempts += 1;
                warn!(camera = %camera_id, attempt = reconnect_attempts, "runner-level reconnect");
                source.close();
                std::thread::sleep(std::time::Duration::from_millis(RECONNECT_DELAY_MS));
                match source_factory() {
                    Ok(fresh) => {
                        source = fresh;
                        continue;
                    }
                    Err(e) => {
                        shared.health.write().record_error(e.to_string());
                        continue;
                    }
                }
            }
        }

        let (frame, ts) = match source.next() {
            Ok(sample) => {
                reconnect_attempts = 0;
                shared.health.write().record_frame(sample.1);
                sample
            }
            Err(SourceError::EndOfStream) => {
                error!(camera = %camera_id, "source reached end of stream, runner fatal");
                shared.fatal.store(true, Ordering::SeqCst);
                break;
            }
            Err(e) => {
                shared.health.write().record_error(e.to_string());
                continue;
            }
        };

        let detections = futures::executor::block_on(detection_engine.submit(frame.clone()));

        let bboxes: Vec<_> = detections.iter().map(|d| d.bbox).collect();
        let class_ids: Vec<_> = detections.iter().map(|d| d.class_id).collect();
        let confidences: Vec<_> = detections.iter().map(|d| d.confidence).collect();
        let embeddings = reid_extractor.extract(&frame, &bboxes, &class_ids, &confidences);
        let embedding_features: Vec<Vec<f32>> = embeddings
            .iter()
            .map(|e| if e.valid { e.features.clone() } else { Vec::new() })
            .collect();

        let track_ids = tracker.update(&detections, Some(&embedding_features));

        let mut global_ids = vec![-1i64; detections.len()];
        for (i, &track_id) in track_ids.iter().enumerate() {
            if track_id < 0 {
                continue;
            }
            let feats = &embedding_features[i];
            if !feats.is_empty() {
                registry.report(
                    &camera_id,
                    track_id,
                    feats,
                    detections[i].bbox,
                    detections[i].class_id,
                    detections[i].confidence,
                    ts,
                );
            }
            global_ids[i] = registry
                .global_id(&camera_id, track_id)
                .map(|g| g as i64)
                .unwrap_or(-1);
        }

        let local_now = chrono::Local::now();
        let now_tod = TimeOfDay {
            seconds_since_midnight: local_now.num_seconds_from_midnight(),
        };
        let events = behavior_analyzer.analyze(
            &detections,
            &track_ids,
            &global_ids,
            ts,
            now_tod,
            &local_now.to_rfc3339(),
        );

        let active_rois = behavior_analyzer.active_rois(now_tod);

        shared.processed.fetch_add(1, Ordering::Relaxed);

        sink(FrameResult {
            camera_id: camera_id.clone(),
            width: frame.width,
            height: frame.height,
            timestamp_ms: ts,
            detections,
            track_ids,
            global_track_ids: global_ids,
            reid_embeddings: embedding_features,
            events,
            active_rois,
        });
    }

    info!(camera = %camera_id, "pipeline runner stopped");
}

fn now_ms(shared: &RunnerShared) -> i64 {
    shared.started_at.elapsed().as_millis() as i64
}
