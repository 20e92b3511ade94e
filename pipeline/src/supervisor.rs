//! `PipelineSupervisor` (C10): process-wide registry of runners plus
//! system-wide stats and category fan-out (§4.8).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use detect_engine::DetectionEngine;
use parking_lot::RwLock;
use tracing::{info, warn};
use vision_types::{VisionError, VisionResult};

use crate::runner::{PipelineRunner, PipelineStats};

pub const DEFAULT_MAX_PIPELINES: usize = 16;
const MONITOR_TICK_MS: u64 = 1000;

#[derive(Debug, Clone, Default)]
pub struct SystemStats {
    pub cpu_percent: Option<f32>,
    pub accelerator_memory_mb: Option<f32>,
    pub accelerator_util_percent: Option<f32>,
    pub accelerator_temperature_c: Option<f32>,
    pub uptime_s: f32,
    /// How late the last monitoring tick fired past its 1s schedule.
    pub last_tick_lateness_ms: f32,
}

/// Samples process/system counters for the monitoring loop (§4.8
/// "samples CPU counters, samples accelerator counters"). The
/// concrete counter sources (procfs, vendor SDKs) are an external
/// concern; this trait is the seam the monitoring loop calls through.
pub trait SystemSampler: Send + Sync {
    fn cpu_percent(&self) -> Option<f32> {
        None
    }
    fn accelerator_memory_mb(&self) -> Option<f32> {
        None
    }
    fn accelerator_util_percent(&self) -> Option<f32> {
        None
    }
    fn accelerator_temperature_c(&self) -> Option<f32> {
        None
    }
}

pub struct NullSampler;
impl SystemSampler for NullSampler {}

/// Samples process CPU usage from `/proc/stat` deltas; every other
/// counter stays `None` on this platform (§4.8 "accelerator
/// counters" are vendor-SDK territory, out of this workspace's scope).
#[cfg(target_os = "linux")]
pub struct ProcStatSampler {
    last: parking_lot::Mutex<Option<(u64, u64)>>,
}

#[cfg(target_os = "linux")]
impl ProcStatSampler {
    pub fn new() -> Self {
        Self {
            last: parking_lot::Mutex::new(None),
        }
    }

    fn read_totals() -> Option<(u64, u64)> {
        let text = std::fs::read_to_string("/proc/stat").ok()?;
        let line = text.lines().next()?;
        let mut fields = line.split_whitespace();
        if fields.next()? != "cpu" {
            return None;
        }
        let values: Vec<u64> = fields.filter_map(|f| f.parse().ok()).collect();
        let idle = *values.get(3)?;
        let total: u64 = values.iter().sum();
        Some((total, idle))
    }
}

#[cfg(target_os = "linux")]
impl Default for ProcStatSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
impl SystemSampler for ProcStatSampler {
    fn cpu_percent(&self) -> Option<f32> {
        let (total, idle) = Self::read_totals()?;
        let mut last = self.last.lock();
        let result = match *last {
            Some((prev_total, prev_idle)) => {
                let total_delta = total.saturating_sub(prev_total);
                let idle_delta = idle.saturating_sub(prev_idle);
                if total_delta == 0 {
                    None
                } else {
                    Some((1.0 - idle_delta as f32 / total_delta as f32) * 100.0)
                }
            }
            None => None,
        };
        *last = Some((total, idle));
        result
    }
}

type ChangeListener = Box<dyn Fn(&str, bool) + Send + Sync>;

struct SupervisorState {
    runners: HashMap<String, PipelineRunner>,
    system_stats: SystemStats,
    listeners: Vec<ChangeListener>,
}

/// Process-wide object created once at startup and passed by reference
/// (§9 "Global state": "their singleton nature is a
/// convenience, not a semantic requirement").
pub struct PipelineSupervisor {
    state: Arc<RwLock<SupervisorState>>,
    max_pipelines: usize,
    detection_engines: Arc<RwLock<Vec<Arc<DetectionEngine>>>>,
    monitor_stop: Arc<AtomicBool>,
    monitor_handle: Option<JoinHandle<()>>,
    started_at: Instant,
}

impl PipelineSupervisor {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(SupervisorState {
                runners: HashMap::new(),
                system_stats: SystemStats::default(),
                listeners: Vec::new(),
            })),
            max_pipelines: DEFAULT_MAX_PIPELINES,
            detection_engines: Arc::new(RwLock::new(Vec::new())),
            monitor_stop: Arc::new(AtomicBool::new(false)),
            monitor_handle: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_max_pipelines(mut self, n: usize) -> Self {
        self.max_pipelines = n;
        self
    }

    /// Register a detection engine so `apply_enabled_categories` can
    /// fan out to it (§4.8).
    pub fn register_detection_engine(&self, engine: Arc<DetectionEngine>) {
        self.detection_engines.write().push(engine);
    }

    /// Add a running pipeline. Rejects admission past `MAX_PIPELINES`
    /// (§7 "CapacityError": "Reject admission ... respectively").
    pub fn add(&self, camera_id: String, runner: PipelineRunner) -> VisionResult<()> {
        let mut state = self.state.write();
        if state.runners.len() >= self.max_pipelines {
            return Err(VisionError::Capacity(format!(
                "capacity exceeded: {} pipelines already running",
                self.max_pipelines
            )));
        }
        if state.runners.contains_key(&camera_id) {
            return Err(VisionError::Config(format!(
                "camera {camera_id} already registered"
            )));
        }
        state.runners.insert(camera_id.clone(), runner);
        for listener in &state.listeners {
            listener(&camera_id, true);
        }
        Ok(())
    }

    pub fn remove(&self, camera_id: &str) -> bool {
        let mut state = self.state.write();
        if let Some(mut runner) = state.runners.remove(camera_id) {
            runner.stop();
            for listener in &state.listeners {
                listener(camera_id, false);
            }
            true
        } else {
            false
        }
    }

    /// Subscribe to camera add/remove events so a control surface can
    /// react without polling `active()` (§4.8 "active()"). The
    /// callback receives `(camera_id, added)`.
    pub fn on_camera_changed(&self, listener: impl Fn(&str, bool) + Send + Sync + 'static) {
        self.state.write().listeners.push(Box::new(listener));
    }

    pub fn list(&self) -> Vec<PipelineStats> {
        self.state
            .read()
            .runners
            .values()
            .map(|r| r.stats())
            .collect()
    }

    pub fn active(&self) -> Vec<String> {
        self.state.read().runners.keys().cloned().collect()
    }

    /// Fan out an enabled-categories change to every registered detector
    /// instance (§4.8 "apply_enabled_categories").
    pub fn apply_enabled_categories(&self, categories: Vec<String>) {
        for engine in self.detection_engines.read().iter() {
            engine.set_enabled_categories(categories.clone());
        }
    }

    pub fn system_stats(&self) -> SystemStats {
        let mut stats = self.state.read().system_stats.clone();
        stats.uptime_s = self.started_at.elapsed().as_secs_f32();
        stats
    }

    /// Start the 1 s monitoring loop (§4.8 "monitoring loop").
    pub fn start_monitoring(&mut self, sampler: Arc<dyn SystemSampler>) {
        let state = Arc::clone(&self.state);
        let stop = Arc::clone(&self.monitor_stop);
        let handle = std::thread::Builder::new()
            .name("pipeline-supervisor-monitor".into())
            .spawn(move || monitor_loop(state, stop, sampler))
            .expect("spawn supervisor monitor thread");
        self.monitor_handle = Some(handle);
    }

    pub fn stop_monitoring(&mut self) {
        self.monitor_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.monitor_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Default for PipelineSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

fn monitor_loop(
    state: Arc<RwLock<SupervisorState>>,
    stop: Arc<AtomicBool>,
    sampler: Arc<dyn SystemSampler>,
) {
    let tick = std::time::Duration::from_millis(MONITOR_TICK_MS);
    while !stop.load(Ordering::SeqCst) {
        let tick_start = Instant::now();

        let cpu = sampler.cpu_percent();
        let mem = sampler.accelerator_memory_mb();
        let util = sampler.accelerator_util_percent();
        let temp = sampler.accelerator_temperature_c();

        let mut fatal_cameras = Vec::new();
        {
            let st = state.read();
            for (camera_id, runner) in st.runners.iter() {
                if runner.is_fatal() {
                    fatal_cameras.push(camera_id.clone());
                }
            }
        }
        for camera_id in &fatal_cameras {
            warn!(camera = %camera_id, "evicting terminally failed pipeline runner");
            let mut st = state.write();
            if let Some(mut runner) = st.runners.remove(camera_id) {
                runner.stop();
                for listener in &st.listeners {
                    listener(camera_id, false);
                }
            }
        }

        let lateness_ms = tick_start.elapsed().as_millis() as f32 - MONITOR_TICK_MS as f32;
        {
            let mut st = state.write();
            st.system_stats.cpu_percent = cpu;
            st.system_stats.accelerator_memory_mb = mem;
            st.system_stats.accelerator_util_percent = util;
            st.system_stats.accelerator_temperature_c = temp;
            st.system_stats.last_tick_lateness_ms = lateness_ms.max(0.0);
        }

        if !fatal_cameras.is_empty() {
            info!(count = fatal_cameras.len(), "pruned fatal pipelines this tick");
        }

        let elapsed = tick_start.elapsed();
        if elapsed < tick {
            std::thread::sleep(tick - elapsed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_max_pipelines_matches_spec() {
        assert_eq!(DEFAULT_MAX_PIPELINES, 16);
    }

    #[test]
    fn remove_unknown_camera_is_a_no_op() {
        let supervisor = PipelineSupervisor::new();
        assert!(!supervisor.remove("does-not-exist"));
    }

    #[test]
    fn listener_is_not_invoked_for_an_unknown_remove() {
        let supervisor = PipelineSupervisor::new();
        let calls = Arc::new(RwLock::new(0u32));
        let counted = Arc::clone(&calls);
        supervisor.on_camera_changed(move |_camera_id, _added| {
            *counted.write() += 1;
        });
        supervisor.remove("does-not-exist");
        assert_eq!(*calls.read(), 0);
    }
}
