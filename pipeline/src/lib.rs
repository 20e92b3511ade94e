//! Per-camera runner and process-wide supervisor (§4.7, §4.8).

mod health;
mod runner;
mod supervisor;

pub use health::{HealthConfig, HealthTracker};
pub use runner::{FrameSink, PipelineRunner, PipelineStats, SourceFactory};
pub use supervisor::{
    NullSampler, PipelineSupervisor, SystemSampler, SystemStats, DEFAULT_MAX_PIPELINES,
};
#[cfg(target_os = "linux")]
pub use supervisor::ProcStatSampler;
