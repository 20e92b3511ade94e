//! Thin daemon entry point: loads camera configs, wires each camera's
//! chain together, and runs the supervisor's monitoring loop until
//! killed.

mod config;
mod demo;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use behavior::BehaviorAnalyzer;
use config::DaemonConfig;
use detect_engine::{DetectionEngine, InputDtype};
use frame_source::ReconnectingSource;
use global_registry::GlobalTrackRegistry;
#[cfg(not(target_os = "linux"))]
use pipeline::NullSampler;
use pipeline::{PipelineRunner, PipelineSupervisor};
use reid::HistogramReIdExtractor;
use tracker::{Tracker, TrackerConfig};
use vision_types::SourceConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-camera detection/tracking daemon")]
struct Cli {
    /// Path to the camera-list config file (YAML).
    #[arg(short, long)]
    config: PathBuf,

    /// Model input width fed to the detector.
    #[arg(long, default_value_t = 640)]
    model_width: u32,

    /// Model input height fed to the detector.
    #[arg(long, default_value_t = 640)]
    model_height: u32,
}

const COCO_CLASS_NAMES: &[&str] = &["person", "vehicle", "animal"];

fn main() -> anyhow::Result<()> {
    let _tracing_guard = logging::init();
    let cli = Cli::parse();

    let daemon_config = DaemonConfig::load(&cli.config)?;
    info!(cameras = daemon_config.cameras.len(), "loaded daemon config");

    let detection_engine = Arc::new(
        DetectionEngine::init(
            Arc::new(demo::NullContextFactory),
            daemon_config.num_contexts,
            cli.model_width,
            cli.model_height,
            InputDtype::Uint8,
            COCO_CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
        )
        .map_err(|e| anyhow::anyhow!("detection engine init failed: {e}"))?,
    );
    if !daemon_config.enabled_categories.is_empty() {
        detection_engine.set_enabled_categories(daemon_config.enabled_categories.clone());
    }

    let mut supervisor = PipelineSupervisor::new();
    supervisor.register_detection_engine(Arc::clone(&detection_engine));

    let registry = GlobalTrackRegistry::new();

    for camera in daemon_config.cameras {
        let camera_id = camera.source.id.clone();
        let expected_fps = camera.expected_fps.unwrap_or(camera.source.fps as f32);

        let mut behavior_analyzer = BehaviorAnalyzer::new(camera_id.clone());
        for roi in camera.rois {
            behavior_analyzer
                .add_roi(roi)
                .map_err(|e| anyhow::anyhow!("camera {camera_id}: {e}"))?;
        }
        for rule in camera.rules {
            behavior_analyzer
                .add_rule(rule)
                .map_err(|e| anyhow::anyhow!("camera {camera_id}: {e}"))?;
        }

        let source_config: SourceConfig = camera.source;
        let source_factory_config = source_config.clone();
        let source_factory: Arc<pipeline::SourceFactory> = Arc::new(move || {
            let source = ReconnectingSource::<demo::SyntheticSource>::open(
                source_factory_config.clone(),
            )?;
            Ok(Box::new(source) as Box<dyn frame_source::FrameSource>)
        });

        let sink_camera_id = camera_id.clone();
        let sink: Arc<pipeline::FrameSink> = Arc::new(move |result| {
            info!(
                camera = %sink_camera_id,
                detections = result.detections.len(),
                events = result.events.len(),
                "frame processed"
            );
        });

        let runner = PipelineRunner::start(
            camera_id.clone(),
            source_factory,
            Arc::clone(&detection_engine),
            Box::new(HistogramReIdExtractor::default()),
            Tracker::new(TrackerConfig::default()),
            behavior_analyzer,
            registry.clone(),
            sink,
            expected_fps,
        )
        .map_err(|e| anyhow::anyhow!("camera {camera_id}: failed to start pipeline: {e}"))?;

        supervisor
            .add(camera_id.clone(), runner)
            .map_err(|e| anyhow::anyhow!("camera {camera_id}: {e}"))?;
        info!(camera = %camera_id, "pipeline started");
    }

    #[cfg(target_os = "linux")]
    supervisor.start_monitoring(Arc::new(pipeline::ProcStatSampler::new()));
    #[cfg(not(target_os = "linux"))]
    supervisor.start_monitoring(Arc::new(NullSampler));

    loop {
        std::thread::sleep(std::time::Duration::from_secs(5));
        let stats = supervisor.system_stats();
        info!(
            active = supervisor.active().len(),
            uptime_s = stats.uptime_s,
            "supervisor heartbeat"
        );
    }
}
