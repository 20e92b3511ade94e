//! Daemon config file: the list of cameras and their ROIs/rules this
//! process should run (§6 external config surface — persisted
//! form is an external collaborator's concern, this is just the shape
//! this binary reads it in).

use serde::Deserialize;
use vision_types::{IntrusionRule, Roi, SourceConfig};

#[derive(Debug, Deserialize)]
pub struct CameraConfig {
    pub source: SourceConfig,
    #[serde(default)]
    pub rois: Vec<Roi>,
    #[serde(default)]
    pub rules: Vec<IntrusionRule>,
    #[serde(default)]
    pub expected_fps: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
    #[serde(default)]
    pub enabled_categories: Vec<String>,
    #[serde(default = "default_num_contexts")]
    pub num_contexts: usize,
}

fn default_num_contexts() -> usize {
    2
}

impl DaemonConfig {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        let config: Self = serde_yaml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?;
        Ok(config)
    }
}
