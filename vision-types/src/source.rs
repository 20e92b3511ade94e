//! Camera source configuration (§4.1, §6).

use serde::{Deserialize, Serialize};

use crate::error::{VisionError, VisionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Rtsp,
    Rtmp,
    Http,
    File,
}

impl std::str::FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rtsp" => Ok(Transport::Rtsp),
            "rtmp" => Ok(Transport::Rtmp),
            "http" => Ok(Transport::Http),
            "file" => Ok(Transport::File),
            other => Err(format!("unknown transport: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub url: String,
    pub protocol: Transport,
    pub username: Option<String>,
    pub password: Option<String>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub mjpeg_port: Option<u16>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl SourceConfig {
    /// Reject at admission per §6: `id` must be non-empty,
    /// dimensions and fps positive.
    pub fn validate(&self) -> VisionResult<()> {
        if self.id.is_empty() {
            return Err(VisionError::Config("camera id must not be empty".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(VisionError::Config("width/height must be > 0".into()));
        }
        if self.fps == 0 {
            return Err(VisionError::Config("fps must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_transport_rejected() {
        assert!("websocket".parse::<Transport>().is_err());
    }

    #[test]
    fn yaml_roundtrip() {
        let cfg = SourceConfig {
            id: "cam0".into(),
            url: "rtsp://example/stream".into(),
            protocol: Transport::Rtsp,
            username: None,
            password: None,
            width: 1280,
            height: 720,
            fps: 15,
            mjpeg_port: Some(8080),
            enabled: true,
        };
        let s = serde_yaml::to_string(&cfg).unwrap();
        let cfg2: SourceConfig = serde_yaml::from_str(&s).unwrap();
        assert_eq!(cfg, cfg2);
    }
}
