//! Stand-in accelerator context and camera source.
//!
//! Vendor NPU/GPU contexts and RTSP/RTMP demuxers are external
//! collaborators this workspace only defines the contract for (see
//! `detect_engine::Context` and `frame_source::RawSource`). This module
//! supplies deterministic stand-ins so the daemon has something to run
//! against, the same way `reid::HistogramReIdExtractor` stands in for an
//! embedding network.

use std::time::Duration;

use detect_engine::{Context, ContextFactory, EngineError, PreprocessedInput, RawOutput, UnifiedTensor};
use frame_source::RawSource;
use vision_types::{Frame, PixelFormat, SourceConfig, SourceError};

/// Always reports zero anchors: nothing is ever detected. Enough to
/// exercise the pool/queue/postprocess plumbing without claiming to run
/// a real network.
pub struct NullContext;

impl Context for NullContext {
    fn run(&mut self, _input: PreprocessedInput<'_>) -> Result<RawOutput, EngineError> {
        Ok(RawOutput::ShapeB(UnifiedTensor {
            num_anchors: 0,
            num_classes: 0,
            data: Vec::new(),
        }))
    }

    fn release(&mut self) {}
}

pub struct NullContextFactory;

impl ContextFactory for NullContextFactory {
    fn new_context(&self) -> Result<Box<dyn Context>, EngineError> {
        Ok(Box::new(NullContext))
    }
}

/// Emits solid-gray frames at the configured resolution, paced to the
/// configured fps, the way `ci2-simple-demo` loops a real camera's
/// `next_frame()` — except nothing is ever plugged in behind it.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    frame_interval: Duration,
    frame_no: i64,
}

impl RawSource for SyntheticSource {
    fn open(config: &SourceConfig) -> Result<Self, SourceError> {
        if config.width == 0 || config.height == 0 {
            return Err(SourceError::Open("zero-sized frame".into()));
        }
        Ok(Self {
            width: config.width,
            height: config.height,
            frame_interval: Duration::from_millis(1000 / config.fps.max(1) as u64),
            frame_no: 0,
        })
    }

    fn read(&mut self) -> Result<(Frame, i64), SourceError> {
        std::thread::sleep(self.frame_interval);
        let data = vec![114u8; self.width as usize * self.height as usize * 3];
        let frame = Frame::new(self.width, self.height, PixelFormat::Rgb8, data);
        self.frame_no += 1;
        Ok((frame, self.frame_no * self.frame_interval.as_millis() as i64))
    }
}
