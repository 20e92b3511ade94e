//! Error taxonomy shared across the pipeline (spec §7).
//!
//! Each variant here is a *kind*, not a call site. Frame-local and
//! engine-local errors are absorbed by their owning component (see
//! §4.9); this type exists so that absorption point can still
//! record what happened for health reporting and for the external control
//! surface's `{kind, message}` discriminant contract (§6).

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VisionError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("frame could not be decoded: {0}")]
    Decode(String),

    #[error("preprocess shape/dtype mismatch: {0}")]
    Preprocess(String),

    #[error("accelerator inference failed: {0}")]
    Inference(String),

    #[error("postprocess could not interpret head shape: {0}")]
    Postprocess(String),

    #[error("rule rejected at admission: {0}")]
    Rule(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("capacity exceeded: {0}")]
    Capacity(String),
}

impl VisionError {
    /// A stable discriminant for the `{kind, message}` contract the
    /// external control surface consumes (§6).
    pub fn kind(&self) -> &'static str {
        match self {
            VisionError::Source(_) => "SourceError",
            VisionError::Decode(_) => "DecodeError",
            VisionError::Preprocess(_) => "PreprocessError",
            VisionError::Inference(_) => "InferenceError",
            VisionError::Postprocess(_) => "PostprocessError",
            VisionError::Rule(_) => "RuleError",
            VisionError::Config(_) => "ConfigError",
            VisionError::Capacity(_) => "CapacityError",
        }
    }
}

/// Errors produced by a `FrameSource` (§4.1).
///
/// Only `EndOfStream` is non-recoverable without a config change; the
/// others are retried through the pipeline's reconnect loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("could not open source: {0}")]
    Open(String),
    #[error("read failed: {0}")]
    Read(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("end of stream")]
    EndOfStream,
}

impl SourceError {
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SourceError::EndOfStream)
    }
}

pub type VisionResult<T> = std::result::Result<T, VisionError>;
