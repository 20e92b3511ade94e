//! Errors for the detection engine (§4.2 "Errors").

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("context init failed: {0}")]
    ContextInit(String),
    #[error("input bind failed: {0}")]
    InputBind(String),
    #[error("context run failed: {0}")]
    Run(String),
    #[error("output fetch failed: {0}")]
    OutputFetch(String),
    #[error("unexpected tensor shape: {0}")]
    ShapeMismatch(String),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::ContextInit(_) => "context_init",
            EngineError::InputBind(_) => "input_bind",
            EngineError::Run(_) => "run",
            EngineError::OutputFetch(_) => "output_fetch",
            EngineError::ShapeMismatch(_) => "shape_mismatch",
        }
    }
}
