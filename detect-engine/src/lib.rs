//! Multi-context detection engine (§4.2, components C2-C4).

pub mod context;
pub mod engine;
pub mod error;
pub mod postprocess;
pub mod preprocess;

pub use context::{Context, ContextFactory, RawOutput};
pub use engine::{DetectionEngine, DetectionFuture};
pub use error::EngineError;
pub use postprocess::{BoxDist, DflHead, PostprocessParams, UnifiedTensor};
pub use preprocess::{InputDtype, PreprocBuffer, PreprocessedInput};
