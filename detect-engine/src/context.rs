//! Pluggable accelerator backend (§9 "Polymorphism over detection
//! backends").
//!
//! The source has several concrete detector classes — quantized NPU, FP
//! GPU, CPU fallback, zero-copy variants. Here they collapse to one
//! `Context` trait; quantization and core-mask selection become
//! construction options on whatever implements it. A context is owned by
//! exactly one worker thread for that worker's lifetime (§9
//! "Thread-affine accelerator contexts") — nothing in this trait is
//! `Sync`, only `Send` so it can be handed to its worker thread at spawn.

use crate::error::EngineError;
use crate::postprocess::{DflHead, UnifiedTensor};
use crate::preprocess::PreprocessedInput;

/// Raw tensor output from one context run, before postprocessing.
pub enum RawOutput {
    ShapeA(Vec<DflHead>),
    ShapeB(UnifiedTensor),
}

/// One accelerator context. Implementors are NOT required to be `Sync`;
/// the engine never shares a context across threads, only moves it once
/// at worker startup.
pub trait Context: Send {
    /// Bind input and run inference, returning raw head tensors.
    fn run(&mut self, input: PreprocessedInput<'_>) -> Result<RawOutput, EngineError>;

    /// Release any backend resources. Called once, from the owning
    /// worker thread, during `shutdown()`.
    fn release(&mut self);
}

/// Builds one `Context` per worker. Implementors typically load model
/// bytes once and hand out independent contexts sharing those bytes
/// immutably (§9: "share only immutable model bytes across
/// them").
pub trait ContextFactory: Send + Sync {
    fn new_context(&self) -> Result<Box<dyn Context>, EngineError>;
}
