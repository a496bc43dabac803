use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use crate::config::EngineConfig;

/// Common error type for every engine invocation.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("corrupt data: {0}")]
    CorruptData(String),
    #[error("no samples decoded")]
    EmptyInput,
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("processing cancelled")]
    Cancelled,
    #[error("internal failure: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Cooperative cancellation flag shared between a caller and a running engine.
///
/// Stages poll it between frames; once tripped the invocation fails with
/// [`EngineError::Cancelled`] and returns nothing.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` once the token has been tripped.
    pub fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Trait describing one step of the detection pipeline.
///
/// A stage is initialized with the engine configuration, executed once per
/// recording, then cleaned up so it can be reused for the next one.
pub trait ProcessingStage {
    type Input;
    type Output;

    fn initialize(&mut self, config: &EngineConfig) -> EngineResult<()>;
    fn execute(&mut self, input: Self::Input, cancel: &CancelToken) -> EngineResult<Self::Output>;
    fn cleanup(&mut self);
}
