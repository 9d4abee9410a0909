//! Failure taxonomy shared by the engine, the worker pool and the capture adapters.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// A chunk or option set the engine cannot analyse.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The worker executing a task panicked or otherwise failed.
    #[error("worker {worker} faulted: {reason}")]
    WorkerFault { worker: usize, reason: String },

    /// The pool could not be sized or a worker thread could not be spawned.
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),

    /// A result arrived for a session that has since been superseded.
    #[error("stale result from session {actual} (current session is {expected})")]
    StaleSession { expected: u64, actual: u64 },

    /// The dispatcher shut down before the task produced a result.
    #[error("dispatcher disconnected before the task completed")]
    Disconnected,
}

impl PipelineError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
