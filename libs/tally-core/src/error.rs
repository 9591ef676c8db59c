use thiserror::Error;

/// Misuse of the output capture slot. These are programmer errors in the
/// engine driving the listener and abort the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("capture ended for '{key}' but it was never started")]
    NotStarted { key: String },
}

/// Failures that end a grading session before any report exists
#[derive(Debug, Error)]
pub enum GradingError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("test engine failed: {0:#}")]
    Engine(anyhow::Error),

    #[error("test engine task did not complete: {0}")]
    EngineTask(String),
}
