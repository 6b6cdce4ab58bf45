use std::any::Any;

use thiserror::Error;

/// Boxed error crossing the job / scope-provider boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the runner's lifecycle operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Enumerating job types at `start()` failed; the timer was not armed.
    #[error("Job discovery failed: {0}")]
    Discovery(#[source] BoxError),

    /// The scheduler configuration cannot be honoured.
    #[error("Invalid configuration: {0}")]
    Config(#[from] cadence_core::CoreError),

    /// `start()` was called outside a Tokio runtime.
    #[error("No Tokio runtime available to drive the timer")]
    NoRuntime,

    /// The runner was released and cannot be armed again.
    #[error("Scheduler has been released")]
    Released,
}

/// A notification subscriber returned an error.
#[derive(Debug, Error)]
#[error("Subscriber '{subscriber}' failed: {source}")]
pub struct HandlerError {
    pub subscriber: String,
    #[source]
    pub source: BoxError,
}

/// A panic captured at a job or provider boundary, carried as an error value.
#[derive(Debug, Error)]
#[error("panicked: {message}")]
pub struct JobPanicked {
    pub message: String,
}

impl JobPanicked {
    pub fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
