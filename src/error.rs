/// Engine error taxonomy
///
/// Every public engine, executor and scheduler operation returns these errors.
/// Cancellation has its own variant so callers can tell a requested stop apart
/// from a failure.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by validation, execution and trigger management
#[derive(Debug, Error)]
pub enum EngineError {
    /// Workflow or execution identity is unknown
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Workflow exists but its enabled flag is false
    #[error("workflow is disabled: {0}")]
    Disabled(String),

    /// Graph validation failed; carries every validator message
    #[error("invalid workflow: {}", .0.join("; "))]
    InvalidWorkflow(Vec<String>),

    /// Operation not valid for the execution's current status
    #[error("execution {id} is {status}, expected {expected}")]
    InvalidState {
        id: String,
        status: String,
        expected: &'static str,
    },

    /// A task exceeded its configured timeout
    #[error("task '{task_id}' timed out after {timeout:?}")]
    TaskTimeout { task_id: String, timeout: Duration },

    /// The whole run outlived the workflow's max execution time
    #[error("execution exceeded max execution time of {0:?}")]
    ExecutionTimeout(Duration),

    /// The task's underlying operation returned an error
    #[error("task '{task_id}' failed: {message}")]
    TaskFailure { task_id: String, message: String },

    /// Trigger-now requested for a workflow without a cron registration
    #[error("workflow is not scheduled: {0}")]
    NotScheduled(String),

    /// Cron expression or timezone was rejected
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Cooperative cancellation was observed
    #[error("execution cancelled")]
    Cancelled,

    /// Cron backend failure
    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn workflow_not_found(id: impl Into<String>) -> Self {
        Self::NotFound { kind: "workflow", id: id.into() }
    }

    pub fn execution_not_found(id: impl ToString) -> Self {
        Self::NotFound { kind: "execution", id: id.to_string() }
    }

    /// True when the error comes from a cancellation signal rather than a fault
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<tokio_cron_scheduler::JobSchedulerError> for EngineError {
    fn from(err: tokio_cron_scheduler::JobSchedulerError) -> Self {
        Self::Scheduler(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
