//! Typed error hierarchy for the coordination engine.
//!
//! Not-found and invalid-argument errors are returned to callers without
//! mutating state; retriable failures are routed through the retry
//! manager; supervisor/session-fatal errors propagate to the coordinator,
//! which flips the session to `Failed`.

use thiserror::Error;

use crate::model::{InstanceId, SessionId, TaskId};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("task {0} not found in plan")]
    TaskNotFound(TaskId),

    #[error("instance {0} not found")]
    InstanceNotFound(InstanceId),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("dependency cycle detected: {0:?}")]
    CyclicDependency(Vec<TaskId>),

    #[error("self-dependency on task {0}")]
    SelfDependency(TaskId),

    #[error("duplicate task id {0}")]
    DuplicateTaskId(TaskId),

    #[error("{step} is not a valid step for {operation}")]
    FailedPrecondition { operation: String, step: String },

    #[error("task {task} failed (retriable): {reason}")]
    RetriableTaskFailure { task: TaskId, reason: String },

    #[error("instance {instance} supervisor failure: {reason}")]
    SupervisorFatal { instance: InstanceId, reason: String },

    #[error("session-fatal error: {0}")]
    SessionFatal(String),

    #[error("malformed completion file at {path}: {source}")]
    InvalidCompletionFile { path: String, source: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
