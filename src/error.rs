use crate::types::TaskState;

/// Error taxonomy for the task engine. Every failed operation surfaces
/// exactly one of these kinds; none are retried internally.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid request: {reason}")]
    Validation { reason: String },

    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("operation not permitted for task {task_id} in state {state:?}")]
    InvalidState { task_id: String, state: TaskState },

    #[error("access denied for user {user_id}")]
    Forbidden { user_id: String },

    #[error("invalid credentials")]
    Unauthorized,

    #[error("authorization has been revoked")]
    Revoked,

    #[error("storage backend error: {reason}")]
    Storage { reason: String },
}

impl EngineError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn not_found(task_id: impl Into<String>) -> Self {
        Self::TaskNotFound {
            task_id: task_id.into(),
        }
    }

    pub fn storage(reason: impl std::fmt::Display) -> Self {
        Self::Storage {
            reason: reason.to_string(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
