//! Pure transition rules for the task lifecycle.
//!
//! Tasks start at `submitted` and are auto-advanced to `working` before the
//! creator regains control. Terminal states absorb: once a task completes,
//! fails, is canceled or rejected, no further transition is permitted.

use crate::types::TaskState;

/// True for states from which no further transition is permitted.
pub fn is_terminal(state: &TaskState) -> bool {
    matches!(
        state,
        TaskState::Completed | TaskState::Canceled | TaskState::Failed | TaskState::Rejected
    )
}

/// True for states that accept a message continuation.
pub fn can_continue(state: &TaskState) -> bool {
    matches!(state, TaskState::Working | TaskState::InputRequired)
}

/// Whether `from -> to` is an approved transition.
pub fn can_transition(from: &TaskState, to: &TaskState) -> bool {
    use TaskState::*;
    match from {
        Submitted => matches!(to, Working),
        Working => matches!(
            to,
            InputRequired | AuthRequired | Completed | Failed | Canceled
        ),
        InputRequired => matches!(to, Working | Canceled),
        AuthRequired => matches!(to, Working | Canceled),
        Completed | Canceled | Failed | Rejected => false,
        Unknown => false,
    }
}
