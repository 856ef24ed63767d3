use async_trait::async_trait;

use crate::error::EngineResult;
use crate::types::{Artifact, Message, Task, TaskFilter, TaskStatus};

/// Storage backend for tasks, to allow swapping the in-memory map for a
/// durable store without touching manager logic.
///
/// Stores apply each mutation atomically and return the post-mutation
/// snapshot, but do not validate lifecycle transitions: the task manager is
/// the only mutator and serializes mutation plus event publication per task.
/// There is intentionally no delete operation; tasks are retained for their
/// whole lifetime.
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    /// Store a freshly created task and assign it the next creation-order slot.
    async fn insert_task(&self, task: &Task) -> EngineResult<()>;

    /// Fetch a task snapshot by id.
    async fn get_task(&self, task_id: &str) -> EngineResult<Option<Task>>;

    /// Replace the task's status.
    async fn update_status(&self, task_id: &str, status: TaskStatus) -> EngineResult<Task>;

    /// Append a message to the task's history.
    async fn append_message(&self, task_id: &str, message: Message) -> EngineResult<Task>;

    /// Add an artifact. When `append` is true and an artifact with the same
    /// id exists, its parts are extended; otherwise the artifact replaces an
    /// existing one with the same id or is added as new.
    async fn append_artifact(
        &self,
        task_id: &str,
        artifact: Artifact,
        append: bool,
    ) -> EngineResult<Task>;

    /// List tasks matching the filter, in creation order, resuming at
    /// `cursor` (a creation-sequence position previously returned). Returns
    /// up to `limit` tasks and, when more matches remain, the cursor for the
    /// next page. New tasks are always appended at the tail of the creation
    /// order, so a cursor already handed out can never see them slip in
    /// before it.
    async fn list_tasks(
        &self,
        filter: &TaskFilter,
        cursor: Option<u64>,
        limit: usize,
    ) -> EngineResult<(Vec<Task>, Option<u64>)>;
}

/// True when `task` matches every set field of `filter`.
pub(crate) fn matches_filter(task: &Task, filter: &TaskFilter) -> bool {
    if let Some(context_id) = &filter.context_id {
        if &task.context_id != context_id {
            return false;
        }
    }
    if let Some(state) = &filter.state {
        if &task.status.state != state {
            return false;
        }
    }
    if let Some(owner_id) = &filter.owner_id {
        if task.owner_id.as_deref() != Some(owner_id.as_str()) {
            return false;
        }
    }
    true
}
