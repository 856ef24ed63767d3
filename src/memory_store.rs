use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use tokio::sync::RwLock;

use crate::error::{EngineError, EngineResult};
use crate::task_store::{matches_filter, TaskStore};
use crate::types::{Artifact, Message, Task, TaskFilter, TaskStatus};

/// In-memory [`TaskStore`] backed by a map plus an insertion-order index.
///
/// The index position of a task doubles as its creation-sequence number, so
/// listing cursors stay stable while new tasks are appended concurrently.
/// Suitable for tests and single-process deployments.
pub struct InMemoryTaskStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    tasks: HashMap<String, Task>,
    order: Vec<String>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryInner::default()),
        }
    }

    /// Number of stored tasks.
    pub async fn len(&self) -> usize {
        self.inner.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryInner {
    fn task_mut(&mut self, task_id: &str) -> EngineResult<&mut Task> {
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| EngineError::not_found(task_id))
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert_task(&self, task: &Task) -> EngineResult<()> {
        let mut inner = self.inner.write().await;
        if inner.tasks.contains_key(&task.id) {
            return Err(EngineError::storage(format!(
                "task id collision: {}",
                task.id
            )));
        }
        inner.order.push(task.id.clone());
        inner.tasks.insert(task.id.clone(), task.clone());
        debug!("stored task {}", task.id);
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> EngineResult<Option<Task>> {
        let inner = self.inner.read().await;
        Ok(inner.tasks.get(task_id).cloned())
    }

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> EngineResult<Task> {
        let mut inner = self.inner.write().await;
        let task = inner.task_mut(task_id)?;
        task.status = status;
        task.updated_at = Some(Utc::now());
        Ok(task.clone())
    }

    async fn append_message(&self, task_id: &str, message: Message) -> EngineResult<Task> {
        let mut inner = self.inner.write().await;
        let task = inner.task_mut(task_id)?;
        task.history.push(message);
        task.updated_at = Some(Utc::now());
        Ok(task.clone())
    }

    async fn append_artifact(
        &self,
        task_id: &str,
        artifact: Artifact,
        append: bool,
    ) -> EngineResult<Task> {
        let mut inner = self.inner.write().await;
        let task = inner.task_mut(task_id)?;
        match task
            .artifacts
            .iter_mut()
            .find(|existing| existing.artifact_id == artifact.artifact_id)
        {
            Some(existing) if append => existing.parts.extend(artifact.parts),
            Some(existing) => *existing = artifact,
            None => task.artifacts.push(artifact),
        }
        task.updated_at = Some(Utc::now());
        Ok(task.clone())
    }

    async fn list_tasks(
        &self,
        filter: &TaskFilter,
        cursor: Option<u64>,
        limit: usize,
    ) -> EngineResult<(Vec<Task>, Option<u64>)> {
        let inner = self.inner.read().await;
        let start = cursor.map(|c| c as usize).unwrap_or(0);

        let mut tasks = Vec::new();
        let mut next_cursor = None;
        for (index, task_id) in inner.order.iter().enumerate().skip(start) {
            let task = match inner.tasks.get(task_id) {
                Some(task) if matches_filter(task, filter) => task,
                _ => continue,
            };
            if tasks.len() == limit {
                next_cursor = Some(tasks_cursor(index));
                break;
            }
            tasks.push(task.clone());
        }
        Ok((tasks, next_cursor))
    }
}

// A cursor points at the creation slot of the first not-yet-returned match.
fn tasks_cursor(index: usize) -> u64 {
    index as u64
}
