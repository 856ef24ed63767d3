use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use redis::{AsyncCommands, Client};

use crate::error::{EngineError, EngineResult};
use crate::task_store::{matches_filter, TaskStore};
use crate::types::{Artifact, Message, Task, TaskFilter, TaskStatus};

/// Redis-backed [`TaskStore`].
///
/// Tasks are stored as JSON blobs under `task:{id}`; creation order lives in
/// the append-only `tasks:order` list, whose positions double as listing
/// cursors. Mutations are plain read-modify-write cycles: the task manager
/// serializes writers per task, so no optimistic locking is needed here.
pub struct RedisTaskStore {
    client: Client,
}

impl RedisTaskStore {
    pub fn new(redis_url: &str) -> EngineResult<Self> {
        let client = Client::open(redis_url).map_err(EngineError::storage)?;
        Ok(Self { client })
    }

    async fn get_conn(&self) -> EngineResult<redis::aio::Connection> {
        self.client
            .get_async_connection()
            .await
            .map_err(EngineError::storage)
    }

    fn task_key(task_id: &str) -> String {
        format!("task:{}", task_id)
    }

    const ORDER_KEY: &'static str = "tasks:order";

    async fn load_task(
        conn: &mut redis::aio::Connection,
        task_id: &str,
    ) -> EngineResult<Option<Task>> {
        let exists: bool = conn
            .exists(Self::task_key(task_id))
            .await
            .map_err(EngineError::storage)?;
        if !exists {
            return Ok(None);
        }
        let task_json: String = conn
            .get(Self::task_key(task_id))
            .await
            .map_err(EngineError::storage)?;
        let task: Task = serde_json::from_str(&task_json).map_err(EngineError::storage)?;
        Ok(Some(task))
    }

    async fn save_task(conn: &mut redis::aio::Connection, task: &Task) -> EngineResult<()> {
        let task_json = serde_json::to_string(task).map_err(EngineError::storage)?;
        // Explicit return type to avoid the never type fallback issue
        let _: () = conn
            .set(Self::task_key(&task.id), task_json)
            .await
            .map_err(EngineError::storage)?;
        Ok(())
    }

    async fn mutate<F>(&self, task_id: &str, apply: F) -> EngineResult<Task>
    where
        F: FnOnce(&mut Task),
    {
        let mut conn = self.get_conn().await?;
        let mut task = Self::load_task(&mut conn, task_id)
            .await?
            .ok_or_else(|| EngineError::not_found(task_id))?;
        apply(&mut task);
        task.updated_at = Some(Utc::now());
        Self::save_task(&mut conn, &task).await?;
        Ok(task)
    }
}

#[async_trait]
impl TaskStore for RedisTaskStore {
    async fn insert_task(&self, task: &Task) -> EngineResult<()> {
        let mut conn = self.get_conn().await?;
        let exists: bool = conn
            .exists(Self::task_key(&task.id))
            .await
            .map_err(EngineError::storage)?;
        if exists {
            return Err(EngineError::storage(format!(
                "task id collision: {}",
                task.id
            )));
        }
        Self::save_task(&mut conn, task).await?;
        let _: () = conn
            .rpush(Self::ORDER_KEY, &task.id)
            .await
            .map_err(EngineError::storage)?;
        debug!("stored task {} in redis", task.id);
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> EngineResult<Option<Task>> {
        let mut conn = self.get_conn().await?;
        Self::load_task(&mut conn, task_id).await
    }

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> EngineResult<Task> {
        self.mutate(task_id, |task| task.status = status).await
    }

    async fn append_message(&self, task_id: &str, message: Message) -> EngineResult<Task> {
        self.mutate(task_id, |task| task.history.push(message)).await
    }

    async fn append_artifact(
        &self,
        task_id: &str,
        artifact: Artifact,
        append: bool,
    ) -> EngineResult<Task> {
        self.mutate(task_id, |task| {
            match task
                .artifacts
                .iter_mut()
                .find(|existing| existing.artifact_id == artifact.artifact_id)
            {
                Some(existing) if append => existing.parts.extend(artifact.parts),
                Some(existing) => *existing = artifact,
                None => task.artifacts.push(artifact),
            }
        })
        .await
    }

    async fn list_tasks(
        &self,
        filter: &TaskFilter,
        cursor: Option<u64>,
        limit: usize,
    ) -> EngineResult<(Vec<Task>, Option<u64>)> {
        let mut conn = self.get_conn().await?;
        let start = cursor.unwrap_or(0);
        let task_ids: Vec<String> = conn
            .lrange(Self::ORDER_KEY, start as isize, -1)
            .await
            .map_err(EngineError::storage)?;

        let mut tasks = Vec::new();
        let mut next_cursor = None;
        for (offset, task_id) in task_ids.iter().enumerate() {
            let task = match Self::load_task(&mut conn, task_id).await? {
                Some(task) => task,
                None => {
                    warn!("order index references missing task {}", task_id);
                    continue;
                }
            };
            if !matches_filter(&task, filter) {
                continue;
            }
            if tasks.len() == limit {
                next_cursor = Some(start + offset as u64);
                break;
            }
            tasks.push(task);
        }
        Ok((tasks, next_cursor))
    }
}
