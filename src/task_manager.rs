use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::event_publisher::{EventPublisher, TaskEventSubscriber};
use crate::producer::{MessageProducer, ProducerUpdate};
use crate::state_machine;
use crate::streaming::StreamingSession;
use crate::task_store::TaskStore;
use crate::types::{
    AgentCard, Message, MessageRole, PageRequest, Task, TaskArtifactUpdateEvent, TaskEvent,
    TaskFilter, TaskPage, TaskState, TaskStatus, TaskStatusUpdateEvent,
};

/// Orchestrates the task store, the state machine and the per-task event
/// publishers. The manager is the only component that mutates tasks: every
/// mutation is validated against the state machine and published to the
/// task's subscribers before the call returns.
///
/// Cloning is cheap; clones share the same store and publisher registry.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    store: Arc<dyn TaskStore>,
    producer: Arc<dyn MessageProducer>,
    agent: AgentCard,
    streams: RwLock<HashMap<String, TaskStream>>,
}

/// Per-task record: the event publisher plus the ordering mutex that
/// serializes state mutation and event publication for one task. The
/// subscriber set has its own copy-on-publish discipline, so holding this
/// mutex never blocks subscribe/unsubscribe; it only sequences the events
/// of the task it belongs to.
#[derive(Clone)]
pub(crate) struct TaskStream {
    pub(crate) publisher: Arc<EventPublisher>,
    order: Arc<Mutex<()>>,
}

impl TaskStream {
    fn new() -> Self {
        Self {
            publisher: Arc::new(EventPublisher::new()),
            order: Arc::new(Mutex::new(())),
        }
    }
}

impl TaskManager {
    pub fn new(
        store: Arc<dyn TaskStore>,
        producer: Arc<dyn MessageProducer>,
        agent: AgentCard,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                store,
                producer,
                agent,
                streams: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Identity of the agent this manager serves tasks for.
    pub fn agent(&self) -> &AgentCard {
        &self.inner.agent
    }

    /// Create a task from the first message of a context. The task is
    /// stored at `submitted` and advanced to `working` before this returns;
    /// both status events are published in that order. Content generation
    /// continues asynchronously afterwards.
    pub async fn create_task(
        &self,
        message: Message,
        owner_id: Option<String>,
    ) -> EngineResult<Task> {
        self.create_task_inner(message, owner_id, None).await
    }

    pub(crate) async fn create_task_inner(
        &self,
        message: Message,
        owner_id: Option<String>,
        subscriber: Option<Arc<dyn TaskEventSubscriber>>,
    ) -> EngineResult<Task> {
        validate_message(&message)?;

        let task_id = Uuid::new_v4().to_string();
        let context_id = message
            .context_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();

        let mut seed = message;
        seed.task_id = Some(task_id.clone());
        seed.context_id = Some(context_id.clone());

        let task = Task {
            id: task_id.clone(),
            context_id,
            status: TaskStatus::new(TaskState::Submitted),
            history: vec![seed.clone()],
            artifacts: Vec::new(),
            owner_id,
            metadata: None,
            created_at: now,
            updated_at: Some(now),
        };
        self.inner.store.insert_task(&task).await?;

        let stream = self.stream_entry(&task_id);
        if let Some(subscriber) = subscriber {
            stream.publisher.subscribe(subscriber).await;
        }

        let working = {
            let _order = stream.order.lock().await;
            stream
                .publisher
                .publish(TaskEvent::Status(status_event(&task, false)))
                .await;
            let working = self
                .inner
                .store
                .update_status(&task_id, TaskStatus::new(TaskState::Working))
                .await?;
            stream
                .publisher
                .publish(TaskEvent::Status(status_event(&working, false)))
                .await;
            working
        };

        info!("created task {} in context {}", task_id, working.context_id);
        self.spawn_producer(working.clone(), seed);
        Ok(working)
    }

    /// Add a message to an existing, non-terminal task and move it back to
    /// `working`. Publishes the `working` status event before returning and
    /// restarts content generation for the new message.
    pub async fn continue_task(&self, task_id: &str, message: Message) -> EngineResult<Task> {
        self.continue_task_inner(task_id, message, None).await
    }

    pub(crate) async fn continue_task_inner(
        &self,
        task_id: &str,
        message: Message,
        subscriber: Option<Arc<dyn TaskEventSubscriber>>,
    ) -> EngineResult<Task> {
        validate_message(&message)?;
        let stream = self.stream_for(task_id).await?;
        if let Some(subscriber) = subscriber {
            stream.publisher.subscribe(subscriber).await;
        }

        let (updated, seed) = {
            let _order = stream.order.lock().await;
            let task = self.require_task(task_id).await?;
            if !state_machine::can_continue(&task.status.state) {
                return Err(EngineError::InvalidState {
                    task_id: task_id.to_string(),
                    state: task.status.state,
                });
            }

            let mut seed = message;
            seed.task_id = Some(task.id.clone());
            seed.context_id = Some(task.context_id.clone());
            self.inner
                .store
                .append_message(task_id, seed.clone())
                .await?;

            // input-required resumes to working; an already-working task
            // keeps its state and gets a fresh status timestamp.
            let updated = self
                .inner
                .store
                .update_status(task_id, TaskStatus::new(TaskState::Working))
                .await?;
            stream
                .publisher
                .publish(TaskEvent::Status(status_event(&updated, false)))
                .await;
            (updated, seed)
        };

        info!("continued task {}", task_id);
        self.spawn_producer(updated.clone(), seed);
        Ok(updated)
    }

    /// Snapshot of a task, with history truncated to the most recent
    /// `history_length` messages when given (zero omits history entirely).
    pub async fn get_task(
        &self,
        task_id: &str,
        history_length: Option<usize>,
    ) -> EngineResult<Task> {
        let mut task = self.require_task(task_id).await?;
        if let Some(keep) = history_length {
            if keep == 0 {
                task.history.clear();
            } else if task.history.len() > keep {
                let drop = task.history.len() - keep;
                task.history.drain(..drop);
            }
        }
        Ok(task)
    }

    /// List tasks in creation order with cursor pagination; filters are
    /// conjunctive.
    pub async fn list_tasks(
        &self,
        filter: &TaskFilter,
        page: &PageRequest,
    ) -> EngineResult<TaskPage> {
        if page.limit == 0 {
            return Err(EngineError::validation("page limit must be positive"));
        }
        let cursor = match &page.cursor {
            Some(raw) => Some(
                raw.parse::<u64>()
                    .map_err(|_| EngineError::validation(format!("malformed cursor: {raw}")))?,
            ),
            None => None,
        };
        let (tasks, next_cursor) = self
            .inner
            .store
            .list_tasks(filter, cursor, page.limit)
            .await?;
        Ok(TaskPage {
            tasks,
            next_cursor: next_cursor.map(|c| c.to_string()),
        })
    }

    /// Cancel a non-terminal task. Publishes the final `canceled` status
    /// event before returning; any producer update arriving afterwards is
    /// dropped.
    pub async fn cancel_task(&self, task_id: &str) -> EngineResult<Task> {
        let stream = self.stream_for(task_id).await?;
        let _order = stream.order.lock().await;
        let task = self.require_task(task_id).await?;
        if !state_machine::can_transition(&task.status.state, &TaskState::Canceled) {
            return Err(EngineError::InvalidState {
                task_id: task_id.to_string(),
                state: task.status.state,
            });
        }
        let updated = self
            .inner
            .store
            .update_status(task_id, TaskStatus::new(TaskState::Canceled))
            .await?;
        stream
            .publisher
            .publish(TaskEvent::Status(status_event(&updated, true)))
            .await;
        info!("canceled task {}", task_id);
        Ok(updated)
    }

    /// Dispatch a message: continue the referenced task when `taskId` is
    /// set, create a new task otherwise.
    pub async fn send_message(
        &self,
        message: Message,
        owner_id: Option<String>,
    ) -> EngineResult<Task> {
        match message.task_id.clone() {
            Some(task_id) => self.continue_task(&task_id, message).await,
            None => self.create_task(message, owner_id).await,
        }
    }

    /// Streaming variant of [`send_message`](Self::send_message): the
    /// optional subscriber is attached before any event is published, so it
    /// observes the full stream from `submitted` onwards.
    pub async fn send_message_streaming(
        &self,
        message: Message,
        owner_id: Option<String>,
        subscriber: Option<Arc<dyn TaskEventSubscriber>>,
    ) -> EngineResult<StreamingSession> {
        let task = match message.task_id.clone() {
            Some(task_id) => {
                self.continue_task_inner(&task_id, message, subscriber)
                    .await?
            }
            None => self.create_task_inner(message, owner_id, subscriber).await?,
        };
        Ok(StreamingSession::new(self.clone(), task.id))
    }

    /// Re-subscription handle for an existing task's event stream.
    pub async fn open_stream(&self, task_id: &str) -> EngineResult<StreamingSession> {
        self.stream_for(task_id).await?;
        Ok(StreamingSession::new(self.clone(), task_id.to_string()))
    }

    pub(crate) async fn stream_for(&self, task_id: &str) -> EngineResult<TaskStream> {
        {
            let streams = self.inner.streams.read().expect("stream registry poisoned");
            if let Some(stream) = streams.get(task_id) {
                return Ok(stream.clone());
            }
        }
        // Tasks loaded from a pre-populated durable store get their stream
        // record lazily; unknown ids are rejected.
        if self.inner.store.get_task(task_id).await?.is_none() {
            return Err(EngineError::not_found(task_id));
        }
        Ok(self.stream_entry(task_id))
    }

    fn stream_entry(&self, task_id: &str) -> TaskStream {
        let mut streams = self
            .inner
            .streams
            .write()
            .expect("stream registry poisoned");
        streams
            .entry(task_id.to_string())
            .or_insert_with(TaskStream::new)
            .clone()
    }

    async fn require_task(&self, task_id: &str) -> EngineResult<Task> {
        self.inner
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| EngineError::not_found(task_id))
    }

    fn spawn_producer(&self, task: Task, message: Message) {
        let manager = self.clone();
        tokio::spawn(async move {
            let task_id = task.id.clone();
            let mut updates = manager.inner.producer.produce(task, message).await;
            while let Some(update) = updates.next().await {
                match manager.apply_update(&task_id, update).await {
                    Ok(true) => break,
                    Ok(false) => {}
                    Err(err) => {
                        warn!("stopping producer drain for task {}: {}", task_id, err);
                        break;
                    }
                }
            }
        });
    }

    /// Apply one producer update under the task's ordering lock. Returns
    /// true when the stream is finished (a final event was published, or
    /// the task turned out to be terminal already).
    async fn apply_update(&self, task_id: &str, update: ProducerUpdate) -> EngineResult<bool> {
        let stream = self.stream_for(task_id).await?;
        let _order = stream.order.lock().await;
        let current = self.require_task(task_id).await?;
        if state_machine::is_terminal(&current.status.state) {
            debug!("task {} already terminal; dropping producer update", task_id);
            return Ok(true);
        }

        match update {
            ProducerUpdate::Status { state, message } => {
                if state != current.status.state
                    && !state_machine::can_transition(&current.status.state, &state)
                {
                    warn!(
                        "dropping producer update for task {}: {:?} -> {:?} not permitted",
                        task_id, current.status.state, state
                    );
                    return Ok(false);
                }

                let message = message.map(|mut reply| {
                    reply.task_id = Some(task_id.to_string());
                    reply.context_id = Some(current.context_id.clone());
                    reply
                });
                if let Some(reply) = &message {
                    self.inner
                        .store
                        .append_message(task_id, reply.clone())
                        .await?;
                }

                let is_final = state_machine::is_terminal(&state);
                let status = TaskStatus {
                    state,
                    timestamp: Some(Utc::now()),
                    message,
                };
                let updated = self.inner.store.update_status(task_id, status).await?;
                stream
                    .publisher
                    .publish(TaskEvent::Status(status_event(&updated, is_final)))
                    .await;
                Ok(is_final)
            }
            ProducerUpdate::Artifact {
                artifact,
                append,
                last_chunk,
            } => {
                let updated = self
                    .inner
                    .store
                    .append_artifact(task_id, artifact.clone(), append)
                    .await?;
                stream
                    .publisher
                    .publish(TaskEvent::Artifact(TaskArtifactUpdateEvent {
                        task_id: task_id.to_string(),
                        context_id: updated.context_id.clone(),
                        artifact,
                        append: Some(append),
                        last_chunk: Some(last_chunk),
                        is_final: false,
                        metadata: None,
                    }))
                    .await;
                Ok(false)
            }
        }
    }
}

fn validate_message(message: &Message) -> EngineResult<()> {
    if message.message_id.trim().is_empty() {
        return Err(EngineError::validation("message is missing a messageId"));
    }
    if message.parts.is_empty() {
        return Err(EngineError::validation("message has no parts"));
    }
    if message.role != MessageRole::User {
        return Err(EngineError::validation(
            "only user messages may be submitted",
        ));
    }
    Ok(())
}

fn status_event(task: &Task, is_final: bool) -> TaskStatusUpdateEvent {
    TaskStatusUpdateEvent {
        task_id: task.id.clone(),
        context_id: task.context_id.clone(),
        status: task.status.clone(),
        is_final,
        metadata: None,
    }
}
