use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::EngineResult;
use crate::event_publisher::{DeliveryError, TaskEventSubscriber};
use crate::task_manager::TaskManager;
use crate::types::{Task, TaskArtifactUpdateEvent, TaskEvent, TaskStatusUpdateEvent};

/// Caller-visible handle for one task's event stream: a thin adapter over
/// the task's publisher and the task manager, holding nothing beyond the
/// task identifier. Sessions are not torn down on idleness; their memory
/// lives exactly as long as the underlying task.
#[derive(Clone)]
pub struct StreamingSession {
    manager: TaskManager,
    task_id: String,
}

impl StreamingSession {
    pub(crate) fn new(manager: TaskManager, task_id: String) -> Self {
        Self { manager, task_id }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Attach a subscriber to the task's event stream. A subscriber added
    /// after the task reached a terminal state receives exactly the
    /// terminal status event.
    pub async fn subscribe(&self, subscriber: Arc<dyn TaskEventSubscriber>) -> EngineResult<()> {
        let stream = self.manager.stream_for(&self.task_id).await?;
        stream.publisher.subscribe(subscriber).await;
        Ok(())
    }

    /// Detach a subscriber; a second removal of the same handle is a no-op.
    pub async fn unsubscribe(&self, subscriber: &Arc<dyn TaskEventSubscriber>) -> EngineResult<()> {
        let stream = self.manager.stream_for(&self.task_id).await?;
        stream.publisher.unsubscribe(subscriber);
        Ok(())
    }

    /// Current snapshot of the underlying task.
    pub async fn get_task(&self) -> EngineResult<Task> {
        self.manager.get_task(&self.task_id, None).await
    }

    /// Convenience: attach a bounded channel subscriber and hand back the
    /// receiving end. The receiver closes once the stream turns terminal
    /// and the publisher drops its sender.
    pub async fn events(&self, capacity: usize) -> EngineResult<mpsc::Receiver<TaskEvent>> {
        let (subscriber, receiver) = ChannelSubscriber::channel(capacity);
        self.subscribe(subscriber).await?;
        Ok(receiver)
    }
}

/// Subscriber that forwards events into a bounded channel without blocking
/// the publisher: a full or closed channel counts as a delivery failure and
/// gets the subscriber dropped instead of stalling other subscribers.
pub struct ChannelSubscriber {
    sender: mpsc::Sender<TaskEvent>,
}

impl ChannelSubscriber {
    pub fn channel(capacity: usize) -> (Arc<Self>, mpsc::Receiver<TaskEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Arc::new(Self { sender }), receiver)
    }

    fn forward(&self, event: TaskEvent) -> Result<(), DeliveryError> {
        self.sender
            .try_send(event)
            .map_err(|err| DeliveryError(err.to_string()))
    }
}

#[async_trait]
impl TaskEventSubscriber for ChannelSubscriber {
    async fn on_status_update(&self, event: &TaskStatusUpdateEvent) -> Result<(), DeliveryError> {
        self.forward(TaskEvent::Status(event.clone()))
    }

    async fn on_artifact_update(
        &self,
        event: &TaskArtifactUpdateEvent,
    ) -> Result<(), DeliveryError> {
        self.forward(TaskEvent::Artifact(event.clone()))
    }
}
