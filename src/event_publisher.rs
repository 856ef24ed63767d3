use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{debug, warn};

use crate::types::{TaskArtifactUpdateEvent, TaskEvent, TaskStatusUpdateEvent};

/// Returned by a subscriber to signal that delivery failed; the publisher
/// drops the subscriber and keeps delivering to the rest.
#[derive(Debug, thiserror::Error)]
#[error("event delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Callback handle registered against exactly one task's event stream.
#[async_trait]
pub trait TaskEventSubscriber: Send + Sync {
    async fn on_status_update(&self, event: &TaskStatusUpdateEvent) -> Result<(), DeliveryError>;

    async fn on_artifact_update(
        &self,
        event: &TaskArtifactUpdateEvent,
    ) -> Result<(), DeliveryError>;
}

/// Per-task fan-out of status and artifact events.
///
/// Publication snapshots the subscriber list, so subscribe/unsubscribe never
/// race a delivery in progress and no lock is held across a callback. Once a
/// final event has been delivered the live set is cleared and the terminal
/// status is retained so late subscribers still observe exactly one final
/// event.
pub struct EventPublisher {
    inner: Mutex<PublisherInner>,
}

struct PublisherInner {
    subscribers: Vec<Arc<dyn TaskEventSubscriber>>,
    terminal: Option<TaskStatusUpdateEvent>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PublisherInner {
                subscribers: Vec::new(),
                terminal: None,
            }),
        }
    }

    /// Register a subscriber. If the task already reached a terminal state
    /// the terminal status event is replayed to the new subscriber
    /// immediately and it is not retained.
    pub async fn subscribe(&self, subscriber: Arc<dyn TaskEventSubscriber>) {
        let replay = {
            let mut inner = self.inner.lock().expect("publisher lock poisoned");
            match &inner.terminal {
                Some(event) => Some(event.clone()),
                None => {
                    if !inner
                        .subscribers
                        .iter()
                        .any(|existing| Arc::ptr_eq(existing, &subscriber))
                    {
                        inner.subscribers.push(subscriber.clone());
                    }
                    None
                }
            }
        };
        if let Some(event) = replay {
            if let Err(err) = subscriber.on_status_update(&event).await {
                debug!(
                    "late subscriber refused terminal replay for task {}: {}",
                    event.task_id, err
                );
            }
        }
    }

    /// Remove a subscriber. Idempotent: removing a handle that is not
    /// registered is a no-op.
    pub fn unsubscribe(&self, subscriber: &Arc<dyn TaskEventSubscriber>) {
        let mut inner = self.inner.lock().expect("publisher lock poisoned");
        inner
            .subscribers
            .retain(|existing| !Arc::ptr_eq(existing, subscriber));
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .expect("publisher lock poisoned")
            .subscribers
            .len()
    }

    /// Deliver an event to a snapshot of the current subscriber set.
    ///
    /// A subscriber that fails delivery is removed from the live set; the
    /// rest still receive the event. A final event clears the live set and
    /// seals the stream: anything published afterwards is dropped.
    pub async fn publish(&self, event: TaskEvent) {
        let snapshot = {
            let inner = self.inner.lock().expect("publisher lock poisoned");
            if inner.terminal.is_some() {
                debug!(
                    "dropping event for task {}: stream already terminal",
                    event.task_id()
                );
                return;
            }
            inner.subscribers.clone()
        };

        let mut failed: Vec<Arc<dyn TaskEventSubscriber>> = Vec::new();
        for subscriber in &snapshot {
            let delivered = match &event {
                TaskEvent::Status(status) => subscriber.on_status_update(status).await,
                TaskEvent::Artifact(artifact) => subscriber.on_artifact_update(artifact).await,
            };
            if let Err(err) = delivered {
                warn!(
                    "removing subscriber of task {} after delivery failure: {}",
                    event.task_id(),
                    err
                );
                failed.push(subscriber.clone());
            }
        }

        let mut inner = self.inner.lock().expect("publisher lock poisoned");
        for subscriber in &failed {
            inner
                .subscribers
                .retain(|existing| !Arc::ptr_eq(existing, subscriber));
        }
        if event.is_final() {
            if let TaskEvent::Status(status) = &event {
                inner.terminal = Some(status.clone());
            }
            inner.subscribers.clear();
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
