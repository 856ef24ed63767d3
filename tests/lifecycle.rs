//! End-to-end behavior of the task engine through the authenticated surface:
//! lifecycle transitions, event stream guarantees, pagination, ownership
//! isolation and gate revocation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::time::timeout;
use tokio_test::assert_ok;

use a2a_task_engine::{
    ChannelSubscriber, Credentials, EngineError, Message, MessageProducer, PageRequest,
    ProducerUpdate, Task, TaskEvent, TaskFilter, TaskService, TaskState,
};

/// Producer whose stream never yields, keeping tasks at `working` so tests
/// can drive transitions themselves.
struct PendingProducer;

#[async_trait]
impl MessageProducer for PendingProducer {
    async fn produce(&self, _task: Task, _message: Message) -> BoxStream<'static, ProducerUpdate> {
        stream::pending().boxed()
    }
}

fn echo_service() -> TaskService {
    TaskService::builder().with_agent_name("echo").build()
}

fn pending_service() -> TaskService {
    TaskService::builder()
        .with_producer(PendingProducer)
        .build()
}

async fn next_event(rx: &mut tokio::sync::mpsc::Receiver<TaskEvent>) -> TaskEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed early")
}

#[tokio::test]
async fn create_then_cancel_scenario() {
    let service = pending_service();
    let gate = service
        .authenticate(&Credentials::bearer("alice"))
        .await
        .unwrap();

    let task = gate.send_message(Message::user_text("hi")).await.unwrap();
    assert_eq!(task.status.state, TaskState::Working);
    assert_eq!(task.history.len(), 1);

    let canceled = gate.cancel_task(&task.id).await.unwrap();
    assert_eq!(canceled.status.state, TaskState::Canceled);

    let err = gate.cancel_task(&task.id).await;
    assert!(matches!(err, Err(EngineError::InvalidState { .. })));
}

#[tokio::test]
async fn event_stream_runs_submitted_working_then_exactly_one_final() {
    let service = echo_service();
    let gate = service
        .authenticate(&Credentials::bearer("alice"))
        .await
        .unwrap();

    let (subscriber, mut rx) = ChannelSubscriber::channel(32);
    let session = gate
        .send_message_streaming(Message::user_text("hello"), Some(subscriber))
        .await
        .unwrap();

    let mut states = Vec::new();
    let mut finals = 0;
    loop {
        let event = next_event(&mut rx).await;
        assert_eq!(event.task_id(), session.task_id());
        if let TaskEvent::Status(status) = &event {
            states.push(status.status.state.clone());
        }
        if event.is_final() {
            finals += 1;
            break;
        }
    }
    // The publisher clears its subscriber set after the final event; the
    // channel closes and nothing else can arrive.
    assert!(rx.recv().await.is_none());

    assert_eq!(states[0], TaskState::Submitted);
    assert_eq!(states[1], TaskState::Working);
    assert_eq!(states.last(), Some(&TaskState::Completed));
    assert_eq!(finals, 1);

    let task = session.get_task().await.unwrap();
    assert_eq!(task.status.state, TaskState::Completed);
    assert_eq!(task.artifacts.len(), 1);
}

#[tokio::test]
async fn late_subscriber_observes_single_terminal_event() {
    let service = echo_service();
    let gate = service
        .authenticate(&Credentials::bearer("alice"))
        .await
        .unwrap();

    let (subscriber, mut rx) = ChannelSubscriber::channel(32);
    let session = gate
        .send_message_streaming(Message::user_text("hello"), Some(subscriber))
        .await
        .unwrap();
    loop {
        if next_event(&mut rx).await.is_final() {
            break;
        }
    }

    let resumed = gate.resubscribe(session.task_id()).await.unwrap();
    let mut late = resumed.events(8).await.unwrap();
    let replay = next_event(&mut late).await;
    assert!(replay.is_final());
    assert!(matches!(
        replay,
        TaskEvent::Status(ref e) if e.status.state == TaskState::Completed
    ));
    assert!(late.recv().await.is_none());
}

#[tokio::test]
async fn failing_subscriber_does_not_block_the_rest() {
    struct Broken;

    #[async_trait]
    impl a2a_task_engine::TaskEventSubscriber for Broken {
        async fn on_status_update(
            &self,
            _event: &a2a_task_engine::TaskStatusUpdateEvent,
        ) -> Result<(), a2a_task_engine::DeliveryError> {
            Err(a2a_task_engine::DeliveryError("broken pipe".to_string()))
        }

        async fn on_artifact_update(
            &self,
            _event: &a2a_task_engine::TaskArtifactUpdateEvent,
        ) -> Result<(), a2a_task_engine::DeliveryError> {
            Err(a2a_task_engine::DeliveryError("broken pipe".to_string()))
        }
    }

    let service = echo_service();
    let gate = service
        .authenticate(&Credentials::bearer("alice"))
        .await
        .unwrap();

    let (healthy, mut rx) = ChannelSubscriber::channel(32);
    let session = gate
        .send_message_streaming(Message::user_text("hello"), Some(Arc::new(Broken)))
        .await
        .unwrap();
    session.subscribe(healthy).await.unwrap();

    // The healthy subscriber still sees the stream through to the end.
    loop {
        if next_event(&mut rx).await.is_final() {
            break;
        }
    }
}

#[tokio::test]
async fn ownership_isolates_users() {
    let service = pending_service();
    let alice = service
        .authenticate(&Credentials::bearer("alice"))
        .await
        .unwrap();
    let bob = service
        .authenticate(&Credentials::bearer("bob"))
        .await
        .unwrap();

    let task = alice.send_message(Message::user_text("mine")).await.unwrap();
    assert_eq!(task.owner_id.as_deref(), Some("alice"));

    let err = bob.get_task(&task.id, None).await;
    assert!(matches!(err, Err(EngineError::Forbidden { .. })));

    let err = bob.cancel_task(&task.id).await;
    assert!(matches!(err, Err(EngineError::Forbidden { .. })));

    let bobs_view = bob
        .list_tasks(&TaskFilter::default(), &PageRequest::default())
        .await
        .unwrap();
    assert!(bobs_view.tasks.is_empty());

    // Even an explicit filter for alice's tasks stays scoped to bob.
    let spoofed = bob
        .list_tasks(
            &TaskFilter {
                owner_id: Some("alice".to_string()),
                ..Default::default()
            },
            &PageRequest::default(),
        )
        .await
        .unwrap();
    assert!(spoofed.tasks.is_empty());
}

#[tokio::test]
async fn disposed_gate_refuses_everything() {
    let service = pending_service();
    let gate = service
        .authenticate(&Credentials::bearer("alice"))
        .await
        .unwrap();
    let task = gate.send_message(Message::user_text("hi")).await.unwrap();

    gate.dispose();

    let err = gate.get_task(&task.id, None).await;
    assert!(matches!(err, Err(EngineError::Revoked)));
    let err = gate.send_message(Message::user_text("again")).await;
    assert!(matches!(err, Err(EngineError::Revoked)));
    let err = gate
        .list_tasks(&TaskFilter::default(), &PageRequest::default())
        .await;
    assert!(matches!(err, Err(EngineError::Revoked)));
    let err = gate.cancel_task(&task.id).await;
    assert!(matches!(err, Err(EngineError::Revoked)));
}

#[tokio::test]
async fn disposal_propagates_to_attenuated_gates() {
    let service = pending_service();
    let gate = service
        .authenticate(&Credentials::bearer("alice"))
        .await
        .unwrap();
    let task = gate.send_message(Message::user_text("hi")).await.unwrap();

    let reader = gate.read_only();
    assert_ok!(reader.get_task(&task.id, None).await);

    gate.dispose();
    let err = reader.get_task(&task.id, None).await;
    assert!(matches!(err, Err(EngineError::Revoked)));
}

#[tokio::test]
async fn read_only_gate_cannot_mutate() {
    let service = pending_service();
    let gate = service
        .authenticate(&Credentials::bearer("alice"))
        .await
        .unwrap();
    let task = gate.send_message(Message::user_text("hi")).await.unwrap();

    let reader = gate.read_only();
    assert_ok!(reader.get_task(&task.id, None).await);
    assert_ok!(
        reader
            .list_tasks(&TaskFilter::default(), &PageRequest::default())
            .await
    );

    let err = reader.send_message(Message::user_text("nope")).await;
    assert!(matches!(err, Err(EngineError::Forbidden { .. })));
    let err = reader.cancel_task(&task.id).await;
    assert!(matches!(err, Err(EngineError::Forbidden { .. })));

    // The original gate is unchanged by the attenuation.
    assert_ok!(gate.cancel_task(&task.id).await);
}

#[tokio::test]
async fn pagination_walks_a_context_one_task_at_a_time() {
    let service = pending_service();
    let gate = service
        .authenticate(&Credentials::bearer("alice"))
        .await
        .unwrap();

    for text in ["one", "two"] {
        let mut message = Message::user_text(text);
        message.context_id = Some("ctx-1".to_string());
        gate.send_message(message).await.unwrap();
    }
    // A task in another context that must never show up.
    let mut other = Message::user_text("noise");
    other.context_id = Some("ctx-2".to_string());
    gate.send_message(other).await.unwrap();

    let filter = TaskFilter {
        context_id: Some("ctx-1".to_string()),
        ..Default::default()
    };

    let first = gate
        .list_tasks(&filter, &PageRequest::first(1))
        .await
        .unwrap();
    assert_eq!(first.tasks.len(), 1);
    assert_eq!(first.tasks[0].history[0].text_content(), "one");
    let cursor = first.next_cursor.expect("a second page exists");

    let second = gate
        .list_tasks(&filter, &PageRequest::after(cursor, 1))
        .await
        .unwrap();
    assert_eq!(second.tasks.len(), 1);
    assert_eq!(second.tasks[0].history[0].text_content(), "two");
    assert!(second.next_cursor.is_none());
}

#[tokio::test]
async fn continuation_appends_to_history_and_republishes_working() {
    let service = pending_service();
    let gate = service
        .authenticate(&Credentials::bearer("alice"))
        .await
        .unwrap();

    let task = gate.send_message(Message::user_text("first")).await.unwrap();

    let (subscriber, mut rx) = ChannelSubscriber::channel(8);
    let mut follow_up = Message::user_text("second");
    follow_up.task_id = Some(task.id.clone());
    let session = gate
        .send_message_streaming(follow_up, Some(subscriber))
        .await
        .unwrap();

    let event = next_event(&mut rx).await;
    assert!(matches!(
        event,
        TaskEvent::Status(ref e) if e.status.state == TaskState::Working && !e.is_final
    ));

    let snapshot = session.get_task().await.unwrap();
    assert_eq!(snapshot.history.len(), 2);
    assert_eq!(snapshot.history[1].text_content(), "second");
}

#[tokio::test]
async fn unsubscribe_is_idempotent_through_the_session() {
    let service = pending_service();
    let gate = service
        .authenticate(&Credentials::bearer("alice"))
        .await
        .unwrap();

    let session = gate
        .send_message_streaming(Message::user_text("hi"), None)
        .await
        .unwrap();

    let (subscriber, mut rx) = ChannelSubscriber::channel(8);
    let handle: Arc<dyn a2a_task_engine::TaskEventSubscriber> = subscriber;
    session.subscribe(handle.clone()).await.unwrap();

    assert_ok!(session.unsubscribe(&handle).await);
    assert_ok!(session.unsubscribe(&handle).await);

    // Detached before anything else was published: cancel's final event
    // must not reach the channel.
    gate.cancel_task(session.task_id()).await.unwrap();
    assert!(
        timeout(Duration::from_millis(100), rx.recv())
            .await
            .map(|event| event.is_none())
            .unwrap_or(true),
        "unsubscribed channel must stay silent"
    );
}
