use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::types::{Artifact, Message, Task, TaskState};

/// One update reported by a content producer while it works on a task.
/// The task manager decides finality from the terminal-ness of the state;
/// producers never flag it themselves.
#[derive(Debug, Clone)]
pub enum ProducerUpdate {
    Status {
        state: TaskState,
        message: Option<Message>,
    },
    Artifact {
        artifact: Artifact,
        append: bool,
        last_chunk: bool,
    },
}

/// The content-generation collaborator: decides what the agent "says" for a
/// task and reports progress as a sequence of updates that the task manager
/// drains into the task's event stream.
#[async_trait]
pub trait MessageProducer: Send + Sync {
    async fn produce(&self, task: Task, message: Message) -> BoxStream<'static, ProducerUpdate>;
}

/// Placeholder producer: mirrors the text of the inbound message back as an
/// artifact, then completes the task with an agent reply.
pub struct EchoProducer;

#[async_trait]
impl MessageProducer for EchoProducer {
    async fn produce(&self, _task: Task, message: Message) -> BoxStream<'static, ProducerUpdate> {
        let text = match message.text_content() {
            content if content.is_empty() => "ok".to_string(),
            content => content,
        };

        let updates = vec![
            ProducerUpdate::Artifact {
                artifact: Artifact::text("echo", text.clone()),
                append: false,
                last_chunk: true,
            },
            ProducerUpdate::Status {
                state: TaskState::Completed,
                message: Some(Message::agent_text(format!("echo: {}", text))),
            },
        ];
        stream::iter(updates).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageRole;

    #[tokio::test]
    async fn echo_producer_ends_with_completed() {
        let producer = EchoProducer;
        let task = Task {
            id: "t-1".to_string(),
            context_id: "ctx-1".to_string(),
            status: crate::types::TaskStatus::new(TaskState::Working),
            history: Vec::new(),
            artifacts: Vec::new(),
            owner_id: None,
            metadata: None,
            created_at: chrono::Utc::now(),
            updated_at: None,
        };
        let updates: Vec<_> = producer
            .produce(task, Message::user_text("hi"))
            .await
            .collect()
            .await;

        assert_eq!(updates.len(), 2);
        assert!(matches!(
            &updates[0],
            ProducerUpdate::Artifact { last_chunk: true, .. }
        ));
        match &updates[1] {
            ProducerUpdate::Status { state, message } => {
                assert_eq!(state, &TaskState::Completed);
                let reply = message.as_ref().unwrap();
                assert_eq!(reply.role, MessageRole::Agent);
                assert_eq!(reply.text_content(), "echo: hi");
            }
            other => panic!("unexpected update: {:?}", other),
        }
    }
}
