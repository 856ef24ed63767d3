use anyhow::Result;
use log::info;

use a2a_task_engine::{Credentials, Message, PageRequest, TaskFilter, TaskService};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    info!("Starting A2A task engine demo");

    let service = TaskService::builder()
        .with_agent_name("Echo Agent")
        .with_agent_description("Demo agent that echoes messages back")
        .build();

    let gate = service
        .authenticate(&Credentials::bearer("demo-user"))
        .await?;

    let session = gate
        .send_message_streaming(Message::user_text("hello from the demo"), None)
        .await?;
    info!("started task {}", session.task_id());

    let mut events = session.events(32).await?;
    while let Some(event) = events.recv().await {
        info!("event: {}", serde_json::to_string(&event)?);
        if event.is_final() {
            break;
        }
    }

    let task = session.get_task().await?;
    info!(
        "task {} finished in state {:?} with {} artifact(s)",
        task.id,
        task.status.state,
        task.artifacts.len()
    );

    let page = gate
        .list_tasks(&TaskFilter::default(), &PageRequest::default())
        .await?;
    info!("user has {} task(s)", page.tasks.len());

    gate.dispose();
    Ok(())
}
