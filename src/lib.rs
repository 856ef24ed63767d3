//! Core engine for Agent-to-Agent (A2A) task services.
//!
//! This library implements the task side of the A2A protocol: a validated
//! task lifecycle, per-task push event streams, and capability-scoped
//! authorization. A transport layer (JSON-RPC, HTTP, message bus) plugs in
//! on top of [`TaskService`]; a content producer plugs in behind the
//! [`TaskManager`].
//!
//! The engine is modular, with components for:
//! - Task storage (in-memory and Redis backends behind one trait)
//! - Task lifecycle management and event publication
//! - Streaming subscriptions
//! - Authentication and per-user authorization gates

pub mod auth;
pub mod error;
pub mod event_publisher;
pub mod memory_store;
pub mod producer;
pub mod redis_store;
pub mod service_builder;
pub mod state_machine;
pub mod streaming;
pub mod task_manager;
pub mod task_store;
pub mod types;

// Re-export commonly used items
pub use auth::{BearerValidator, Credentials, CredentialValidator, Gate, Permission, Principal};
pub use error::{EngineError, EngineResult};
pub use event_publisher::{DeliveryError, EventPublisher, TaskEventSubscriber};
pub use memory_store::InMemoryTaskStore;
pub use producer::{EchoProducer, MessageProducer, ProducerUpdate};
pub use redis_store::RedisTaskStore;
pub use service_builder::{TaskService, TaskServiceBuilder};
pub use streaming::{ChannelSubscriber, StreamingSession};
pub use task_manager::TaskManager;
pub use task_store::TaskStore;

// Re-export key types
pub use types::{
    AgentCard, Artifact, FileContent, Message, MessageRole, PageRequest, Part, Task,
    TaskArtifactUpdateEvent, TaskEvent, TaskFilter, TaskPage, TaskState, TaskStatus,
    TaskStatusUpdateEvent,
};
