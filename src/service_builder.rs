use std::sync::Arc;

use uuid::Uuid;

use crate::auth::{BearerValidator, Credentials, CredentialValidator, Gate};
use crate::error::EngineResult;
use crate::memory_store::InMemoryTaskStore;
use crate::producer::{EchoProducer, MessageProducer};
use crate::task_manager::TaskManager;
use crate::task_store::TaskStore;
use crate::types::AgentCard;

/// Assembled engine: the task manager plus the credential validator that
/// mints authorization gates. This is the surface a transport layer binds
/// to: `authenticate` first, everything else through the returned [`Gate`].
pub struct TaskService {
    manager: TaskManager,
    validator: Arc<dyn CredentialValidator>,
}

impl TaskService {
    pub fn builder() -> TaskServiceBuilder {
        TaskServiceBuilder::new()
    }

    pub fn manager(&self) -> &TaskManager {
        &self.manager
    }

    /// Validate credentials and mint a gate bound to the resolved identity.
    pub async fn authenticate(&self, credentials: &Credentials) -> EngineResult<Gate> {
        let principal = self.validator.validate(credentials).await?;
        Ok(Gate::new(self.manager.clone(), principal))
    }
}

/// Builder for [`TaskService`]; unset pieces fall back to the in-memory
/// store, the echo producer and the bearer placeholder validator.
pub struct TaskServiceBuilder {
    store: Option<Arc<dyn TaskStore>>,
    producer: Option<Arc<dyn MessageProducer>>,
    validator: Option<Arc<dyn CredentialValidator>>,
    agent_id: Option<Uuid>,
    agent_name: Option<String>,
    agent_description: Option<String>,
}

impl Default for TaskServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskServiceBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            producer: None,
            validator: None,
            agent_id: None,
            agent_name: None,
            agent_description: None,
        }
    }

    /// Set a custom task store (like [`crate::RedisTaskStore`]).
    pub fn with_store(mut self, store: impl TaskStore) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn with_producer(mut self, producer: impl MessageProducer + 'static) -> Self {
        self.producer = Some(Arc::new(producer));
        self
    }

    pub fn with_validator(mut self, validator: impl CredentialValidator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn with_agent_id(mut self, agent_id: Uuid) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn with_agent_name(mut self, name: impl Into<String>) -> Self {
        self.agent_name = Some(name.into());
        self
    }

    pub fn with_agent_description(mut self, description: impl Into<String>) -> Self {
        self.agent_description = Some(description.into());
        self
    }

    pub fn build(self) -> TaskService {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new()));
        let producer = self.producer.unwrap_or_else(|| Arc::new(EchoProducer));
        let validator = self.validator.unwrap_or_else(|| Arc::new(BearerValidator));

        let agent = AgentCard {
            id: self.agent_id.unwrap_or_else(Uuid::new_v4),
            name: self.agent_name.unwrap_or_else(|| "A2A Agent".to_string()),
            description: self
                .agent_description
                .unwrap_or_else(|| "A generic A2A agent implementation".to_string()),
            metadata: None,
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        };

        TaskService {
            manager: TaskManager::new(store, producer, agent),
            validator,
        }
    }
}
