use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::event_publisher::TaskEventSubscriber;
use crate::streaming::StreamingSession;
use crate::task_manager::TaskManager;
use crate::types::{Message, PageRequest, Task, TaskFilter, TaskPage};

/// Credentials presented by a caller.
#[derive(Debug, Clone)]
pub enum Credentials {
    Bearer(String),
}

impl Credentials {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer(token.into())
    }
}

/// Resolved identity plus the operations it is allowed to perform.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: String,
    pub permissions: HashSet<Permission>,
}

/// One delegable operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    SendMessage,
    GetTask,
    ListTasks,
    CancelTask,
}

impl Permission {
    pub fn all() -> HashSet<Permission> {
        [
            Permission::SendMessage,
            Permission::GetTask,
            Permission::ListTasks,
            Permission::CancelTask,
        ]
        .into_iter()
        .collect()
    }

    pub fn read_only() -> HashSet<Permission> {
        [Permission::GetTask, Permission::ListTasks]
            .into_iter()
            .collect()
    }
}

/// Pluggable credential check resolving credentials to a principal.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    async fn validate(&self, credentials: &Credentials) -> EngineResult<Principal>;
}

/// Placeholder validator: any non-empty bearer token is accepted and the
/// token value doubles as the user id, with the full permission set. Not a
/// design contract; swap in a real validator for anything beyond tests and
/// demos.
pub struct BearerValidator;

#[async_trait]
impl CredentialValidator for BearerValidator {
    async fn validate(&self, credentials: &Credentials) -> EngineResult<Principal> {
        match credentials {
            Credentials::Bearer(token) if !token.trim().is_empty() => Ok(Principal {
                user_id: token.clone(),
                permissions: Permission::all(),
            }),
            Credentials::Bearer(_) => Err(EngineError::Unauthorized),
        }
    }
}

/// Capability handle bound to one authenticated identity. Every delegated
/// call re-checks disposal at call time, enforces the permission set and
/// the task ownership rule, then forwards to the task manager. Creating
/// operations stamp the new task's owner with the gate's user.
pub struct Gate {
    manager: TaskManager,
    user_id: String,
    permissions: HashSet<Permission>,
    disposed: Arc<AtomicBool>,
}

impl Gate {
    pub(crate) fn new(manager: TaskManager, principal: Principal) -> Self {
        info!("opened gate for user {}", principal.user_id);
        Self {
            manager,
            user_id: principal.user_id,
            permissions: principal.permissions,
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Irreversibly revoke this gate and every attenuated gate derived
    /// from it. All subsequent calls fail with `Revoked`.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        debug!("disposed gate for user {}", self.user_id);
    }

    /// Attenuated gate sharing this gate's identity and disposal flag but
    /// restricted to read and list operations. Built by composition; no
    /// new authentication round-trip and no mutation of this gate.
    pub fn read_only(&self) -> Gate {
        let permissions = self
            .permissions
            .intersection(&Permission::read_only())
            .copied()
            .collect();
        Gate {
            manager: self.manager.clone(),
            user_id: self.user_id.clone(),
            permissions,
            disposed: Arc::clone(&self.disposed),
        }
    }

    pub async fn send_message(&self, message: Message) -> EngineResult<Task> {
        self.ensure_live()?;
        self.ensure_permitted(Permission::SendMessage)?;
        if let Some(task_id) = message.task_id.clone() {
            self.ensure_owner(&task_id).await?;
            self.ensure_live()?;
        }
        self.manager
            .send_message(message, Some(self.user_id.clone()))
            .await
    }

    pub async fn send_message_streaming(
        &self,
        message: Message,
        subscriber: Option<Arc<dyn TaskEventSubscriber>>,
    ) -> EngineResult<StreamingSession> {
        self.ensure_live()?;
        self.ensure_permitted(Permission::SendMessage)?;
        if let Some(task_id) = message.task_id.clone() {
            self.ensure_owner(&task_id).await?;
            self.ensure_live()?;
        }
        self.manager
            .send_message_streaming(message, Some(self.user_id.clone()), subscriber)
            .await
    }

    pub async fn get_task(
        &self,
        task_id: &str,
        history_length: Option<usize>,
    ) -> EngineResult<Task> {
        self.ensure_live()?;
        self.ensure_permitted(Permission::GetTask)?;
        self.ensure_owner(task_id).await?;
        self.ensure_live()?;
        self.manager.get_task(task_id, history_length).await
    }

    /// List this user's tasks; the filter's owner field is overridden with
    /// the gate's identity so other users' tasks can never leak through.
    pub async fn list_tasks(
        &self,
        filter: &TaskFilter,
        page: &PageRequest,
    ) -> EngineResult<TaskPage> {
        self.ensure_live()?;
        self.ensure_permitted(Permission::ListTasks)?;
        let scoped = TaskFilter {
            owner_id: Some(self.user_id.clone()),
            ..filter.clone()
        };
        self.manager.list_tasks(&scoped, page).await
    }

    pub async fn cancel_task(&self, task_id: &str) -> EngineResult<Task> {
        self.ensure_live()?;
        self.ensure_permitted(Permission::CancelTask)?;
        self.ensure_owner(task_id).await?;
        self.ensure_live()?;
        self.manager.cancel_task(task_id).await
    }

    /// Re-subscription handle for one of this user's tasks.
    pub async fn resubscribe(&self, task_id: &str) -> EngineResult<StreamingSession> {
        self.ensure_live()?;
        self.ensure_permitted(Permission::GetTask)?;
        self.ensure_owner(task_id).await?;
        self.ensure_live()?;
        self.manager.open_stream(task_id).await
    }

    fn ensure_live(&self) -> EngineResult<()> {
        if self.is_disposed() {
            return Err(EngineError::Revoked);
        }
        Ok(())
    }

    fn ensure_permitted(&self, permission: Permission) -> EngineResult<()> {
        if !self.permissions.contains(&permission) {
            debug!(
                "gate for user {} lacks permission {:?}",
                self.user_id, permission
            );
            return Err(EngineError::Forbidden {
                user_id: self.user_id.clone(),
            });
        }
        Ok(())
    }

    async fn ensure_owner(&self, task_id: &str) -> EngineResult<()> {
        let task = self.manager.get_task(task_id, Some(0)).await?;
        if task.owner_id.as_deref() != Some(self.user_id.as_str()) {
            debug!("user {} does not own task {}", self.user_id, task_id);
            return Err(EngineError::Forbidden {
                user_id: self.user_id.clone(),
            });
        }
        Ok(())
    }
}
