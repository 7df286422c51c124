//! Task handler port and the per-execution context passed to it.

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::models::task::Task;

/// Per-execution context handed to a handler.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Signalled when the task is cancelled or times out
    pub cancel: CancellationToken,
    /// Bot the task was assigned to, if any
    pub bot_id: Option<String>,
}

impl ExecutionContext {
    pub fn new(cancel: CancellationToken, bot_id: Option<String>) -> Self {
        Self { cancel, bot_id }
    }

    /// Context that is never cancelled, for direct invocations and tests.
    pub fn detached() -> Self {
        Self::new(CancellationToken::new(), None)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation is requested. Handlers await this at
    /// their safe points, usually inside a `select!`.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

/// Port for logic that executes one kind of task
///
/// Handlers are registered per task type. Several may cover the same type;
/// the registry picks a primary and keeps the rest as fallbacks.
///
/// # Examples
///
/// ```
/// use anyhow::Result;
/// use async_trait::async_trait;
/// use overwatch::domain::models::Task;
/// use overwatch::domain::ports::{ExecutionContext, TaskHandler};
///
/// struct Echo;
///
/// #[async_trait]
/// impl TaskHandler for Echo {
///     fn name(&self) -> &str {
///         "echo"
///     }
///
///     async fn execute(&self, task: &Task, _ctx: &ExecutionContext) -> Result<serde_json::Value> {
///         Ok(serde_json::json!({ "echo": task.name }))
///     }
/// }
/// ```
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Name used for logging and idempotent re-registration
    fn name(&self) -> &str;

    /// Whether this handler accepts the given task
    ///
    /// A panic here is treated as `false`.
    fn can_handle(&self, _task: &Task) -> bool {
        true
    }

    /// Execute the task
    ///
    /// # Returns
    ///
    /// * `Ok(value)` - Opaque result payload, recorded as a COMPLETED result
    /// * `Err` - Recorded as a FAILED result carrying the error message
    async fn execute(&self, task: &Task, ctx: &ExecutionContext) -> Result<serde_json::Value>;
}
