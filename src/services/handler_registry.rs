//! Handler Registry Service
//!
//! Maps task types to the handlers able to execute them and runs the
//! primary/fallback chain for a task.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::domain::errors::EngineError;
use crate::domain::models::task::{Task, TaskType};
use crate::domain::ports::{ExecutionContext, TaskHandler};

/// Registry of task handlers keyed by task type
///
/// Handlers for a type are kept in registration order. For a given task the
/// primary is the most recently registered handler whose `can_handle`
/// accepts it; the other accepting handlers are fallbacks, tried in
/// registration order only when the primary fails.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<TaskType, Vec<Arc<dyn TaskHandler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a task type
    ///
    /// Registering a handler under a name already present for the type
    /// replaces that entry and makes it the newest registration.
    pub fn register(&self, task_type: TaskType, handler: Arc<dyn TaskHandler>) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let entries = handlers.entry(task_type.clone()).or_default();

        let replaced = entries.len();
        entries.retain(|h| h.name() != handler.name());
        if entries.len() != replaced {
            debug!(task_type = %task_type, handler = handler.name(), "replacing handler");
        }

        info!(
            task_type = %task_type,
            handler = handler.name(),
            position = entries.len(),
            "registered handler"
        );
        entries.push(handler);
    }

    /// Remove a handler by name. Returns whether one was removed.
    pub fn unregister(&self, task_type: &TaskType, name: &str) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = handlers.get_mut(task_type) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|h| h.name() != name);
        let removed = entries.len() != before;
        if entries.is_empty() {
            handlers.remove(task_type);
        }
        removed
    }

    /// Whether any handler is registered for the type
    pub fn covers(&self, task_type: &TaskType) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_type)
            .is_some_and(|entries| !entries.is_empty())
    }

    /// Handler names for a type, in registration order
    pub fn handler_names(&self, task_type: &TaskType) -> Vec<String> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_type)
            .map(|entries| entries.iter().map(|h| h.name().to_string()).collect())
            .unwrap_or_default()
    }

    /// All registered task types
    pub fn task_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    /// Dispatch chain for a task: primary first, then fallbacks
    pub fn resolve(&self, task: &Task) -> Vec<Arc<dyn TaskHandler>> {
        let entries: Vec<Arc<dyn TaskHandler>> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&task.task_type)
            .cloned()
            .unwrap_or_default();

        // can_handle runs outside the lock so a slow or panicking handler
        // cannot wedge registration
        let mut accepting: Vec<Arc<dyn TaskHandler>> = entries
            .into_iter()
            .filter(|h| accepts(h.as_ref(), task))
            .collect();

        if let Some(primary) = accepting.pop() {
            accepting.insert(0, primary);
        }
        accepting
    }

    /// Execute a task through its handler chain
    ///
    /// Errors and panics from a handler move on to the next fallback. The
    /// chain stops early when the context is cancelled.
    ///
    /// # Errors
    ///
    /// `HandlerExecution` when no handler accepts the task or every
    /// accepting handler failed. The message is the last failure.
    pub async fn execute(
        &self,
        task: &Task,
        ctx: &ExecutionContext,
    ) -> Result<serde_json::Value, EngineError> {
        let chain = self.resolve(task);
        if chain.is_empty() {
            return Err(EngineError::HandlerExecution {
                task_id: task.id,
                message: format!("no handler accepts task type '{}'", task.task_type),
            });
        }

        let mut last_error = String::new();
        for (position, handler) in chain.iter().enumerate() {
            if ctx.is_cancelled() {
                last_error = "cancelled".to_string();
                break;
            }

            let outcome = AssertUnwindSafe(handler.execute(task, ctx))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(value)) => {
                    if position > 0 {
                        info!(
                            task_id = %task.id,
                            handler = handler.name(),
                            "fallback handler succeeded"
                        );
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    last_error = format!("{e:#}");
                }
                Err(panic) => {
                    last_error = format!("handler panicked: {}", panic_message(panic.as_ref()));
                }
            }

            warn!(
                task_id = %task.id,
                handler = handler.name(),
                error = %last_error,
                remaining = chain.len() - position - 1,
                "handler failed"
            );
        }

        Err(EngineError::HandlerExecution {
            task_id: task.id,
            message: last_error,
        })
    }
}

fn accepts(handler: &dyn TaskHandler, task: &Task) -> bool {
    catch_unwind(AssertUnwindSafe(|| handler.can_handle(task))).unwrap_or_else(|_| {
        warn!(
            task_id = %task.id,
            handler = handler.name(),
            "can_handle panicked, treating as no match"
        );
        false
    })
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::task::{NewTask, TaskDefaults, TaskPriority};
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use serde_json::json;

    struct Fixed {
        name: &'static str,
        accept: bool,
        fail: bool,
    }

    #[async_trait]
    impl TaskHandler for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn can_handle(&self, _task: &Task) -> bool {
            self.accept
        }

        async fn execute(&self, _task: &Task, _ctx: &ExecutionContext) -> Result<serde_json::Value> {
            if self.fail {
                bail!("{} failed", self.name);
            }
            Ok(json!({ "handler": self.name }))
        }
    }

    struct PanicsOnCheck;

    #[async_trait]
    impl TaskHandler for PanicsOnCheck {
        fn name(&self) -> &str {
            "panics_on_check"
        }

        fn can_handle(&self, _task: &Task) -> bool {
            panic!("can_handle bug")
        }

        async fn execute(&self, _task: &Task, _ctx: &ExecutionContext) -> Result<serde_json::Value> {
            Ok(json!("unreachable"))
        }
    }

    struct PanicsOnRun;

    #[async_trait]
    impl TaskHandler for PanicsOnRun {
        fn name(&self) -> &str {
            "panics_on_run"
        }

        async fn execute(&self, _task: &Task, _ctx: &ExecutionContext) -> Result<serde_json::Value> {
            panic!("execute bug")
        }
    }

    fn handler(name: &'static str, accept: bool, fail: bool) -> Arc<dyn TaskHandler> {
        Arc::new(Fixed { name, accept, fail })
    }

    fn task() -> Task {
        Task::create(
            NewTask::new("t", TaskType::Backup, TaskPriority::Medium),
            TaskDefaults::default(),
        )
        .unwrap()
    }

    fn names(chain: &[Arc<dyn TaskHandler>]) -> Vec<&str> {
        chain.iter().map(|h| h.name()).collect()
    }

    #[test]
    fn test_last_registered_is_primary() {
        let registry = HandlerRegistry::new();
        registry.register(TaskType::Backup, handler("a", true, false));
        registry.register(TaskType::Backup, handler("b", true, false));
        registry.register(TaskType::Backup, handler("c", true, false));

        assert_eq!(names(&registry.resolve(&task())), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_reregistration_replaces_and_promotes() {
        let registry = HandlerRegistry::new();
        registry.register(TaskType::Backup, handler("a", true, false));
        registry.register(TaskType::Backup, handler("b", true, false));
        registry.register(TaskType::Backup, handler("a", true, false));

        assert_eq!(registry.handler_names(&TaskType::Backup), vec!["b", "a"]);
        assert_eq!(names(&registry.resolve(&task())), vec!["a", "b"]);
    }

    #[test]
    fn test_non_accepting_and_panicking_checks_are_skipped() {
        let registry = HandlerRegistry::new();
        registry.register(TaskType::Backup, handler("a", true, false));
        registry.register(TaskType::Backup, handler("picky", false, false));
        registry.register(TaskType::Backup, Arc::new(PanicsOnCheck));

        assert_eq!(names(&registry.resolve(&task())), vec!["a"]);
    }

    #[test]
    fn test_covers_and_unregister() {
        let registry = HandlerRegistry::new();
        assert!(!registry.covers(&TaskType::Backup));
        registry.register(TaskType::Backup, handler("a", true, false));
        assert!(registry.covers(&TaskType::Backup));
        assert!(registry.unregister(&TaskType::Backup, "a"));
        assert!(!registry.covers(&TaskType::Backup));
        assert!(!registry.unregister(&TaskType::Backup, "a"));
    }

    #[tokio::test]
    async fn test_fallback_used_when_primary_fails() {
        let registry = HandlerRegistry::new();
        registry.register(TaskType::Backup, handler("fallback", true, false));
        registry.register(TaskType::Backup, handler("primary", true, true));

        let value = registry
            .execute(&task(), &ExecutionContext::detached())
            .await
            .unwrap();
        assert_eq!(value, json!({ "handler": "fallback" }));
    }

    #[tokio::test]
    async fn test_panicking_primary_falls_back() {
        let registry = HandlerRegistry::new();
        registry.register(TaskType::Backup, handler("fallback", true, false));
        registry.register(TaskType::Backup, Arc::new(PanicsOnRun));

        let value = registry
            .execute(&task(), &ExecutionContext::detached())
            .await
            .unwrap();
        assert_eq!(value, json!({ "handler": "fallback" }));
    }

    #[tokio::test]
    async fn test_all_failing_reports_last_error() {
        let registry = HandlerRegistry::new();
        registry.register(TaskType::Backup, handler("first", true, true));
        registry.register(TaskType::Backup, handler("second", true, true));

        match registry.execute(&task(), &ExecutionContext::detached()).await {
            Err(EngineError::HandlerExecution { message, .. }) => {
                assert!(message.contains("first failed"), "got {message}");
            }
            other => panic!("expected HandlerExecution, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_handler_is_execution_error() {
        let registry = HandlerRegistry::new();
        let result = registry.execute(&task(), &ExecutionContext::detached()).await;
        assert!(matches!(result, Err(EngineError::HandlerExecution { .. })));
    }
}
