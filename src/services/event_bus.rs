//! EventBus service for engine event streaming and distribution.
//!
//! Every state transition in the engine is published here exactly once. The
//! bus assigns sequence numbers, keeps a bounded history for replay and fans
//! events out to raw stream subscribers over a broadcast channel. Named
//! callbacks are fed through an unbounded queue drained by a dedicated
//! dispatcher task, so a slow or panicking callback never loses events and
//! never reaches back into the publisher.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::config::EventBusConfig;
use crate::domain::models::health::{Alert, AlertLevel, ResourceSample};
use crate::domain::models::task::{TaskPriority, TaskType};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing sequence number assigned by EventBus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Event category for filtering and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Engine,
    Task,
    Bot,
    Assignment,
    Generator,
    Health,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Engine => write!(f, "engine"),
            Self::Task => write!(f, "task"),
            Self::Bot => write!(f, "bot"),
            Self::Assignment => write!(f, "assignment"),
            Self::Generator => write!(f, "generator"),
            Self::Health => write!(f, "health"),
        }
    }
}

/// Event payload, one variant per event name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    EngineStarted,
    EngineStopped,

    TaskCreated {
        task_id: Uuid,
        name: String,
        task_type: TaskType,
        priority: TaskPriority,
    },
    TaskAssigned {
        task_id: Uuid,
        bot_id: String,
        assignment_id: Uuid,
        strategy: String,
    },
    TaskStarted {
        task_id: Uuid,
        attempt: u32,
        bot_id: Option<String>,
    },
    TaskCompleted {
        task_id: Uuid,
        attempt: u32,
        execution_time_secs: f64,
    },
    TaskFailed {
        task_id: Uuid,
        attempt: u32,
        error: String,
        will_retry: bool,
    },
    TaskRetrying {
        task_id: Uuid,
        attempt: u32,
        max_retries: u32,
        delay_ms: u64,
    },
    TaskCancelled {
        task_id: Uuid,
        was_running: bool,
    },
    TaskRequeued {
        task_id: Uuid,
        reason: String,
    },

    BotRegistered {
        bot_id: String,
        name: String,
    },
    BotDeregistered {
        bot_id: String,
    },
    BotStatusChanged {
        bot_id: String,
        from: String,
        to: String,
        reason: Option<String>,
    },
    AssignmentCompleted {
        assignment_id: Uuid,
        task_id: Uuid,
        bot_id: String,
        success: bool,
    },
    StrategyChanged {
        from: String,
        to: String,
    },

    RuleFailed {
        rule: String,
        error: String,
    },
    HealthSampled {
        sample: ResourceSample,
    },
    AlertRaised {
        alert: Alert,
        task_id: Option<Uuid>,
    },
}

impl EventPayload {
    /// Every event name the engine publishes.
    pub const NAMES: [&'static str; 18] = [
        "engine_started",
        "engine_stopped",
        "task_created",
        "task_assigned",
        "task_started",
        "task_completed",
        "task_failed",
        "task_retrying",
        "task_cancelled",
        "task_requeued",
        "bot_registered",
        "bot_deregistered",
        "bot_status_changed",
        "assignment_completed",
        "strategy_changed",
        "rule_failed",
        "health_sampled",
        "alert_raised",
    ];

    pub const fn name(&self) -> &'static str {
        match self {
            Self::EngineStarted => "engine_started",
            Self::EngineStopped => "engine_stopped",
            Self::TaskCreated { .. } => "task_created",
            Self::TaskAssigned { .. } => "task_assigned",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::TaskRetrying { .. } => "task_retrying",
            Self::TaskCancelled { .. } => "task_cancelled",
            Self::TaskRequeued { .. } => "task_requeued",
            Self::BotRegistered { .. } => "bot_registered",
            Self::BotDeregistered { .. } => "bot_deregistered",
            Self::BotStatusChanged { .. } => "bot_status_changed",
            Self::AssignmentCompleted { .. } => "assignment_completed",
            Self::StrategyChanged { .. } => "strategy_changed",
            Self::RuleFailed { .. } => "rule_failed",
            Self::HealthSampled { .. } => "health_sampled",
            Self::AlertRaised { .. } => "alert_raised",
        }
    }

    fn classify(&self) -> (EventSeverity, EventCategory) {
        match self {
            Self::EngineStarted | Self::EngineStopped => (EventSeverity::Info, EventCategory::Engine),
            Self::TaskFailed { will_retry: true, .. } | Self::TaskRetrying { .. } => {
                (EventSeverity::Warning, EventCategory::Task)
            }
            Self::TaskFailed { .. } => (EventSeverity::Error, EventCategory::Task),
            Self::TaskCreated { .. }
            | Self::TaskStarted { .. }
            | Self::TaskCompleted { .. }
            | Self::TaskCancelled { .. }
            | Self::TaskRequeued { .. } => (EventSeverity::Info, EventCategory::Task),
            Self::TaskAssigned { .. } | Self::AssignmentCompleted { .. } | Self::StrategyChanged { .. } => {
                (EventSeverity::Info, EventCategory::Assignment)
            }
            Self::BotStatusChanged { to, .. } if to == "error" => {
                (EventSeverity::Warning, EventCategory::Bot)
            }
            Self::BotRegistered { .. } | Self::BotDeregistered { .. } | Self::BotStatusChanged { .. } => {
                (EventSeverity::Info, EventCategory::Bot)
            }
            Self::RuleFailed { .. } => (EventSeverity::Warning, EventCategory::Generator),
            Self::HealthSampled { .. } => (EventSeverity::Debug, EventCategory::Health),
            Self::AlertRaised { alert, .. } => {
                let severity = match alert.level {
                    AlertLevel::Critical => EventSeverity::Critical,
                    AlertLevel::Warning => EventSeverity::Warning,
                    AlertLevel::Normal => EventSeverity::Info,
                };
                (severity, EventCategory::Health)
            }
        }
    }

    fn task_id(&self) -> Option<Uuid> {
        match self {
            Self::TaskCreated { task_id, .. }
            | Self::TaskAssigned { task_id, .. }
            | Self::TaskStarted { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. }
            | Self::TaskRetrying { task_id, .. }
            | Self::TaskCancelled { task_id, .. }
            | Self::TaskRequeued { task_id, .. }
            | Self::AssignmentCompleted { task_id, .. } => Some(*task_id),
            Self::AlertRaised { task_id, .. } => *task_id,
            _ => None,
        }
    }

    fn bot_id(&self) -> Option<String> {
        match self {
            Self::TaskAssigned { bot_id, .. }
            | Self::BotRegistered { bot_id, .. }
            | Self::BotDeregistered { bot_id }
            | Self::BotStatusChanged { bot_id, .. }
            | Self::AssignmentCompleted { bot_id, .. } => Some(bot_id.clone()),
            Self::TaskStarted { bot_id, .. } => bot_id.clone(),
            _ => None,
        }
    }
}

/// Event envelope containing all event metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    pub id: EventId,
    pub sequence: SequenceNumber,
    pub timestamp: DateTime<Utc>,
    pub severity: EventSeverity,
    pub category: EventCategory,
    pub task_id: Option<Uuid>,
    pub bot_id: Option<String>,
    pub payload: EventPayload,
}

impl EngineEvent {
    /// Wrap a payload. The sequence number is assigned on publish.
    pub fn new(payload: EventPayload) -> Self {
        let (severity, category) = payload.classify();
        Self {
            id: EventId::new(),
            sequence: SequenceNumber(0),
            timestamp: Utc::now(),
            severity,
            category,
            task_id: payload.task_id(),
            bot_id: payload.bot_id(),
            payload,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.payload.name()
    }
}

/// Callback invoked by the dispatcher for each matching event.
pub type EventCallback = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

/// Handle returned by [`EventBus::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Subscribe to every event name.
pub const ALL_EVENTS: &str = "*";

struct Subscriber {
    id: SubscriptionId,
    event_name: String,
    callback: EventCallback,
}

/// Central event bus for broadcasting events to multiple consumers.
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
    sequence: AtomicU64,
    history: Mutex<VecDeque<EngineEvent>>,
    subscribers: RwLock<Vec<Subscriber>>,
    next_subscription: AtomicU64,
    /// Callback queue; every published event is pushed while callbacks exist
    dispatch_tx: mpsc::UnboundedSender<EngineEvent>,
    /// Receiver owned by the callback dispatcher while it runs
    dispatch_rx: Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
    config: EventBusConfig,
}

impl EventBus {
    /// Create a new EventBus with the given configuration.
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        Self {
            sender,
            dispatch_tx,
            sequence: AtomicU64::new(0),
            history: Mutex::new(VecDeque::with_capacity(config.history_size.min(4096))),
            subscribers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(0),
            dispatch_rx: Mutex::new(Some(dispatch_rx)),
            config,
        }
    }

    /// Publish an event payload and return the sequenced envelope.
    ///
    /// Never blocks on subscribers and never fails.
    pub fn publish(&self, payload: EventPayload) -> EngineEvent {
        let mut event = EngineEvent::new(payload);

        // Sequence, history and broadcast order must agree
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        event.sequence = SequenceNumber(self.sequence.fetch_add(1, Ordering::SeqCst));

        if self.config.history_size > 0 {
            if history.len() >= self.config.history_size {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        tracing::trace!(
            event = event.name(),
            sequence = event.sequence.0,
            "event published"
        );

        // Pushed under the history lock so callbacks see sequence order
        let has_callbacks = !self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty();
        if has_callbacks {
            // The bus owns the receiver between dispatcher runs, so this cannot fail
            let _ = self.dispatch_tx.send(event.clone());
        }

        // Ignore send errors - there may be no stream subscribers
        let _ = self.sender.send(event.clone());
        drop(history);
        event
    }

    /// Subscribe to the raw event stream.
    ///
    /// The stream is bounded by `channel_capacity`; a receiver that falls
    /// behind sees `RecvError::Lagged`. Callbacks registered with
    /// [`EventBus::on`] do not have that limit.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Register a callback for one event name, or [`ALL_EVENTS`].
    ///
    /// Callbacks for the same event run in registration order on the
    /// dispatcher task. A panicking callback is logged and skipped.
    pub fn on<F>(&self, event_name: &str, callback: F) -> EngineResult<SubscriptionId>
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        if event_name != ALL_EVENTS && !EventPayload::NAMES.contains(&event_name) {
            return Err(EngineError::validation(format!("unknown event name: {event_name}")));
        }
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                id,
                event_name: event_name.to_string(),
                callback: Arc::new(callback),
            });
        Ok(id)
    }

    /// Remove a callback subscription. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    /// Start the callback dispatcher.
    ///
    /// Returns `None` if a dispatcher is already running. Events published
    /// while callbacks are registered are queued without bound, so those
    /// published before the dispatcher starts are delivered once it does.
    /// On shutdown the dispatcher drains what is already queued and hands
    /// its receiver back.
    pub fn spawn_dispatcher(self: &Arc<Self>, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        let mut rx = self
            .dispatch_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        let bus = Arc::clone(self);

        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    received = rx.recv() => match received {
                        Some(event) => bus.dispatch(&event),
                        None => break,
                    },
                }
            }

            while let Ok(event) = rx.try_recv() {
                bus.dispatch(&event);
            }

            *bus.dispatch_rx.lock().unwrap_or_else(PoisonError::into_inner) = Some(rx);
        }))
    }

    fn dispatch(&self, event: &EngineEvent) {
        let callbacks: Vec<EventCallback> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.event_name == ALL_EVENTS || s.event_name == event.name())
            .map(|s| Arc::clone(&s.callback))
            .collect();

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                tracing::warn!(
                    event = event.name(),
                    sequence = event.sequence.0,
                    "event subscriber panicked"
                );
            }
        }
    }

    /// Snapshot of the retained history, oldest first.
    pub fn history(&self) -> Vec<EngineEvent> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Retained events concerning one task, oldest first.
    pub fn history_for_task(&self, task_id: Uuid) -> Vec<EngineEvent> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.task_id == Some(task_id))
            .cloned()
            .collect()
    }

    /// Get the next sequence number to be assigned.
    pub fn current_sequence(&self) -> SequenceNumber {
        SequenceNumber(self.sequence.load(Ordering::SeqCst))
    }

    /// Get the number of active stream subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Number of registered callbacks.
    pub fn callback_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn bus() -> Arc<EventBus> {
        Arc::new(EventBus::new(EventBusConfig::default()))
    }

    fn created() -> EventPayload {
        EventPayload::TaskCreated {
            task_id: Uuid::new_v4(),
            name: "t".to_string(),
            task_type: TaskType::Backup,
            priority: TaskPriority::High,
        }
    }

    async fn settle<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_event_bus_sequence_assignment() {
        let bus = bus();
        assert_eq!(bus.current_sequence().0, 0);

        let mut rx = bus.subscribe();

        bus.publish(EventPayload::EngineStarted);
        let event1 = rx.recv().await.unwrap();
        assert_eq!(event1.sequence.0, 0);
        assert_eq!(event1.name(), "engine_started");

        bus.publish(EventPayload::EngineStopped);
        let event2 = rx.recv().await.unwrap();
        assert_eq!(event2.sequence.0, 1);

        assert_eq!(bus.current_sequence().0, 2);
    }

    #[tokio::test]
    async fn test_envelope_extracts_ids_and_severity() {
        let bus = bus();
        let task_id = Uuid::new_v4();
        let event = bus.publish(EventPayload::TaskFailed {
            task_id,
            attempt: 2,
            error: "boom".to_string(),
            will_retry: false,
        });
        assert_eq!(event.task_id, Some(task_id));
        assert_eq!(event.severity, EventSeverity::Error);
        assert_eq!(event.category, EventCategory::Task);

        let event = bus.publish(EventPayload::BotRegistered {
            bot_id: "b1".to_string(),
            name: "cleaner".to_string(),
        });
        assert_eq!(event.bot_id.as_deref(), Some("b1"));
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let bus = EventBus::new(EventBusConfig {
            channel_capacity: 16,
            history_size: 3,
        });
        for _ in 0..5 {
            bus.publish(created());
        }
        let history = bus.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].sequence.0, 2);
        assert_eq!(history[2].sequence.0, 4);
    }

    #[tokio::test]
    async fn test_callbacks_in_registration_order() {
        let bus = bus();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            bus.on("task_created", move |_| order.lock().unwrap().push(label))
                .unwrap();
        }

        let shutdown = CancellationToken::new();
        let handle = bus.spawn_dispatcher(shutdown.clone()).unwrap();
        bus.publish(created());

        settle(|| order.lock().unwrap().len() == 3).await;
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_callback_is_isolated() {
        let bus = bus();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.on(ALL_EVENTS, |_| panic!("subscriber bug")).unwrap();
        let counter = Arc::clone(&hits);
        bus.on(ALL_EVENTS, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let shutdown = CancellationToken::new();
        let handle = bus.spawn_dispatcher(shutdown.clone()).unwrap();
        bus.publish(created());
        bus.publish(EventPayload::EngineStarted);

        settle(|| hits.load(Ordering::SeqCst) == 2).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_events_before_dispatcher_are_delivered() {
        let bus = bus();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        bus.on("engine_started", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        bus.publish(EventPayload::EngineStarted);

        let shutdown = CancellationToken::new();
        let handle = bus.spawn_dispatcher(shutdown.clone()).unwrap();
        settle(|| hits.load(Ordering::SeqCst) == 1).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(bus.spawn_dispatcher(CancellationToken::new()).is_none());
        shutdown.cancel();
        handle.await.unwrap();

        // Receiver is handed back for the next start
        assert!(bus.spawn_dispatcher(shutdown).is_some());
    }

    #[tokio::test]
    async fn test_callbacks_see_every_event_past_channel_capacity() {
        let bus = Arc::new(EventBus::new(EventBusConfig {
            channel_capacity: 16,
            history_size: 3,
        }));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        bus.on("task_created", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        // Queued before the dispatcher exists
        for _ in 0..100 {
            bus.publish(created());
        }
        let shutdown = CancellationToken::new();
        let handle = bus.spawn_dispatcher(shutdown.clone()).unwrap();
        for _ in 0..100 {
            bus.publish(created());
        }
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 200);
    }

    #[tokio::test]
    async fn test_no_callbacks_means_nothing_queued() {
        let bus = bus();
        assert_eq!(bus.subscriber_count(), 0);
        let _stream = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        for _ in 0..10 {
            bus.publish(created());
        }
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        bus.on("task_created", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let shutdown = CancellationToken::new();
        let handle = bus.spawn_dispatcher(shutdown.clone()).unwrap();
        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_event_name_rejected() {
        let bus = bus();
        assert!(matches!(
            bus.on("task_exploded", |_| {}),
            Err(EngineError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = bus();
        let id = bus.on("task_created", |_| {}).unwrap();
        assert_eq!(bus.callback_count(), 1);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.callback_count(), 0);
    }

    #[test]
    fn test_payload_names_match_table() {
        assert!(EventPayload::NAMES.contains(&created().name()));
        assert!(EventPayload::NAMES.contains(&EventPayload::EngineStopped.name()));
    }
}
