//! Cancelling queued, backing-off and running tasks.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{AlwaysFails, Recorder, engine, fast_config, wait_for};
use overwatch::{EngineError, NewTask, TaskPriority, TaskStatus, TaskType};

#[tokio::test]
async fn test_cancel_pending_task_leaves_no_results() {
    let engine = engine(fast_config());
    let task = engine
        .create_task(NewTask::new("queued", TaskType::Backup, TaskPriority::Low))
        .unwrap();
    assert_eq!(engine.get_stats().tasks.queue_depth, 1);

    let cancelled = engine.cancel_task(task.id).unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert_eq!(engine.get_stats().tasks.queue_depth, 0);

    let detail = engine.get_task(task.id).unwrap();
    assert!(detail.results.is_empty());
    assert!(engine
        .task_events(task.id)
        .iter()
        .any(|e| e.name() == "task_cancelled"));

    // Nothing runs after a restart either
    engine.register_handler(TaskType::Backup, Recorder::new(Duration::from_millis(1)));
    engine.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.stop().await.unwrap();
    assert!(engine.get_task(task.id).unwrap().results.is_empty());
}

#[tokio::test]
async fn test_cancel_running_task_records_one_cancelled_result() {
    let engine = engine(fast_config());
    // Ignores the cancellation signal and runs to completion
    let recorder = Recorder::new(Duration::from_millis(300));
    engine.register_handler(TaskType::Analysis, recorder.clone());

    let task = engine
        .create_task(NewTask::new("long", TaskType::Analysis, TaskPriority::Medium))
        .unwrap();
    engine.start().unwrap();
    assert!(
        wait_for(
            || engine.get_task(task.id).unwrap().task.status == TaskStatus::Running,
            1000
        )
        .await
    );

    let cancelled = engine.cancel_task(task.id).unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);

    // Let the uncooperative handler finish; its outcome must be discarded
    tokio::time::sleep(Duration::from_millis(500)).await;
    let detail = engine.get_task(task.id).unwrap();
    engine.stop().await.unwrap();

    assert_eq!(detail.task.status, TaskStatus::Cancelled);
    assert_eq!(detail.results.len(), 1);
    assert_eq!(detail.results[0].status, TaskStatus::Cancelled);
    assert_eq!(engine.get_stats().tasks.running, 0);
}

#[tokio::test]
async fn test_cancel_during_backoff_stops_retries() {
    let mut config = fast_config();
    config.retry.backoff_base_ms = 2_000;
    config.retry.max_backoff_ms = 2_000;
    let engine = engine(config);
    engine.register_handler(TaskType::Diagnostics, Arc::new(AlwaysFails));

    let task = engine
        .create_task(NewTask::new("flaky", TaskType::Diagnostics, TaskPriority::High).max_retries(3))
        .unwrap();
    engine.start().unwrap();
    assert!(wait_for(|| engine.get_task(task.id).unwrap().results.len() == 1, 1000).await);

    let stats = engine.get_stats();
    assert_eq!(stats.tasks.awaiting_retry, 1);
    assert_eq!(engine.get_task(task.id).unwrap().task.status, TaskStatus::Pending);

    engine.cancel_task(task.id).unwrap();
    engine.stop().await.unwrap();

    let detail = engine.get_task(task.id).unwrap();
    assert_eq!(detail.task.status, TaskStatus::Cancelled);
    assert_eq!(detail.results.len(), 1);
    assert_eq!(engine.get_stats().tasks.awaiting_retry, 0);
}

#[test]
fn test_cancel_finished_or_unknown_task_fails() {
    let engine = engine(fast_config());
    assert!(matches!(
        engine.cancel_task(uuid::Uuid::new_v4()),
        Err(EngineError::TaskNotFound(_))
    ));

    let task = engine
        .create_task(NewTask::new("once", TaskType::Backup, TaskPriority::Low))
        .unwrap();
    engine.cancel_task(task.id).unwrap();
    assert!(matches!(
        engine.cancel_task(task.id),
        Err(EngineError::InvalidStateTransition { .. })
    ));
}

#[tokio::test]
async fn test_stop_cancels_running_but_keeps_queue() {
    let mut config = fast_config();
    config.scheduler.max_concurrent_tasks = 1;
    let engine = engine(config);
    engine.register_handler(TaskType::Backup, Recorder::new(Duration::from_millis(200)));

    let first = engine
        .create_task(NewTask::new("first", TaskType::Backup, TaskPriority::High))
        .unwrap();
    let second = engine
        .create_task(NewTask::new("second", TaskType::Backup, TaskPriority::Low))
        .unwrap();

    engine.start().unwrap();
    assert!(
        wait_for(
            || engine.get_task(first.id).unwrap().task.status == TaskStatus::Running,
            1000
        )
        .await
    );
    engine.stop().await.unwrap();

    assert_eq!(engine.get_task(first.id).unwrap().task.status, TaskStatus::Cancelled);
    assert_eq!(engine.get_task(second.id).unwrap().task.status, TaskStatus::Pending);
    assert_eq!(engine.get_stats().tasks.queue_depth, 1);
}
