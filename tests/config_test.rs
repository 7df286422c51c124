//! Loading configuration from YAML files and environment overrides.

mod common;

use std::io::Write;

use common::engine;
use overwatch::{ConfigLoader, TaskPriority, TaskType};
use tempfile::NamedTempFile;

const MAX_TASKS_VAR: &str = "OVERWATCH_SCHEDULER__MAX_CONCURRENT_TASKS";

fn yaml_file(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_from_yaml_file() {
    let file = yaml_file(
        r"
scheduler:
  max_concurrent_tasks: 8
  capacity:
    cpu: 2.0
    memory_mb: 4096
    io: 1.0
retry:
  max_retries: 5
assignment:
  strategy: load_balanced
logging:
  level: debug
bots:
  - id: maint-1
    name: Maintenance bot
    bot_type: system
    max_concurrent_tasks: 2
    priority_preference: [critical, high]
    capabilities:
      - name: upkeep
        task_types: [system_maintenance, file_cleanup]
        priority_boost: 10
",
    );

    let config = temp_env::with_var_unset(MAX_TASKS_VAR, || {
        ConfigLoader::load_from_file(file.path()).unwrap()
    });

    assert_eq!(config.scheduler.max_concurrent_tasks, 8);
    assert!((config.scheduler.capacity.cpu - 2.0).abs() < f64::EPSILON);
    assert_eq!(config.retry.max_retries, 5);
    assert_eq!(config.assignment.strategy, "load_balanced");
    assert_eq!(config.logging.level, "debug");
    // Untouched sections keep their defaults
    assert!(config.generator.enabled);

    assert_eq!(config.bots.len(), 1);
    let bot = &config.bots[0];
    assert_eq!(bot.id.as_deref(), Some("maint-1"));
    assert_eq!(bot.priority_preference, vec![TaskPriority::Critical, TaskPriority::High]);
    assert_eq!(
        bot.capabilities[0].task_types,
        vec![TaskType::SystemMaintenance, TaskType::FileCleanup]
    );
    assert_eq!(bot.capabilities[0].priority_boost, 10);

    let engine = engine(config);
    assert_eq!(engine.current_strategy(), "load_balanced");
    assert_eq!(engine.get_bot("maint-1").unwrap().max_concurrent_tasks, 2);
}

#[test]
fn test_env_overrides_file() {
    let file = yaml_file("scheduler:\n  max_concurrent_tasks: 8\n");
    let config = temp_env::with_var(MAX_TASKS_VAR, Some("16"), || {
        ConfigLoader::load_from_file(file.path()).unwrap()
    });
    assert_eq!(config.scheduler.max_concurrent_tasks, 16);
}

#[test]
fn test_invalid_values_are_rejected() {
    let cases = [
        "scheduler:\n  max_concurrent_tasks: 0\n",
        "assignment:\n  strategy: fastest\n",
        "retry:\n  backoff_base_ms: 90000\n  max_backoff_ms: 1000\n",
        "health:\n  thresholds:\n    cpu:\n      warning: 95\n      critical: 80\n",
        "logging:\n  level: verbose\n",
        "bots:\n  - name: idle\n    max_concurrent_tasks: 0\n",
    ];

    for contents in cases {
        let file = yaml_file(contents);
        let result = temp_env::with_var_unset(MAX_TASKS_VAR, || {
            ConfigLoader::load_from_file(file.path())
        });
        assert!(result.is_err(), "accepted invalid config:\n{contents}");
    }
}

#[test]
fn test_malformed_yaml_is_an_error() {
    let file = yaml_file("scheduler: [not, a, map\n");
    let err = temp_env::with_var_unset(MAX_TASKS_VAR, || {
        ConfigLoader::load_from_file(file.path()).unwrap_err()
    });
    assert!(err.to_string().contains("Failed to load config"));
}
