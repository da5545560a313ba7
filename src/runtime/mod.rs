/// Runtime Execution Engine
///
/// This module runs workflows:
/// - Executing single tasks with timeouts and cancellation
/// - Walking a workflow's tasks in dependency order with retries
/// - Tracking in-flight executions for status and cancel requests
/// - Firing workflows from cron schedules

// Forecast and optimization service payloads
pub mod energy;

// Single-task execution per task type
pub mod runner;

// Per-execution task loop
pub mod executor;

// Public engine entry point
pub mod engine;

// Cron trigger manager
pub mod scheduler;

// Re-export main types
pub use engine::WorkflowEngine;
pub use executor::{ExecutionReport, WorkflowExecutor};
pub use runner::TaskRunner;
pub use scheduler::{CronBackend, ScheduleZone, ScheduledJob, TokioCronBackend, WorkflowScheduler};
