/// Flowgrid: workflow execution engine for energy-management automation
///
/// This library validates declarative task graphs, runs them in dependency
/// order with retries, timeouts and cancellation, and fires them from cron
/// schedules.

// Core configuration and setup
pub mod config;

// Engine error taxonomy
pub mod error;

// Workflow management layer - definitions, validation and persistence
pub mod workflow;

// Runtime execution engine - task runner, executor, engine and scheduler
pub mod runtime;

// Service bootstrap
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{EngineError, Result};
pub use runtime::{WorkflowEngine, WorkflowScheduler};
pub use server::start_server;
pub use workflow::{WorkflowDefinition, WorkflowExecution, WorkflowTask};
