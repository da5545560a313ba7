/// Workflow Management Layer
///
/// Workflow definitions and execution records, typed task configuration,
/// graph validation and ordering, and the persistence collaborators.

// Core workflow type definitions
pub mod types;

// Typed per-task-type configuration parsed from the loose config map
pub mod task_config;

// Graph validator and topological sorter
pub mod graph;

// Repository trait and SQLite persistence
pub mod storage;

// In-memory repository for tests and embedding
pub mod memory;

// Re-export commonly used types
pub use graph::{topological_sort, validate_tasks, ValidationResult};
pub use memory::InMemoryRepository;
pub use storage::{SqliteRepository, WorkflowRepository};
pub use types::{
    CronSchedule, ExecutionStatus, TaskExecution, TaskStatus, TaskType, TriggerType,
    WorkflowDefinition, WorkflowExecution, WorkflowTask,
};
