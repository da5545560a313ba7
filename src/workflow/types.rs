/// Core workflow type definitions
///
/// Defines workflow definitions, tasks, executions and task executions.
/// These types are serialized to JSON for persistence and returned to callers
/// of the engine for status queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// A complete workflow definition: a task graph plus an optional schedule
///
/// Owned by the persistence layer. The engine loads one snapshot per execution
/// and never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique workflow identifier (e.g., "wf-battery-dispatch")
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    /// Tasks in declaration order (order breaks ties in the topological sort)
    pub tasks: Vec<WorkflowTask>,
    #[serde(default)]
    pub schedule: Option<CronSchedule>,
    /// Upper bound for a whole execution; unbounded when absent
    #[serde(default)]
    pub max_execution_time_secs: Option<u64>,
    /// Retries allowed per failed task before the failure counts
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

/// Cron trigger settings attached to a workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronSchedule {
    /// Six-field cron expression (seconds first), e.g. "0 */15 * * * *"
    pub expression: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// A single unit of work inside a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTask {
    /// Unique within its workflow; integers in JSON are accepted and kept as text
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Loose per-type configuration, parsed into `TaskConfig` before running
    #[serde(default)]
    pub config: HashMap<String, Value>,
    #[serde(default, alias = "dependsOn", deserialize_with = "strings_or_numbers")]
    pub depends_on: Vec<String>,
    /// Per-task timeout; the engine default applies when absent
    #[serde(default, alias = "timeoutSecs")]
    pub timeout_secs: Option<u64>,
    #[serde(default, alias = "continueOnError")]
    pub continue_on_error: bool,
}

/// Available task types
///
/// - HttpCall: generic HTTP request, expected config
///   { "url": "...", "method": "POST", "headers": {...}, "body": ... }
/// - Delay: sleep, expected config { "duration": "30s" }
/// - Condition / Transform: placeholders that always succeed
/// - Notification: logged message
/// - Forecast: POST /forecast on the forecast service
/// - Optimization: POST /optimize on the optimization service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    HttpCall,
    Delay,
    Condition,
    Transform,
    Notification,
    Forecast,
    Optimization,
}

/// How an execution was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerType {
    Manual,
    Scheduled,
    Webhook,
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Webhook => write!(f, "webhook"),
        }
    }
}

impl std::str::FromStr for TriggerType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "scheduled" => Ok(Self::Scheduled),
            "webhook" => Ok(Self::Webhook),
            other => Err(format!("unknown trigger type: {other}")),
        }
    }
}

/// Lifecycle of a workflow execution
///
/// Pending → Running → {Completed | Failed | Cancelled}. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// Lifecycle of one task attempt
///
/// Pending → Running → {Completed | Failed | Cancelled}; Skipped is reached
/// without ever running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// One run of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub trigger_type: TriggerType,
    /// Principal that requested the run ("<scheduler>" for cron fires)
    pub triggered_by: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Aggregate summary written when the run finishes
    pub result: Option<Value>,
    pub error_message: Option<String>,
    /// Child task attempts, filled in by status queries
    #[serde(default)]
    pub task_executions: Vec<TaskExecution>,
}

impl WorkflowExecution {
    pub fn new(
        workflow_id: impl Into<String>,
        trigger_type: TriggerType,
        triggered_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow_id.into(),
            status: ExecutionStatus::Pending,
            trigger_type,
            triggered_by: triggered_by.into(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error_message: None,
            task_executions: Vec::new(),
        }
    }

    /// Move to `next`, refusing any transition out of a terminal state
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<()> {
        if self.status.is_terminal() {
            return Err(EngineError::InvalidState {
                id: self.id.to_string(),
                status: self.status.to_string(),
                expected: "a non-terminal status",
            });
        }

        let now = Utc::now();
        match next {
            ExecutionStatus::Running => self.started_at = Some(now),
            s if s.is_terminal() => self.completed_at = Some(now),
            _ => {}
        }
        self.status = next;
        Ok(())
    }
}

/// One attempt (or skip record) of a task within an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub task_id: String,
    pub task_name: String,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    /// Zero for the first attempt, incremented per retry
    pub retry_count: u32,
}

impl TaskExecution {
    /// A fresh attempt already in Running state
    pub fn running(execution_id: Uuid, task: &WorkflowTask, retry_count: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            status: TaskStatus::Running,
            started_at: Some(Utc::now()),
            completed_at: None,
            result: None,
            error_message: None,
            retry_count,
        }
    }

    /// A terminal Skipped record for a task that never ran
    pub fn skipped(execution_id: Uuid, task: &WorkflowTask, reason: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            status: TaskStatus::Skipped,
            started_at: None,
            completed_at: Some(Utc::now()),
            result: None,
            error_message: Some(reason.into()),
            retry_count: 0,
        }
    }

    pub fn finish(
        &mut self,
        status: TaskStatus,
        result: Option<Value>,
        error_message: Option<String>,
    ) {
        self.status = status;
        self.result = result;
        self.error_message = error_message;
        self.completed_at = Some(Utc::now());
    }
}

/// Accepts `"fetch"` as well as `1` for task identities
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "task id must be a string or integer, got {other}"
        ))),
    }
}

fn strings_or_numbers<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values: Vec<Value> = Vec::deserialize(deserializer)?;
    values
        .into_iter()
        .map(|v| match v {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(serde::de::Error::custom(format!(
                "dependency id must be a string or integer, got {other}"
            ))),
        })
        .collect()
}
