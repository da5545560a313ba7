/// Persistence layer for workflows, executions and task executions
///
/// `WorkflowRepository` is the seam the engine talks to. `SqliteRepository`
/// is the production implementation; workflow definitions are stored as JSON
/// alongside indexed lookup columns, execution rows are stored relationally.

use crate::error::{EngineError, Result};
use crate::workflow::types::{TaskExecution, WorkflowDefinition, WorkflowExecution};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow},
    Row,
};
use std::str::FromStr;
use uuid::Uuid;

/// Point operations consumed by the engine and executor
///
/// Every call is its own unit of work; nothing spans executions.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn get_workflow(&self, id: &str) -> Result<Option<WorkflowDefinition>>;

    /// Insert or replace a workflow definition
    async fn save_workflow(&self, workflow: &WorkflowDefinition) -> Result<()>;

    async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>>;

    /// Returns false when nothing was deleted
    async fn delete_workflow(&self, id: &str) -> Result<bool>;

    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<()>;

    async fn update_execution(&self, execution: &WorkflowExecution) -> Result<()>;

    /// Fetch an execution with its task executions in append order
    async fn get_execution(&self, id: Uuid) -> Result<Option<WorkflowExecution>>;

    /// Newest first, optionally filtered by workflow; task executions are not loaded
    async fn list_executions(
        &self,
        workflow_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>>;

    async fn append_task_execution(&self, task: &TaskExecution) -> Result<()>;

    async fn update_task_execution(&self, task: &TaskExecution) -> Result<()>;
}

/// SQLite-backed repository
///
/// Queries go through the pool, so each call checks out its own connection
/// and concurrent executions never share one.
#[derive(Debug, Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `url` and initialise the schema
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;
        let repo = Self::new(pool);
        repo.init_schema().await?;
        Ok(repo)
    }

    /// Create tables and indexes; safe to call repeatedly
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                definition JSON NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_executions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                trigger_type TEXT NOT NULL,
                triggered_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                result JSON,
                error_message TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_executions_workflow
            ON workflow_executions(workflow_id, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_executions (
                id TEXT PRIMARY KEY,
                execution_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                task_name TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                result JSON,
                error_message TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_task_executions_execution
            ON task_executions(execution_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_task_executions(&self, execution_id: Uuid) -> Result<Vec<TaskExecution>> {
        let rows =
            sqlx::query("SELECT * FROM task_executions WHERE execution_id = ? ORDER BY rowid")
                .bind(execution_id.to_string())
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(task_execution_from_row).collect()
    }
}

#[async_trait]
impl WorkflowRepository for SqliteRepository {
    async fn get_workflow(&self, id: &str) -> Result<Option<WorkflowDefinition>> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition_json: String = row.try_get("definition")?;
                Ok(Some(serde_json::from_str(&definition_json)?))
            }
            None => Ok(None),
        }
    }

    async fn save_workflow(&self, workflow: &WorkflowDefinition) -> Result<()> {
        let definition_json = serde_json::to_string(workflow)?;

        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, is_enabled, definition, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                is_enabled = excluded.is_enabled,
                definition = excluded.definition,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(workflow.is_enabled)
        .bind(&definition_json)
        .bind(timestamp(&workflow.created_at))
        .bind(timestamp(&workflow.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>> {
        let rows = sqlx::query("SELECT definition FROM workflows ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let mut workflows = Vec::with_capacity(rows.len());
        for row in rows {
            let definition_json: String = row.try_get("definition")?;
            workflows.push(serde_json::from_str(&definition_json)?);
        }
        Ok(workflows)
    }

    async fn delete_workflow(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (id, workflow_id, status, trigger_type, triggered_by, created_at,
                 started_at, completed_at, result, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(execution.id.to_string())
        .bind(&execution.workflow_id)
        .bind(execution.status.to_string())
        .bind(execution.trigger_type.to_string())
        .bind(&execution.triggered_by)
        .bind(timestamp(&execution.created_at))
        .bind(execution.started_at.as_ref().map(timestamp))
        .bind(execution.completed_at.as_ref().map(timestamp))
        .bind(json_text(&execution.result)?)
        .bind(&execution.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions SET
                status = ?, started_at = ?, completed_at = ?, result = ?, error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(execution.status.to_string())
        .bind(execution.started_at.as_ref().map(timestamp))
        .bind(execution.completed_at.as_ref().map(timestamp))
        .bind(json_text(&execution.result)?)
        .bind(&execution.error_message)
        .bind(execution.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::execution_not_found(execution.id));
        }
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<WorkflowExecution>> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut execution = execution_from_row(&row)?;
        execution.task_executions = self.load_task_executions(id).await?;
        Ok(Some(execution))
    }

    async fn list_executions(
        &self,
        workflow_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = match workflow_id {
            Some(workflow_id) => {
                sqlx::query(
                    r#"
                    SELECT * FROM workflow_executions
                    WHERE workflow_id = ?
                    ORDER BY created_at DESC LIMIT ?
                    "#,
                )
                .bind(workflow_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM workflow_executions ORDER BY created_at DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(execution_from_row).collect()
    }

    async fn append_task_execution(&self, task: &TaskExecution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_executions
                (id, execution_id, task_id, task_name, status, started_at,
                 completed_at, result, error_message, retry_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id.to_string())
        .bind(task.execution_id.to_string())
        .bind(&task.task_id)
        .bind(&task.task_name)
        .bind(task.status.to_string())
        .bind(task.started_at.as_ref().map(timestamp))
        .bind(task.completed_at.as_ref().map(timestamp))
        .bind(json_text(&task.result)?)
        .bind(&task.error_message)
        .bind(i64::from(task.retry_count))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_task_execution(&self, task: &TaskExecution) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE task_executions SET
                status = ?, started_at = ?, completed_at = ?,
                result = ?, error_message = ?, retry_count = ?
            WHERE id = ?
            "#,
        )
        .bind(task.status.to_string())
        .bind(task.started_at.as_ref().map(timestamp))
        .bind(task.completed_at.as_ref().map(timestamp))
        .bind(json_text(&task.result)?)
        .bind(&task.error_message)
        .bind(i64::from(task.retry_count))
        .bind(task.id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn json_text(value: &Option<Value>) -> Result<Option<String>> {
    value.as_ref().map(serde_json::to_string).transpose().map_err(Into::into)
}

fn decode_error(message: String) -> EngineError {
    EngineError::Storage(sqlx::Error::Decode(message.into()))
}

fn parse_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| decode_error(format!("bad timestamp '{s}': {e}")))
    })
    .transpose()
}

fn parse_json(raw: Option<String>) -> Result<Option<Value>> {
    raw.map(|s| serde_json::from_str(&s)).transpose().map_err(Into::into)
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| decode_error(format!("bad uuid '{raw}': {e}")))
}

fn parse_enum<T: FromStr<Err = String>>(raw: &str) -> Result<T> {
    raw.parse().map_err(decode_error)
}

fn execution_from_row(row: &SqliteRow) -> Result<WorkflowExecution> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let trigger_type: String = row.try_get("trigger_type")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(WorkflowExecution {
        id: parse_uuid(&id)?,
        workflow_id: row.try_get("workflow_id")?,
        status: parse_enum(&status)?,
        trigger_type: parse_enum(&trigger_type)?,
        triggered_by: row.try_get("triggered_by")?,
        created_at: parse_timestamp(Some(created_at))?.unwrap_or_else(Utc::now),
        started_at: parse_timestamp(row.try_get("started_at")?)?,
        completed_at: parse_timestamp(row.try_get("completed_at")?)?,
        result: parse_json(row.try_get("result")?)?,
        error_message: row.try_get("error_message")?,
        task_executions: Vec::new(),
    })
}

fn task_execution_from_row(row: &SqliteRow) -> Result<TaskExecution> {
    let id: String = row.try_get("id")?;
    let execution_id: String = row.try_get("execution_id")?;
    let status: String = row.try_get("status")?;
    let retry_count: i64 = row.try_get("retry_count")?;

    Ok(TaskExecution {
        id: parse_uuid(&id)?,
        execution_id: parse_uuid(&execution_id)?,
        task_id: row.try_get("task_id")?,
        task_name: row.try_get("task_name")?,
        status: parse_enum(&status)?,
        started_at: parse_timestamp(row.try_get("started_at")?)?,
        completed_at: parse_timestamp(row.try_get("completed_at")?)?,
        result: parse_json(row.try_get("result")?)?,
        error_message: row.try_get("error_message")?,
        retry_count: u32::try_from(retry_count).unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{ExecutionStatus, TaskStatus, TaskType, TriggerType, WorkflowTask};
    use serde_json::json;
    use std::collections::HashMap;

    async fn repository() -> SqliteRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let repo = SqliteRepository::new(pool);
        repo.init_schema().await.unwrap();
        repo
    }

    fn workflow(id: &str) -> WorkflowDefinition {
        WorkflowDefinition {
            id: id.to_string(),
            name: format!("{id} workflow"),
            is_enabled: true,
            tasks: vec![WorkflowTask {
                id: "notify".into(),
                name: "Notify".into(),
                task_type: TaskType::Notification,
                config: HashMap::new(),
                depends_on: vec![],
                timeout_secs: Some(5),
                continue_on_error: false,
            }],
            schedule: None,
            max_execution_time_secs: None,
            max_retries: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn workflow_upsert_and_delete() {
        let repo = repository().await;
        let mut wf = workflow("wf-1");
        repo.save_workflow(&wf).await.unwrap();

        wf.is_enabled = false;
        repo.save_workflow(&wf).await.unwrap();

        let loaded = repo.get_workflow("wf-1").await.unwrap().unwrap();
        assert!(!loaded.is_enabled);
        assert_eq!(loaded.tasks[0].timeout_secs, Some(5));
        assert_eq!(repo.list_workflows().await.unwrap().len(), 1);

        assert!(repo.delete_workflow("wf-1").await.unwrap());
        assert!(!repo.delete_workflow("wf-1").await.unwrap());
        assert!(repo.get_workflow("wf-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn execution_rows_round_trip_with_tasks_in_append_order() {
        let repo = repository().await;
        let wf = workflow("wf-2");

        let mut execution = WorkflowExecution::new(&wf.id, TriggerType::Scheduled, "<scheduler>");
        execution.transition(ExecutionStatus::Running).unwrap();
        repo.create_execution(&execution).await.unwrap();

        let mut first = TaskExecution::running(execution.id, &wf.tasks[0], 0);
        repo.append_task_execution(&first).await.unwrap();
        first.finish(TaskStatus::Failed, None, Some("boom".into()));
        repo.update_task_execution(&first).await.unwrap();

        let mut second = TaskExecution::running(execution.id, &wf.tasks[0], 1);
        repo.append_task_execution(&second).await.unwrap();
        second.finish(TaskStatus::Completed, Some(json!({ "ok": true })), None);
        repo.update_task_execution(&second).await.unwrap();

        execution.result = Some(json!({ "completedTasks": 1 }));
        execution.transition(ExecutionStatus::Completed).unwrap();
        repo.update_execution(&execution).await.unwrap();

        let loaded = repo.get_execution(execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Completed);
        assert_eq!(loaded.trigger_type, TriggerType::Scheduled);
        assert_eq!(loaded.result, Some(json!({ "completedTasks": 1 })));
        assert!(loaded.completed_at.is_some());
        assert_eq!(loaded.task_executions.len(), 2);
        assert_eq!(loaded.task_executions[0].status, TaskStatus::Failed);
        assert_eq!(loaded.task_executions[0].error_message.as_deref(), Some("boom"));
        assert_eq!(loaded.task_executions[1].retry_count, 1);
        assert_eq!(loaded.task_executions[1].result, Some(json!({ "ok": true })));
    }

    #[tokio::test]
    async fn list_executions_filters_and_limits() {
        let repo = repository().await;
        for workflow_id in ["a", "a", "b"] {
            let execution = WorkflowExecution::new(workflow_id, TriggerType::Manual, "tester");
            repo.create_execution(&execution).await.unwrap();
        }

        assert_eq!(repo.list_executions(None, 10).await.unwrap().len(), 3);
        assert_eq!(repo.list_executions(Some("a"), 10).await.unwrap().len(), 2);
        assert_eq!(repo.list_executions(Some("a"), 1).await.unwrap().len(), 1);
        assert!(repo.list_executions(Some("zzz"), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn updating_unknown_execution_is_not_found() {
        let repo = repository().await;
        let execution = WorkflowExecution::new("ghost", TriggerType::Manual, "tester");
        let err = repo.update_execution(&execution).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { kind: "execution", .. }));
    }
}
