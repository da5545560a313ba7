/// Workflow engine: public entry point for running workflows
///
/// Validates a workflow, persists a Running execution, and hands the run to a
/// background tokio task bound to its own cancellation token. The table of
/// live tokens lets callers cancel one execution without touching any other.

use crate::{
    config::{EngineConfig, ServicesConfig},
    error::{EngineError, Result},
    runtime::{
        executor::{ExecutionReport, WorkflowExecutor},
        runner::TaskRunner,
    },
    workflow::{
        graph::{validate_tasks, ValidationResult},
        storage::WorkflowRepository,
        types::{ExecutionStatus, TriggerType, WorkflowDefinition, WorkflowExecution},
    },
};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct WorkflowEngine {
    repository: Arc<dyn WorkflowRepository>,
    executor: Arc<WorkflowExecutor>,
    /// Execution id → cancellation handle, for runs still in flight
    running: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
    /// Parent of every execution token; cancelled on shutdown
    root: CancellationToken,
}

impl WorkflowEngine {
    pub fn new(repository: Arc<dyn WorkflowRepository>, executor: WorkflowExecutor) -> Self {
        Self {
            repository,
            executor: Arc::new(executor),
            running: Arc::new(Mutex::new(HashMap::new())),
            root: CancellationToken::new(),
        }
    }

    /// Build an engine with an HTTP task runner configured from settings
    pub fn from_config(
        repository: Arc<dyn WorkflowRepository>,
        engine: &EngineConfig,
        services: &ServicesConfig,
    ) -> Self {
        let runner = Arc::new(TaskRunner::new(services.clone(), engine.default_task_timeout()));
        let executor =
            WorkflowExecutor::new(Arc::clone(&repository), runner, engine.retry_backoff());
        Self::new(repository, executor)
    }

    pub fn repository(&self) -> Arc<dyn WorkflowRepository> {
        Arc::clone(&self.repository)
    }

    /// Start a run of `workflow_id` and return its execution record immediately
    ///
    /// Fails with `NotFound`, `Disabled` or `InvalidWorkflow` before anything
    /// is persisted.
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        trigger_type: TriggerType,
        triggered_by: &str,
    ) -> Result<WorkflowExecution> {
        let workflow = self
            .repository
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::workflow_not_found(workflow_id))?;

        if !workflow.is_enabled {
            tracing::warn!("⏸️ Refusing to run disabled workflow '{}'", workflow_id);
            return Err(EngineError::Disabled(workflow_id.to_string()));
        }

        let validation = validate_tasks(&workflow.tasks);
        if !validation.valid {
            tracing::warn!("🚫 Workflow '{}' is invalid: {:?}", workflow_id, validation.errors);
            return Err(EngineError::InvalidWorkflow(validation.errors));
        }

        let mut execution = WorkflowExecution::new(&workflow.id, trigger_type, triggered_by);
        execution.transition(ExecutionStatus::Running)?;

        // Register before persisting so a cancel can never see a Running row without a handle
        let token = self.root.child_token();
        self.running.lock().await.insert(execution.id, token.clone());

        if let Err(e) = self.repository.create_execution(&execution).await {
            self.running.lock().await.remove(&execution.id);
            return Err(e);
        }

        tracing::info!(
            "🚀 Execution {} of workflow '{}' started ({} by {})",
            execution.id,
            workflow.id,
            trigger_type,
            triggered_by
        );

        let repository = Arc::clone(&self.repository);
        let executor = Arc::clone(&self.executor);
        let running = Arc::clone(&self.running);
        let record = execution.clone();

        tokio::spawn(async move {
            let execution_id = record.id;
            let report = executor.execute(&workflow, execution_id, &token).await;

            // Hold the table while the final row is written, so a cancel sees
            // either a live handle on a Running row or no handle at all
            let mut running = running.lock().await;
            finalize(repository.as_ref(), record, report).await;
            running.remove(&execution_id);
        });

        Ok(execution)
    }

    /// Ask a running execution to stop
    ///
    /// Fails with `NotFound` for unknown ids and `InvalidState` when the
    /// execution is not Running. A Running row without a live handle (left
    /// over from a previous process) is marked Cancelled directly.
    pub async fn cancel_execution(&self, execution_id: Uuid) -> Result<()> {
        if let Some(token) = self.running.lock().await.get(&execution_id) {
            tracing::info!("🛑 Cancelling execution {}", execution_id);
            token.cancel();
            return Ok(());
        }

        let mut execution = self
            .repository
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| EngineError::execution_not_found(execution_id))?;

        if execution.status != ExecutionStatus::Running {
            return Err(EngineError::InvalidState {
                id: execution_id.to_string(),
                status: execution.status.to_string(),
                expected: "running",
            });
        }

        tracing::warn!("🧹 Execution {} has no live handle, marking it cancelled", execution_id);
        execution.transition(ExecutionStatus::Cancelled)?;
        execution.error_message = Some(EngineError::Cancelled.to_string());
        self.repository.update_execution(&execution).await
    }

    /// Latest known state of an execution, including its task executions
    pub async fn get_execution_status(&self, execution_id: Uuid) -> Result<WorkflowExecution> {
        self.repository
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| EngineError::execution_not_found(execution_id))
    }

    pub async fn list_executions(
        &self,
        workflow_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>> {
        self.repository.list_executions(workflow_id, limit).await
    }

    /// Pre-flight structural check
    pub fn validate_workflow(&self, workflow: &WorkflowDefinition) -> ValidationResult {
        validate_tasks(&workflow.tasks)
    }

    /// Ids of executions that still have a live background task
    pub async fn running_executions(&self) -> Vec<Uuid> {
        self.running.lock().await.keys().copied().collect()
    }

    /// Cancel every in-flight execution
    pub async fn shutdown(&self) {
        let in_flight = self.running.lock().await.len();
        tracing::info!("⏹️ Shutting down engine, cancelling {} running executions", in_flight);
        self.root.cancel();
    }
}

/// Persist the executor's verdict on the execution row
async fn finalize(
    repository: &dyn WorkflowRepository,
    mut execution: WorkflowExecution,
    report: ExecutionReport,
) {
    execution.result = Some(report.summary);
    execution.error_message = report.error_message;
    if let Err(e) = execution.transition(report.status) {
        tracing::error!("❌ Execution {} could not be finalized: {}", execution.id, e);
        return;
    }
    if let Err(e) = repository.update_execution(&execution).await {
        tracing::error!("❌ Failed to persist final state of execution {}: {}", execution.id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::memory::InMemoryRepository;
    use crate::workflow::types::{TaskType, WorkflowTask};
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    fn delay_workflow(id: &str, duration: &str) -> WorkflowDefinition {
        WorkflowDefinition {
            id: id.to_string(),
            name: id.to_string(),
            is_enabled: true,
            tasks: vec![WorkflowTask {
                id: "wait".into(),
                name: "Wait".into(),
                task_type: TaskType::Delay,
                config: HashMap::from([("duration".to_string(), json!(duration))]),
                depends_on: vec![],
                timeout_secs: None,
                continue_on_error: false,
            }],
            schedule: None,
            max_execution_time_secs: None,
            max_retries: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn engine(workflows: Vec<WorkflowDefinition>) -> (Arc<InMemoryRepository>, WorkflowEngine) {
        let repo = Arc::new(InMemoryRepository::with_workflows(workflows));
        let engine = WorkflowEngine::from_config(
            repo.clone(),
            &EngineConfig { retry_backoff_secs: 0, default_task_timeout_secs: 60 },
            &ServicesConfig {
                forecast_url: "http://127.0.0.1:9".into(),
                optimization_url: "http://127.0.0.1:9".into(),
            },
        );
        (repo, engine)
    }

    async fn wait_for_terminal(engine: &WorkflowEngine, id: Uuid) -> WorkflowExecution {
        for _ in 0..200 {
            let execution = engine.get_execution_status(id).await.unwrap();
            if execution.status.is_terminal() {
                return execution;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("execution {id} did not finish");
    }

    #[tokio::test]
    async fn unknown_workflow_and_execution_are_not_found() {
        let (_repo, engine) = engine(vec![]);
        let err =
            engine.execute_workflow("missing", TriggerType::Manual, "tester").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { kind: "workflow", .. }));

        let err = engine.cancel_execution(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { kind: "execution", .. }));

        let err = engine.get_execution_status(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn invalid_workflow_carries_validator_messages() {
        let mut wf = delay_workflow("broken", "1s");
        wf.tasks[0].depends_on = vec!["ghost".into()];
        let (repo, engine) = engine(vec![wf]);

        let err =
            engine.execute_workflow("broken", TriggerType::Manual, "tester").await.unwrap_err();
        match err {
            EngineError::InvalidWorkflow(errors) => {
                assert_eq!(errors, vec!["task 'wait' depends on unknown task 'ghost'"])
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(repo.list_executions(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn execute_returns_before_the_run_finishes() {
        let (_repo, engine) = engine(vec![delay_workflow("slow", "10s")]);

        let execution =
            engine.execute_workflow("slow", TriggerType::Manual, "tester").await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert!(execution.started_at.is_some());
        assert_eq!(engine.running_executions().await, vec![execution.id]);

        engine.cancel_execution(execution.id).await.unwrap();
        let finished = wait_for_terminal(&engine, execution.id).await;
        assert_eq!(finished.status, ExecutionStatus::Cancelled);
        assert!(engine.running_executions().await.is_empty());

        let err = engine.cancel_execution(execution.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn cancel_after_completion_is_invalid_state() {
        let mut wf = delay_workflow("quick", "1s");
        wf.tasks[0].task_type = TaskType::Condition;
        wf.tasks[0].config.clear();
        let (_repo, engine) = engine(vec![wf]);

        let execution =
            engine.execute_workflow("quick", TriggerType::Manual, "tester").await.unwrap();
        let finished = wait_for_terminal(&engine, execution.id).await;
        assert_eq!(finished.status, ExecutionStatus::Completed);

        // A terminal row never has a live handle left
        let err = engine.cancel_execution(execution.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { .. }));
        let reloaded = engine.get_execution_status(execution.id).await.unwrap();
        assert_eq!(reloaded.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn orphaned_running_row_is_cancelled_directly() {
        let (repo, engine) = engine(vec![]);
        let mut orphan = WorkflowExecution::new("gone", TriggerType::Scheduled, "<scheduler>");
        orphan.transition(ExecutionStatus::Running).unwrap();
        repo.create_execution(&orphan).await.unwrap();

        engine.cancel_execution(orphan.id).await.unwrap();
        let loaded = engine.get_execution_status(orphan.id).await.unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Cancelled);
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn shutdown_cancels_every_run() {
        let (_repo, engine) = engine(vec![delay_workflow("a", "30s"), delay_workflow("b", "30s")]);
        let first = engine.execute_workflow("a", TriggerType::Manual, "tester").await.unwrap();
        let second = engine.execute_workflow("b", TriggerType::Webhook, "hook").await.unwrap();

        engine.shutdown().await;

        assert_eq!(wait_for_terminal(&engine, first.id).await.status, ExecutionStatus::Cancelled);
        assert_eq!(wait_for_terminal(&engine, second.id).await.status, ExecutionStatus::Cancelled);
    }
}
