/// Workflow executor: drives one execution of a workflow
///
/// Walks the topologically sorted tasks one at a time, skips tasks whose
/// dependencies did not complete, runs the rest through the `TaskRunner`,
/// persists every attempt as its own `TaskExecution` row and applies the
/// retry and continue-on-error policies. The outcome is reported back to the
/// engine as an `ExecutionReport`.

use crate::{
    error::{EngineError, Result},
    runtime::runner::{PriorResults, TaskRunner},
    workflow::{
        graph::topological_sort,
        storage::WorkflowRepository,
        types::{ExecutionStatus, TaskExecution, TaskStatus, WorkflowDefinition, WorkflowTask},
    },
};
use serde_json::{json, Map, Value};
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Final state of one execution as decided by the executor
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
    /// `{ completedTasks, totalTasks, failedTasks, cancelledTasks, skippedTasks, taskResults }`
    pub summary: Value,
}

/// Executes workflows against a repository using a shared task runner
pub struct WorkflowExecutor {
    repository: Arc<dyn WorkflowRepository>,
    runner: Arc<TaskRunner>,
    retry_backoff: Duration,
}

/// Bookkeeping for a single run
struct Progress {
    total: usize,
    completed: HashSet<String>,
    results: PriorResults,
    failed: Vec<String>,
    cancelled: Vec<String>,
    skipped: Vec<String>,
}

impl Progress {
    fn new(total: usize) -> Self {
        Self {
            total,
            completed: HashSet::new(),
            results: PriorResults::new(),
            failed: Vec::new(),
            cancelled: Vec::new(),
            skipped: Vec::new(),
        }
    }

    fn summary(&self) -> Value {
        let task_results: Map<String, Value> =
            self.results.iter().map(|(id, result)| (id.clone(), result.clone())).collect();
        json!({
            "completedTasks": self.completed.len(),
            "totalTasks": self.total,
            "failedTasks": self.failed,
            "cancelledTasks": self.cancelled,
            "skippedTasks": self.skipped,
            "taskResults": task_results,
        })
    }
}

/// Per-run context shared by the task loop and the retry loop
struct Run<'a> {
    workflow: &'a WorkflowDefinition,
    execution_id: Uuid,
    token: CancellationToken,
    deadline_hit: Arc<AtomicBool>,
}

impl Run<'_> {
    /// Error describing why the run's token fired
    fn interruption(&self) -> EngineError {
        if self.deadline_hit.load(Ordering::SeqCst) {
            let limit = self.workflow.max_execution_time_secs.unwrap_or(0);
            EngineError::ExecutionTimeout(Duration::from_secs(limit))
        } else {
            EngineError::Cancelled
        }
    }
}

impl WorkflowExecutor {
    pub fn new(
        repository: Arc<dyn WorkflowRepository>,
        runner: Arc<TaskRunner>,
        retry_backoff: Duration,
    ) -> Self {
        Self { repository, runner, retry_backoff }
    }

    /// Run every task of `workflow` for the execution `execution_id`
    ///
    /// Never returns an error: storage, task and cancellation failures are all
    /// folded into the report's status.
    pub async fn execute(
        &self,
        workflow: &WorkflowDefinition,
        execution_id: Uuid,
        cancel: &CancellationToken,
    ) -> ExecutionReport {
        let workflow_start_time = std::time::Instant::now();
        tracing::info!("🚀 Starting execution {} of workflow '{}'", execution_id, workflow.id);

        let run = Run {
            workflow,
            execution_id,
            token: cancel.child_token(),
            deadline_hit: Arc::new(AtomicBool::new(false)),
        };

        // Max execution time fires the run's own child token
        let deadline = workflow.max_execution_time_secs.map(|secs| {
            let token = run.token.clone();
            let flag = Arc::clone(&run.deadline_hit);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                flag.store(true, Ordering::SeqCst);
                token.cancel();
            })
        });

        let mut progress = Progress::new(workflow.tasks.len());
        let outcome = self.run_tasks(&run, &mut progress).await;

        if let Some(handle) = deadline {
            handle.abort();
        }

        let (status, error_message) = match outcome {
            Ok(()) => (ExecutionStatus::Completed, None),
            Err(EngineError::Cancelled) => {
                (ExecutionStatus::Cancelled, Some(EngineError::Cancelled.to_string()))
            }
            Err(e) => (ExecutionStatus::Failed, Some(e.to_string())),
        };

        let duration = workflow_start_time.elapsed();
        match status {
            ExecutionStatus::Completed => tracing::info!(
                "🎉 Execution {} completed in {:?} ({}/{} tasks)",
                execution_id,
                duration,
                progress.completed.len(),
                progress.total
            ),
            ExecutionStatus::Cancelled => {
                tracing::warn!("🛑 Execution {} cancelled after {:?}", execution_id, duration)
            }
            _ => tracing::error!(
                "❌ Execution {} failed after {:?}: {}",
                execution_id,
                duration,
                error_message.as_deref().unwrap_or("unknown error")
            ),
        }

        ExecutionReport { status, error_message, summary: progress.summary() }
    }

    async fn run_tasks(&self, run: &Run<'_>, progress: &mut Progress) -> Result<()> {
        let order = topological_sort(&run.workflow.tasks);
        tracing::debug!(
            "📋 Execution order: {:?}",
            order.iter().map(|t| t.id.as_str()).collect::<Vec<_>>()
        );

        let mut abort: Option<EngineError> = None;

        for (step, task) in order.iter().copied().enumerate() {
            if let Some(reason) = &abort {
                self.skip(run, progress, task, format!("not run: {reason}")).await?;
                continue;
            }

            if run.token.is_cancelled() {
                let reason = run.interruption();
                self.skip(run, progress, task, format!("not run: {reason}")).await?;
                abort = Some(reason);
                continue;
            }

            let unmet =
                task.depends_on.iter().find(|dep| !progress.completed.contains(dep.as_str()));
            if let Some(missing) = unmet {
                tracing::warn!(
                    "⏭️ Skipping task '{}': dependency '{}' did not complete",
                    task.id,
                    missing
                );
                self.skip(run, progress, task, format!("dependency '{missing}' did not complete"))
                    .await?;
                continue;
            }

            tracing::info!(
                "📍 Step {}/{}: task '{}' (type: {:?})",
                step + 1,
                order.len(),
                task.id,
                task.task_type
            );

            match self.run_with_retries(run, progress, task).await {
                Ok(result) => {
                    progress.completed.insert(task.id.clone());
                    progress.results.insert(task.id.clone(), result);
                }
                Err(e) if e.is_cancellation() => {
                    progress.cancelled.push(task.id.clone());
                    abort = Some(e);
                }
                Err(e) => {
                    progress.failed.push(task.id.clone());
                    if matches!(e, EngineError::ExecutionTimeout(_)) {
                        abort = Some(e);
                    } else if task.continue_on_error {
                        tracing::warn!("⚠️ Task '{}' failed, continuing: {}", task.id, e);
                    } else {
                        tracing::error!("❌ Task '{}' failed, aborting execution: {}", task.id, e);
                        abort = Some(e);
                    }
                }
            }
        }

        match abort {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Run one task, appending a row per attempt until it succeeds or the
    /// retry budget is spent
    async fn run_with_retries(
        &self,
        run: &Run<'_>,
        progress: &Progress,
        task: &WorkflowTask,
    ) -> Result<Value> {
        let max_retries = run.workflow.max_retries;
        let mut retry_count = 0;

        loop {
            let mut attempt = TaskExecution::running(run.execution_id, task, retry_count);
            self.repository.append_task_execution(&attempt).await?;

            match self.runner.run(task, &progress.results, &run.token).await {
                Ok(result) => {
                    attempt.finish(TaskStatus::Completed, Some(result.clone()), None);
                    self.repository.update_task_execution(&attempt).await?;
                    tracing::info!(
                        "✅ Task '{}' completed (attempt {})",
                        task.id,
                        retry_count + 1
                    );
                    return Ok(result);
                }
                Err(EngineError::Cancelled) => {
                    let reason = run.interruption();
                    let status = if reason.is_cancellation() {
                        TaskStatus::Cancelled
                    } else {
                        TaskStatus::Failed
                    };
                    attempt.finish(status, None, Some(reason.to_string()));
                    self.repository.update_task_execution(&attempt).await?;
                    return Err(reason);
                }
                Err(e) => {
                    attempt.finish(TaskStatus::Failed, None, Some(e.to_string()));
                    self.repository.update_task_execution(&attempt).await?;

                    if retry_count >= max_retries {
                        return Err(e);
                    }

                    retry_count += 1;
                    tracing::warn!(
                        "🔁 Task '{}' failed ({}), retry {}/{} in {:?}",
                        task.id,
                        e,
                        retry_count,
                        max_retries,
                        self.retry_backoff
                    );
                    tokio::select! {
                        _ = run.token.cancelled() => return Err(run.interruption()),
                        _ = tokio::time::sleep(self.retry_backoff) => {}
                    }
                }
            }
        }
    }

    async fn skip(
        &self,
        run: &Run<'_>,
        progress: &mut Progress,
        task: &WorkflowTask,
        reason: String,
    ) -> Result<()> {
        tracing::debug!("⏭️ Task '{}' skipped: {}", task.id, reason);
        progress.skipped.push(task.id.clone());
        self.repository
            .append_task_execution(&TaskExecution::skipped(run.execution_id, task, reason))
            .await
    }
}
