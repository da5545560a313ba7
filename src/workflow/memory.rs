/// In-memory repository
///
/// Same contract as the SQLite store, held in process memory. Used by tests
/// and by embedders that do not need durable history.

use crate::error::{EngineError, Result};
use crate::workflow::storage::WorkflowRepository;
use crate::workflow::types::{TaskExecution, WorkflowDefinition, WorkflowExecution};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    workflows: HashMap<String, WorkflowDefinition>,
    /// Insertion order doubles as creation order
    executions: Vec<WorkflowExecution>,
    task_executions: Vec<TaskExecution>,
}

#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: RwLock<State>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a repository pre-seeded with workflow definitions
    pub fn with_workflows(workflows: impl IntoIterator<Item = WorkflowDefinition>) -> Self {
        let state = State {
            workflows: workflows.into_iter().map(|wf| (wf.id.clone(), wf)).collect(),
            ..State::default()
        };
        Self { state: RwLock::new(state) }
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryRepository {
    async fn get_workflow(&self, id: &str) -> Result<Option<WorkflowDefinition>> {
        Ok(self.state.read().await.workflows.get(id).cloned())
    }

    async fn save_workflow(&self, workflow: &WorkflowDefinition) -> Result<()> {
        let mut state = self.state.write().await;
        state.workflows.insert(workflow.id.clone(), workflow.clone());
        Ok(())
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>> {
        let state = self.state.read().await;
        let mut workflows: Vec<_> = state.workflows.values().cloned().collect();
        workflows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(workflows)
    }

    async fn delete_workflow(&self, id: &str) -> Result<bool> {
        Ok(self.state.write().await.workflows.remove(id).is_some())
    }

    async fn create_execution(&self, execution: &WorkflowExecution) -> Result<()> {
        let mut stored = execution.clone();
        stored.task_executions.clear();
        self.state.write().await.executions.push(stored);
        Ok(())
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> Result<()> {
        let mut state = self.state.write().await;
        let slot = state
            .executions
            .iter_mut()
            .find(|e| e.id == execution.id)
            .ok_or_else(|| EngineError::execution_not_found(execution.id))?;
        *slot = WorkflowExecution { task_executions: Vec::new(), ..execution.clone() };
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<WorkflowExecution>> {
        let state = self.state.read().await;
        Ok(state.executions.iter().find(|e| e.id == id).map(|execution| {
            let mut execution = execution.clone();
            execution.task_executions = state
                .task_executions
                .iter()
                .filter(|t| t.execution_id == id)
                .cloned()
                .collect();
            execution
        }))
    }

    async fn list_executions(
        &self,
        workflow_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>> {
        let state = self.state.read().await;
        Ok(state
            .executions
            .iter()
            .rev()
            .filter(|e| workflow_id.map_or(true, |id| e.workflow_id == id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn append_task_execution(&self, task: &TaskExecution) -> Result<()> {
        self.state.write().await.task_executions.push(task.clone());
        Ok(())
    }

    async fn update_task_execution(&self, task: &TaskExecution) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(slot) = state.task_executions.iter_mut().find(|t| t.id == task.id) {
            *slot = task.clone();
        }
        Ok(())
    }
}
