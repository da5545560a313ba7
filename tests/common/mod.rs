#![allow(dead_code)]

use axum::Router;
use chrono::Utc;
use flowgrid::config::{EngineConfig, ServicesConfig};
use flowgrid::workflow::{TaskType, WorkflowDefinition, WorkflowExecution, WorkflowTask};
use flowgrid::WorkflowEngine;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use uuid::Uuid;

pub fn task(id: &str, task_type: TaskType, config: Value, deps: &[&str]) -> WorkflowTask {
    WorkflowTask {
        id: id.to_string(),
        name: format!("Task {id}"),
        task_type,
        config: serde_json::from_value(config).expect("config must be an object"),
        depends_on: deps.iter().map(|d| d.to_string()).collect(),
        timeout_secs: None,
        continue_on_error: false,
    }
}

pub fn workflow(id: &str, tasks: Vec<WorkflowTask>) -> WorkflowDefinition {
    WorkflowDefinition {
        id: id.to_string(),
        name: format!("Workflow {id}"),
        is_enabled: true,
        tasks,
        schedule: None,
        max_execution_time_secs: None,
        max_retries: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn engine_config() -> EngineConfig {
    EngineConfig { retry_backoff_secs: 0, default_task_timeout_secs: 30 }
}

pub fn services(base: &str) -> ServicesConfig {
    ServicesConfig { forecast_url: base.to_string(), optimization_url: base.to_string() }
}

/// Serve `app` on an ephemeral local port and return its base URL
pub async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Poll until the execution reaches a terminal status
pub async fn wait_for_terminal(engine: &Arc<WorkflowEngine>, id: Uuid) -> WorkflowExecution {
    for _ in 0..400 {
        let execution = engine.get_execution_status(id).await.unwrap();
        if execution.status.is_terminal() {
            return execution;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("execution {id} did not reach a terminal status");
}
