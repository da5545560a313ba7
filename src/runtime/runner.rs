/// Task runner: executes one task of a workflow
///
/// Parses the task's configuration into its typed form, dispatches by task
/// type and races the work against the task timeout and the execution's
/// cancellation token. A timeout surfaces as `TaskTimeout`, a cancellation as
/// `Cancelled`, anything the operation itself reports as `TaskFailure`.

use crate::{
    config::ServicesConfig,
    error::{EngineError, Result},
    runtime::energy::{
        ForecastRequest, ForecastResponse, OptimizationRequest, OptimizationResponse,
    },
    workflow::{
        task_config::{HttpCallConfig, NotificationConfig, TaskConfig},
        types::WorkflowTask,
    },
};
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use std::{collections::HashMap, time::Duration};
use tokio_util::sync::CancellationToken;

/// Results of tasks that already completed in this execution, keyed by task id
pub type PriorResults = HashMap<String, Value>;

/// Runs single tasks; shared by every execution of an engine
#[derive(Debug, Clone)]
pub struct TaskRunner {
    client: reqwest::Client,
    services: ServicesConfig,
    default_timeout: Duration,
}

impl TaskRunner {
    pub fn new(services: ServicesConfig, default_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            services,
            default_timeout,
        }
    }

    /// Timeout applied to `task`
    pub fn timeout_for(&self, task: &WorkflowTask) -> Duration {
        task.timeout_secs.map(Duration::from_secs).unwrap_or(self.default_timeout)
    }

    /// Run `task` to completion, timeout or cancellation
    pub async fn run(
        &self,
        task: &WorkflowTask,
        prior: &PriorResults,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let config = TaskConfig::parse(task).map_err(|message| failure(task, message))?;
        let timeout = self.timeout_for(task);

        tracing::debug!(
            "▶️ Running task '{}' ({:?}) with timeout {:?}",
            task.id,
            task.task_type,
            timeout
        );
        let start_time = std::time::Instant::now();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            outcome = tokio::time::timeout(timeout, self.dispatch(task, config, prior)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::TaskTimeout { task_id: task.id.clone(), timeout }),
                }
            }
        };

        let elapsed = start_time.elapsed();
        match &result {
            Ok(_) => tracing::debug!("✅ Task '{}' finished in {:?}", task.id, elapsed),
            Err(e) => tracing::debug!("❌ Task '{}' ended after {:?}: {}", task.id, elapsed, e),
        }
        result
    }

    async fn dispatch(
        &self,
        task: &WorkflowTask,
        config: TaskConfig,
        prior: &PriorResults,
    ) -> Result<Value> {
        match config {
            TaskConfig::HttpCall(cfg) => self.http_call(task, &cfg).await,
            TaskConfig::Delay(cfg) => {
                tracing::debug!("⏳ Delaying task '{}' for {:?}", task.id, cfg.duration);
                tokio::time::sleep(cfg.duration).await;
                let delayed_ms = u64::try_from(cfg.duration.as_millis()).unwrap_or(u64::MAX);
                Ok(json!({ "delayed_ms": delayed_ms }))
            }
            // No expression language: conditions always pass
            TaskConfig::Condition(cfg) => Ok(json!({
                "result": true,
                "expression": cfg.expression,
                "evaluated": false,
            })),
            // Pass-through placeholder
            TaskConfig::Transform(_) => Ok(json!({
                "transformed": false,
                "inputs": prior.len(),
            })),
            TaskConfig::Notification(cfg) => Ok(notify(task, &cfg)),
            TaskConfig::Forecast(cfg) => {
                let request = ForecastRequest::from(&cfg);
                let url = endpoint(&self.services.forecast_url, "forecast");
                let body = self.post_json(task, &url, &request).await?;
                let response: ForecastResponse = serde_json::from_value(body).map_err(|e| {
                    failure(task, format!("forecast response missing forecast_id: {e}"))
                })?;
                tracing::info!(
                    "📈 Forecast job {} created for series {}",
                    response.forecast_id,
                    request.series_id
                );
                Ok(json!({ "forecast_id": response.forecast_id, "status": response.status }))
            }
            TaskConfig::Optimization(cfg) => {
                let request = OptimizationRequest::build(&cfg, Utc::now())
                    .map_err(|message| failure(task, message))?;
                let url = endpoint(&self.services.optimization_url, "optimize");
                let body = self.post_json(task, &url, &request).await?;
                let response: OptimizationResponse =
                    serde_json::from_value(body).map_err(|e| {
                        let message =
                            format!("optimization response missing optimization_id/status: {e}");
                        failure(task, message)
                    })?;
                tracing::info!(
                    "🔋 Optimization job {} ({}) is {}",
                    response.optimization_id,
                    request.optimization_type,
                    response.status
                );
                Ok(json!({
                    "optimization_id": response.optimization_id,
                    "status": response.status,
                }))
            }
        }
    }

    /// Generic HTTP request; non-2xx responses are failures
    async fn http_call(&self, task: &WorkflowTask, cfg: &HttpCallConfig) -> Result<Value> {
        let method = Method::from_bytes(cfg.method.as_bytes())
            .map_err(|_| failure(task, format!("unsupported HTTP method: {}", cfg.method)))?;

        tracing::debug!("🌍 HTTP Request: {} {}", method, cfg.url);
        let mut request_builder = self.client.request(method.clone(), &cfg.url);
        for (key, value) in &cfg.headers {
            request_builder = request_builder.header(key, value);
        }

        if let Some(body) = &cfg.body {
            request_builder = match body {
                Value::String(text) => {
                    request_builder.header("Content-Type", "text/plain").body(text.clone())
                }
                other => request_builder.json(other),
            };
        }

        let response = request_builder
            .send()
            .await
            .map_err(|e| failure(task, format!("HTTP request failed: {e}")))?;

        let status = response.status();
        let headers_map: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        let response_text = response
            .text()
            .await
            .map_err(|e| failure(task, format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            let message =
                format!("HTTP {} from {} {}: {}", status, method, cfg.url, snippet(&response_text));
            return Err(failure(task, message));
        }

        let data = serde_json::from_str::<Value>(&response_text)
            .unwrap_or(Value::String(response_text));
        tracing::info!("✅ HTTP request completed: {} {} (status: {})", method, cfg.url, status);

        Ok(json!({
            "status": status.as_u16(),
            "headers": headers_map,
            "data": data,
        }))
    }

    /// POST a JSON body and return the parsed JSON reply
    async fn post_json<T: serde::Serialize>(
        &self,
        task: &WorkflowTask,
        url: &str,
        body: &T,
    ) -> Result<Value> {
        tracing::debug!("📤 POST {}", url);
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| failure(task, format!("request to {url} failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| failure(task, format!("failed to read response from {url}: {e}")))?;

        if !status.is_success() {
            return Err(failure(task, format!("HTTP {} from {}: {}", status, url, snippet(&text))));
        }

        serde_json::from_str(&text)
            .map_err(|e| failure(task, format!("invalid JSON from {url}: {e}")))
    }
}

fn notify(task: &WorkflowTask, cfg: &NotificationConfig) -> Value {
    tracing::info!(
        "📣 Notification from task '{}' via {} to {:?}: {}",
        task.id,
        cfg.channel,
        cfg.recipients,
        cfg.message
    );
    json!({
        "sent": true,
        "channel": cfg.channel,
        "recipients": cfg.recipients,
        "message": cfg.message,
    })
}

fn failure(task: &WorkflowTask, message: String) -> EngineError {
    EngineError::TaskFailure { task_id: task.id.clone(), message }
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

/// First 200 characters of a response body for error messages
fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(200) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
