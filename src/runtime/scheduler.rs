/// Cron trigger manager
///
/// `WorkflowScheduler` keeps one cron registration per workflow. When a
/// registration fires, it starts the workflow on the engine with the Scheduled
/// trigger type. The cron library sits behind `CronBackend`;
/// `TokioCronBackend` is the tokio-cron-scheduler implementation.

use crate::{
    error::{EngineError, Result},
    runtime::engine::WorkflowEngine,
    workflow::types::TriggerType,
};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// Principal recorded on executions started by a cron fire
pub const SCHEDULER_PRINCIPAL: &str = "<scheduler>";

pub type JobFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Callback invoked on each fire of a job
///
/// Resolves to the error that kept the workflow from starting, if any.
pub type JobCallback = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Timezone a cron expression is evaluated in
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScheduleZone {
    /// IANA zone such as `Europe/Berlin`
    Named(Tz),
    /// Offset such as `+02:00`, no daylight saving
    Fixed(FixedOffset),
}

/// The four capabilities consumed from a cron library, plus lifecycle
#[async_trait]
pub trait CronBackend: Send + Sync {
    /// Register `callback` under `name`, replacing any job with the same name
    async fn add(
        &self,
        name: &str,
        expression: &str,
        timezone: ScheduleZone,
        callback: JobCallback,
    ) -> Result<()>;

    /// Remove the job; returns false when none was registered
    async fn remove(&self, name: &str) -> Result<bool>;

    async fn next_fire_time(&self, name: &str) -> Result<Option<DateTime<Utc>>>;

    /// Run the job's callback now and return its outcome; `Ok(false)` when
    /// no job is registered under `name`
    async fn fire_now(&self, name: &str) -> Result<bool>;

    async fn start(&self) -> Result<()>;

    async fn shutdown(&self) -> Result<()>;
}

/// tokio-cron-scheduler backed implementation
pub struct TokioCronBackend {
    scheduler: RwLock<JobScheduler>,
    /// Track job UUIDs and callbacks for removal and manual fires
    jobs: RwLock<HashMap<String, (Uuid, JobCallback)>>,
}

impl TokioCronBackend {
    pub async fn new() -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: RwLock::new(scheduler),
            jobs: RwLock::new(HashMap::new()),
        })
    }
}

fn cron_job<TZ: TimeZone>(expression: &str, timezone: TZ, callback: JobCallback) -> Result<Job> {
    Job::new_async_tz(expression, timezone, move |_uuid, _l| {
        let callback = Arc::clone(&callback);
        Box::pin(async move {
            // Start failures are already logged by the callback
            let _ = callback().await;
        })
    })
    .map_err(|e| EngineError::InvalidSchedule(format!("'{expression}': {e}")))
}

#[async_trait]
impl CronBackend for TokioCronBackend {
    async fn add(
        &self,
        name: &str,
        expression: &str,
        timezone: ScheduleZone,
        callback: JobCallback,
    ) -> Result<()> {
        let job_callback = Arc::clone(&callback);
        let job = match timezone {
            ScheduleZone::Named(tz) => cron_job(expression, tz, job_callback)?,
            ScheduleZone::Fixed(offset) => cron_job(expression, offset, job_callback)?,
        };

        // Replace an existing registration
        self.remove(name).await?;

        let job_uuid = self.scheduler.read().await.add(job).await?;
        self.jobs.write().await.insert(name.to_string(), (job_uuid, callback));
        tracing::debug!("📝 Tracked job UUID {} for: {}", job_uuid, name);
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<bool> {
        let Some((job_uuid, _)) = self.jobs.write().await.remove(name) else {
            return Ok(false);
        };
        self.scheduler.read().await.remove(&job_uuid).await?;
        tracing::debug!("🛑 Removed cron job from scheduler: {}", name);
        Ok(true)
    }

    async fn next_fire_time(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        let job_uuid = match self.jobs.read().await.get(name) {
            Some((job_uuid, _)) => *job_uuid,
            None => return Ok(None),
        };
        let mut scheduler = self.scheduler.write().await;
        Ok(scheduler.next_tick_for_job(job_uuid).await?)
    }

    async fn fire_now(&self, name: &str) -> Result<bool> {
        let callback = match self.jobs.read().await.get(name) {
            Some((_, callback)) => Arc::clone(callback),
            None => return Ok(false),
        };
        callback().await?;
        Ok(true)
    }

    async fn start(&self) -> Result<()> {
        self.scheduler.read().await.start().await?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.jobs.write().await.clear();
        self.scheduler.write().await.shutdown().await?;
        Ok(())
    }
}

/// One registered workflow as reported by `list_scheduled_jobs`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScheduledJob {
    pub workflow_id: String,
    pub cron_expression: String,
    pub timezone: String,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub previous_fire_time: Option<DateTime<Utc>>,
}

/// Registers, lists and fires cron triggers for workflows
pub struct WorkflowScheduler {
    engine: Arc<WorkflowEngine>,
    backend: Arc<dyn CronBackend>,
    jobs: Arc<RwLock<HashMap<String, ScheduledJob>>>,
}

impl WorkflowScheduler {
    pub fn new(engine: Arc<WorkflowEngine>, backend: Arc<dyn CronBackend>) -> Self {
        Self {
            engine,
            backend,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register every enabled workflow that carries a schedule, then start the backend
    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting workflow scheduler");

        let workflows = self.engine.repository().list_workflows().await?;
        let mut registered = 0;
        for workflow in workflows.iter().filter(|wf| wf.is_enabled) {
            let Some(schedule) = &workflow.schedule else {
                continue;
            };
            match self
                .schedule_workflow(&workflow.id, &schedule.expression, &schedule.timezone)
                .await
            {
                Ok(()) => registered += 1,
                Err(e) => {
                    tracing::warn!("⚠️ Could not schedule workflow '{}': {}", workflow.id, e)
                }
            }
        }

        self.backend.start().await?;
        tracing::info!(
            "📊 Registered {} cron triggers from {} workflows",
            registered,
            workflows.len()
        );
        Ok(())
    }

    /// Drop every registration and stop the backend
    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping workflow scheduler");
        self.jobs.write().await.clear();
        self.backend.shutdown().await
    }

    /// Register (or replace) the cron trigger of `workflow_id`
    pub async fn schedule_workflow(
        &self,
        workflow_id: &str,
        cron_expression: &str,
        timezone: &str,
    ) -> Result<()> {
        let zone = parse_timezone(timezone)?;
        let callback = self.fire_callback(workflow_id);

        self.backend.add(workflow_id, cron_expression, zone, callback).await?;

        let mut jobs = self.jobs.write().await;
        let previous_fire_time = jobs.get(workflow_id).and_then(|job| job.previous_fire_time);
        jobs.insert(
            workflow_id.to_string(),
            ScheduledJob {
                workflow_id: workflow_id.to_string(),
                cron_expression: cron_expression.to_string(),
                timezone: timezone.to_string(),
                next_fire_time: None,
                previous_fire_time,
            },
        );

        tracing::info!(
            "🔥 Scheduled workflow '{}' ({} {})",
            workflow_id,
            cron_expression,
            timezone
        );
        Ok(())
    }

    /// Remove the cron trigger of `workflow_id`; a no-op when none exists
    pub async fn unschedule_workflow(&self, workflow_id: &str) -> Result<()> {
        let removed = self.backend.remove(workflow_id).await?;
        self.jobs.write().await.remove(workflow_id);
        if removed {
            tracing::info!("🗑️ Unscheduled workflow '{}'", workflow_id);
        } else {
            tracing::debug!("📋 Workflow '{}' was not scheduled", workflow_id);
        }
        Ok(())
    }

    /// Registered workflows with next and previous fire times, ordered by id
    pub async fn list_scheduled_jobs(&self) -> Result<Vec<ScheduledJob>> {
        let mut jobs: Vec<ScheduledJob> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.workflow_id.cmp(&b.workflow_id));
        for job in &mut jobs {
            job.next_fire_time = self.backend.next_fire_time(&job.workflow_id).await?;
        }
        Ok(jobs)
    }

    /// Fire the registration of `workflow_id` immediately
    ///
    /// Errors that keep the workflow from starting (`NotFound`, `Disabled`,
    /// `InvalidWorkflow`) are returned to the caller.
    pub async fn trigger_job_now(&self, workflow_id: &str) -> Result<()> {
        if !self.jobs.read().await.contains_key(workflow_id) {
            return Err(EngineError::NotScheduled(workflow_id.to_string()));
        }
        tracing::info!("⚡ Triggering workflow '{}' now", workflow_id);
        if !self.backend.fire_now(workflow_id).await? {
            return Err(EngineError::NotScheduled(workflow_id.to_string()));
        }
        Ok(())
    }

    /// Callback run on each fire: record the fire time, then start an execution
    fn fire_callback(&self, workflow_id: &str) -> JobCallback {
        let workflow_id = workflow_id.to_string();
        let engine = Arc::clone(&self.engine);
        let jobs = Arc::clone(&self.jobs);

        Arc::new(move || {
            let workflow_id = workflow_id.clone();
            let engine = Arc::clone(&engine);
            let jobs = Arc::clone(&jobs);

            let fire: JobFuture = Box::pin(async move {
                tracing::debug!("🔔 Cron trigger activated for workflow {}", workflow_id);
                if let Some(job) = jobs.write().await.get_mut(&workflow_id) {
                    job.previous_fire_time = Some(Utc::now());
                }

                match engine
                    .execute_workflow(&workflow_id, TriggerType::Scheduled, SCHEDULER_PRINCIPAL)
                    .await
                {
                    Ok(execution) => {
                        tracing::info!(
                            "🚀 Cron-triggered execution {} of workflow {}",
                            execution.id,
                            workflow_id
                        );
                        Ok(())
                    }
                    Err(e) => {
                        tracing::error!(
                            "❌ Cron-triggered workflow {} did not start: {}",
                            workflow_id,
                            e
                        );
                        Err(e)
                    }
                }
            });
            fire
        })
    }
}

/// Accepts an IANA zone name ("Europe/Berlin"), "UTC" / "Z", or a fixed
/// offset such as "+02:00" / "UTC-05:00"
pub fn parse_timezone(raw: &str) -> Result<ScheduleZone> {
    let trimmed = raw.trim();
    if matches!(trimmed, "" | "Z" | "utc") {
        return Ok(ScheduleZone::Named(Tz::UTC));
    }

    let numeric = trimmed
        .strip_prefix("UTC")
        .or_else(|| trimmed.strip_prefix("GMT"))
        .unwrap_or(trimmed);
    if numeric.starts_with(['+', '-']) {
        if let Ok(offset) = numeric.parse::<FixedOffset>() {
            return Ok(ScheduleZone::Fixed(offset));
        }
    }

    trimmed.parse::<Tz>().map(ScheduleZone::Named).map_err(|_| {
        EngineError::InvalidSchedule(format!(
            "unknown timezone '{raw}': use an IANA name or an offset such as +02:00"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offset_secs(raw: &str) -> i32 {
        match parse_timezone(raw).unwrap() {
            ScheduleZone::Fixed(offset) => offset.local_minus_utc(),
            other => panic!("expected a fixed offset for {raw}, got {other:?}"),
        }
    }

    #[test]
    fn utc_aliases_parse_to_utc() {
        for raw in ["", "UTC", "utc", "Z"] {
            assert_eq!(parse_timezone(raw).unwrap(), ScheduleZone::Named(Tz::UTC), "{raw}");
        }
    }

    #[test]
    fn fixed_offsets_parse() {
        assert_eq!(offset_secs("+02:00"), 7200);
        assert_eq!(offset_secs("UTC-05:30"), -(5 * 3600 + 30 * 60));
        assert_eq!(offset_secs("GMT+01:00"), 3600);
    }

    #[test]
    fn iana_zones_parse() {
        assert_eq!(
            parse_timezone("Europe/Berlin").unwrap(),
            ScheduleZone::Named(chrono_tz::Europe::Berlin)
        );
        assert_eq!(
            parse_timezone(" America/New_York ").unwrap(),
            ScheduleZone::Named(chrono_tz::America::New_York)
        );
    }

    #[test]
    fn unknown_zones_are_rejected() {
        for raw in ["Mars/Olympus", "+25:00", "soon"] {
            let err = parse_timezone(raw).unwrap_err();
            assert!(matches!(err, EngineError::InvalidSchedule(_)), "{raw}");
        }
    }
}
