mod common;

use crate::common::{engine_config, services, task, wait_for_terminal, workflow};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowgrid::runtime::scheduler::{CronBackend, JobCallback, ScheduleZone, SCHEDULER_PRINCIPAL};
use flowgrid::runtime::{TokioCronBackend, WorkflowScheduler};
use flowgrid::workflow::{
    CronSchedule, ExecutionStatus, InMemoryRepository, TaskType, TriggerType, WorkflowRepository,
};
use flowgrid::{EngineError, WorkflowDefinition, WorkflowEngine};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Records registrations instead of scheduling them
#[derive(Default)]
struct FakeCron {
    jobs: Mutex<HashMap<String, (String, ScheduleZone, JobCallback)>>,
    started: Mutex<bool>,
}

#[async_trait]
impl CronBackend for FakeCron {
    async fn add(
        &self,
        name: &str,
        expression: &str,
        timezone: ScheduleZone,
        callback: JobCallback,
    ) -> flowgrid::Result<()> {
        self.jobs
            .lock()
            .await
            .insert(name.to_string(), (expression.to_string(), timezone, callback));
        Ok(())
    }

    async fn remove(&self, name: &str) -> flowgrid::Result<bool> {
        Ok(self.jobs.lock().await.remove(name).is_some())
    }

    async fn next_fire_time(&self, name: &str) -> flowgrid::Result<Option<DateTime<Utc>>> {
        let next = DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Ok(self.jobs.lock().await.get(name).map(|_| next))
    }

    async fn fire_now(&self, name: &str) -> flowgrid::Result<bool> {
        let callback = self.jobs.lock().await.get(name).map(|(_, _, cb)| Arc::clone(cb));
        match callback {
            Some(callback) => {
                callback().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn start(&self) -> flowgrid::Result<()> {
        *self.started.lock().await = true;
        Ok(())
    }

    async fn shutdown(&self) -> flowgrid::Result<()> {
        self.jobs.lock().await.clear();
        Ok(())
    }
}

fn setup(
    workflows: Vec<WorkflowDefinition>,
) -> (Arc<InMemoryRepository>, Arc<WorkflowEngine>, Arc<FakeCron>, WorkflowScheduler) {
    let repo = Arc::new(InMemoryRepository::with_workflows(workflows));
    let engine = Arc::new(WorkflowEngine::from_config(
        repo.clone(),
        &engine_config(),
        &services("http://127.0.0.1:9"),
    ));
    let backend = Arc::new(FakeCron::default());
    let scheduler = WorkflowScheduler::new(Arc::clone(&engine), backend.clone());
    (repo, engine, backend, scheduler)
}

fn notify_workflow(id: &str) -> WorkflowDefinition {
    workflow(id, vec![task("notify", TaskType::Notification, json!({ "message": "tick" }), &[])])
}

#[tokio::test]
async fn unschedule_is_idempotent() {
    let (_repo, _engine, backend, scheduler) = setup(vec![notify_workflow("wf")]);

    scheduler.schedule_workflow("wf", "0 */15 * * * *", "UTC").await.unwrap();
    scheduler.unschedule_workflow("wf").await.unwrap();
    scheduler.unschedule_workflow("wf").await.unwrap();

    assert!(backend.jobs.lock().await.is_empty());
    assert!(scheduler.list_scheduled_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn rescheduling_replaces_the_registration() {
    let (_repo, _engine, backend, scheduler) = setup(vec![notify_workflow("wf")]);

    scheduler.schedule_workflow("wf", "0 0 * * * *", "UTC").await.unwrap();
    scheduler.schedule_workflow("wf", "0 30 6 * * *", "+02:00").await.unwrap();

    let jobs = backend.jobs.lock().await;
    assert_eq!(jobs.len(), 1);
    let (expression, zone, _) = &jobs["wf"];
    assert_eq!(expression, "0 30 6 * * *");
    assert!(matches!(zone, ScheduleZone::Fixed(offset) if offset.local_minus_utc() == 7200));
    drop(jobs);

    let listed = scheduler.list_scheduled_jobs().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].cron_expression, "0 30 6 * * *");
    assert_eq!(listed[0].timezone, "+02:00");
    assert!(listed[0].next_fire_time.is_some());
    assert!(listed[0].previous_fire_time.is_none());
}

#[tokio::test]
async fn named_timezone_is_passed_to_the_backend() {
    let (_repo, _engine, backend, scheduler) = setup(vec![notify_workflow("wf")]);

    scheduler.schedule_workflow("wf", "0 0 6 * * *", "Europe/Berlin").await.unwrap();

    let jobs = backend.jobs.lock().await;
    assert_eq!(jobs["wf"].1, ScheduleZone::Named(chrono_tz::Europe::Berlin));
    drop(jobs);

    let listed = scheduler.list_scheduled_jobs().await.unwrap();
    assert_eq!(listed[0].timezone, "Europe/Berlin");
}

#[tokio::test]
async fn unknown_timezone_is_rejected() {
    let (_repo, _engine, backend, scheduler) = setup(vec![notify_workflow("wf")]);
    let err = scheduler
        .schedule_workflow("wf", "0 0 * * * *", "Mars/Olympus")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidSchedule(_)));
    assert!(backend.jobs.lock().await.is_empty());
}

#[tokio::test]
async fn trigger_now_requires_registration() {
    let (_repo, _engine, _backend, scheduler) = setup(vec![notify_workflow("wf")]);
    let err = scheduler.trigger_job_now("wf").await.unwrap_err();
    assert!(matches!(err, EngineError::NotScheduled(ref id) if id == "wf"));
}

#[tokio::test]
async fn trigger_now_runs_as_scheduled_and_records_fire_time() {
    let (repo, engine, _backend, scheduler) = setup(vec![notify_workflow("wf")]);
    scheduler.schedule_workflow("wf", "0 0 * * * *", "UTC").await.unwrap();

    let before = Utc::now();
    scheduler.trigger_job_now("wf").await.unwrap();

    let executions = repo.list_executions(Some("wf"), 10).await.unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].trigger_type, TriggerType::Scheduled);
    assert_eq!(executions[0].triggered_by, SCHEDULER_PRINCIPAL);
    let finished = wait_for_terminal(&engine, executions[0].id).await;
    assert_eq!(finished.status, ExecutionStatus::Completed);

    let listed = scheduler.list_scheduled_jobs().await.unwrap();
    assert!(listed[0].previous_fire_time.unwrap() >= before);
}

#[tokio::test]
async fn trigger_now_reports_why_the_workflow_did_not_start() {
    let (repo, _engine, _backend, scheduler) = setup(vec![notify_workflow("wf")]);
    scheduler.schedule_workflow("wf", "0 0 * * * *", "UTC").await.unwrap();

    let mut disabled = notify_workflow("wf");
    disabled.is_enabled = false;
    repo.save_workflow(&disabled).await.unwrap();

    let err = scheduler.trigger_job_now("wf").await.unwrap_err();
    assert!(matches!(err, EngineError::Disabled(ref id) if id == "wf"));

    repo.delete_workflow("wf").await.unwrap();
    let err = scheduler.trigger_job_now("wf").await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { kind: "workflow", .. }));

    assert!(repo.list_executions(Some("wf"), 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn start_registers_enabled_scheduled_workflows_only() {
    let schedule = CronSchedule { expression: "0 0 * * * *".into(), timezone: "UTC".into() };
    let mut scheduled = notify_workflow("scheduled");
    scheduled.schedule = Some(schedule.clone());
    let mut disabled = notify_workflow("disabled");
    disabled.is_enabled = false;
    disabled.schedule = Some(schedule);
    let manual = notify_workflow("manual");

    let (_repo, _engine, backend, scheduler) = setup(vec![scheduled, disabled, manual]);
    scheduler.start().await.unwrap();

    assert!(*backend.started.lock().await);
    let names: Vec<String> = scheduler
        .list_scheduled_jobs()
        .await
        .unwrap()
        .into_iter()
        .map(|j| j.workflow_id)
        .collect();
    assert_eq!(names, vec!["scheduled"]);

    scheduler.stop().await.unwrap();
    assert!(scheduler.list_scheduled_jobs().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tokio_cron_backend_fires_on_schedule() {
    let repo = Arc::new(InMemoryRepository::with_workflows([notify_workflow("every-second")]));
    let engine = Arc::new(WorkflowEngine::from_config(
        repo.clone(),
        &engine_config(),
        &services("http://127.0.0.1:9"),
    ));
    let backend = Arc::new(TokioCronBackend::new().await.unwrap());
    let scheduler = WorkflowScheduler::new(Arc::clone(&engine), backend);

    scheduler.schedule_workflow("every-second", "* * * * * *", "Europe/Berlin").await.unwrap();
    scheduler.start().await.unwrap();

    let listed = scheduler.list_scheduled_jobs().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].next_fire_time.is_some());

    let mut fired = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if !repo.list_executions(Some("every-second"), 1).await.unwrap().is_empty() {
            fired = true;
            break;
        }
    }
    scheduler.stop().await.unwrap();
    assert!(fired, "cron job never fired");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tokio_cron_backend_rejects_bad_expressions() {
    let (_repo, engine, _fake, _scheduler) = setup(vec![notify_workflow("wf")]);
    let backend = Arc::new(TokioCronBackend::new().await.unwrap());
    let scheduler = WorkflowScheduler::new(engine, backend);

    let err = scheduler.schedule_workflow("wf", "every tuesday", "UTC").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidSchedule(_)));
}
