use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use warden_coordination::{CoordinationStore, LeaderElection, LeadershipListener, ListenerError};
use warden_core::config::{leader_path, status_path};

use crate::{
    context::ExecutionContext,
    error::{Result, SchedulerError},
    executor::{InvocationOutcome, JobExecutor},
    job::Job,
    schedule::JobSchedule,
    status::StatusRecord,
};

/// Drives a job's leadership cycles: on every election win, run the job once
/// at its next scheduled time and persist the resulting status record.
pub struct JobLeader {
    job: Arc<dyn Job>,
    schedule: Arc<dyn JobSchedule>,
    executor: Arc<JobExecutor>,
    store: Arc<dyn CoordinationStore>,
    election: Arc<dyn LeaderElection>,
    status_path: String,
}

impl JobLeader {
    pub fn new(
        job: Arc<dyn Job>,
        schedule: Arc<dyn JobSchedule>,
        executor: Arc<JobExecutor>,
        store: Arc<dyn CoordinationStore>,
        election: Arc<dyn LeaderElection>,
    ) -> Arc<Self> {
        let status_path = status_path(job.unique_name());
        Arc::new(Self {
            job,
            schedule,
            executor,
            store,
            election,
            status_path,
        })
    }

    pub fn job_name(&self) -> &str {
        self.job.unique_name()
    }

    /// Join the job's election group. Every win runs one cycle.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let listener: Arc<dyn LeadershipListener> = Arc::clone(self) as Arc<dyn LeadershipListener>;
        self.election
            .start(&leader_path(self.job_name()), listener)
            .await?;
        Ok(())
    }

    /// Cancel the pending invocation and leave the election group.
    pub async fn stop(&self) {
        self.executor.cancel(self.job_name());
        self.election.stop().await;
        info!(job = %self.job_name(), "job leader stopped");
    }

    /// One full leadership cycle. Must only run while holding leadership.
    ///
    /// Status is persisted for completed, failed and cancelled runs so the
    /// schedule always advances. An interrupted wait persists nothing and
    /// returns [`SchedulerError::Interrupted`]; the next leader reschedules
    /// from the last persisted record.
    pub async fn run_cycle(&self) -> Result<InvocationOutcome> {
        let name = self.job_name();
        info!(job = %name, "elected leader of job");

        let status = self.read_status().await?;
        let scheduled = self.schedule.next_time(
            status.last_scheduled_time,
            status.last_actual_start_time,
            status.last_actual_completion_time,
        );

        let ctx = ExecutionContext::new(Arc::clone(&self.job), scheduled);
        let outcome = self.executor.execute(&ctx).await?;

        match &outcome {
            InvocationOutcome::Completed | InvocationOutcome::Cancelled => {}
            InvocationOutcome::Failed(reason) => {
                warn!(job = %name, %reason, "job run failed; schedule advances without retry");
            }
            InvocationOutcome::Interrupted => {
                warn!(job = %name, "job wait interrupted; status not persisted");
                return Err(SchedulerError::Interrupted {
                    job: name.to_string(),
                });
            }
        }

        let next = StatusRecord {
            last_scheduled_time: Some(scheduled),
            last_actual_start_time: ctx.actual_start_time(),
            last_actual_completion_time: ctx.actual_completion_time(),
        };
        self.write_status(&next).await?;

        info!(job = %name, "relinquished leadership of job");
        Ok(outcome)
    }

    /// Read the job's status record, creating the path on first use.
    pub async fn read_status(&self) -> Result<StatusRecord> {
        if !self.store.exists(&self.status_path).await? {
            self.store.create(&self.status_path).await?;
            info!(job = %self.job_name(), path = %self.status_path, "created status path");
            return Ok(StatusRecord::default());
        }
        let data = self.store.read(&self.status_path).await?;
        Ok(StatusRecord::decode(&data))
    }

    async fn write_status(&self, status: &StatusRecord) -> Result<()> {
        self.store
            .write(&self.status_path, &status.encode())
            .await?;
        info!(
            job = %self.job_name(),
            scheduled = ?status.last_scheduled_time,
            completed = ?status.last_actual_completion_time,
            "persisted job status"
        );
        Ok(())
    }
}

#[async_trait]
impl LeadershipListener for JobLeader {
    async fn take_leadership(&self) -> std::result::Result<(), ListenerError> {
        self.run_cycle().await?;
        Ok(())
    }
}

/// Read a job's status record without creating its path.
///
/// Returns `None` when the job has never been led.
pub async fn peek_status(
    store: &dyn CoordinationStore,
    job_name: &str,
) -> Result<Option<StatusRecord>> {
    let path = status_path(job_name);
    if !store.exists(&path).await? {
        return Ok(None);
    }
    let data = store.read(&path).await?;
    Ok(Some(StatusRecord::decode(&data)))
}
