use thiserror::Error;
use warden_coordination::CoordinationError;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The coordination store or election backend failed.
    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    /// An invocation for this job is already pending on this executor.
    #[error("Job already scheduled: {job}")]
    AlreadyScheduled { job: String },

    /// The executor shut down while the invocation was being awaited.
    #[error("Wait interrupted for job: {job}")]
    Interrupted { job: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Failure reported by a job's own work. Recorded, never retried.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Failed(String),

    /// A command job exited unsuccessfully.
    #[error("command exited with {}: {stderr}", exit_label(.code))]
    CommandFailed { code: Option<i32>, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl JobError {
    pub fn failed(msg: impl Into<String>) -> Self {
        JobError::Failed(msg.into())
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "signal".to_string(),
    }
}
