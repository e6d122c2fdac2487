use std::future::Future;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{context::ExecutionContext, error::JobError};

/// Longest stderr excerpt kept in a [`JobError::CommandFailed`].
const MAX_STDERR_CHARS: usize = 512;

/// Unit of work run once per leadership cycle.
#[async_trait]
pub trait Job: Send + Sync {
    /// Cluster-wide unique name. Keys both the election group and the
    /// status path, so it must stay stable across restarts.
    fn unique_name(&self) -> &str;

    /// Perform one run. Only ever called by the current leader of the job.
    async fn execute(&self, ctx: &ExecutionContext) -> Result<(), JobError>;
}

/// Job that delegates each run to an async closure.
pub struct FnJob<F> {
    name: String,
    f: F,
}

impl<F, Fut> FnJob<F>
where
    F: Fn(ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), JobError>> + Send,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: Fn(ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), JobError>> + Send,
{
    fn unique_name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<(), JobError> {
        (self.f)(ctx.clone()).await
    }
}

/// Job that runs a shell command via `sh -c`. A non-zero exit is a failure.
///
/// The child is killed if the run is aborted.
pub struct CommandJob {
    name: String,
    command: String,
}

impl CommandJob {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

#[async_trait]
impl Job for CommandJob {
    fn unique_name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &ExecutionContext) -> Result<(), JobError> {
        debug!(job = %self.name, command = %self.command, "spawning command");
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("WARDEN_JOB", &self.name)
            .env(
                "WARDEN_SCHEDULED_MS",
                ctx.scheduled_time().timestamp_millis().to_string(),
            )
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!(job = %self.name, stdout = %stdout.trim(), "command output");
        }

        if output.status.success() {
            Ok(())
        } else {
            let stderr: String = String::from_utf8_lossy(&output.stderr)
                .trim()
                .chars()
                .take(MAX_STDERR_CHARS)
                .collect();
            Err(JobError::CommandFailed {
                code: output.status.code(),
                stderr,
            })
        }
    }
}
