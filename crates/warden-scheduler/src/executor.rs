//! Timed execution of single job invocations.
//!
//! [`JobExecutor::execute`] arms a timer task for the context's scheduled
//! time, registers it under the job's name and then blocks the calling
//! leadership cycle until the run completes, fails, is cancelled, or the
//! executor shuts down. The wait is split into bounded poll windows so a
//! lost wakeup can never park a leader forever.
//!
//! Per invocation state machine:
//!
//! ```text
//! Scheduled -> Running -> Completed | Failed
//! Scheduled -> Cancelled
//! Running   -> Cancelled   (only with interrupt_running)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use tokio::sync::{oneshot, watch};
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use warden_core::config::ExecutorConfig;

use crate::{
    context::ExecutionContext,
    error::{JobError, Result, SchedulerError},
};

/// Lifecycle of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    /// Timer armed, job not started.
    Scheduled,
    /// Job is inside its `execute`.
    Running,
    /// Job returned successfully.
    Completed,
    /// Job returned an error or panicked. Its completion time is still set.
    Failed,
    /// Cancelled before or (when allowed) during the run.
    Cancelled,
}

impl InvocationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InvocationState::Completed | InvocationState::Failed | InvocationState::Cancelled
        )
    }
}

/// How a call to [`JobExecutor::execute`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    Completed,
    /// The job's own work failed; the message is for logging only.
    Failed(String),
    /// Cancelled; missing actual timestamps were backfilled with "now".
    Cancelled,
    /// The executor shut down while waiting. Timestamps may be missing.
    Interrupted,
}

type SharedState = Arc<Mutex<InvocationState>>;

/// Registry entry for a live invocation.
struct PendingInvocation {
    id: u64,
    state: SharedState,
    abort: AbortHandle,
}

/// Runs job invocations at their scheduled time. One instance is shared by
/// every leader of a process.
pub struct JobExecutor {
    pending: DashMap<String, PendingInvocation>,
    poll_window: Duration,
    interrupt_running: bool,
    shutdown: watch::Sender<bool>,
    next_id: AtomicU64,
}

impl JobExecutor {
    pub fn new(poll_window: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            pending: DashMap::new(),
            poll_window,
            interrupt_running: false,
            shutdown,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(Duration::from_millis(config.poll_window_ms))
            .with_interrupt_running(config.interrupt_running)
    }

    /// Let [`cancel`](Self::cancel) abort a run that has already started.
    pub fn with_interrupt_running(mut self, interrupt_running: bool) -> Self {
        self.interrupt_running = interrupt_running;
        self
    }

    /// Number of invocations currently registered.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// State of the live invocation for `job_name`, if any.
    pub fn state_of(&self, job_name: &str) -> Option<InvocationState> {
        self.pending
            .get(job_name)
            .map(|p| *p.state.lock().expect("invocation state poisoned"))
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run the context's job once at its scheduled time and wait for the
    /// outcome. A scheduled time in the past runs immediately.
    ///
    /// Fails only if an invocation for the same job is already pending here;
    /// job failures are reported through [`InvocationOutcome::Failed`].
    pub async fn execute(&self, ctx: &ExecutionContext) -> Result<InvocationOutcome> {
        let name = ctx.job_name().to_string();
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            warn!(job = %name, "executor shut down; not scheduling job");
            return Ok(InvocationOutcome::Interrupted);
        }

        let delay = (ctx.scheduled_time() - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let deadline = Instant::now() + delay;

        let state: SharedState = Arc::new(Mutex::new(InvocationState::Scheduled));
        let (armed_tx, armed_rx) = oneshot::channel();
        let mut task = tokio::spawn(run_invocation(
            ctx.clone(),
            Arc::clone(&state),
            deadline,
            armed_rx,
        ));

        // The timer stays disarmed until registration succeeds, so a
        // concurrent cancel always finds the handle.
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match self.pending.entry(name.clone()) {
            Entry::Occupied(_) => {
                task.abort();
                warn!(job = %name, "job already has a pending invocation");
                return Err(SchedulerError::AlreadyScheduled { job: name });
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingInvocation {
                    id,
                    state: Arc::clone(&state),
                    abort: task.abort_handle(),
                });
            }
        }
        let _registration = Registration {
            executor: self,
            name: &name,
            id,
            state: Arc::clone(&state),
            abort: task.abort_handle(),
        };
        let _ = armed_tx.send(());
        info!(
            job = %name,
            scheduled = %ctx.scheduled_time(),
            delay_ms = delay.as_millis() as u64,
            "scheduled job for execution"
        );

        let outcome = self
            .wait_until_complete(&name, &mut task, &state, delay, &mut shutdown)
            .await;

        if outcome == InvocationOutcome::Cancelled {
            // a cancelled run must still leave concrete history behind
            ctx.backfill(Utc::now());
        }
        Ok(outcome)
    }

    /// Best-effort cancellation of the pending invocation for `job_name`.
    ///
    /// A run that has not fired yet never fires. A run already inside the
    /// job is only aborted when `interrupt_running` is set, and then only at
    /// its next await point. No-op for unknown or finished invocations.
    pub fn cancel(&self, job_name: &str) {
        if let Some((_, pending)) = self.pending.remove(job_name) {
            self.cancel_invocation(job_name, &pending.state, &pending.abort);
        }
    }

    /// Cancel every registered invocation, wake every waiting `execute`, and
    /// clear the registry. Later calls to `execute` return `Interrupted`.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let mut cancelled = 0usize;
        for entry in self.pending.iter() {
            if self.cancel_invocation(entry.key(), &entry.value().state, &entry.value().abort) {
                cancelled += 1;
            }
        }
        let total = self.pending.len();
        self.pending.clear();
        info!(total, cancelled, "job executor shut down");
    }

    /// Returns true if this call moved the invocation to `Cancelled`.
    fn cancel_invocation(&self, job_name: &str, state: &SharedState, abort: &AbortHandle) -> bool {
        let mut state = state.lock().expect("invocation state poisoned");
        match *state {
            InvocationState::Scheduled => {
                *state = InvocationState::Cancelled;
                abort.abort();
                info!(job = %job_name, "cancelled task for job");
                true
            }
            InvocationState::Running if self.interrupt_running => {
                *state = InvocationState::Cancelled;
                abort.abort();
                info!(job = %job_name, "interrupted running job");
                true
            }
            InvocationState::Running => {
                info!(job = %job_name, "failed to cancel job; already running");
                false
            }
            InvocationState::Completed | InvocationState::Failed | InvocationState::Cancelled => {
                false
            }
        }
    }

    async fn wait_until_complete(
        &self,
        name: &str,
        task: &mut JoinHandle<std::result::Result<(), JobError>>,
        state: &SharedState,
        delay: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> InvocationOutcome {
        // Sleep out the pre-fire delay, waking early only if the task ends
        // (cancelled) or the executor stops.
        if !delay.is_zero() {
            tokio::select! {
                biased;
                _ = interrupted(shutdown) => {
                    info!(job = %name, "interrupted waiting for job to start");
                    return InvocationOutcome::Interrupted;
                }
                joined = &mut *task => return observe(name, joined, state),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        loop {
            tokio::select! {
                biased;
                _ = interrupted(shutdown) => {
                    info!(job = %name, "job interrupted");
                    return InvocationOutcome::Interrupted;
                }
                polled = tokio::time::timeout(self.poll_window, &mut *task) => match polled {
                    Ok(joined) => return observe(name, joined, state),
                    Err(_) => info!(job = %name, "job not done yet"),
                },
            }
        }
    }
}

impl Default for JobExecutor {
    fn default() -> Self {
        Self::from_config(&ExecutorConfig::default())
    }
}

/// Ties a registry entry to the lifetime of one `execute` call.
///
/// On drop the entry is removed (unless someone already replaced it) and a
/// timer that has not fired yet is cancelled, so abandoning the wait never
/// leaves an orphaned firing behind.
struct Registration<'a> {
    executor: &'a JobExecutor,
    name: &'a str,
    id: u64,
    state: SharedState,
    abort: AbortHandle,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.executor
            .pending
            .remove_if(self.name, |_, pending| pending.id == self.id);
        let terminal = self
            .state
            .lock()
            .map(|s| s.is_terminal())
            .unwrap_or(true);
        if !terminal {
            self.executor
                .cancel_invocation(self.name, &self.state, &self.abort);
        }
    }
}

/// Sets the completion time when dropped: after a normal return, an error,
/// a panic, or an abort mid-run.
struct CompletionGuard<'a>(&'a ExecutionContext);

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        self.0.mark_completed(Utc::now());
    }
}

/// Timer task body: wait to be armed, sleep until the deadline, run once.
async fn run_invocation(
    ctx: ExecutionContext,
    state: SharedState,
    deadline: Instant,
    armed: oneshot::Receiver<()>,
) -> std::result::Result<(), JobError> {
    if armed.await.is_err() {
        return Ok(());
    }
    tokio::time::sleep_until(deadline).await;

    {
        let mut state = state.lock().expect("invocation state poisoned");
        if *state != InvocationState::Scheduled {
            return Ok(());
        }
        *state = InvocationState::Running;
    }

    ctx.mark_started(Utc::now());
    let _finally = CompletionGuard(&ctx);
    debug!(job = %ctx.job_name(), "job started");
    let result = ctx.job().execute(&ctx).await;

    let mut state = state.lock().expect("invocation state poisoned");
    if *state == InvocationState::Running {
        *state = if result.is_ok() {
            InvocationState::Completed
        } else {
            InvocationState::Failed
        };
    }
    result
}

fn observe(
    name: &str,
    joined: std::result::Result<std::result::Result<(), JobError>, JoinError>,
    state: &SharedState,
) -> InvocationOutcome {
    let mut state = state.lock().expect("invocation state poisoned");
    if *state == InvocationState::Cancelled {
        info!(job = %name, "job cancelled");
        return InvocationOutcome::Cancelled;
    }
    match joined {
        Ok(Ok(())) => {
            *state = InvocationState::Completed;
            info!(job = %name, "job completed");
            InvocationOutcome::Completed
        }
        Ok(Err(e)) => {
            *state = InvocationState::Failed;
            warn!(job = %name, error = %e, "job failed");
            InvocationOutcome::Failed(e.to_string())
        }
        Err(e) if e.is_cancelled() => {
            *state = InvocationState::Cancelled;
            info!(job = %name, "job cancelled");
            InvocationOutcome::Cancelled
        }
        Err(e) => {
            *state = InvocationState::Failed;
            warn!(job = %name, error = %e, "job panicked");
            InvocationOutcome::Failed(format!("job panicked: {e}"))
        }
    }
}

/// Resolves once the executor has been shut down.
async fn interrupted(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            // sender gone: the executor itself was dropped
            std::future::pending::<()>().await;
        }
    }
}
