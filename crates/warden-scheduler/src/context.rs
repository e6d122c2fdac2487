use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::job::Job;

/// State of one job invocation.
///
/// Cheap to clone: clones share the same timings, so the executor's timer
/// task and the leadership cycle observe the same record. Each actual
/// timestamp is written at most once.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    job: Arc<dyn Job>,
    scheduled_time: DateTime<Utc>,
    times: Mutex<ActualTimes>,
}

#[derive(Debug, Default, Clone, Copy)]
struct ActualTimes {
    start: Option<DateTime<Utc>>,
    completion: Option<DateTime<Utc>>,
}

impl ExecutionContext {
    pub fn new(job: Arc<dyn Job>, scheduled_time: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                job,
                scheduled_time,
                times: Mutex::new(ActualTimes::default()),
            }),
        }
    }

    pub fn job(&self) -> &Arc<dyn Job> {
        &self.inner.job
    }

    pub fn job_name(&self) -> &str {
        self.inner.job.unique_name()
    }

    pub fn scheduled_time(&self) -> DateTime<Utc> {
        self.inner.scheduled_time
    }

    pub fn actual_start_time(&self) -> Option<DateTime<Utc>> {
        self.times().start
    }

    pub fn actual_completion_time(&self) -> Option<DateTime<Utc>> {
        self.times().completion
    }

    /// Record the start of the run. Returns false if it was already set.
    pub(crate) fn mark_started(&self, at: DateTime<Utc>) -> bool {
        let mut times = self.inner.times.lock().expect("context poisoned");
        set_once(&mut times.start, at)
    }

    /// Record the end of the run. Returns false if it was already set.
    pub(crate) fn mark_completed(&self, at: DateTime<Utc>) -> bool {
        let mut times = self.inner.times.lock().expect("context poisoned");
        set_once(&mut times.completion, at)
    }

    /// Fill in whichever actual timestamps are still missing.
    pub(crate) fn backfill(&self, at: DateTime<Utc>) {
        let mut times = self.inner.times.lock().expect("context poisoned");
        set_once(&mut times.start, at);
        set_once(&mut times.completion, at);
    }

    fn times(&self) -> ActualTimes {
        *self.inner.times.lock().expect("context poisoned")
    }
}

fn set_once(slot: &mut Option<DateTime<Utc>>, at: DateTime<Utc>) -> bool {
    if slot.is_some() {
        return false;
    }
    *slot = Some(at);
    true
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let times = self.times();
        f.debug_struct("ExecutionContext")
            .field("job", &self.job_name())
            .field("scheduled_time", &self.scheduled_time())
            .field("actual_start_time", &times.start)
            .field("actual_completion_time", &times.completion)
            .finish()
    }
}
