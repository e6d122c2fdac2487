//! `warden-scheduler`: leader-driven execution of recurring jobs.
//!
//! # Overview
//!
//! For every job, exactly one process of the cluster holds leadership of the
//! job's election group at a time. Each time a [`JobLeader`] wins, it runs one
//! leadership cycle:
//!
//! 1. read the job's [`StatusRecord`] from the coordination store,
//! 2. ask the [`JobSchedule`] when the job should run next,
//! 3. hand an [`ExecutionContext`] to the [`JobExecutor`], which waits for the
//!    scheduled time, runs the job once and records the actual timings,
//! 4. overwrite the status record and relinquish leadership.
//!
//! Because the next run is always derived from the persisted record, a new
//! leader on another process picks up exactly where the last completed cycle
//! left off. A leader that crashes mid-run never writes its record, so the
//! run is redone by the next leader (at-least-once per recovery).
//!
//! # Schedule variants
//!
//! | Variant      | Next run                                      |
//! |--------------|-----------------------------------------------|
//! | `FixedDelay` | last completion + delay                       |
//! | `FixedRate`  | last scheduled time + period                  |
//! | `Daily`      | next HH:MM UTC after the last completion      |

pub mod context;
pub mod error;
pub mod executor;
pub mod job;
pub mod leader;
pub mod schedule;
pub mod status;

pub use context::ExecutionContext;
pub use error::{JobError, Result, SchedulerError};
pub use executor::{InvocationOutcome, InvocationState, JobExecutor};
pub use job::{CommandJob, FnJob, Job};
pub use leader::JobLeader;
pub use schedule::{Daily, FixedDelay, FixedRate, JobSchedule};
pub use status::StatusRecord;
