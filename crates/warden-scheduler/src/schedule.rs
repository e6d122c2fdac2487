use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use warden_core::config::ScheduleSpec;

/// Policy deciding when a job runs next, from the timings of its last run.
///
/// Implementations are pure functions of their inputs and must return a time
/// for every input combination, including a job with no history at all.
pub trait JobSchedule: Send + Sync {
    fn next_time(
        &self,
        last_scheduled: Option<DateTime<Utc>>,
        last_actual_start: Option<DateTime<Utc>>,
        last_actual_completion: Option<DateTime<Utc>>,
    ) -> DateTime<Utc>;
}

/// Build the policy described by a config entry.
pub fn from_spec(spec: &ScheduleSpec) -> Arc<dyn JobSchedule> {
    match *spec {
        ScheduleSpec::FixedDelay { delay_ms } => Arc::new(FixedDelay::from_millis(delay_ms)),
        ScheduleSpec::FixedRate { period_ms } => Arc::new(FixedRate::from_millis(period_ms)),
        ScheduleSpec::Daily { hour, minute } => Arc::new(Daily::new(hour, minute)),
    }
}

fn millis(ms: u64) -> Duration {
    Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

fn add_saturating(base: DateTime<Utc>, delta: Duration) -> DateTime<Utc> {
    base.checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Next run is a fixed delay after the last completion.
///
/// The last scheduled and start times are ignored: drift from the original
/// schedule is not corrected. With no completion on record the current wall
/// clock stands in for it, so a job's first run happens `delay` after the
/// policy is first consulted. That branch is the only wall-clock read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: StdDuration) -> Self {
        Self {
            delay: Duration::from_std(delay).unwrap_or(Duration::MAX),
        }
    }

    pub fn from_millis(delay_ms: u64) -> Self {
        Self {
            delay: millis(delay_ms),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl JobSchedule for FixedDelay {
    fn next_time(
        &self,
        _last_scheduled: Option<DateTime<Utc>>,
        _last_actual_start: Option<DateTime<Utc>>,
        last_actual_completion: Option<DateTime<Utc>>,
    ) -> DateTime<Utc> {
        let completed = last_actual_completion.unwrap_or_else(Utc::now);
        add_saturating(completed, self.delay)
    }
}

/// Next run is a fixed period after the last *scheduled* time, so runs keep
/// their cadence regardless of how long each one takes. A run that ends past
/// its successor's slot yields a time in the past, which executes at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedRate {
    period: Duration,
}

impl FixedRate {
    pub fn new(period: StdDuration) -> Self {
        Self {
            period: Duration::from_std(period).unwrap_or(Duration::MAX),
        }
    }

    pub fn from_millis(period_ms: u64) -> Self {
        Self {
            period: millis(period_ms),
        }
    }
}

impl JobSchedule for FixedRate {
    fn next_time(
        &self,
        last_scheduled: Option<DateTime<Utc>>,
        _last_actual_start: Option<DateTime<Utc>>,
        _last_actual_completion: Option<DateTime<Utc>>,
    ) -> DateTime<Utc> {
        match last_scheduled {
            Some(scheduled) => add_saturating(scheduled, self.period),
            // first run: immediately
            None => Utc::now(),
        }
    }
}

/// Run every day at HH:MM UTC, strictly after the last completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Daily {
    hour: u8,
    minute: u8,
}

impl Daily {
    /// `hour` and `minute` are clamped to 23 and 59.
    pub fn new(hour: u8, minute: u8) -> Self {
        Self {
            hour: hour.min(23),
            minute: minute.min(59),
        }
    }
}

impl JobSchedule for Daily {
    fn next_time(
        &self,
        _last_scheduled: Option<DateTime<Utc>>,
        _last_actual_start: Option<DateTime<Utc>>,
        last_actual_completion: Option<DateTime<Utc>>,
    ) -> DateTime<Utc> {
        let from = last_actual_completion.unwrap_or_else(Utc::now);
        let today = from.date_naive().and_hms_opt(self.hour as u32, self.minute as u32, 0);
        let Some(today) = today else {
            return add_saturating(from, Duration::days(1));
        };
        let candidate = Utc.from_utc_datetime(&today);
        if candidate > from {
            candidate
        } else {
            // past today's slot, roll to tomorrow
            add_saturating(candidate, Duration::days(1))
        }
    }
}
