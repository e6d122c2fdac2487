//! Lease-based leader election over the shared SQLite database.
//!
//! Each group owns one row in `election_leases`. A candidate becomes leader
//! by claiming the row while it is expired (or already its own), keeps it
//! alive by renewing every `renew_interval`, and deletes it when the listener
//! returns. A leader that has gone too long without a successful renewal
//! drops its listener before the row can expire, so no other candidate can
//! take the group while it still runs.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warden_core::config::ElectionConfig;

use crate::{
    db::{init_db, with_conn},
    election::{pause, LeaderElection, LeadershipListener, Participation},
    error::{CoordinationError, Result},
};

#[derive(Debug, Clone, Copy)]
struct LeaseTiming {
    ttl: Duration,
    renew_interval: Duration,
    retry_delay: Duration,
}

impl LeaseTiming {
    /// How long a leader may go without a successful renewal: halfway
    /// between the renew interval and the lease ttl.
    fn hold_limit(&self) -> Duration {
        let slack = self.ttl.saturating_sub(self.renew_interval) / 2;
        self.ttl.saturating_sub(slack)
    }
}

impl From<&ElectionConfig> for LeaseTiming {
    fn from(config: &ElectionConfig) -> Self {
        Self {
            ttl: Duration::from_millis(config.lease_ttl_ms),
            renew_interval: Duration::from_millis(config.renew_interval_ms),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

/// [`LeaderElection`] shared by every process that opens the same database.
pub struct SqliteLeaseElection {
    conn: Arc<Mutex<Connection>>,
    candidate_id: String,
    timing: LeaseTiming,
    participation: tokio::sync::Mutex<Option<Participation>>,
}

impl SqliteLeaseElection {
    pub fn new(
        conn: Connection,
        candidate_id: impl Into<String>,
        config: &ElectionConfig,
    ) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            candidate_id: candidate_id.into(),
            timing: LeaseTiming::from(config),
            participation: tokio::sync::Mutex::new(None),
        })
    }

    /// Open the shared database file at `path`.
    pub fn open(path: &str, candidate_id: impl Into<String>, config: &ElectionConfig) -> Result<Self> {
        Self::new(crate::db::open(path)?, candidate_id, config)
    }
}

#[async_trait]
impl LeaderElection for SqliteLeaseElection {
    async fn start(&self, group: &str, listener: Arc<dyn LeadershipListener>) -> Result<()> {
        let mut participation = self.participation.lock().await;
        if participation.is_some() {
            return Err(CoordinationError::AlreadyStarted {
                group: group.to_string(),
            });
        }

        let token = CancellationToken::new();
        let lease = Lease {
            conn: Arc::clone(&self.conn),
            group: group.to_string(),
            holder: self.candidate_id.clone(),
            ttl: self.timing.ttl,
        };
        let task = tokio::spawn(lease_election_loop(
            lease,
            self.timing,
            listener,
            token.clone(),
        ));
        info!(%group, candidate = %self.candidate_id, "joined lease election");
        *participation = Some(Participation { token, task });
        Ok(())
    }

    async fn stop(&self) {
        if let Some(participation) = self.participation.lock().await.take() {
            participation.shutdown().await;
            info!(candidate = %self.candidate_id, "left lease election");
        }
    }
}

/// One candidate's view of a group's lease row.
#[derive(Clone)]
struct Lease {
    conn: Arc<Mutex<Connection>>,
    group: String,
    holder: String,
    ttl: Duration,
}

impl Lease {
    fn expiry_from_now(&self) -> i64 {
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        Utc::now().timestamp_millis().saturating_add(ttl_ms)
    }

    /// Claim the row if it is free, expired, or already ours.
    async fn try_acquire(&self) -> Result<bool> {
        let lease = self.clone();
        with_conn(&self.conn, move |conn| {
            let now = Utc::now().timestamp_millis();
            let n = conn.execute(
                "INSERT INTO election_leases (group_key, holder, expires_at_ms)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(group_key) DO UPDATE
                 SET holder = excluded.holder, expires_at_ms = excluded.expires_at_ms
                 WHERE election_leases.expires_at_ms <= ?4
                    OR election_leases.holder = excluded.holder",
                rusqlite::params![lease.group, lease.holder, lease.expiry_from_now(), now],
            )?;
            Ok(n > 0)
        })
        .await
    }

    /// Extend the lease. Returns false if another candidate holds it now.
    async fn renew(&self) -> Result<bool> {
        let lease = self.clone();
        with_conn(&self.conn, move |conn| {
            let n = conn.execute(
                "UPDATE election_leases SET expires_at_ms = ?1
                 WHERE group_key = ?2 AND holder = ?3",
                rusqlite::params![lease.expiry_from_now(), lease.group, lease.holder],
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn release(&self) -> Result<()> {
        let lease = self.clone();
        with_conn(&self.conn, move |conn| {
            conn.execute(
                "DELETE FROM election_leases WHERE group_key = ?1 AND holder = ?2",
                rusqlite::params![lease.group, lease.holder],
            )?;
            Ok(())
        })
        .await
    }
}

enum Term {
    Finished(std::result::Result<(), crate::election::ListenerError>),
    Lost,
    Stopped,
}

async fn lease_election_loop(
    lease: Lease,
    timing: LeaseTiming,
    listener: Arc<dyn LeadershipListener>,
    token: CancellationToken,
) {
    let group = lease.group.clone();
    let candidate = lease.holder.clone();

    while !token.is_cancelled() {
        // the row's expiry is computed after this instant
        let attempt = Instant::now();
        match lease.try_acquire().await {
            Ok(true) => {}
            Ok(false) => {
                if !pause(&token, timing.retry_delay).await {
                    break;
                }
                continue;
            }
            Err(e) => {
                warn!(%group, %candidate, error = %e, "lease acquisition failed");
                if !pause(&token, timing.retry_delay).await {
                    break;
                }
                continue;
            }
        }
        debug!(%group, %candidate, "lease acquired");

        let term = hold_leadership(&lease, timing, attempt, &listener, &token).await;

        if let Err(e) = lease.release().await {
            // the row expires on its own after ttl
            warn!(%group, %candidate, error = %e, "lease release failed");
        }
        debug!(%group, %candidate, "lease released");

        match term {
            Term::Finished(Ok(())) => {}
            Term::Finished(Err(e)) => {
                warn!(%group, %candidate, error = %e, "leadership term failed; retrying after delay");
                if !pause(&token, timing.retry_delay).await {
                    break;
                }
            }
            Term::Lost => {
                if !pause(&token, timing.retry_delay).await {
                    break;
                }
            }
            Term::Stopped => break,
        }
    }
}

/// Run the listener while renewing the lease in the background.
///
/// Gives up with [`Term::Lost`] when another candidate owns the row, or when
/// no renewal has succeeded within [`LeaseTiming::hold_limit`] of the last
/// good one, whether the failures are refusals or database errors.
async fn hold_leadership(
    lease: &Lease,
    timing: LeaseTiming,
    acquired_at: Instant,
    listener: &Arc<dyn LeadershipListener>,
    token: &CancellationToken,
) -> Term {
    let mut renew = tokio::time::interval_at(
        acquired_at + timing.renew_interval,
        timing.renew_interval,
    );
    renew.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut valid_until = acquired_at + timing.hold_limit();

    let work = listener.take_leadership();
    tokio::pin!(work);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                warn!(group = %lease.group, "leadership revoked by stop");
                return Term::Stopped;
            }
            result = &mut work => return Term::Finished(result),
            _ = tokio::time::sleep_until(valid_until) => {
                error!(group = %lease.group, candidate = %lease.holder, "lease not renewed in time; abandoning leadership");
                return Term::Lost;
            }
            _ = renew.tick() => {
                let attempt = Instant::now();
                let renewed = tokio::select! {
                    renewed = lease.renew() => renewed,
                    _ = tokio::time::sleep_until(valid_until) => {
                        error!(group = %lease.group, candidate = %lease.holder, "lease renewal stalled; abandoning leadership");
                        return Term::Lost;
                    }
                };
                match renewed {
                    Ok(true) => valid_until = attempt + timing.hold_limit(),
                    Ok(false) => {
                        error!(group = %lease.group, candidate = %lease.holder, "lease lost; abandoning leadership");
                        return Term::Lost;
                    }
                    Err(e) => warn!(group = %lease.group, error = %e, "lease renewal failed"),
                }
            }
        }
    }
}
