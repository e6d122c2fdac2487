//! Leader-election capability.
//!
//! A [`LeaderElection`] calls its [`LeadershipListener`] whenever this
//! candidate wins its group. Leadership is held exactly as long as the
//! listener future runs; returning relinquishes it and puts the candidate
//! back in the pool, so the listener is called again on every later win.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CoordinationError, Result};

/// Error type a listener may return to signal a failed leadership term.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Callback run while this candidate holds leadership of a group.
#[async_trait]
pub trait LeadershipListener: Send + Sync {
    /// Do the leader's work. Returning (with or without error) relinquishes
    /// leadership.
    async fn take_leadership(&self) -> std::result::Result<(), ListenerError>;
}

/// Participation of one candidate in one election group.
#[async_trait]
pub trait LeaderElection: Send + Sync {
    /// Join `group` and call `listener` on every win until [`stop`](Self::stop).
    async fn start(&self, group: &str, listener: Arc<dyn LeadershipListener>) -> Result<()>;

    /// Leave the group. A listener still running is dropped at its next
    /// await point and leadership is released. Safe to call more than once.
    async fn stop(&self);
}

/// Background task driving one candidate's participation.
pub(crate) struct Participation {
    pub(crate) token: CancellationToken,
    pub(crate) task: JoinHandle<()>,
}

impl Participation {
    pub(crate) async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                warn!(error = %e, "election task ended abnormally");
            }
        }
    }
}

/// Sleep for `delay` unless `token` fires first. Returns false when cancelled.
pub(crate) async fn pause(token: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Shared table of in-process election groups.
///
/// Each group is a fair async mutex: candidates queue in arrival order and a
/// candidate that relinquishes goes to the back of the queue.
#[derive(Clone, Default)]
pub struct LocalElectionRegistry {
    groups: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl LocalElectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn group(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut groups = self.groups.lock().expect("election registry poisoned");
        Arc::clone(groups.entry(key.to_string()).or_default())
    }
}

/// [`LeaderElection`] between candidates that share a [`LocalElectionRegistry`].
pub struct LocalElection {
    registry: LocalElectionRegistry,
    candidate_id: String,
    retry_delay: Duration,
    participation: tokio::sync::Mutex<Option<Participation>>,
}

impl LocalElection {
    pub fn new(
        registry: LocalElectionRegistry,
        candidate_id: impl Into<String>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            registry,
            candidate_id: candidate_id.into(),
            retry_delay,
            participation: tokio::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl LeaderElection for LocalElection {
    async fn start(&self, group: &str, listener: Arc<dyn LeadershipListener>) -> Result<()> {
        let mut participation = self.participation.lock().await;
        if participation.is_some() {
            return Err(CoordinationError::AlreadyStarted {
                group: group.to_string(),
            });
        }

        let token = CancellationToken::new();
        let task = tokio::spawn(local_election_loop(
            self.registry.group(group),
            group.to_string(),
            self.candidate_id.clone(),
            self.retry_delay,
            listener,
            token.clone(),
        ));
        info!(%group, candidate = %self.candidate_id, "joined election");
        *participation = Some(Participation { token, task });
        Ok(())
    }

    async fn stop(&self) {
        if let Some(participation) = self.participation.lock().await.take() {
            participation.shutdown().await;
            info!(candidate = %self.candidate_id, "left election");
        }
    }
}

async fn local_election_loop(
    lock: Arc<tokio::sync::Mutex<()>>,
    group: String,
    candidate: String,
    retry_delay: Duration,
    listener: Arc<dyn LeadershipListener>,
    token: CancellationToken,
) {
    loop {
        let guard = tokio::select! {
            _ = token.cancelled() => break,
            guard = Arc::clone(&lock).lock_owned() => guard,
        };
        debug!(%group, %candidate, "won election");

        let result = tokio::select! {
            _ = token.cancelled() => {
                warn!(%group, %candidate, "leadership revoked by stop");
                break;
            }
            result = listener.take_leadership() => result,
        };
        drop(guard);
        debug!(%group, %candidate, "leadership released");

        if let Err(e) = result {
            warn!(%group, %candidate, error = %e, "leadership term failed; retrying after delay");
            if !pause(&token, retry_delay).await {
                break;
            }
        }
    }
}
