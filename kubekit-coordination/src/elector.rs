//! A leader-election loop over any [`ElectionLock`].
//!
//! A candidate only infers lease state from timestamps it captured locally,
//! so the loop tolerates arbitrary clock skew but not arbitrary skew *rate*;
//! keep `lease_duration` comfortably above `renew_deadline` to absorb slow
//! clocks and API latency. There is no fencing: losing candidates must stop
//! leader-only work promptly when `run` returns an error.

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::{self, Either};
use futures::pin_mut;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use rand::Rng;
use thiserror::Error;

use crate::lock::{self, ElectionLock, LeaderElectionRecord};

/// Multiplier applied to `retry_period` when jittering acquisition attempts.
const JITTER_FACTOR: f64 = 1.2;

#[derive(Debug, Error)]
pub enum ElectorError {
    #[error("invalid elector config: {0}")]
    InvalidConfig(String),

    /// Another candidate took the lease over.
    #[error("leadership lost: {reason}")]
    Lost { reason: String },

    /// Renewal kept failing past the renew deadline.
    #[error("failed to renew leadership within the renew deadline: {source}")]
    RenewDeadline {
        #[source]
        source: lock::Error,
    },
}

/// Durations governing one candidacy.
///
/// Defaults follow the core clients: 15s lease, 10s renew deadline, 2s retry
/// period.
#[derive(Clone, Debug)]
pub struct ElectorConfig {
    /// How long a lease is valid after its last renewal. Non-leaders wait
    /// this long after the last observed renewal before forcing an
    /// acquisition.
    pub lease_duration: Duration,
    /// How long the current holder keeps retrying a failing renewal before
    /// giving up leadership.
    pub renew_deadline: Duration,
    /// Pause between acquisition attempts and between renewals.
    pub retry_period: Duration,
}

impl Default for ElectorConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
        }
    }
}

impl ElectorConfig {
    fn validate(&self) -> Result<(), ElectorError> {
        if self.lease_duration <= self.renew_deadline {
            return Err(ElectorError::InvalidConfig(
                "lease_duration must be greater than renew_deadline".into(),
            ));
        }
        if self.renew_deadline.as_secs_f64() <= JITTER_FACTOR * self.retry_period.as_secs_f64() {
            return Err(ElectorError::InvalidConfig(format!(
                "renew_deadline must be greater than retry_period*{JITTER_FACTOR}"
            )));
        }
        if self.retry_period.as_secs() < 1 {
            return Err(ElectorError::InvalidConfig(
                "retry_period must be at least 1 second".into(),
            ));
        }
        Ok(())
    }
}

/// Runs one candidacy over a lock.
pub struct Elector<L> {
    lock: L,
    config: ElectorConfig,
}

impl<L: ElectionLock> Elector<L> {
    /// # Errors
    ///
    /// [`ElectorError::InvalidConfig`] when the durations are inconsistent.
    pub fn new(lock: L, config: ElectorConfig) -> Result<Self, ElectorError> {
        config.validate()?;
        Ok(Self { lock, config })
    }

    /// The lock this elector campaigns on.
    pub fn lock(&self) -> &L {
        &self.lock
    }

    /// Acquire leadership, then drive `fut` while renewing the lease.
    ///
    /// Resolves with the future's output once it completes, or with an error
    /// as soon as leadership is lost, at which point leader-only work must
    /// stop. The lease is left to expire on its own (no release write), so a
    /// crashed or cancelled leader delays hand-over by at most one
    /// `lease_duration`.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ElectorError> {
        self.acquire().await;
        let renewer = self.keep_renewed();
        pin_mut!(renewer, fut);
        match future::select(renewer, fut).await {
            Either::Left((err, _)) => Err(err),
            Either::Right((output, _)) => Ok(output),
        }
    }

    async fn acquire(&self) {
        loop {
            match self.try_acquire_or_renew().await {
                Ok(()) => {
                    tracing::info!(lock = %self.lock.describe(), "acquired leadership");
                    return;
                }
                Err(error) => {
                    tracing::debug!(
                        lock = %self.lock.describe(),
                        %error,
                        "leadership not acquired; will retry"
                    );
                }
            }
            tokio::time::sleep(self.jittered_retry()).await;
        }
    }

    /// Renews until it fails for good; only ever returns an error.
    async fn keep_renewed(&self) -> ElectorError {
        let mut last_renewed = Instant::now();
        loop {
            tokio::time::sleep(self.config.retry_period).await;
            match self.try_acquire_or_renew().await {
                Ok(()) => last_renewed = Instant::now(),
                Err(lock::Error::Conflict { reason, .. }) => {
                    return ElectorError::Lost { reason };
                }
                Err(error) => {
                    if last_renewed.elapsed() >= self.config.renew_deadline {
                        return ElectorError::RenewDeadline { source: error };
                    }
                    tracing::warn!(
                        lock = %self.lock.describe(),
                        %error,
                        "failed to renew leadership; retrying"
                    );
                }
            }
        }
    }

    /// One acquisition or renewal attempt, maintaining the transition counter
    /// and acquire time across hand-overs.
    async fn try_acquire_or_renew(&self) -> lock::Result<()> {
        let old = match self.lock.get().await {
            Ok((record, _)) => Some(record),
            Err(lock::Error::NotFound { .. }) => None,
            Err(error) => return Err(error),
        };

        let now = Time(Utc::now());
        let mut record = LeaderElectionRecord {
            holder_identity: self.lock.identity().to_owned(),
            lease_duration_seconds: i32::try_from(self.config.lease_duration.as_secs())
                .unwrap_or(i32::MAX),
            acquire_time: Some(now.clone()),
            renew_time: Some(now),
            leader_transitions: 0,
        };
        match &old {
            Some(old) if old.holder_identity == record.holder_identity => {
                record.acquire_time = old.acquire_time.clone();
                record.leader_transitions = old.leader_transitions;
            }
            Some(old) if !old.is_vacant() => {
                record.leader_transitions = old.leader_transitions + 1;
            }
            _ => {}
        }

        if old.is_some() {
            self.lock.update(record).await
        } else {
            self.lock.create(record).await
        }
    }

    fn jittered_retry(&self) -> Duration {
        let jitter = 1.0 + (JITTER_FACTOR - 1.0) * rand::rng().random::<f64>();
        self.config.retry_period.mul_f64(jitter)
    }
}
