//! Leader election on a single mutable remote document.
//!
//! The backing store offers no compare-and-set, no transactions and no
//! server-side expiry, so [`GistLock::update`] reconstructs mutual exclusion
//! with a read–decide–write–confirm protocol: write optimistically, then wait
//! out almost a full lease and re-read to see whose write landed last. This
//! trades a fraction of a lease's latency at every takeover for a safety
//! claim that scales with `rtt / lease_duration`. It is intended for long
//! leases (15s and up) with few candidates, not for low-latency critical
//! sections.
//!
//! Your code must still tolerate a concurrently entered critical section;
//! the protocol chooses liveness over strict safety. Operators should watch
//! for two distinct identities appearing in consecutive reads within one
//! lease window.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gist::{GistClient, GistError};

/// Largest anti-herd delay appended to every successful [`ElectionLock::get`],
/// in milliseconds.
const MAX_GET_JITTER_MS: u64 = 100;

#[derive(Debug, Error)]
pub enum Error {
    /// The record is absent or unreadable. `get` collapses every failure into
    /// this variant so an election loop treats absence and transient failure
    /// identically.
    #[error("Lease.coordination.k8s.io {name:?} not found")]
    NotFound { name: String },

    /// Another candidate holds a valid lease, or won the takeover race.
    #[error("operation cannot be fulfilled on Lease.coordination.k8s.io {name:?}: {reason}")]
    Conflict { name: String, reason: String },

    /// The remote document could not be read or written.
    #[error("lock document access failed: {0}")]
    Document(#[from] GistError),

    /// The record could not be serialized for the write.
    #[error("failed to encode leader election record: {0}")]
    Encode(#[source] serde_json::Error),

    /// The stored document does not parse as a record.
    #[error("failed to decode leader election record: {0}")]
    Decode(#[source] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The canonical leader-election payload, wire-compatible with the standard
/// Kubernetes record so an upstream election loop parses it directly.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderElectionRecord {
    /// The identity of the current holder; empty means the lease is vacant.
    #[serde(default)]
    pub holder_identity: String,
    /// Advisory duration of the lease in seconds.
    #[serde(default)]
    pub lease_duration_seconds: i32,
    /// When the current holder first acquired the lease.
    #[serde(default)]
    pub acquire_time: Option<Time>,
    /// When the current holder last renewed the lease.
    #[serde(default)]
    pub renew_time: Option<Time>,
    /// Incremented on every hand-over between distinct holders.
    #[serde(default)]
    pub leader_transitions: i32,
}

impl LeaderElectionRecord {
    /// Whether no candidate currently claims the lease.
    #[must_use]
    pub fn is_vacant(&self) -> bool {
        self.holder_identity.is_empty()
    }

    /// The instant the current lease stops being valid, if it was ever
    /// renewed.
    #[must_use]
    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        self.renew_time
            .as_ref()
            .map(|renewed| renewed.0 + Duration::seconds(self.lease_duration_seconds.into()))
    }
}

/// The lock contract expected by a leader-election loop: mirrors the standard
/// resource-lock interface (get / create / update / identity / describe).
#[async_trait]
pub trait ElectionLock: Send + Sync {
    /// Fetch the current record along with its serialized bytes.
    async fn get(&self) -> Result<(LeaderElectionRecord, Vec<u8>)>;

    /// Attempt to create the record.
    async fn create(&self, record: LeaderElectionRecord) -> Result<()>;

    /// Attempt to replace the record, refusing while another candidate's
    /// lease is valid.
    async fn update(&self, record: LeaderElectionRecord) -> Result<()>;

    /// Attach an event to the election (may be a no-op).
    fn record_event(&self, note: &str);

    /// This candidate's identity.
    fn identity(&self) -> &str;

    /// A human-readable identifier for the lock.
    fn describe(&self) -> String;
}

/// [`ElectionLock`] persisted in a gist's first file.
pub struct GistLock {
    identity: String,
    gist_id: String,
    client: GistClient,
}

impl GistLock {
    /// Build the lock and verify the document is reachable and readable with
    /// the given token. The document must already exist.
    ///
    /// # Errors
    ///
    /// [`Error::Document`] if the client cannot be built or the initial read
    /// fails.
    pub async fn new(identity: &str, gist_id: &str, access_token: &str) -> Result<Self> {
        let client = GistClient::new(access_token)?;
        Self::with_client(identity, gist_id, client).await
    }

    /// Like [`GistLock::new`] with a preconfigured client (custom endpoint).
    ///
    /// # Errors
    ///
    /// [`Error::Document`] if the initial read fails.
    pub async fn with_client(identity: &str, gist_id: &str, client: GistClient) -> Result<Self> {
        client.get(gist_id).await?;
        Ok(Self {
            identity: identity.to_owned(),
            gist_id: gist_id.to_owned(),
            client,
        })
    }

    async fn read_record(&self) -> Result<LeaderElectionRecord> {
        let content = self.client.get(&self.gist_id).await?;
        serde_json::from_str(&content).map_err(Error::Decode)
    }

    fn conflict(&self, reason: &str) -> Error {
        Error::Conflict {
            name: self.gist_id.clone(),
            reason: reason.to_owned(),
        }
    }

    async fn write_record(&self, record: &LeaderElectionRecord) -> Result<()> {
        let payload = serde_json::to_string(record).map_err(Error::Encode)?;
        self.client.update(&self.gist_id, &payload).await?;
        Ok(())
    }
}

#[async_trait]
impl ElectionLock for GistLock {
    /// Any failure (transport, missing document, unparsable content) comes
    /// back as [`Error::NotFound`] so the election loop treats it as an
    /// acquisition opportunity; transient failures resolve on a later call.
    async fn get(&self) -> Result<(LeaderElectionRecord, Vec<u8>)> {
        let record = match self.read_record().await {
            Ok(record) => record,
            Err(error) => {
                tracing::debug!(gist = %self.gist_id, %error, "treating unreadable lock document as absent");
                return Err(Error::NotFound {
                    name: self.gist_id.clone(),
                });
            }
        };
        let bytes = serde_json::to_vec(&record).map_err(|_| Error::NotFound {
            name: self.gist_id.clone(),
        })?;

        // Stagger candidates that read the document at the same instant.
        let jitter = rand::rng().random_range(0..=MAX_GET_JITTER_MS);
        tokio::time::sleep(std::time::Duration::from_millis(jitter)).await;
        Ok((record, bytes))
    }

    async fn create(&self, record: LeaderElectionRecord) -> Result<()> {
        self.update(record).await
    }

    /// The critical path. With no conditional write available this is
    /// read–decide–write–confirm:
    ///
    /// 1. read the old record (absent ⇒ vacant);
    /// 2. refuse while a different holder's lease is still valid;
    /// 3. write the new record;
    /// 4. when newly acquiring, wait out the lease less one second, re-read,
    ///    and yield if another candidate's write landed last; otherwise
    ///    refresh `renew_time` and run the procedure once more as the
    ///    established holder.
    ///
    /// Cancelling the returned future during the confirmation wait leaves the
    /// document in the intermediate state; the next candidate's update
    /// resolves it.
    async fn update(&self, record: LeaderElectionRecord) -> Result<()> {
        let mut record = record;
        loop {
            let old = match self.get().await {
                Ok((old, _)) => Some(old),
                Err(Error::NotFound { .. }) => None,
                Err(error) => return Err(error),
            };

            if let Some(old) = &old {
                if !old.is_vacant() && old.holder_identity != record.holder_identity {
                    if let Some(valid_until) = old.valid_until() {
                        if valid_until > Utc::now() {
                            tracing::debug!(
                                gist = %self.gist_id,
                                holder = %old.holder_identity,
                                %valid_until,
                                "refusing update: lease is still valid"
                            );
                            return Err(self.conflict("lease is still valid"));
                        }
                    }
                }
            }

            self.write_record(&record).await?;

            let newly_acquired = old
                .as_ref()
                .map_or(true, |old| old.holder_identity != record.holder_identity);
            if !newly_acquired {
                return Ok(());
            }

            // Both of two racing candidates believe they won the write above.
            // Waiting out almost the full lease lets the later write land,
            // then everyone re-reads and the loser yields.
            let wait = u64::try_from(record.lease_duration_seconds.saturating_sub(1)).unwrap_or(0);
            tokio::time::sleep(std::time::Duration::from_secs(wait)).await;

            let (current, _) = self.get().await?;
            tracing::debug!(
                gist = %self.gist_id,
                holder = %current.holder_identity,
                candidate = %record.holder_identity,
                "takeover confirmation re-read"
            );
            if current.holder_identity != record.holder_identity {
                return Err(self.conflict("there is a new leader"));
            }

            record.renew_time = Some(Time(Utc::now()));
            // Loop around: now the existing holder, so the conflict check
            // passes and the refreshed record is written without another wait.
        }
    }

    fn record_event(&self, _note: &str) {}

    fn identity(&self) -> &str {
        &self.identity
    }

    fn describe(&self) -> String {
        format!("gist lock: {}", self.identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::InMemoryGist;
    use wiremock::MockServer;

    fn record(holder: &str, lease_secs: i32, renewed: DateTime<Utc>) -> LeaderElectionRecord {
        LeaderElectionRecord {
            holder_identity: holder.to_owned(),
            lease_duration_seconds: lease_secs,
            acquire_time: Some(Time(renewed)),
            renew_time: Some(Time(renewed)),
            leader_transitions: 0,
        }
    }

    async fn lock_against(server: &MockServer, identity: &str) -> GistLock {
        let client = GistClient::with_base_url("tok", &server.uri()).unwrap();
        GistLock::with_client(identity, "g1", client).await.unwrap()
    }

    #[test]
    fn record_uses_the_standard_wire_format() {
        let renewed = "2026-03-01T10:00:00Z".parse().unwrap();
        let json = serde_json::to_value(record("a", 15, renewed)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "holderIdentity": "a",
                "leaseDurationSeconds": 15,
                "acquireTime": "2026-03-01T10:00:00Z",
                "renewTime": "2026-03-01T10:00:00Z",
                "leaderTransitions": 0,
            })
        );
        let parsed: LeaderElectionRecord = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.holder_identity, "a");
        assert_eq!(parsed.valid_until(), Some(renewed + Duration::seconds(15)));
    }

    #[tokio::test]
    async fn get_collapses_unparsable_content_into_not_found() {
        let server = MockServer::start().await;
        InMemoryGist::mount(&server, "g1", "not json at all").await;
        let lock = lock_against(&server, "a").await;

        let err = lock.get().await.unwrap_err();
        assert!(matches!(err, Error::NotFound { name } if name == "g1"));
    }

    #[tokio::test]
    async fn construction_fails_when_the_document_is_unreadable() {
        let server = MockServer::start().await;
        // No mocks mounted: every request 404s with an empty body.
        let client = GistClient::with_base_url("tok", &server.uri()).unwrap();
        assert!(GistLock::with_client("a", "g1", client).await.is_err());
    }

    #[tokio::test]
    async fn vacant_document_is_acquired_and_readable_afterwards() {
        let server = MockServer::start().await;
        InMemoryGist::mount(&server, "g1", "").await;
        let lock = lock_against(&server, "a").await;

        lock.update(record("a", 2, Utc::now())).await.unwrap();

        let (current, _) = lock.get().await.unwrap();
        assert_eq!(current.holder_identity, "a");
        assert_eq!(current.lease_duration_seconds, 2);
    }

    #[tokio::test]
    async fn update_refuses_while_a_foreign_lease_is_valid() {
        let server = MockServer::start().await;
        let stored = serde_json::to_string(&record("b", 30, Utc::now())).unwrap();
        let gist = InMemoryGist::mount(&server, "g1", &stored).await;
        let lock = lock_against(&server, "a").await;

        let err = lock.update(record("a", 30, Utc::now())).await.unwrap_err();
        assert!(
            matches!(err, Error::Conflict { ref reason, .. } if reason == "lease is still valid"),
            "unexpected error: {err}"
        );
        // Nothing was written.
        assert_eq!(gist.content(), stored);
    }

    #[tokio::test]
    async fn expired_foreign_lease_is_taken_over() {
        let server = MockServer::start().await;
        let expired = Utc::now() - Duration::seconds(120);
        let stored = serde_json::to_string(&record("b", 15, expired)).unwrap();
        InMemoryGist::mount(&server, "g1", &stored).await;
        let lock = lock_against(&server, "a").await;

        lock.update(record("a", 2, Utc::now())).await.unwrap();

        let (current, _) = lock.get().await.unwrap();
        assert_eq!(current.holder_identity, "a");
    }

    #[tokio::test]
    async fn renewal_by_the_holder_skips_the_confirmation_wait() {
        let server = MockServer::start().await;
        let stored = serde_json::to_string(&record("a", 30, Utc::now())).unwrap();
        InMemoryGist::mount(&server, "g1", &stored).await;
        let lock = lock_against(&server, "a").await;

        let started = std::time::Instant::now();
        lock.update(record("a", 30, Utc::now())).await.unwrap();
        // A 30s lease would force a 29s wait if this were treated as a
        // takeover.
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[tokio::test]
    async fn concurrent_takeover_elects_exactly_one_leader() {
        let server = MockServer::start().await;
        InMemoryGist::mount(&server, "g1", "").await;
        let lock_a = lock_against(&server, "a").await;
        let lock_b = lock_against(&server, "b").await;

        let now = Utc::now();
        let (result_a, result_b) = tokio::join!(
            lock_a.update(record("a", 3, now)),
            lock_b.update(record("b", 3, now)),
        );

        let winners = [("a", &result_a), ("b", &result_b)]
            .into_iter()
            .filter(|(_, result)| result.is_ok())
            .map(|(identity, _)| identity)
            .collect::<Vec<_>>();
        assert_eq!(winners.len(), 1, "a: {result_a:?}, b: {result_b:?}");

        let loser = [&result_a, &result_b]
            .into_iter()
            .find_map(|result| result.as_ref().err())
            .expect("one candidate must lose");
        assert!(
            matches!(loser, Error::Conflict { reason, .. } if reason == "there is a new leader"),
            "unexpected loser error: {loser}"
        );

        // A third party observes the winner.
        let (current, _) = lock_a.get().await.unwrap();
        assert_eq!(current.holder_identity, winners[0]);
    }

    #[tokio::test]
    async fn identity_and_describe() {
        let server = MockServer::start().await;
        InMemoryGist::mount(&server, "g1", "").await;
        let lock = lock_against(&server, "candidate-1").await;
        assert_eq!(lock.identity(), "candidate-1");
        assert_eq!(lock.describe(), "gist lock: candidate-1");
        lock.record_event("noop");
    }
}
