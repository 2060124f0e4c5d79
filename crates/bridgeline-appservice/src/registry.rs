//! Registry of destinations, built once at startup.
//!
//! The consumer and every worker share the same [`Registry`] through an
//! `Arc`. Nothing in it changes after construction except each worker's own
//! [`WorkerState`] and the wake counters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bridgeline_common::{ApplicationService, ConfigError};
use bridgeline_db::{DestinationQueue, QueueDatabase};
use serde::Serialize;

use crate::wake::WakeSignal;

/// What a worker is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    Idle,
    Draining,
    Sending,
    Backoff,
    Stopped,
}

#[derive(Debug)]
struct StateInner {
    phase: WorkerPhase,
    in_flight_txn: Option<u64>,
    consecutive_failures: u32,
    current_backoff: Option<Duration>,
}

/// Mutable per-worker bookkeeping. Written by the worker only.
#[derive(Debug)]
pub struct WorkerState {
    inner: Mutex<StateInner>,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self {
            inner: Mutex::new(StateInner {
                phase: WorkerPhase::Idle,
                in_flight_txn: None,
                consecutive_failures: 0,
                current_backoff: None,
            }),
        }
    }
}

impl WorkerState {
    fn lock(&self) -> MutexGuard<'_, StateInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_phase(&self, phase: WorkerPhase) {
        self.lock().phase = phase;
    }

    pub(crate) fn sending(&self, txn_id: u64) {
        let mut s = self.lock();
        s.phase = WorkerPhase::Sending;
        s.in_flight_txn = Some(txn_id);
    }

    /// Record one more consecutive failure; returns the attempt count.
    pub(crate) fn failed(&self, backoff: Duration) -> u32 {
        let mut s = self.lock();
        s.phase = WorkerPhase::Backoff;
        s.consecutive_failures += 1;
        s.current_backoff = Some(backoff);
        s.consecutive_failures
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub(crate) fn acknowledged(&self) {
        let mut s = self.lock();
        s.phase = WorkerPhase::Draining;
        s.in_flight_txn = None;
        s.consecutive_failures = 0;
        s.current_backoff = None;
    }
}

/// Read-only snapshot of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub appservice_id: String,
    pub phase: WorkerPhase,
    pub pending_signals: u64,
    pub in_flight_txn: Option<u64>,
    pub consecutive_failures: u32,
    pub current_backoff_ms: Option<u64>,
}

/// One application service together with its queue and worker plumbing.
pub struct Destination {
    pub service: Arc<ApplicationService>,
    pub queue: DestinationQueue,
    pub wake: WakeSignal,
    pub state: WorkerState,
}

impl Destination {
    pub fn id(&self) -> &str {
        &self.service.id
    }

    pub fn status(&self) -> WorkerStatus {
        let s = self.state.lock();
        WorkerStatus {
            appservice_id: self.service.id.clone(),
            phase: s.phase,
            pending_signals: self.wake.pending(),
            in_flight_txn: s.in_flight_txn,
            consecutive_failures: s.consecutive_failures,
            current_backoff_ms: s.current_backoff.map(|d| d.as_millis() as u64),
        }
    }
}

/// All destinations, keyed by application service ID.
pub struct Registry {
    destinations: Vec<Arc<Destination>>,
    by_id: HashMap<String, usize>,
}

impl Registry {
    /// One destination per service, in the given order. Duplicate IDs are rejected.
    pub fn new(services: Vec<ApplicationService>, db: &QueueDatabase) -> Result<Self, ConfigError> {
        let mut destinations = Vec::with_capacity(services.len());
        let mut by_id = HashMap::with_capacity(services.len());

        for service in services {
            if by_id.contains_key(&service.id) {
                return Err(ConfigError::DuplicateAppService(service.id));
            }
            by_id.insert(service.id.clone(), destinations.len());
            destinations.push(Arc::new(Destination {
                queue: db.queue(&service.id),
                service: Arc::new(service),
                wake: WakeSignal::new(),
                state: WorkerState::default(),
            }));
        }

        Ok(Self { destinations, by_id })
    }

    pub fn get(&self, appservice_id: &str) -> Option<&Arc<Destination>> {
        self.by_id.get(appservice_id).map(|&i| &self.destinations[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Destination>> {
        self.destinations.iter()
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Whether any destination has `aliases` namespaces.
    pub fn wants_aliases(&self) -> bool {
        self.destinations.iter().any(|d| d.service.wants_aliases())
    }

    pub fn statuses(&self) -> Vec<WorkerStatus> {
        self.destinations.iter().map(|d| d.status()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{open_db, service_for_users};

    #[tokio::test]
    async fn keeps_configured_order_and_rejects_duplicates() {
        let (_dir, db) = open_db().await;
        let registry = Registry::new(
            vec![
                service_for_users("slack", "http://localhost:1", "@slack_.*"),
                service_for_users("irc", "http://localhost:2", "@irc_.*"),
            ],
            &db,
        )
        .unwrap();
        let ids: Vec<_> = registry.iter().map(|d| d.id()).collect();
        assert_eq!(ids, ["slack", "irc"]);
        assert_eq!(registry.get("irc").unwrap().queue.appservice_id(), "irc");
        assert!(registry.get("matrix").is_none());

        let dup = Registry::new(
            vec![
                service_for_users("irc", "http://localhost:1", "@a"),
                service_for_users("irc", "http://localhost:2", "@b"),
            ],
            &db,
        );
        assert!(matches!(dup, Err(ConfigError::DuplicateAppService(id)) if id == "irc"));
    }

    #[tokio::test]
    async fn status_reflects_worker_state() {
        let (_dir, db) = open_db().await;
        let registry =
            Registry::new(vec![service_for_users("irc", "http://localhost:1", "@irc_.*")], &db)
                .unwrap();
        let dest = registry.get("irc").unwrap();

        let status = dest.status();
        assert_eq!(status.phase, WorkerPhase::Idle);
        assert_eq!(status.pending_signals, 1);

        dest.state.sending(7);
        assert_eq!(dest.state.failed(Duration::from_millis(500)), 1);
        let status = dest.status();
        assert_eq!(status.phase, WorkerPhase::Backoff);
        assert_eq!(status.in_flight_txn, Some(7));
        assert_eq!(status.current_backoff_ms, Some(500));

        dest.state.acknowledged();
        let status = dest.status();
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.in_flight_txn, None);
    }

    #[tokio::test]
    async fn statuses_cover_every_destination_in_order() {
        let (_dir, db) = open_db().await;
        let registry = Registry::new(
            vec![
                service_for_users("slack", "http://localhost:1", "@slack_.*"),
                service_for_users("irc", "http://localhost:2", "@irc_.*"),
            ],
            &db,
        )
        .unwrap();
        registry.get("irc").unwrap().state.failed(Duration::from_millis(250));

        let statuses = registry.statuses();
        let ids: Vec<_> = statuses.iter().map(|s| s.appservice_id.as_str()).collect();
        assert_eq!(ids, ["slack", "irc"]);
        assert_eq!(statuses[0].phase, WorkerPhase::Idle);
        assert_eq!(statuses[1].consecutive_failures, 1);
    }
}
