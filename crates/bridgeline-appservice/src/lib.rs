//! # bridgeline-appservice
//!
//! Ordered, at-least-once fan-out of room events to Matrix application
//! services (bridges).
//!
//! ## Architecture
//!
//! ```text
//!  core event log ──► Consumer ──► matcher ──► DestinationQueue (per service, SQLite)
//!                                                   │ wake
//!                                                   ▼
//!                                   Worker ──► PUT {url}/transactions/{txnId}
//!                                      ▲                 │
//!                                      └──── ack ◄───────┘  (cursor advance)
//! ```
//!
//! - **Consumer** (`consumer.rs`): single reader of the core log; enqueues each
//!   event for every interested service, then commits the stream position.
//! - **Matcher** (`matcher.rs`): users / rooms / aliases namespace checks.
//! - **Worker** (`worker.rs`): one per service; batches, pushes, retries with
//!   backoff. A slow or dead bridge only ever delays its own queue.
//! - **Wake signal** (`wake.rs`): counter + `Notify` between the two.
//! - **Runtime** (`runtime.rs`): starts, cancels, and joins all of the above.
//! - **Provisioning** (`provisioning.rs`): masquerade account per service.

pub mod aliases;
pub mod backoff;
pub mod client;
pub mod consumer;
pub mod error;
pub mod matcher;
pub mod provisioning;
pub mod registry;
pub mod runtime;
pub mod source;
pub mod types;
pub mod wake;
pub mod worker;

pub use aliases::{AliasResolver, RedisAliases, StaticAliases};
pub use client::{HttpTransactionSender, TransactionSender};
pub use consumer::Consumer;
pub use error::{ConsumerError, DeliveryError, ProvisionError, SourceError};
pub use provisioning::{AccountStore, Provisioned};
pub use registry::{Destination, Registry, WorkerPhase, WorkerStatus};
pub use runtime::Runtime;
pub use source::{ChannelEventSource, EventSource, RedisEventSource};
pub use worker::{Worker, WorkerSettings};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::extract::{Path, State};
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::routing::put;
    use axum::Router;
    use bridgeline_common::config::{
        AppServiceRegistration, NamespaceRegistration, NamespaceRegistrations,
    };
    use bridgeline_common::ApplicationService;
    use bridgeline_db::{DestinationQueue, QueueDatabase};

    pub async fn open_db() -> (tempfile::TempDir, QueueDatabase) {
        let dir = tempfile::tempdir().unwrap();
        let db = QueueDatabase::connect_file(&dir.path().join("queue.db")).await.unwrap();
        db.migrate().await.unwrap();
        (dir, db)
    }

    pub fn service_with(id: &str, url: &str, namespaces: NamespaceRegistrations) -> ApplicationService {
        ApplicationService::from_registration(&AppServiceRegistration {
            id: id.into(),
            url: url.into(),
            hs_token: format!("hs_{id}"),
            as_token: format!("as_{id}"),
            sender_localpart: format!("{id}_bot"),
            namespaces,
        })
        .unwrap()
    }

    pub fn service_for_users(id: &str, url: &str, regex: &str) -> ApplicationService {
        let namespaces = NamespaceRegistrations {
            users: vec![NamespaceRegistration { regex: regex.into(), exclusive: false }],
            ..Default::default()
        };
        service_with(id, url, namespaces)
    }

    /// Poll `cond` until it holds; panics after ten seconds.
    pub async fn eventually(cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    /// Wait until every queued event of `queue` is acknowledged.
    pub async fn until_drained(queue: &DestinationQueue) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !queue.is_empty().await.unwrap() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("queue not drained in time");
    }

    /// One request seen by a [`FakeBridge`].
    #[derive(Debug, Clone)]
    pub struct Received {
        pub txn_id: String,
        pub authorization: Option<String>,
        pub body: String,
    }

    impl Received {
        pub fn event_ids(&self) -> Vec<String> {
            let body: serde_json::Value = serde_json::from_str(&self.body).unwrap();
            body["events"]
                .as_array()
                .unwrap()
                .iter()
                .map(|e| e["event_id"].as_str().unwrap().to_owned())
                .collect()
        }
    }

    #[derive(Clone)]
    struct BridgeState {
        received: Arc<Mutex<Vec<Received>>>,
        failures_left: Arc<AtomicUsize>,
    }

    /// A local bridge that records every push and answers 500 to the first
    /// `failures` of them.
    pub struct FakeBridge {
        pub url: String,
        received: Arc<Mutex<Vec<Received>>>,
    }

    impl FakeBridge {
        pub async fn spawn(failures: usize) -> Self {
            let state = BridgeState {
                received: Arc::new(Mutex::new(Vec::new())),
                failures_left: Arc::new(AtomicUsize::new(failures)),
            };
            let received = state.received.clone();

            let app = Router::new()
                .route("/transactions/{txn_id}", put(put_transaction))
                .with_state(state);
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });

            Self { url: format!("http://{addr}"), received }
        }

        pub fn received(&self) -> Vec<Received> {
            self.received.lock().unwrap().clone()
        }
    }

    async fn put_transaction(
        State(state): State<BridgeState>,
        Path(txn_id): Path<String>,
        headers: HeaderMap,
        body: String,
    ) -> StatusCode {
        let authorization = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        state.received.lock().unwrap().push(Received { txn_id, authorization, body });

        let failed = state
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed { StatusCode::INTERNAL_SERVER_ERROR } else { StatusCode::OK }
    }
}
