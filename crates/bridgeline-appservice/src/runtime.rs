//! Supervised lifecycle of the consumer and the workers.
//!
//! [`Runtime::start`] spawns one consumer task and one worker task per
//! destination, each under its own child of a root [`CancellationToken`].
//! [`Runtime::shutdown`] stops the consumer first, so nothing new is
//! enqueued, then the workers, and joins every task before returning.

use std::sync::Arc;

use bridgeline_db::PositionStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::aliases::AliasResolver;
use crate::client::TransactionSender;
use crate::consumer::Consumer;
use crate::error::ConsumerError;
use crate::registry::Registry;
use crate::source::EventSource;
use crate::worker::{Worker, WorkerSettings};

struct WorkerTask {
    appservice_id: String,
    handle: JoinHandle<()>,
}

pub struct Runtime {
    registry: Arc<Registry>,
    root: CancellationToken,
    consumer_cancel: CancellationToken,
    consumer: Option<JoinHandle<Result<(), ConsumerError>>>,
    consumer_exit: Option<Result<(), ConsumerError>>,
    workers: Vec<WorkerTask>,
}

impl Runtime {
    /// Spawn the consumer and every worker. Must be called inside a tokio runtime.
    pub fn start(
        registry: Arc<Registry>,
        source: Box<dyn EventSource>,
        aliases: Arc<dyn AliasResolver>,
        positions: PositionStore,
        sender: Arc<dyn TransactionSender>,
        settings: WorkerSettings,
    ) -> Self {
        let root = CancellationToken::new();

        let workers = registry
            .iter()
            .map(|dest| {
                let worker = Worker::new(dest.clone(), sender.clone(), settings);
                WorkerTask {
                    appservice_id: dest.id().to_owned(),
                    handle: tokio::spawn(worker.run(root.child_token())),
                }
            })
            .collect::<Vec<_>>();

        let consumer_cancel = root.child_token();
        let consumer = Consumer::new(registry.clone(), source, aliases, positions);
        let consumer = tokio::spawn(consumer.run(consumer_cancel.clone()));

        info!(appservices = workers.len(), "Application service runtime started");
        Self {
            registry,
            root,
            consumer_cancel,
            consumer: Some(consumer),
            consumer_exit: None,
            workers,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Resolves once the consumer has exited on its own (stream closed or
    /// fatal error). Cancel-safe; returns immediately if it already exited.
    pub async fn wait_consumer(&mut self) {
        if let Some(handle) = self.consumer.as_mut() {
            let result = handle.await;
            self.consumer = None;
            self.consumer_exit = Some(result.map_err(ConsumerError::from).and_then(|r| r));
        }
    }

    /// Stop the consumer, then the workers, and join them all.
    ///
    /// Returns the consumer's terminal result. Queued events and in-flight
    /// transactions stay on disk for the next start.
    pub async fn shutdown(mut self) -> Result<(), ConsumerError> {
        info!("Shutting down application service runtime");

        self.consumer_cancel.cancel();
        self.wait_consumer().await;

        self.root.cancel();
        for task in self.workers.drain(..) {
            if let Err(e) = task.handle.await {
                error!(appservice = %task.appservice_id, error = %e, "Worker task aborted");
            }
        }

        info!("Application service runtime stopped");
        self.consumer_exit.take().unwrap_or(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aliases::StaticAliases;
    use crate::backoff::Backoff;
    use crate::client::HttpTransactionSender;
    use crate::error::SourceError;
    use crate::source::ChannelEventSource;
    use crate::test_support::{eventually, open_db, service_for_users, until_drained, FakeBridge};
    use async_trait::async_trait;
    use bridgeline_common::{ApplicationService, Event};
    use bridgeline_db::QueueDatabase;
    use std::time::Duration;

    fn fast() -> WorkerSettings {
        WorkerSettings { max_transaction_events: 10, backoff: Backoff::from_millis(5, 20) }
    }

    fn start(
        db: &QueueDatabase,
        services: Vec<ApplicationService>,
        source: Box<dyn EventSource>,
    ) -> Runtime {
        let registry = Arc::new(Registry::new(services, db).unwrap());
        let sender = Arc::new(HttpTransactionSender::new(Duration::from_secs(5)).unwrap());
        Runtime::start(
            registry,
            source,
            Arc::new(StaticAliases::new()),
            db.positions(),
            sender,
            fast(),
        )
    }

    fn ev(id: &str, sender: &str, pos: &str) -> Event {
        Event::new(id, "!r:example", sender, "m.room.message")
            .with_content(serde_json::json!({"body": id}))
            .with_stream_position(pos)
    }

    #[tokio::test]
    async fn bot_events_are_batched_retried_and_acknowledged() {
        let (_dir, db) = open_db().await;
        let bridge = FakeBridge::spawn(1).await;
        let services = vec![service_for_users("d", &bridge.url, "@bot_*")];

        // Fan out before any worker runs so all matches land in one batch.
        {
            let registry = Arc::new(Registry::new(services.clone(), &db).unwrap());
            let (_tx, source) = ChannelEventSource::channel("core", 1);
            let consumer = Consumer::new(
                registry,
                Box::new(source),
                Arc::new(StaticAliases::new()),
                db.positions(),
            );
            consumer.process("core", &ev("E1", "@bot_1:example", "1")).await.unwrap();
            consumer.process("core", &ev("E2", "@alice:example", "2")).await.unwrap();
            consumer.process("core", &ev("E3", "@bot_2:example", "3")).await.unwrap();
        }
        let q = db.queue("d");
        let e3_seq = q.peek_batch(10).await.unwrap()[1].seq;

        let (_tx, source) = ChannelEventSource::channel("core", 1);
        let runtime = start(&db, services, Box::new(source));
        until_drained(&q).await;
        runtime.shutdown().await.unwrap();

        let received = bridge.received();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].event_ids(), ["E1", "E3"]);
        assert_eq!(received[0].txn_id, received[1].txn_id);
        assert_eq!(received[0].body, received[1].body);
        assert_eq!(q.cursor().await.unwrap(), e3_seq);
    }

    #[tokio::test]
    async fn failing_bridge_does_not_stall_others() {
        let (_dir, db) = open_db().await;
        let down = FakeBridge::spawn(usize::MAX).await;
        let up = FakeBridge::spawn(0).await;
        let services = vec![
            service_for_users("down", &down.url, "@.*"),
            service_for_users("up", &up.url, "@.*"),
        ];

        let (tx, source) = ChannelEventSource::channel("core", 16);
        let runtime = start(&db, services, Box::new(source));
        for i in 1..=5 {
            tx.send(ev(&format!("$e{i}"), "@alice:example", &i.to_string())).await.unwrap();
        }

        eventually(|| {
            up.received().iter().map(|r| r.event_ids().len()).sum::<usize>() == 5
        })
        .await;
        let delivered: Vec<String> =
            up.received().iter().flat_map(|r| r.event_ids()).collect();
        assert_eq!(delivered, ["$e1", "$e2", "$e3", "$e4", "$e5"]);

        let down_dest = runtime.registry().get("down").unwrap().clone();
        eventually(|| down_dest.status().consecutive_failures >= 2).await;

        drop(tx);
        runtime.shutdown().await.unwrap();
        assert_eq!(db.queue("down").len().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn restart_resends_same_transaction() {
        let (_dir, db) = open_db().await;
        let down = FakeBridge::spawn(usize::MAX).await;

        let (tx, source) = ChannelEventSource::channel("core", 4);
        let runtime = start(&db, vec![service_for_users("irc", &down.url, "@irc_.*")], Box::new(source));
        tx.send(ev("$1", "@irc_a:example", "1")).await.unwrap();
        eventually(|| !down.received().is_empty()).await;
        runtime.shutdown().await.unwrap();
        let first = down.received()[0].clone();

        // Same service, now reachable at a new address.
        let up = FakeBridge::spawn(0).await;
        let (_tx, source) = ChannelEventSource::channel("core", 4);
        let runtime = start(&db, vec![service_for_users("irc", &up.url, "@irc_.*")], Box::new(source));
        until_drained(&db.queue("irc")).await;
        runtime.shutdown().await.unwrap();

        let resent = &up.received()[0];
        assert_eq!(resent.txn_id, first.txn_id);
        assert_eq!(resent.body, first.body);
        assert_eq!(db.queue("irc").last_txn_id().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn wait_consumer_resolves_when_stream_closes() {
        let (_dir, db) = open_db().await;
        let (tx, source) = ChannelEventSource::channel("core", 1);
        let mut runtime = start(&db, vec![], Box::new(source));
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), runtime.wait_consumer()).await.unwrap();
        runtime.shutdown().await.unwrap();
    }

    struct BrokenSource;

    #[async_trait]
    impl EventSource for BrokenSource {
        fn stream_name(&self) -> &str {
            "core"
        }

        async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
            Err(SourceError::Malformed { id: "1-0".into(), reason: "boom".into() })
        }
    }

    #[tokio::test]
    async fn shutdown_reports_fatal_consumer_error() {
        let (_dir, db) = open_db().await;
        let mut runtime = start(&db, vec![], Box::new(BrokenSource));
        runtime.wait_consumer().await;
        let err = runtime.shutdown().await.unwrap_err();
        assert!(matches!(err, ConsumerError::Source(SourceError::Malformed { .. })));
    }
}
