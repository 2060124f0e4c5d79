//! Per-destination delivery worker.
//!
//! One long-lived task per application service. It sleeps on the
//! destination's [`WakeSignal`](crate::wake::WakeSignal), drains the queue in
//! transactions of at most `max_transaction_events`, and retries a failed
//! transaction forever with the same ID and body. Exactly one push is
//! outstanding per destination at any time.

use std::sync::Arc;
use std::time::Duration;

use bridgeline_common::config::WorkerConfig;
use bridgeline_db::StoredTransaction;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::client::TransactionSender;
use crate::registry::{Destination, WorkerPhase};
use crate::types::TransactionBody;

/// Tunables shared by every worker.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub max_transaction_events: usize,
    pub backoff: Backoff,
}

impl WorkerSettings {
    pub fn from_config(cfg: &WorkerConfig) -> Self {
        Self {
            max_transaction_events: cfg.max_transaction_events.max(1),
            backoff: Backoff::from_millis(cfg.backoff_base_ms, cfg.backoff_max_ms),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self { max_transaction_events: 50, backoff: Backoff::from_millis(1_000, 64_000) }
    }
}

pub struct Worker {
    dest: Arc<Destination>,
    sender: Arc<dyn TransactionSender>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        dest: Arc<Destination>,
        sender: Arc<dyn TransactionSender>,
        settings: WorkerSettings,
    ) -> Self {
        Self { dest, sender, settings }
    }

    /// Run until `cancel` fires. An unacknowledged transaction stays
    /// persisted and is resent by the next run.
    pub async fn run(self, cancel: CancellationToken) {
        info!(appservice = %self.dest.id(), "Worker started");

        loop {
            self.dest.state.set_phase(WorkerPhase::Idle);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                n = self.dest.wake.wait() => {
                    debug!(appservice = %self.dest.id(), signals = n, "Worker woken");
                }
            }
            if !self.drain(&cancel).await {
                break;
            }
        }

        self.dest.state.set_phase(WorkerPhase::Stopped);
        info!(appservice = %self.dest.id(), "Worker stopped");
    }

    /// Push transactions until the queue is empty. `false` if cancelled.
    async fn drain(&self, cancel: &CancellationToken) -> bool {
        self.dest.state.set_phase(WorkerPhase::Draining);
        let queue = &self.dest.queue;

        loop {
            let txn = match queue
                .begin_transaction(self.settings.max_transaction_events, TransactionBody::encode)
                .await
            {
                Ok(Some(txn)) => txn,
                Ok(None) => return true,
                Err(e) => {
                    error!(appservice = %self.dest.id(), error = %e, "Failed to read delivery queue");
                    if !self.back_off(cancel).await {
                        return false;
                    }
                    continue;
                }
            };

            if !self.deliver(&txn, cancel).await {
                return false;
            }
        }
    }

    /// Push `txn` until it is acknowledged. `false` if cancelled.
    async fn deliver(&self, txn: &StoredTransaction, cancel: &CancellationToken) -> bool {
        let id = self.dest.id();
        loop {
            self.dest.state.sending(txn.txn_id);

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                r = self.sender.send(&self.dest.service, txn) => r,
            };

            match result {
                Ok(()) => {
                    if let Err(e) = self.dest.queue.complete_transaction(txn).await {
                        // Not acknowledged locally; the next drain resends it.
                        error!(appservice = %id, txn_id = txn.txn_id, error = %e, "Failed to record acknowledgement");
                        return self.back_off(cancel).await;
                    }
                    self.dest.state.acknowledged();
                    debug!(appservice = %id, txn_id = txn.txn_id, events = txn.event_count, "Transaction acknowledged");
                    return true;
                }
                Err(e) => {
                    let attempt = self.dest.state.attempts() + 1;
                    warn!(appservice = %id, txn_id = txn.txn_id, attempt, error = %e, "Transaction push failed");
                    if !self.back_off(cancel).await {
                        return false;
                    }
                }
            }
        }
    }

    /// Sleep for the next backoff step. `false` if cancelled meanwhile.
    async fn back_off(&self, cancel: &CancellationToken) -> bool {
        let attempt = self.dest.state.attempts() + 1;
        let delay = self.settings.backoff.delay(attempt);
        self.dest.state.failed(delay);
        debug!(appservice = %self.dest.id(), attempt, delay_ms = delay.as_millis() as u64, "Backing off");
        sleep_or_cancel(delay, cancel).await
    }
}

async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
