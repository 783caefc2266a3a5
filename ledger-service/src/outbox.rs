//! Delivery of committed balance deltas to the account service
//!
//! A pending delta is written in the same local transaction as its ledger
//! entry, so it exists exactly when the entry does. Delivery happens after
//! commit and carries the entry ID as idempotency key. Retryable failures
//! are repeated until the account service confirms the delta. A delta the
//! account service rejects [`RetryPolicy::max_rejections`] times is parked
//! and left for an operator. A delta that was applied but not marked
//! delivered is sent again and deduplicated by the responder.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::error::Result;
use common::model::account::Account;
use common::model::ledger::PendingDelta;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::client::AccountClient;
use crate::config::OutboxConfig;
use crate::repository::LedgerRepository;
use crate::retry::RetryPolicy;

/// Delivers one pending delta and records the outcome in the outbox
pub struct OutboxDelivery {
    ledger: Arc<dyn LedgerRepository>,
    client: AccountClient,
    retry: RetryPolicy,
}

impl OutboxDelivery {
    /// Create a delivery over the ledger outbox and the account client
    pub fn new(ledger: Arc<dyn LedgerRepository>, client: AccountClient, retry: RetryPolicy) -> Self {
        Self { ledger, client, retry }
    }

    /// Send a delta once. On success it is marked delivered; on failure the
    /// attempt is recorded and the next one scheduled, or the delta is
    /// parked once its rejections reach the bound.
    pub async fn deliver(&self, delta: &PendingDelta) -> Result<Account> {
        let key = delta.idempotency_key();

        match self.client.apply_delta(&delta.email, delta.amount, Some(&key)).await {
            Ok(account) => {
                if let Err(e) = self.ledger.mark_delivered(delta.id).await {
                    warn!("Delta {} applied but not marked delivered: {}", delta.id, e);
                }
                info!("Delivered delta {} ({} to {})", delta.id, delta.amount, delta.email);
                Ok(account)
            }
            Err(e) => {
                let failed_attempts = delta.attempts + 1;

                if self.retry.should_park(failed_attempts, e.is_retryable()) {
                    error!(
                        "Delivery of delta {} ({} to {}) rejected {} times, parking it: {}",
                        delta.id, delta.amount, delta.email, failed_attempts, e
                    );
                    if let Err(park_err) = self.ledger.park(delta.id, &e.to_string()).await {
                        warn!("Failed to park delta {}: {}", delta.id, park_err);
                    }
                    return Err(e);
                }

                let delay = self.retry.delay_for_attempt(failed_attempts);
                let next_attempt_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

                if e.is_retryable() {
                    warn!("Delivery of delta {} failed (attempt {}), retrying in {:?}: {}", delta.id, failed_attempts, delay, e);
                } else {
                    error!("Delivery of delta {} rejected (attempt {}): {}", delta.id, failed_attempts, e);
                }

                if let Err(record_err) = self.ledger
                    .record_failed_attempt(delta.id, &e.to_string(), next_attempt_at)
                    .await
                {
                    warn!("Failed to record delivery attempt of {}: {}", delta.id, record_err);
                }
                Err(e)
            }
        }
    }
}

/// Outcome of one outbox pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Deltas confirmed by the account service
    pub delivered: usize,
    /// Deltas that failed and were rescheduled
    pub failed: usize,
}

/// Background worker that redelivers pending deltas
pub struct OutboxWorker {
    ledger: Arc<dyn LedgerRepository>,
    delivery: Arc<OutboxDelivery>,
    poll_interval: Duration,
    batch_size: usize,
}

impl OutboxWorker {
    /// Create a worker
    pub fn new(ledger: Arc<dyn LedgerRepository>, delivery: Arc<OutboxDelivery>, config: &OutboxConfig) -> Self {
        Self {
            ledger,
            delivery,
            poll_interval: config.poll_interval.max(Duration::from_millis(1)),
            batch_size: config.batch_size.max(1),
        }
    }

    /// Deliver every delta that is due, once
    pub async fn drain_once(&self) -> Result<DrainReport> {
        let pending = self.ledger.pending_deltas(self.batch_size).await?;
        let mut report = DrainReport::default();

        for delta in &pending {
            match self.delivery.deliver(delta).await {
                Ok(_) => report.delivered += 1,
                Err(_) => report.failed += 1,
            }
        }

        if !pending.is_empty() {
            debug!("Outbox pass: {} delivered, {} failed", report.delivered, report.failed);
        }
        Ok(report)
    }

    /// Poll the outbox until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Outbox worker started (poll interval {:?}, batch size {})", self.poll_interval, self.batch_size);
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.drain_once().await {
                        error!("Outbox pass failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Outbox worker stopped");
    }
}
