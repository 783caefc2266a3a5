//! Credit and transfer orchestration
//!
//! The coordinator owns the local transaction around ledger writes and
//! drives the balance changes in the account service over the bus. It owns
//! neither the ledger rows nor the balances.
//!
//! Amounts with more than four decimal places are rejected before anything
//! is written, so the ledger and the balances store the same value.
//!
//! In [`DeliveryMode::Synchronous`] the bus requests are made while the local
//! transaction is open and the transaction commits only when every reply
//! succeeded. These requests carry no idempotency key; each is sent once. A failure after a delta landed rolls back the ledger rows but
//! leaves the delta applied; such cases are logged at `warn` with the
//! [`TransferState`] that was reached.
//!
//! In [`DeliveryMode::Outbox`] the ledger rows and one pending delta per leg
//! commit together before any bus request. Delivery is attempted once right
//! away and otherwise left to the [`OutboxWorker`]. A sender's outstanding
//! debits count against its funds until they are delivered.

use std::fmt;
use std::sync::Arc;

use common::bus::MessageBus;
use common::db::DBTransaction;
use common::decimal::{precision, Amount};
use common::error::{Error, Result};
use common::model::account::Account;
use common::model::ledger::{LedgerEntry, PendingDelta};
use tracing::{error, info, warn};

use crate::client::AccountClient;
use crate::config::{CoordinatorConfig, DeliveryMode, OutboxConfig};
use crate::outbox::{OutboxDelivery, OutboxWorker};
use crate::repository::{InMemoryLedgerRepository, LedgerRepository, PostgresLedgerRepository};

/// Progress of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Local transaction opened
    Opened,
    /// Both legs appended, not yet committed
    LedgerWritten,
    /// Sender debit applied by the account service
    DebitConfirmed,
    /// Recipient credit applied by the account service
    CreditConfirmed,
    /// Local transaction committed
    Committed,
    /// Local transaction rolled back
    RolledBack,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferState::Opened => "opened",
            TransferState::LedgerWritten => "ledger_written",
            TransferState::DebitConfirmed => "debit_confirmed",
            TransferState::CreditConfirmed => "credit_confirmed",
            TransferState::Committed => "committed",
            TransferState::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// Whether the balance change has reached the account service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Applied; `balance` is the balance of the credited account, or of the
    /// sender for a transfer
    Applied {
        /// Balance after the change
        balance: Amount,
    },
    /// Recorded in the outbox, delivery still outstanding
    Pending,
}

impl Settlement {
    /// Whether the balance change has been applied
    pub fn is_applied(&self) -> bool {
        matches!(self, Settlement::Applied { .. })
    }
}

/// Result of a credit
#[derive(Debug, Clone)]
pub struct CreditReceipt {
    /// The committed ledger entry
    pub entry: LedgerEntry,
    /// Delivery status of the delta
    pub settlement: Settlement,
}

/// Result of a transfer
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    /// Debit leg on the sender
    pub debit: LedgerEntry,
    /// Credit leg on the recipient
    pub credit: LedgerEntry,
    /// Delivery status of both deltas
    pub settlement: Settlement,
    /// Final state of the transfer
    pub state: TransferState,
}

/// Repository Type
pub enum RepositoryType {
    /// In-memory repository
    InMemory,
    /// PostgreSQL repository
    Postgres(Option<String>),
}

/// Orchestrates credits and transfers across the ledger and the account service
pub struct LedgerCoordinator {
    ledger: Arc<dyn LedgerRepository>,
    client: AccountClient,
    delivery: Arc<OutboxDelivery>,
    config: CoordinatorConfig,
}

impl LedgerCoordinator {
    /// Create a coordinator over a ledger repository and the bus
    pub fn new(ledger: Arc<dyn LedgerRepository>, bus: Arc<dyn MessageBus>, config: CoordinatorConfig) -> Self {
        let client = AccountClient::new(bus, config.request_timeout);
        let delivery = Arc::new(OutboxDelivery::new(ledger.clone(), client.clone(), config.retry.clone()));

        Self { ledger, client, delivery, config }
    }

    /// Create a coordinator with a specific repository type
    pub async fn with_repository(
        repo_type: RepositoryType,
        bus: Arc<dyn MessageBus>,
        config: CoordinatorConfig,
    ) -> Result<Self> {
        let ledger: Arc<dyn LedgerRepository> = match repo_type {
            RepositoryType::InMemory => Arc::new(InMemoryLedgerRepository::new()),
            RepositoryType::Postgres(database_url) => Arc::new(PostgresLedgerRepository::new(database_url).await?),
        };

        Ok(Self::new(ledger, bus, config))
    }

    /// Coordinator settings
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// The ledger repository
    pub fn ledger(&self) -> Arc<dyn LedgerRepository> {
        self.ledger.clone()
    }

    /// A worker redelivering this coordinator's outbox
    pub fn outbox_worker(&self, config: &OutboxConfig) -> OutboxWorker {
        OutboxWorker::new(self.ledger.clone(), self.delivery.clone(), config)
    }

    /// Add a signed `amount` to the balance of `email` and record it in the ledger
    pub async fn credit(&self, email: &str, amount: Amount) -> Result<CreditReceipt> {
        if email.trim().is_empty() {
            return Err(Error::ValidationError("email is required".to_string()));
        }
        let amount = precision::validate_amount(amount)?;
        info!("Credit of {} to {}", amount, email);

        match self.config.delivery {
            DeliveryMode::Synchronous => self.credit_synchronous(email, amount).await,
            DeliveryMode::Outbox => self.credit_outbox(email, amount).await,
        }
    }

    /// Move `amount` from `from` to `to`, recording both legs in the ledger
    pub async fn transfer(&self, from: &str, to: &str, amount: Amount) -> Result<TransferReceipt> {
        if from.trim().is_empty() || to.trim().is_empty() {
            return Err(Error::ValidationError("both accounts are required".to_string()));
        }
        if from == to {
            return Err(Error::ValidationError("cannot transfer to the same account".to_string()));
        }
        let amount = precision::validate_amount(amount)?;
        if amount < Amount::ZERO && self.config.reject_negative_transfers {
            return Err(Error::ValidationError(format!("transfer amount must not be negative: {}", amount)));
        }
        info!("Transfer of {} from {} to {}", amount, from, to);

        match self.config.delivery {
            DeliveryMode::Synchronous => self.transfer_synchronous(from, to, amount).await,
            DeliveryMode::Outbox => self.transfer_outbox(from, to, amount).await,
        }
    }

    async fn credit_synchronous(&self, email: &str, amount: Amount) -> Result<CreditReceipt> {
        let mut tx = self.ledger.begin().await?;

        let entry = match self.write_credit(&mut tx, email, amount).await {
            Ok(entry) => entry,
            Err(e) => return Err(self.roll_back(tx, e).await),
        };

        let account = match self.client.apply_delta(email, amount, None).await {
            Ok(account) => account,
            Err(e) => {
                if matches!(e, Error::UpstreamTimeout(_)) {
                    warn!("Credit {} timed out; the delta of {} to {} may still be applied", entry.id, amount, email);
                }
                return Err(self.roll_back(tx, e).await);
            }
        };

        if let Err(e) = tx.commit().await {
            warn!(
                "Credit {} applied {} to {} but its ledger entry was not committed: {}",
                entry.id, amount, email, e
            );
            return Err(e);
        }

        info!("Credit {} committed, {} balance now {}", entry.id, email, account.balance);
        Ok(CreditReceipt {
            entry,
            settlement: Settlement::Applied { balance: account.balance },
        })
    }

    async fn credit_outbox(&self, email: &str, amount: Amount) -> Result<CreditReceipt> {
        let mut tx = self.ledger.begin().await?;

        let entry = match self.write_credit(&mut tx, email, amount).await {
            Ok(entry) => entry,
            Err(e) => return Err(self.roll_back(tx, e).await),
        };
        let delta = PendingDelta::for_entry(&entry, email);
        if let Err(e) = self.ledger.enqueue_delta(&mut tx, &delta).await {
            return Err(self.roll_back(tx, e).await);
        }
        tx.commit().await?;
        info!("Credit {} committed with its pending delta", entry.id);

        let settlement = match self.delivery.deliver(&delta).await {
            Ok(account) => Settlement::Applied { balance: account.balance },
            Err(_) => Settlement::Pending,
        };
        Ok(CreditReceipt { entry, settlement })
    }

    async fn transfer_synchronous(&self, from: &str, to: &str, amount: Amount) -> Result<TransferReceipt> {
        let mut state = TransferState::Opened;
        let mut tx = self.ledger.begin().await?;

        let (debit, credit) = match self.write_transfer(&mut tx, from, to, amount).await {
            Ok(legs) => legs,
            Err(e) => return Err(self.roll_back_transfer(tx, state, from, to, amount, e).await),
        };
        state = TransferState::LedgerWritten;

        let sender = match self.client.apply_delta(from, -amount, None).await {
            Ok(account) => account,
            Err(e) => return Err(self.roll_back_transfer(tx, state, from, to, amount, e).await),
        };
        state = TransferState::DebitConfirmed;

        if let Err(e) = self.client.apply_delta(to, amount, None).await {
            return Err(self.roll_back_transfer(tx, state, from, to, amount, e).await);
        }
        state = TransferState::CreditConfirmed;

        if let Err(e) = tx.commit().await {
            warn!(
                "Transfer of {} from {} to {} reached {} but its ledger entries were not committed: {}",
                amount, from, to, state, e
            );
            return Err(e);
        }

        info!("Transfer {}/{} committed, {} balance now {}", debit.id, credit.id, from, sender.balance);
        Ok(TransferReceipt {
            debit,
            credit,
            settlement: Settlement::Applied { balance: sender.balance },
            state: TransferState::Committed,
        })
    }

    async fn transfer_outbox(&self, from: &str, to: &str, amount: Amount) -> Result<TransferReceipt> {
        let mut tx = self.ledger.begin().await?;

        let (debit, credit) = match self.write_transfer(&mut tx, from, to, amount).await {
            Ok(legs) => legs,
            Err(e) => return Err(self.roll_back_transfer(tx, TransferState::Opened, from, to, amount, e).await),
        };

        let debit_delta = PendingDelta::for_entry(&debit, from);
        let credit_delta = PendingDelta::for_entry(&credit, to);
        for delta in [&debit_delta, &credit_delta] {
            if let Err(e) = self.ledger.enqueue_delta(&mut tx, delta).await {
                return Err(self.roll_back_transfer(tx, TransferState::LedgerWritten, from, to, amount, e).await);
            }
        }
        tx.commit().await?;
        info!("Transfer {}/{} committed with its pending deltas", debit.id, credit.id);

        // Sender first; the credit waits for the worker if the debit did not go through
        let settlement = match self.delivery.deliver(&debit_delta).await {
            Ok(sender) => match self.delivery.deliver(&credit_delta).await {
                Ok(_) => Settlement::Applied { balance: sender.balance },
                Err(_) => Settlement::Pending,
            },
            Err(_) => Settlement::Pending,
        };

        Ok(TransferReceipt {
            debit,
            credit,
            settlement,
            state: TransferState::Committed,
        })
    }

    /// Resolve the account and append its credit row
    async fn write_credit(&self, tx: &mut DBTransaction, email: &str, amount: Amount) -> Result<LedgerEntry> {
        let account = self.client.lookup(email).await?;
        self.ledger.append_credit(tx, &account.id, amount).await
    }

    /// Resolve both accounts, check the sender's funds and append both legs.
    ///
    /// In outbox mode the funds are the balance minus the sender's debits
    /// that have not been delivered yet.
    async fn write_transfer(
        &self,
        tx: &mut DBTransaction,
        from: &str,
        to: &str,
        amount: Amount,
    ) -> Result<(LedgerEntry, LedgerEntry)> {
        let sender = self.client.lookup(from).await?;
        let recipient = self.client.lookup(to).await?;
        let available = match self.config.delivery {
            DeliveryMode::Synchronous => sender.balance,
            DeliveryMode::Outbox => sender.balance - self.ledger.outstanding_debits(from).await?,
        };
        check_funds(&sender, available, amount)?;

        self.ledger.append_transfer_pair(tx, &sender.id, &recipient.id, amount).await
    }

    /// Roll back the local transaction and hand back the error that caused it
    async fn roll_back(&self, tx: DBTransaction, err: Error) -> Error {
        info!("Rolling back ledger transaction: {}", err);
        if let Err(rollback_err) = tx.rollback().await {
            error!("Rollback failed: {}", rollback_err);
        }
        err
    }

    async fn roll_back_transfer(
        &self,
        tx: DBTransaction,
        reached: TransferState,
        from: &str,
        to: &str,
        amount: Amount,
        err: Error,
    ) -> Error {
        match (reached, &err) {
            (TransferState::DebitConfirmed, _) => warn!(
                "Transfer of {} from {} to {} {} after reaching {}: the debit on {} stays applied without a ledger entry",
                amount, from, to, TransferState::RolledBack, reached, from
            ),
            (TransferState::LedgerWritten, Error::UpstreamTimeout(_)) => warn!(
                "Transfer of {} from {} to {} timed out at {}; the debit on {} may still be applied",
                amount, from, to, reached, from
            ),
            _ => info!("Transfer of {} from {} to {} {} at {}", amount, from, to, TransferState::RolledBack, reached),
        }
        self.roll_back(tx, err).await
    }
}

fn check_funds(sender: &Account, available: Amount, amount: Amount) -> Result<()> {
    if available < amount {
        return Err(Error::InsufficientFunds(format!(
            "{} has {} available but {} was requested",
            sender.email, available, amount
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::decimal::dec;

    #[test]
    fn test_check_funds() {
        let alice = Account::with_id("1", "alice@x", dec!(150));
        assert!(check_funds(&alice, alice.balance, dec!(150)).is_ok());
        assert!(matches!(check_funds(&alice, alice.balance, dec!(200)), Err(Error::InsufficientFunds(_))));
        assert!(matches!(check_funds(&alice, dec!(100), dec!(150)), Err(Error::InsufficientFunds(_))));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(TransferState::DebitConfirmed.to_string(), "debit_confirmed");
        assert!(Settlement::Applied { balance: dec!(1) }.is_applied());
        assert!(!Settlement::Pending.is_applied());
    }
}
