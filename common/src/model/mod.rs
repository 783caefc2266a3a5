//! Domain models shared by the account and ledger services

pub mod account;
pub mod ledger;

pub use account::Account;
pub use ledger::{EntryKind, LedgerEntry, PendingDelta};
