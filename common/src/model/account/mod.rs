//! Account models and related types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Amount;
#[cfg(feature = "utoipa")]
use crate::utoipa::ToSchema;

/// Account model
///
/// `email` is the stable lookup key; `id` is generated once at creation and
/// referenced by ledger rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(ToSchema))]
pub struct Account {
    /// Opaque account identifier
    pub id: String,
    /// Unique natural key
    pub email: String,
    /// Current balance
    pub balance: Amount,
}

impl Account {
    /// Create an account with a freshly generated identifier
    pub fn new(email: impl Into<String>, balance: Amount) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.into(),
            balance,
        }
    }

    /// Create an account with a caller-supplied identifier
    pub fn with_id(id: impl Into<String>, email: impl Into<String>, balance: Amount) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            balance,
        }
    }

    /// Return a copy of this account with `delta` added to the balance
    pub fn with_delta(&self, delta: Amount) -> Self {
        Self {
            balance: self.balance + delta,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::dec;

    #[test]
    fn test_new_account_gets_unique_id() {
        let a = Account::new("alice@x", dec!(100));
        let b = Account::new("bob@x", dec!(0));
        assert_ne!(a.id, b.id);
        assert!(Uuid::parse_str(&a.id).is_ok());
    }

    #[test]
    fn test_with_delta_keeps_identity() {
        let account = Account::with_id("acc-1", "alice@x", dec!(100));
        let credited = account.with_delta(dec!(-30.5));
        assert_eq!(credited.id, "acc-1");
        assert_eq!(credited.email, "alice@x");
        assert_eq!(credited.balance, dec!(69.5));
        assert_eq!(account.balance, dec!(100));
    }
}
