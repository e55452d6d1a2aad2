use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{AccountId, Money};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: AccountId,
    pub email: String,
    pub balance: Money, // never negative once committed
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: AccountId::new(),
            email: email.into(),
            balance: Money::ZERO,
            created_at: Utc::now(),
        }
    }
}

/// Who a transfer is addressed to, as handed over by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Id(AccountId),
    Email(String),
}

impl From<AccountId> for Recipient {
    fn from(id: AccountId) -> Self {
        Recipient::Id(id)
    }
}

impl From<&str> for Recipient {
    fn from(email: &str) -> Self {
        Recipient::Email(email.to_owned())
    }
}
