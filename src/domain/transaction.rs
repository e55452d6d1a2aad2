use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{AccountId, Money, TransactionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Transfer,
    Funding,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Transfer => "transfer",
            TransactionKind::Funding => "funding",
        }
    }

    /// Sign of the balance effect on the acting account.
    pub fn is_credit(&self) -> bool {
        matches!(self, TransactionKind::Deposit | TransactionKind::Funding)
    }
}

impl core::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionKind::Deposit),
            "withdrawal" => Ok(TransactionKind::Withdrawal),
            "transfer" => Ok(TransactionKind::Transfer),
            "funding" => Ok(TransactionKind::Funding),
            other => Err(format!("unknown transaction type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }
}

impl core::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

/// Immutable ledger record. Only ever written inside an atomic unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub kind: TransactionKind,
    pub amount: Money,
    pub status: TransactionStatus,
    pub description: String,
    pub counterparty_id: Option<AccountId>,
    pub created_at: DateTime<Utc>,
}

/// A log entry as staged by the engine, before the store assigns identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub account_id: AccountId,
    pub kind: TransactionKind,
    pub amount: Money,
    pub description: String,
    pub counterparty_id: Option<AccountId>,
}

impl NewTransaction {
    pub fn completed(self) -> Transaction {
        Transaction {
            id: TransactionId::new(),
            account_id: self.account_id,
            kind: self.kind,
            amount: self.amount,
            status: TransactionStatus::Completed,
            description: self.description,
            counterparty_id: self.counterparty_id,
            created_at: Utc::now(),
        }
    }
}

impl core::fmt::Display for Transaction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.counterparty_id {
            Some(counterparty) => write!(
                f,
                "{},account={},counterparty={},amount={}",
                self.kind.as_str(),
                self.account_id,
                counterparty,
                self.amount
            ),
            None => write!(
                f,
                "{},account={},amount={}",
                self.kind.as_str(),
                self.account_id,
                self.amount
            ),
        }
    }
}
