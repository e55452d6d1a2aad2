use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{AccountId, FundRequestId, LedgerError, Money};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FundRequestStatus {
    Pending,
    Approved,
    Rejected,
}

/// Administrator's verdict on a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl FundRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FundRequestStatus::Pending => "pending",
            FundRequestStatus::Approved => "approved",
            FundRequestStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, FundRequestStatus::Pending)
    }

    /// The only legal moves are `pending -> approved` and `pending -> rejected`.
    pub fn resolve(self, decision: Decision) -> Result<FundRequestStatus, LedgerError> {
        match (self, decision) {
            (FundRequestStatus::Pending, Decision::Approve) => Ok(FundRequestStatus::Approved),
            (FundRequestStatus::Pending, Decision::Reject) => Ok(FundRequestStatus::Rejected),
            _ => Err(LedgerError::AlreadyProcessed),
        }
    }
}

impl core::str::FromStr for FundRequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FundRequestStatus::Pending),
            "approved" => Ok(FundRequestStatus::Approved),
            "rejected" => Ok(FundRequestStatus::Rejected),
            other => Err(format!("unknown fund request status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FundRequest {
    pub id: FundRequestId,
    pub account_id: AccountId,
    pub amount: Money,
    pub reason: String,
    pub status: FundRequestStatus,
    pub resolution_note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FundRequest {
    pub fn pending(account_id: AccountId, amount: Money, reason: impl Into<String>) -> Self {
        Self {
            id: FundRequestId::new(),
            account_id,
            amount,
            reason: reason.into(),
            status: FundRequestStatus::Pending,
            resolution_note: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Decision, FundRequestStatus};
    use crate::domain::LedgerError;

    #[test]
    fn pending_resolves_once() {
        let approved = FundRequestStatus::Pending.resolve(Decision::Approve).unwrap();
        assert_eq!(approved, FundRequestStatus::Approved);
        assert!(approved.is_terminal());

        let rejected = FundRequestStatus::Pending.resolve(Decision::Reject).unwrap();
        assert_eq!(rejected, FundRequestStatus::Rejected);
    }

    #[test]
    fn terminal_states_refuse_every_decision() {
        for status in [FundRequestStatus::Approved, FundRequestStatus::Rejected] {
            for decision in [Decision::Approve, Decision::Reject] {
                assert_eq!(status.resolve(decision), Err(LedgerError::AlreadyProcessed));
            }
        }
    }
}
