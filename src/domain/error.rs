use crate::domain::Money;

/// Row kinds a lookup can miss on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Account,
    FundRequest,
}

impl core::fmt::Display for Entity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Entity::Account => f.write_str("account"),
            Entity::FundRequest => f.write_str("fund request"),
        }
    }
}

/// Infrastructure failures. Safe for the caller to retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("timed out waiting for a row lock")]
    LockTimeout,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("constraint violated: {0}")]
    Constraint(String),
}

/// Outcome of a rejected ledger operation. Nothing was applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("amount must be greater than zero")]
    InvalidAmount,

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("recipient not found")]
    RecipientNotFound,

    #[error("{0} not found")]
    NotFound(Entity),

    #[error("cannot transfer to yourself")]
    SelfTransfer,

    #[error("request already processed")]
    AlreadyProcessed,

    #[error("maximum request amount is {limit}")]
    RequestLimitExceeded { limit: Money },

    #[error("an account with email {0} already exists")]
    DuplicateAccount(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Business errors are final; only store failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Store(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error("Ingestion failed with: {0}")]
    Ingestion(String),

    #[error("Engine failed with: {0}")]
    Engine(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Ledger rejected operation: {0}")]
    Ledger(#[from] LedgerError),
}
