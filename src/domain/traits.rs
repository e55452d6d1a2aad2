use async_trait::async_trait;
use futures::Stream;

use crate::domain::{
    Account, AccountId, Command, Error, FundRequest, FundRequestId, FundRequestStatus,
    LedgerError, Money, NewTransaction, Transaction,
};

pub trait CommandStream {
    type CmdStream: Stream<Item = Result<Command, Error>> + Send + Unpin + 'static;
    fn stream(&mut self) -> Self::CmdStream;
}

pub trait DeadLetterQueue {
    fn report(&self, error: &Error);
}

pub trait OutputRepository {
    fn record_balance(&mut self, account: &Account);
    fn flush(&mut self) -> Result<(), Error>;
}

/// Durable home of accounts, the transaction log and the fund request queue.
///
/// Everything here outside of [`LedgerStore::begin`] is a snapshot read or a
/// single-row insert; balance mutation only happens through an [`AtomicUnit`].
#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Unit: AtomicUnit;

    async fn begin(&self) -> Result<Self::Unit, LedgerError>;

    async fn open_account(&self, email: &str) -> Result<Account, LedgerError>;
    async fn account(&self, id: AccountId) -> Result<Option<Account>, LedgerError>;
    async fn account_by_email(&self, email: &str) -> Result<Option<Account>, LedgerError>;
    async fn accounts(&self) -> Result<Vec<Account>, LedgerError>;

    /// Newest first.
    async fn transactions_for(&self, id: AccountId) -> Result<Vec<Transaction>, LedgerError>;
    async fn transactions(&self) -> Result<Vec<Transaction>, LedgerError>;

    async fn create_fund_request(&self, request: FundRequest) -> Result<FundRequest, LedgerError>;
    async fn fund_request(&self, id: FundRequestId) -> Result<Option<FundRequest>, LedgerError>;
    async fn fund_requests(
        &self,
        status: Option<FundRequestStatus>,
    ) -> Result<Vec<FundRequest>, LedgerError>;
    async fn fund_requests_for(&self, id: AccountId) -> Result<Vec<FundRequest>, LedgerError>;
}

/// One all-or-nothing unit of work.
///
/// Row locks are held until `commit` or `rollback`. Dropping a unit without
/// committing it must behave like `rollback`.
#[async_trait]
pub trait AtomicUnit: Send {
    /// Existence check on this unit's own connection; takes no lock.
    async fn find_account(&mut self, id: AccountId) -> Result<Option<AccountId>, LedgerError>;

    async fn find_account_by_email(&mut self, email: &str) -> Result<Option<AccountId>, LedgerError>;

    /// Locks every listed account in ascending id order and returns them in that
    /// order. Fails with `NotFound` if any of them is missing.
    async fn lock_accounts(&mut self, ids: &[AccountId]) -> Result<Vec<Account>, LedgerError>;

    async fn lock_fund_request(
        &mut self,
        id: FundRequestId,
    ) -> Result<Option<FundRequest>, LedgerError>;

    /// Applies `delta` as an increment and returns the balance as seen by this
    /// unit. Fails with `InsufficientBalance` if the result would go negative.
    async fn adjust_balance(&mut self, id: AccountId, delta: Money) -> Result<Money, LedgerError>;

    async fn append_transaction(&mut self, entry: NewTransaction) -> Result<Transaction, LedgerError>;

    async fn set_fund_request_status(
        &mut self,
        id: FundRequestId,
        status: FundRequestStatus,
        note: Option<String>,
    ) -> Result<(), LedgerError>;

    async fn commit(self) -> Result<(), LedgerError>;
    async fn rollback(self) -> Result<(), LedgerError>;
}
