//! The ledger engine: the only write path to account balances.
//!
//! Each mutating operation runs inside one [`AtomicUnit`]. Account rows are
//! locked through a single `lock_accounts` call (ascending id order) and fund
//! request rows before any account row, so opposite-direction transfers
//! between the same two accounts cannot deadlock.

use tracing::{info, instrument, warn};

use crate::domain::{
    Account, AccountId, AtomicUnit, Decision, Entity, FundRequest, FundRequestId,
    FundRequestStatus, LedgerError, LedgerStore, Money, NewTransaction, Recipient, Transaction,
    TransactionKind,
};

pub const DEFAULT_MAX_FUND_REQUEST: Money = Money::from_minor(1_000_000);

/// Both legs of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub debit: Transaction,
    pub credit: Transaction,
}

#[derive(Debug)]
pub struct Ledger<S>
where
    S: LedgerStore,
{
    store: S,
    max_fund_request: Money,
}

impl<S> Ledger<S>
where
    S: LedgerStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            max_fund_request: DEFAULT_MAX_FUND_REQUEST,
        }
    }

    pub fn with_max_fund_request(mut self, limit: Money) -> Self {
        self.max_fund_request = limit;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[instrument(skip(self), err(level = "warn"))]
    pub async fn open_account(&self, email: &str) -> Result<Account, LedgerError> {
        let account = self.store.open_account(email).await?;
        info!(account_id = %account.id, "account opened");
        Ok(account)
    }

    #[instrument(
        skip(self, description),
        fields(account_id = %account_id, amount = %amount),
        err(level = "warn")
    )]
    pub async fn withdraw(
        &self,
        account_id: AccountId,
        amount: Money,
        description: &str,
    ) -> Result<Transaction, LedgerError> {
        ensure_positive(amount)?;
        let description = or_default(description, "Withdrawal");

        let mut unit = self.store.begin().await?;
        let outcome = withdraw_in(&mut unit, account_id, amount, description).await;
        let tx = finish(unit, outcome).await?;

        info!(transaction_id = %tx.id, "withdrawal completed");
        Ok(tx)
    }

    #[instrument(
        skip(self, recipient, description),
        fields(sender_id = %sender_id, amount = %amount),
        err(level = "warn")
    )]
    pub async fn transfer(
        &self,
        sender_id: AccountId,
        recipient: impl Into<Recipient> + Send,
        amount: Money,
        description: &str,
    ) -> Result<TransferReceipt, LedgerError> {
        ensure_positive(amount)?;
        let recipient = recipient.into();
        if recipient == Recipient::Id(sender_id) {
            return Err(LedgerError::SelfTransfer);
        }

        let mut unit = self.store.begin().await?;
        let outcome = transfer_in(&mut unit, sender_id, recipient, amount, description).await;
        let receipt = finish(unit, outcome).await?;

        info!(
            recipient_id = %receipt.credit.account_id,
            "transfer completed"
        );
        Ok(receipt)
    }

    /// Administrator credit. No sufficiency check, the target must exist.
    #[instrument(
        skip(self, description),
        fields(account_id = %account_id, amount = %amount),
        err(level = "warn")
    )]
    pub async fn add_funds(
        &self,
        account_id: AccountId,
        amount: Money,
        description: &str,
    ) -> Result<Transaction, LedgerError> {
        ensure_positive(amount)?;
        let description = or_default(description, "Funds added by admin");

        let mut unit = self.store.begin().await?;
        let outcome = credit_in(&mut unit, account_id, amount, description).await;
        let tx = finish(unit, outcome).await?;

        info!(transaction_id = %tx.id, "funds added");
        Ok(tx)
    }

    /// Queues a pending request for an administrator to credit `account_id`.
    #[instrument(
        skip(self, reason),
        fields(account_id = %account_id, amount = %amount),
        err(level = "warn")
    )]
    pub async fn request_funds(
        &self,
        account_id: AccountId,
        amount: Money,
        reason: &str,
    ) -> Result<FundRequest, LedgerError> {
        ensure_positive(amount)?;
        if amount > self.max_fund_request {
            return Err(LedgerError::RequestLimitExceeded {
                limit: self.max_fund_request,
            });
        }
        if self.store.account(account_id).await?.is_none() {
            return Err(LedgerError::NotFound(Entity::Account));
        }

        let request = FundRequest::pending(account_id, amount, or_default(reason, "Fund request"));
        let request = self.store.create_fund_request(request).await?;
        info!(request_id = %request.id, "fund request submitted");
        Ok(request)
    }

    /// Approval, credit and the `funding` log entry commit together or not at all.
    #[instrument(skip(self), fields(request_id = %request_id), err(level = "warn"))]
    pub async fn approve_fund_request(
        &self,
        request_id: FundRequestId,
    ) -> Result<Transaction, LedgerError> {
        let mut unit = self.store.begin().await?;
        let outcome = approve_in(&mut unit, request_id).await;
        let tx = finish(unit, outcome).await?;

        info!(account_id = %tx.account_id, amount = %tx.amount, "fund request approved");
        Ok(tx)
    }

    #[instrument(skip(self, reason), fields(request_id = %request_id), err(level = "warn"))]
    pub async fn reject_fund_request(
        &self,
        request_id: FundRequestId,
        reason: &str,
    ) -> Result<FundRequest, LedgerError> {
        let mut unit = self.store.begin().await?;
        let outcome = reject_in(&mut unit, request_id, reason).await;
        let request = finish(unit, outcome).await?;

        info!("fund request rejected");
        Ok(request)
    }

    pub async fn get_balance(&self, account_id: AccountId) -> Result<Money, LedgerError> {
        self.account(account_id).await.map(|a| a.balance)
    }

    pub async fn account(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        self.store
            .account(account_id)
            .await?
            .ok_or(LedgerError::NotFound(Entity::Account))
    }

    pub async fn find_account_by_email(&self, email: &str) -> Result<Account, LedgerError> {
        self.store
            .account_by_email(email)
            .await?
            .ok_or(LedgerError::NotFound(Entity::Account))
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>, LedgerError> {
        self.store.accounts().await
    }

    pub async fn list_transactions(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<Transaction>, LedgerError> {
        self.store.transactions_for(account_id).await
    }

    pub async fn list_all_transactions(&self) -> Result<Vec<Transaction>, LedgerError> {
        self.store.transactions().await
    }

    pub async fn get_fund_request(&self, id: FundRequestId) -> Result<FundRequest, LedgerError> {
        self.store
            .fund_request(id)
            .await?
            .ok_or(LedgerError::NotFound(Entity::FundRequest))
    }

    pub async fn list_fund_requests(
        &self,
        status: Option<FundRequestStatus>,
    ) -> Result<Vec<FundRequest>, LedgerError> {
        self.store.fund_requests(status).await
    }

    pub async fn list_fund_requests_for(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<FundRequest>, LedgerError> {
        self.store.fund_requests_for(account_id).await
    }
}

async fn transfer_in<U: AtomicUnit>(
    unit: &mut U,
    sender_id: AccountId,
    recipient: Recipient,
    amount: Money,
    description: &str,
) -> Result<TransferReceipt, LedgerError> {
    let recipient_id = match recipient {
        Recipient::Id(id) => unit.find_account(id).await?,
        Recipient::Email(email) => unit.find_account_by_email(&email).await?,
    }
    .ok_or(LedgerError::RecipientNotFound)?;

    if recipient_id == sender_id {
        return Err(LedgerError::SelfTransfer);
    }

    let locked = unit.lock_accounts(&[sender_id, recipient_id]).await?;
    let sender = locked
        .iter()
        .find(|a| a.id == sender_id)
        .ok_or(LedgerError::NotFound(Entity::Account))?;
    if sender.balance < amount {
        return Err(LedgerError::InsufficientBalance);
    }

    unit.adjust_balance(sender_id, debit(amount)?).await?;
    unit.adjust_balance(recipient_id, amount).await?;

    let sent = unit
        .append_transaction(NewTransaction {
            account_id: sender_id,
            kind: TransactionKind::Transfer,
            amount,
            description: description.to_string(),
            counterparty_id: Some(recipient_id),
        })
        .await?;
    let received = unit
        .append_transaction(NewTransaction {
            account_id: recipient_id,
            kind: TransactionKind::Deposit,
            amount,
            description: description.to_string(),
            counterparty_id: Some(sender_id),
        })
        .await?;

    Ok(TransferReceipt {
        debit: sent,
        credit: received,
    })
}

async fn withdraw_in<U: AtomicUnit>(
    unit: &mut U,
    account_id: AccountId,
    amount: Money,
    description: &str,
) -> Result<Transaction, LedgerError> {
    let locked = unit.lock_accounts(&[account_id]).await?;
    let account = locked.first().ok_or(LedgerError::NotFound(Entity::Account))?;
    if account.balance < amount {
        return Err(LedgerError::InsufficientBalance);
    }

    unit.adjust_balance(account_id, debit(amount)?).await?;
    unit.append_transaction(NewTransaction {
        account_id,
        kind: TransactionKind::Withdrawal,
        amount,
        description: description.to_string(),
        counterparty_id: None,
    })
    .await
}

async fn credit_in<U: AtomicUnit>(
    unit: &mut U,
    account_id: AccountId,
    amount: Money,
    description: &str,
) -> Result<Transaction, LedgerError> {
    unit.lock_accounts(&[account_id]).await?;
    unit.adjust_balance(account_id, amount).await?;
    unit.append_transaction(NewTransaction {
        account_id,
        kind: TransactionKind::Funding,
        amount,
        description: description.to_string(),
        counterparty_id: None,
    })
    .await
}

async fn approve_in<U: AtomicUnit>(
    unit: &mut U,
    request_id: FundRequestId,
) -> Result<Transaction, LedgerError> {
    let request = unit
        .lock_fund_request(request_id)
        .await?
        .ok_or(LedgerError::NotFound(Entity::FundRequest))?;
    let status = request.status.resolve(Decision::Approve)?;

    unit.set_fund_request_status(request_id, status, None).await?;
    let description = or_default(&request.reason, "Funds approved by admin");
    credit_in(unit, request.account_id, request.amount, description).await
}

async fn reject_in<U: AtomicUnit>(
    unit: &mut U,
    request_id: FundRequestId,
    reason: &str,
) -> Result<FundRequest, LedgerError> {
    let mut request = unit
        .lock_fund_request(request_id)
        .await?
        .ok_or(LedgerError::NotFound(Entity::FundRequest))?;
    request.status = request.status.resolve(Decision::Reject)?;

    let note = Some(reason.trim().to_string()).filter(|r| !r.is_empty());
    unit.set_fund_request_status(request_id, request.status, note.clone())
        .await?;
    request.resolution_note = note;
    Ok(request)
}

/// Commits on success, rolls back on failure. A failed rollback is logged and
/// the operation's own error is what the caller sees.
async fn finish<U, T>(unit: U, outcome: Result<T, LedgerError>) -> Result<T, LedgerError>
where
    U: AtomicUnit,
{
    match outcome {
        Ok(value) => {
            unit.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = unit.rollback().await {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

fn ensure_positive(amount: Money) -> Result<(), LedgerError> {
    if amount.is_positive() && amount <= Money::MAX {
        Ok(())
    } else {
        Err(LedgerError::InvalidAmount)
    }
}

fn debit(amount: Money) -> Result<Money, LedgerError> {
    amount.checked_neg().ok_or(LedgerError::InvalidAmount)
}

fn or_default<'a>(text: &'a str, fallback: &'a str) -> &'a str {
    let text = text.trim();
    if text.is_empty() { fallback } else { text }
}
