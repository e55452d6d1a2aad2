//! In-process ledger store.
//!
//! Committed state lives behind one mutex so a commit is observed all at once.
//! Row locks are per-key `tokio` mutexes handed out as owned guards, so a unit
//! keeps its rows locked across awaits and releases them when it is dropped.
//! Writes made inside a unit are staged and only applied by `commit`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::domain::{
    Account, AccountId, AtomicUnit, Entity, FundRequest, FundRequestId, FundRequestStatus,
    LedgerError, LedgerStore, Money, NewTransaction, StoreError, Transaction,
};

/// Lock key. Fund request rows order before account rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum RowKey {
    FundRequest(FundRequestId),
    Account(AccountId),
}

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<AccountId, Account>,
    log: Vec<Transaction>,
    requests: HashMap<FundRequestId, FundRequest>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    locks: Mutex<HashMap<RowKey, Arc<tokio::sync::Mutex<()>>>>,
    lock_timeout: Duration,
}

impl Shared {
    fn state(&self) -> Result<MutexGuard<'_, State>, LedgerError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("state lock poisoned".to_string()).into())
    }

    fn row_lock(&self, key: RowKey) -> Result<Arc<tokio::sync::Mutex<()>>, LedgerError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| StoreError::Unavailable("lock table poisoned".to_string()))?;
        Ok(locks.entry(key).or_default().clone())
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl InMemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                locks: Mutex::new(HashMap::new()),
                lock_timeout,
            }),
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    type Unit = MemoryUnit;

    async fn begin(&self) -> Result<MemoryUnit, LedgerError> {
        Ok(MemoryUnit {
            shared: self.shared.clone(),
            guards: BTreeMap::new(),
            deltas: BTreeMap::new(),
            appended: Vec::new(),
            status_changes: Vec::new(),
        })
    }

    async fn open_account(&self, email: &str) -> Result<Account, LedgerError> {
        let mut state = self.shared.state()?;
        if state.accounts.values().any(|a| a.email == email) {
            return Err(LedgerError::DuplicateAccount(email.to_string()));
        }
        let account = Account::new(email);
        state.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>, LedgerError> {
        Ok(self.shared.state()?.accounts.get(&id).cloned())
    }

    async fn account_by_email(&self, email: &str) -> Result<Option<Account>, LedgerError> {
        let state = self.shared.state()?;
        Ok(state.accounts.values().find(|a| a.email == email).cloned())
    }

    async fn accounts(&self) -> Result<Vec<Account>, LedgerError> {
        let state = self.shared.state()?;
        let mut accounts: Vec<Account> = state.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(accounts)
    }

    async fn transactions_for(&self, id: AccountId) -> Result<Vec<Transaction>, LedgerError> {
        let state = self.shared.state()?;
        Ok(state
            .log
            .iter()
            .rev()
            .filter(|tx| tx.account_id == id)
            .cloned()
            .collect())
    }

    async fn transactions(&self) -> Result<Vec<Transaction>, LedgerError> {
        let state = self.shared.state()?;
        Ok(state.log.iter().rev().cloned().collect())
    }

    async fn create_fund_request(&self, request: FundRequest) -> Result<FundRequest, LedgerError> {
        let mut state = self.shared.state()?;
        if !state.accounts.contains_key(&request.account_id) {
            return Err(LedgerError::NotFound(Entity::Account));
        }
        state.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn fund_request(&self, id: FundRequestId) -> Result<Option<FundRequest>, LedgerError> {
        Ok(self.shared.state()?.requests.get(&id).cloned())
    }

    async fn fund_requests(
        &self,
        status: Option<FundRequestStatus>,
    ) -> Result<Vec<FundRequest>, LedgerError> {
        let state = self.shared.state()?;
        let mut requests: Vec<FundRequest> = state
            .requests
            .values()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(requests)
    }

    async fn fund_requests_for(&self, id: AccountId) -> Result<Vec<FundRequest>, LedgerError> {
        let mut requests = self.fund_requests(None).await?;
        requests.retain(|r| r.account_id == id);
        Ok(requests)
    }
}

/// Staged writes plus the row locks backing them.
pub struct MemoryUnit {
    shared: Arc<Shared>,
    guards: BTreeMap<RowKey, OwnedMutexGuard<()>>,
    deltas: BTreeMap<AccountId, Money>,
    appended: Vec<Transaction>,
    status_changes: Vec<(FundRequestId, FundRequestStatus, Option<String>)>,
}

impl MemoryUnit {
    async fn acquire(&mut self, key: RowKey) -> Result<(), LedgerError> {
        if self.guards.contains_key(&key) {
            return Ok(());
        }
        if let Some((held, _)) = self.guards.last_key_value() {
            if *held > key {
                return Err(StoreError::Constraint(format!(
                    "lock order violated: {:?} requested after {:?}",
                    key, held
                ))
                .into());
            }
        }

        let lock = self.shared.row_lock(key)?;
        let guard = tokio::time::timeout(self.shared.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout)?;
        debug!(?key, "row locked");
        self.guards.insert(key, guard);
        Ok(())
    }

    fn staged(&self, id: &AccountId) -> Money {
        self.deltas.get(id).copied().unwrap_or(Money::ZERO)
    }

    fn view(&self, account: &Account) -> Result<Account, LedgerError> {
        let balance = account
            .balance
            .checked_add(self.staged(&account.id))
            .ok_or_else(|| StoreError::Constraint("balance overflow".to_string()))?;
        Ok(Account {
            balance,
            ..account.clone()
        })
    }
}

#[async_trait]
impl AtomicUnit for MemoryUnit {
    async fn find_account(&mut self, id: AccountId) -> Result<Option<AccountId>, LedgerError> {
        let state = self.shared.state()?;
        Ok(state.accounts.get(&id).map(|a| a.id))
    }

    async fn find_account_by_email(&mut self, email: &str) -> Result<Option<AccountId>, LedgerError> {
        let state = self.shared.state()?;
        Ok(state
            .accounts
            .values()
            .find(|a| a.email == email)
            .map(|a| a.id))
    }

    async fn lock_accounts(&mut self, ids: &[AccountId]) -> Result<Vec<Account>, LedgerError> {
        let mut ordered = ids.to_vec();
        ordered.sort();
        ordered.dedup();

        {
            let state = self.shared.state()?;
            if ordered.iter().any(|id| !state.accounts.contains_key(id)) {
                return Err(LedgerError::NotFound(Entity::Account));
            }
        }

        for id in &ordered {
            self.acquire(RowKey::Account(*id)).await?;
        }

        let state = self.shared.state()?;
        ordered
            .iter()
            .map(|id| {
                let account = state
                    .accounts
                    .get(id)
                    .ok_or(LedgerError::NotFound(Entity::Account))?;
                self.view(account)
            })
            .collect()
    }

    async fn lock_fund_request(
        &mut self,
        id: FundRequestId,
    ) -> Result<Option<FundRequest>, LedgerError> {
        let exists = self.shared.state()?.requests.contains_key(&id);
        if !exists {
            return Ok(None);
        }
        self.acquire(RowKey::FundRequest(id)).await?;

        let state = self.shared.state()?;
        let mut request = match state.requests.get(&id) {
            Some(request) => request.clone(),
            None => return Ok(None),
        };
        if let Some((_, status, note)) = self.status_changes.iter().rev().find(|c| c.0 == id) {
            request.status = *status;
            request.resolution_note = note.clone();
        }
        Ok(Some(request))
    }

    async fn adjust_balance(&mut self, id: AccountId, delta: Money) -> Result<Money, LedgerError> {
        let committed = {
            let state = self.shared.state()?;
            state
                .accounts
                .get(&id)
                .map(|a| a.balance)
                .ok_or(LedgerError::NotFound(Entity::Account))?
        };

        let staged = self
            .staged(&id)
            .checked_add(delta)
            .ok_or_else(|| StoreError::Constraint("balance overflow".to_string()))?;
        let balance = committed
            .checked_add(staged)
            .ok_or_else(|| StoreError::Constraint("balance overflow".to_string()))?;
        if balance.is_negative() {
            return Err(LedgerError::InsufficientBalance);
        }
        if balance > Money::MAX {
            return Err(LedgerError::InvalidAmount);
        }

        self.deltas.insert(id, staged);
        Ok(balance)
    }

    async fn append_transaction(&mut self, entry: NewTransaction) -> Result<Transaction, LedgerError> {
        if !entry.amount.is_positive() {
            return Err(StoreError::Constraint("transaction amount must be positive".to_string()).into());
        }
        {
            let state = self.shared.state()?;
            let referenced = std::iter::once(entry.account_id).chain(entry.counterparty_id);
            for id in referenced {
                if !state.accounts.contains_key(&id) {
                    return Err(StoreError::Constraint(format!(
                        "transaction references unknown account {}",
                        id
                    ))
                    .into());
                }
            }
        }

        let tx = entry.completed();
        self.appended.push(tx.clone());
        Ok(tx)
    }

    async fn set_fund_request_status(
        &mut self,
        id: FundRequestId,
        status: FundRequestStatus,
        note: Option<String>,
    ) -> Result<(), LedgerError> {
        if !self.shared.state()?.requests.contains_key(&id) {
            return Err(LedgerError::NotFound(Entity::FundRequest));
        }
        self.status_changes.push((id, status, note));
        Ok(())
    }

    async fn commit(self) -> Result<(), LedgerError> {
        let mut state = self.shared.state()?;

        // Validate everything before touching anything.
        let mut balances = Vec::with_capacity(self.deltas.len());
        for (id, delta) in &self.deltas {
            let account = state
                .accounts
                .get(id)
                .ok_or(LedgerError::NotFound(Entity::Account))?;
            let balance = account
                .balance
                .checked_add(*delta)
                .ok_or_else(|| StoreError::Constraint("balance overflow".to_string()))?;
            if balance.is_negative() {
                return Err(LedgerError::InsufficientBalance);
            }
            if balance > Money::MAX {
                return Err(LedgerError::InvalidAmount);
            }
            balances.push((*id, balance));
        }
        for (id, _, _) in &self.status_changes {
            if !state.requests.contains_key(id) {
                return Err(LedgerError::NotFound(Entity::FundRequest));
            }
        }

        for (id, balance) in balances {
            if let Some(account) = state.accounts.get_mut(&id) {
                account.balance = balance;
            }
        }
        for (id, status, note) in self.status_changes {
            if let Some(request) = state.requests.get_mut(&id) {
                request.status = status;
                request.resolution_note = note;
            }
        }
        state.log.extend(self.appended);

        debug!(rows = self.guards.len(), "unit committed");
        // Guards drop after the state lock is released below.
        drop(state);
        Ok(())
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        debug!(rows = self.guards.len(), "unit rolled back");
        Ok(())
    }
}
