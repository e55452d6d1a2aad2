//! Runs the ledger against a real database. Needs `--features postgres` and a
//! `DATABASE_URL`; every test returns early when the variable is unset.
#![cfg(feature = "postgres")]

use std::sync::Arc;
use std::time::{Duration, Instant};

use custodial_ledger::domain::{
    AccountId, AtomicUnit, FundRequestStatus, LedgerError, LedgerStore, TransactionKind,
};
use custodial_ledger::store::PostgresStore;
use custodial_ledger::{Ledger, Money};
use tokio::sync::OnceCell;

static MIGRATED: OnceCell<()> = OnceCell::const_new();

fn money(s: &str) -> Money {
    s.parse().unwrap()
}

async fn store(max_connections: u32) -> Option<PostgresStore> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping");
        return None;
    };
    let store = PostgresStore::connect(&url, max_connections, Duration::from_secs(5))
        .await
        .unwrap();
    MIGRATED
        .get_or_init(|| async {
            store.migrate().await.unwrap();
            // A second run must be a no-op.
            store.migrate().await.unwrap();
        })
        .await;
    Some(store)
}

/// Emails are unique per run so tests can share one database.
async fn account(ledger: &Ledger<PostgresStore>, name: &str, balance: &str) -> AccountId {
    let email = format!("{}-{}@pg.test", name, AccountId::new());
    let id = ledger.open_account(&email).await.unwrap().id;
    let balance = money(balance);
    if balance.is_positive() {
        ledger.add_funds(id, balance, "").await.unwrap();
    }
    id
}

async fn replayed_balance(ledger: &Ledger<PostgresStore>, id: AccountId) -> Money {
    ledger
        .list_transactions(id)
        .await
        .unwrap()
        .iter()
        .fold(Money::ZERO, |acc, tx| {
            if tx.kind.is_credit() {
                acc.checked_add(tx.amount).unwrap()
            } else {
                acc.checked_sub(tx.amount).unwrap()
            }
        })
}

#[tokio::test]
async fn transfer_and_fund_request_scenarios() {
    let Some(store) = store(5).await else { return };
    let ledger = Ledger::new(store);
    let a = account(&ledger, "a", "100.00").await;
    let b = account(&ledger, "b", "0").await;

    ledger.transfer(a, b, money("40.00"), "").await.unwrap();
    assert_eq!(
        ledger.withdraw(b, money("40.01"), "").await.unwrap_err(),
        LedgerError::InsufficientBalance
    );
    assert_eq!(
        ledger.transfer(a, AccountId::new(), money("1.00"), "").await.unwrap_err(),
        LedgerError::RecipientNotFound
    );

    let approved = ledger.request_funds(b, money("25.00"), "rent").await.unwrap();
    let tx = ledger.approve_fund_request(approved.id).await.unwrap();
    assert_eq!(tx.kind, TransactionKind::Funding);
    assert_eq!(tx.description, "rent");
    assert_eq!(
        ledger.approve_fund_request(approved.id).await.unwrap_err(),
        LedgerError::AlreadyProcessed
    );

    let rejected = ledger.request_funds(b, money("5.00"), "").await.unwrap();
    let request = ledger.reject_fund_request(rejected.id, "no").await.unwrap();
    assert_eq!(request.status, FundRequestStatus::Rejected);
    let stored = ledger.get_fund_request(rejected.id).await.unwrap();
    assert_eq!(stored.resolution_note.as_deref(), Some("no"));

    assert_eq!(ledger.get_balance(a).await.unwrap(), money("60.00"));
    assert_eq!(ledger.get_balance(b).await.unwrap(), money("65.00"));
    for id in [a, b] {
        assert_eq!(
            ledger.get_balance(id).await.unwrap(),
            replayed_balance(&ledger, id).await
        );
    }
}

#[tokio::test]
async fn racing_withdrawals_never_overdraw() {
    let Some(store) = store(10).await else { return };
    let ledger = Arc::new(Ledger::new(store));
    let a = account(&ledger, "racer", "100.00").await;

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.withdraw(a, money("7.00"), "").await })
        })
        .collect();
    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => assert_eq!(e, LedgerError::InsufficientBalance),
        }
    }

    assert_eq!(succeeded, 14);
    assert_eq!(ledger.get_balance(a).await.unwrap(), money("2.00"));
}

#[tokio::test]
async fn approve_and_reject_race_has_one_winner() {
    let Some(store) = store(5).await else { return };
    let ledger = Arc::new(Ledger::new(store));
    let a = account(&ledger, "requester", "0").await;
    let request_id = ledger.request_funds(a, money("9.00"), "").await.unwrap().id;

    let approver = {
        let ledger = ledger.clone();
        tokio::spawn(async move { ledger.approve_fund_request(request_id).await.map(|_| ()) })
    };
    let rejecter = {
        let ledger = ledger.clone();
        tokio::spawn(async move { ledger.reject_fund_request(request_id, "").await.map(|_| ()) })
    };
    let results = [approver.await.unwrap(), rejecter.await.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.contains(&Err(LedgerError::AlreadyProcessed)));

    let balance = ledger.get_balance(a).await.unwrap();
    match ledger.get_fund_request(request_id).await.unwrap().status {
        FundRequestStatus::Approved => assert_eq!(balance, money("9.00")),
        FundRequestStatus::Rejected => assert_eq!(balance, Money::ZERO),
        FundRequestStatus::Pending => panic!("request left pending"),
    }
}

#[tokio::test]
async fn disjoint_transfers_fit_a_small_pool() {
    let Some(store) = store(2).await else { return };
    let ledger = Arc::new(Ledger::new(store));
    let mut pairs = Vec::new();
    for i in 0..4 {
        let from = account(&ledger, &format!("from{}", i), "10.00").await;
        let to = account(&ledger, &format!("to{}", i), "0").await;
        pairs.push((from, to));
    }

    let started = Instant::now();
    let handles: Vec<_> = pairs
        .iter()
        .map(|&(from, to)| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.transfer(from, to, money("1.00"), "").await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert!(started.elapsed() < Duration::from_secs(5));
    for (from, to) in pairs {
        assert_eq!(ledger.get_balance(from).await.unwrap(), money("9.00"));
        assert_eq!(ledger.get_balance(to).await.unwrap(), money("1.00"));
    }
}

#[tokio::test]
async fn opposite_transfers_do_not_deadlock() {
    let Some(store) = store(10).await else { return };
    let ledger = Arc::new(Ledger::new(store));
    let a = account(&ledger, "left", "100.00").await;
    let b = account(&ledger, "right", "100.00").await;

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let ledger = ledger.clone();
            let (from, to) = if i % 2 == 0 { (a, b) } else { (b, a) };
            tokio::spawn(async move { ledger.transfer(from, to, money("1.00"), "").await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(ledger.get_balance(a).await.unwrap(), money("100.00"));
    assert_eq!(ledger.get_balance(b).await.unwrap(), money("100.00"));
}

#[tokio::test]
async fn database_errors_map_to_ledger_errors() {
    let Some(store) = store(5).await else { return };
    let ledger = Ledger::new(store.clone());
    let a = account(&ledger, "mapped", "0").await;

    // CHECK (balance >= 0) rejects an unguarded debit.
    let mut unit = store.begin().await.unwrap();
    assert_eq!(
        unit.adjust_balance(a, money("-1.00")).await.unwrap_err(),
        LedgerError::InsufficientBalance
    );
    drop(unit);

    // Past NUMERIC(15, 2).
    ledger.add_funds(a, Money::MAX, "").await.unwrap();
    let mut unit = store.begin().await.unwrap();
    assert_eq!(
        unit.adjust_balance(a, money("0.01")).await.unwrap_err(),
        LedgerError::InvalidAmount
    );
    unit.rollback().await.unwrap();
    assert_eq!(ledger.get_balance(a).await.unwrap(), Money::MAX);

    let email = ledger.account(a).await.unwrap().email;
    assert!(matches!(
        ledger.open_account(&email).await,
        Err(LedgerError::DuplicateAccount(_))
    ));
}
