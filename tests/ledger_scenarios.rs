use std::sync::Arc;
use std::time::Duration;

use custodial_ledger::domain::{
    AccountId, Entity, FundRequestStatus, LedgerError, TransactionKind, TransactionStatus,
};
use custodial_ledger::store::InMemoryStore;
use custodial_ledger::{Ledger, Money};

fn money(s: &str) -> Money {
    s.parse().unwrap()
}

async fn account(ledger: &Ledger<InMemoryStore>, email: &str, balance: &str) -> AccountId {
    let id = ledger.open_account(email).await.unwrap().id;
    let balance = money(balance);
    if balance.is_positive() {
        ledger.add_funds(id, balance, "").await.unwrap();
    }
    id
}

/// Recomputes a balance from the log: credits minus debits, starting at zero.
async fn replayed_balance(ledger: &Ledger<InMemoryStore>, id: AccountId) -> Money {
    ledger
        .list_transactions(id)
        .await
        .unwrap()
        .iter()
        .filter(|tx| tx.status == TransactionStatus::Completed)
        .fold(Money::ZERO, |acc, tx| {
            if tx.kind.is_credit() {
                acc.checked_add(tx.amount).unwrap()
            } else {
                acc.checked_sub(tx.amount).unwrap()
            }
        })
}

#[tokio::test]
async fn transfer_scenario() {
    let ledger = Ledger::new(InMemoryStore::default());
    let a = account(&ledger, "a@bank.test", "100.00").await;
    let b = account(&ledger, "b@bank.test", "0").await;

    ledger.transfer(a, b, money("40.00"), "").await.unwrap();

    assert_eq!(ledger.get_balance(a).await.unwrap(), money("60.00"));
    assert_eq!(ledger.get_balance(b).await.unwrap(), money("40.00"));

    let on_a = ledger.list_transactions(a).await.unwrap();
    assert_eq!(on_a[0].kind, TransactionKind::Transfer);
    assert_eq!(on_a[0].status, TransactionStatus::Completed);
    let on_b = ledger.list_transactions(b).await.unwrap();
    assert_eq!(on_b.len(), 1);
    assert_eq!(on_b[0].kind, TransactionKind::Deposit);
    assert_eq!(on_b[0].status, TransactionStatus::Completed);
}

#[tokio::test]
async fn approve_scenario() {
    let ledger = Ledger::new(InMemoryStore::default());
    let a = account(&ledger, "a@bank.test", "10.00").await;
    let request = ledger.request_funds(a, money("25.00"), "").await.unwrap();

    ledger.approve_fund_request(request.id).await.unwrap();

    assert_eq!(ledger.get_balance(a).await.unwrap(), money("35.00"));
    assert_eq!(
        ledger.get_fund_request(request.id).await.unwrap().status,
        FundRequestStatus::Approved
    );
    let funding = ledger
        .list_transactions(a)
        .await
        .unwrap()
        .into_iter()
        .filter(|tx| tx.kind == TransactionKind::Funding && tx.amount == money("25.00"))
        .count();
    assert_eq!(funding, 1);
    assert_eq!(ledger.list_fund_requests_for(a).await.unwrap().len(), 1);
}

#[tokio::test]
async fn balances_always_match_the_log() {
    let ledger = Ledger::new(InMemoryStore::default());
    let a = account(&ledger, "a@bank.test", "80.00").await;
    let b = account(&ledger, "b@bank.test", "20.00").await;
    let c = account(&ledger, "c@bank.test", "0").await;

    ledger.transfer(a, "c@bank.test", money("12.34"), "").await.unwrap();
    ledger.withdraw(b, money("5.00"), "").await.unwrap();
    let _ = ledger.withdraw(c, money("100.00"), "").await;
    ledger.transfer(c, b, money("2.34"), "").await.unwrap();
    let r = ledger.request_funds(c, money("3.00"), "").await.unwrap();
    ledger.approve_fund_request(r.id).await.unwrap();

    for id in [a, b, c] {
        assert_eq!(
            ledger.get_balance(id).await.unwrap(),
            replayed_balance(&ledger, id).await
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn many_racing_debits_keep_balance_non_negative() {
    let ledger = Arc::new(Ledger::new(InMemoryStore::new(Duration::from_secs(10))));
    let a = account(&ledger, "a@bank.test", "100.00").await;
    let b = account(&ledger, "b@bank.test", "0").await;

    let mut handles = Vec::new();
    for i in 0..40 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                ledger.withdraw(a, money("7.00"), "").await.map(|_| ())
            } else {
                ledger.transfer(a, b, money("7.00"), "").await.map(|_| ())
            }
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => succeeded += 1,
            Err(e) => assert_eq!(e, LedgerError::InsufficientBalance),
        }
    }

    // 100.00 covers exactly 14 debits of 7.00.
    assert_eq!(succeeded, 14);
    assert_eq!(ledger.get_balance(a).await.unwrap(), money("2.00"));
    assert_eq!(replayed_balance(&ledger, a).await, money("2.00"));
    assert_eq!(
        ledger.get_balance(b).await.unwrap(),
        replayed_balance(&ledger, b).await
    );
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let ledger = Ledger::new(InMemoryStore::default());

    assert_eq!(
        ledger.get_balance(AccountId::new()).await,
        Err(LedgerError::NotFound(Entity::Account))
    );
    assert_eq!(
        ledger.find_account_by_email("ghost@bank.test").await,
        Err(LedgerError::NotFound(Entity::Account))
    );
    assert_eq!(
        ledger.withdraw(AccountId::new(), money("1.00"), "").await,
        Err(LedgerError::NotFound(Entity::Account))
    );
}
