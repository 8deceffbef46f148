//! Integration tests for reorganizations and double spends
//!
//! Drives accounts through the chain tracker the way a node feed would.

mod common;

use bitcoin::{Network, OutPoint, Txid};
use bitledger_core::{
    Account, AccountListener, AddressList, Bucket, ChainTracker, ConfirmationListener,
    ConfirmationStatus, TransactionRecord,
};
use common::{address, block, block_hash, payment, spend};
use parking_lot::Mutex;
use std::sync::Arc;

// Own addresses: 1 receives, 2 takes change. Everything else is foreign.
fn account() -> Arc<Account> {
    let book = Arc::new(AddressList::with_addresses([address(1), address(2)]));
    Arc::new(Account::new("reorg", book, Network::Regtest))
}

fn tracker(account: &Arc<Account>) -> ChainTracker {
    let tracker = ChainTracker::with_inventory(20, &[block_hash(100)], 100);
    tracker.add_account(account.clone());
    tracker
}

/// Every bucket's outpoints, sorted
fn snapshot(account: &Account) -> Vec<(Bucket, Vec<(OutPoint, u64)>)> {
    Bucket::ALL
        .iter()
        .map(|bucket| {
            let mut outputs: Vec<(OutPoint, u64)> = account
                .outputs(*bucket)
                .into_iter()
                .map(|output| (output.outpoint, output.value))
                .collect();
            outputs.sort();
            (*bucket, outputs)
        })
        .collect()
}

#[derive(Default)]
struct StatusLog(Mutex<Vec<(Txid, ConfirmationStatus)>>);

impl ConfirmationListener for StatusLog {
    fn confirmed(&self, record: &TransactionRecord) -> anyhow::Result<()> {
        self.0.lock().push((record.txid(), record.status()));
        Ok(())
    }

    fn new_height(&self, _height: u32) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Voided(Mutex<Vec<Txid>>);

impl AccountListener for Voided {
    fn account_changed(&self, _account: &Account, record: &TransactionRecord) -> anyhow::Result<()> {
        if record.offending().is_some() {
            self.0.lock().push(record.txid());
        }
        Ok(())
    }
}

#[test]
fn test_reorg_round_trip_restores_buckets() {
    let account = account();
    let tracker = tracker(&account);

    let funding = payment(&[(address(1), 100_000)]);
    let outgoing = spend(
        &[OutPoint::new(funding.compute_txid(), 0)],
        &[(address(9), 60_000), (address(2), 30_000)],
    );

    let branch_a = vec![
        block(1, block_hash(100), 101, vec![funding.clone()]),
        block(2, block_hash(1), 102, vec![outgoing.clone()]),
    ];
    let branch_b = vec![
        block(11, block_hash(100), 101, vec![funding.clone()]),
        block(12, block_hash(11), 102, vec![payment(&[(address(7), 5_000)])]),
    ];

    tracker.trunk_update(&branch_a);
    let after_a = snapshot(&account);
    assert_eq!(account.confirmed(), 30_000);
    assert_eq!(account.balance(), 30_000);

    tracker.trunk_update(&branch_b);
    assert_eq!(tracker.trunk(), vec![block_hash(100), block_hash(11), block_hash(12)]);
    assert_eq!(account.confirmed(), 0);
    assert_eq!(account.change(), 30_000);
    assert_eq!(account.sending(), 60_000);
    assert_eq!(account.balance(), 30_000);

    tracker.trunk_update(&branch_a);
    assert_eq!(tracker.height(), 102);
    assert_eq!(snapshot(&account), after_a);
}

#[test]
fn test_unconfirmed_spend_voided_by_confirmed_conflict() {
    let account = account();
    let tracker = tracker(&account);
    let voided = Arc::new(Voided::default());
    account.add_listener(voided.clone());

    let funding = payment(&[(address(1), 100_000)]);
    tracker.trunk_update(&[block(1, block_hash(100), 101, vec![funding.clone()])]);
    let source = OutPoint::new(funding.compute_txid(), 0);

    let ours = TransactionRecord::new(spend(&[source], &[(address(9), 50_000), (address(2), 40_000)]));
    assert!(account.apply(&ours));
    assert_eq!(account.change(), 40_000);
    assert_eq!(account.sending(), 50_000);

    let theirs = spend(&[source], &[(address(8), 95_000)]);
    tracker.trunk_update(&[block(2, block_hash(1), 102, vec![theirs.clone()])]);

    assert_eq!(account.change(), 0);
    assert_eq!(account.sending(), 0);
    assert_eq!(account.balance(), 0);
    assert_eq!(account.locate(&OutPoint::new(ours.txid(), 1)), None);
    assert!(!account.is_known_transaction(&ours.txid()));
    assert!(account.is_known_transaction(&theirs.compute_txid()));
    assert_eq!(*voided.0.lock(), vec![ours.txid()]);
}

#[test]
fn test_reorg_to_conflicting_spend() {
    let account = account();
    let tracker = tracker(&account);
    let log = Arc::new(StatusLog::default());
    tracker.add_confirmation_listener(log.clone());

    let funding = payment(&[(address(1), 100_000)]);
    let source = OutPoint::new(funding.compute_txid(), 0);
    let ours = spend(&[source], &[(address(9), 50_000), (address(2), 40_000)]);
    let theirs = spend(&[source], &[(address(8), 95_000)]);

    tracker.trunk_update(&[
        block(1, block_hash(100), 101, vec![funding]),
        block(2, block_hash(1), 102, vec![ours.clone()]),
    ]);
    assert_eq!(account.confirmed(), 40_000);
    log.0.lock().clear();

    tracker.trunk_update(&[block(12, block_hash(1), 102, vec![theirs.clone()])]);

    assert_eq!(account.balance(), 0);
    assert_eq!(account.sending(), 0);
    assert!(!account.is_known_transaction(&ours.compute_txid()));
    assert!(tracker.confirmation(&ours.compute_txid()).is_none());
    assert_eq!(
        tracker.confirmation(&theirs.compute_txid()).map(|b| b.hash),
        Some(block_hash(12))
    );

    let log = log.0.lock();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].0, ours.compute_txid());
    assert_eq!(
        log[0].1,
        ConfirmationStatus::DoubleSpent {
            offending: theirs.compute_txid()
        }
    );
    assert_eq!(log[1].0, theirs.compute_txid());
    assert!(matches!(log[1].1, ConfirmationStatus::Confirmed(_)));
}

#[test]
fn test_accounts_share_one_trunk() {
    let first = account();
    let second = {
        let book = Arc::new(AddressList::with_addresses([address(5)]));
        Arc::new(Account::new("second", book, Network::Regtest))
    };
    let tracker = tracker(&first);
    tracker.add_account(second.clone());

    tracker.trunk_update(&[block(
        1,
        block_hash(100),
        101,
        vec![payment(&[(address(1), 10_000), (address(5), 20_000)])],
    )]);

    assert_eq!(first.confirmed(), 10_000);
    assert_eq!(second.confirmed(), 20_000);

    tracker.trunk_update(&[block(21, block_hash(100), 101, vec![])]);
    assert_eq!(first.receiving(), 10_000);
    assert_eq!(second.receiving(), 20_000);
}

#[test]
fn test_conflict_after_reorg_is_caught_by_account() {
    let account = account();
    let tracker = tracker(&account);
    let voided = Arc::new(Voided::default());
    account.add_listener(voided.clone());

    let funding = payment(&[(address(1), 100_000)]);
    let source = OutPoint::new(funding.compute_txid(), 0);
    let ours = spend(&[source], &[(address(9), 50_000), (address(2), 40_000)]);
    let theirs = spend(&[source], &[(address(8), 95_000)]);

    tracker.trunk_update(&[
        block(1, block_hash(100), 101, vec![funding]),
        block(2, block_hash(1), 102, vec![ours.clone()]),
    ]);
    tracker.trunk_update(&[block(12, block_hash(1), 102, vec![])]);
    assert!(!tracker.is_cached(&ours.compute_txid()));
    assert_eq!(account.change(), 40_000);

    tracker.trunk_update(&[block(13, block_hash(12), 103, vec![theirs.clone()])]);

    assert_eq!(account.balance(), 0);
    assert_eq!(account.sending(), 0);
    assert!(!account.is_known_transaction(&ours.compute_txid()));
    assert!(tracker.is_cached(&theirs.compute_txid()));
    assert_eq!(*voided.0.lock(), vec![ours.compute_txid()]);
}
