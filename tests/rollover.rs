// tests/rollover.rs
//
// Expiry lifecycle against in-memory directory, adapter and notifier.

mod common;

use common::{evening, listings, morning, FakeAdapter, FakeDirectory, RecordingNotifier};
use options_alert_bot::lifecycle::{
    ExpiryLifecycleManager, LifecycleState, ReferenceClock, TransitionReason,
};
use options_alert_bot::models::{Asset, ExpiryCode, InstrumentSymbol, OptionSide, Quote};
use options_alert_bot::snapshot::{ApplyOutcome, SnapshotStore};
use options_alert_bot::state::MonitorState;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    store: Arc<SnapshotStore>,
    adapter: Arc<FakeAdapter>,
    directory: Arc<FakeDirectory>,
    state: Arc<MonitorState>,
    notifier: Arc<RecordingNotifier>,
    lifecycle: ExpiryLifecycleManager,
}

fn harness(asset: Asset, expiries: &[&str]) -> Harness {
    let store = Arc::new(SnapshotStore::new(asset));
    let adapter = Arc::new(FakeAdapter::default());
    let directory = Arc::new(FakeDirectory::with(listings(asset, &[3000, 3100], expiries)));
    let state = Arc::new(MonitorState::new(Duration::from_secs(60)));
    let notifier = Arc::new(RecordingNotifier::default());
    let lifecycle = ExpiryLifecycleManager::new(
        store.clone(),
        adapter.clone(),
        directory.clone(),
        state.clone(),
        notifier.clone(),
        ReferenceClock::default(),
    );
    Harness {
        store,
        adapter,
        directory,
        state,
        notifier,
        lifecycle,
    }
}

fn expiry(code: &str) -> ExpiryCode {
    code.parse().unwrap()
}

async fn quote(store: &SnapshotStore, symbol: &str) -> ApplyOutcome {
    store
        .apply_quote(&InstrumentSymbol::parse(symbol).unwrap(), Quote::new(1.0, 2.0))
        .await
}

#[tokio::test]
async fn test_bootstrap_uses_todays_listed_expiry() {
    let h = harness(Asset::Eth, &["010125", "020125"]);
    let t = h.lifecycle.bootstrap(morning()).await.unwrap();

    assert_eq!(t.reason, TransitionReason::Bootstrap);
    assert_eq!(t.next, expiry("010125"));
    assert_eq!(h.store.active_expiry().await, Some(expiry("010125")));
    assert_eq!(h.adapter.last_resubscribe().unwrap().len(), 4);
    assert!(h
        .adapter
        .last_resubscribe()
        .unwrap()
        .iter()
        .all(|s| s.ends_with("-010125")));
    assert_eq!(h.notifier.count_containing("Monitor Connected"), 1);
    // Bootstrap is not a rollover.
    assert_eq!(h.state.health(Asset::Eth).rollovers(), 0);
}

#[tokio::test]
async fn test_bootstrap_after_cutover_starts_on_tomorrow() {
    let h = harness(Asset::Btc, &["010125", "020125"]);
    h.lifecycle.bootstrap(evening()).await.unwrap();
    assert_eq!(h.store.active_expiry().await, Some(expiry("020125")));
}

#[tokio::test]
async fn test_bootstrap_skips_to_next_listed_expiry() {
    let h = harness(Asset::Btc, &["030125", "100125"]);
    h.lifecycle.bootstrap(morning()).await.unwrap();
    assert_eq!(h.store.active_expiry().await, Some(expiry("030125")));
}

#[tokio::test]
async fn test_delisted_expiry_moves_to_nearest_later_one() {
    let h = harness(Asset::Eth, &["010125"]);
    h.lifecycle.bootstrap(morning()).await.unwrap();
    assert_eq!(quote(&h.store, "C-ETH-3000-010125").await, ApplyOutcome::Applied);
    assert_eq!(h.store.len().await, 1);

    h.directory
        .set(listings(Asset::Eth, &[3000, 3100], &["020125", "030125"]));
    let t = h.lifecycle.check(morning()).await.unwrap().unwrap();

    assert_eq!(t.reason, TransitionReason::Delisted);
    assert_eq!(t.previous, Some(expiry("010125")));
    assert_eq!(t.next, expiry("020125"));

    let snap = h.store.snapshot().await;
    assert_eq!(snap.expiry(), Some(expiry("020125")));
    assert!(snap.is_empty());

    let symbols = h.adapter.last_resubscribe().unwrap();
    assert_eq!(symbols.len(), 4);
    assert!(symbols.iter().all(|s| s.ends_with("-020125")));

    assert_eq!(h.state.health(Asset::Eth).rollovers(), 1);
    assert_eq!(h.notifier.count_containing("ETH Expiry Update!"), 1);
    assert_eq!(h.lifecycle.state(), LifecycleState::Stable);

    // A late quote from the retired expiry is discarded.
    assert_eq!(
        quote(&h.store, "C-ETH-3000-010125").await,
        ApplyOutcome::StaleExpiry
    );
    assert!(h.store.snapshot().await.is_empty());
}

#[tokio::test]
async fn test_cutover_rolls_to_next_expiry_and_repoints_rules() {
    let h = harness(Asset::Btc, &["010125", "020125"]);
    h.lifecycle.bootstrap(morning()).await.unwrap();
    h.state
        .set_rule(Asset::Btc, OptionSide::Call, 3000, 5.0, true, Some(expiry("010125")))
        .unwrap();
    h.state
        .set_rule(Asset::Btc, OptionSide::Put, 3000, 5.0, false, Some(expiry("010125")))
        .unwrap();
    quote(&h.store, "P-BTC-3100-010125").await;

    // Before the cutover nothing happens.
    assert!(h.lifecycle.check(morning()).await.unwrap().is_none());
    assert_eq!(h.store.len().await, 1);

    let t = h.lifecycle.check(evening()).await.unwrap().unwrap();
    assert_eq!(t.reason, TransitionReason::Cutover);
    assert_eq!(t.next, expiry("020125"));
    assert!(h.store.snapshot().await.is_empty());

    assert_eq!(
        h.state.rule(Asset::Btc, OptionSide::Call).bound_expiry,
        Some(expiry("020125"))
    );
    assert_eq!(
        h.state.rule(Asset::Btc, OptionSide::Put).bound_expiry,
        Some(expiry("010125"))
    );
    assert_eq!(h.notifier.count_containing("BTC Expiry Rollover Complete!"), 1);

    // Already on tomorrow's expiry: a second check is a no-op.
    assert!(h.lifecycle.check(evening()).await.unwrap().is_none());
    assert_eq!(h.state.health(Asset::Btc).rollovers(), 1);
}

#[tokio::test]
async fn test_cutover_without_new_listing_keeps_current() {
    let h = harness(Asset::Btc, &["010125"]);
    h.lifecycle.bootstrap(morning()).await.unwrap();
    quote(&h.store, "C-BTC-3000-010125").await;

    assert!(h.lifecycle.check(evening()).await.unwrap().is_none());
    assert_eq!(h.store.active_expiry().await, Some(expiry("010125")));
    assert_eq!(h.store.len().await, 1);
    assert_eq!(h.notifier.count_containing("Rollover"), 0);
}

#[tokio::test]
async fn test_directory_failure_changes_nothing() {
    let h = harness(Asset::Eth, &["010125", "020125"]);
    h.lifecycle.bootstrap(morning()).await.unwrap();
    quote(&h.store, "C-ETH-3000-010125").await;
    let resubscribes = h.adapter.resubscribes.lock().unwrap().len();

    h.directory.fail(true);
    assert!(h.lifecycle.check(evening()).await.is_err());
    assert_eq!(h.store.active_expiry().await, Some(expiry("010125")));
    assert_eq!(h.store.len().await, 1);
    assert_eq!(h.adapter.resubscribes.lock().unwrap().len(), resubscribes);

    // Retried on the next check once the directory recovers.
    h.directory.fail(false);
    let t = h.lifecycle.check(evening()).await.unwrap().unwrap();
    assert_eq!(t.next, expiry("020125"));
}

#[tokio::test]
async fn test_check_bootstraps_when_inactive() {
    let h = harness(Asset::Eth, &["010125"]);
    h.directory.fail(true);
    assert!(h.lifecycle.bootstrap(morning()).await.is_err());
    assert_eq!(h.store.active_expiry().await, None);

    h.directory.fail(false);
    let t = h.lifecycle.check(morning()).await.unwrap().unwrap();
    assert_eq!(t.reason, TransitionReason::Bootstrap);
    assert_eq!(h.store.active_expiry().await, Some(expiry("010125")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_readers_never_see_a_mixed_snapshot() {
    let h = Arc::new(harness(Asset::Eth, &["010125"]));
    h.lifecycle.bootstrap(morning()).await.unwrap();
    for strike in [3000, 3100] {
        quote(&h.store, &format!("C-ETH-{}-010125", strike)).await;
    }
    h.directory
        .set(listings(Asset::Eth, &[3000, 3100], &["020125"]));

    let reader = {
        let store = h.store.clone();
        tokio::spawn(async move {
            for _ in 0..2_000 {
                let snap = store.snapshot().await;
                match snap.expiry().map(|e| e.code()) {
                    Some(code) if code == "010125" => assert_eq!(snap.len(), 2),
                    Some(code) if code == "020125" => assert!(snap.is_empty()),
                    other => panic!("unexpected expiry {:?}", other),
                }
                tokio::task::yield_now().await;
            }
        })
    };

    h.lifecycle.check(morning()).await.unwrap().unwrap();
    reader.await.unwrap();
}

#[tokio::test]
async fn test_cutover_to_a_later_expiry_happens_once() {
    // Tomorrow (020125) is not listed: the cutover skips to 030125 and must
    // then stay there instead of walking on to 050125.
    let h = harness(Asset::Eth, &["010125", "030125", "050125"]);
    h.lifecycle.bootstrap(morning()).await.unwrap();

    let first = h.lifecycle.check(evening()).await.unwrap().unwrap();
    assert_eq!(first.reason, TransitionReason::Cutover);
    assert_eq!(first.next, expiry("030125"));
    quote(&h.store, "C-ETH-3000-030125").await;

    for _ in 0..3 {
        assert!(h.lifecycle.check(evening()).await.unwrap().is_none());
    }
    assert_eq!(h.store.active_expiry().await, Some(expiry("030125")));
    assert_eq!(h.store.len().await, 1);
    assert_eq!(h.state.health(Asset::Eth).rollovers(), 1);
    assert_eq!(h.notifier.count_containing("Expiry Rollover Complete!"), 1);
}

#[tokio::test]
async fn test_bootstrap_past_tomorrow_is_not_rolled_again() {
    let h = harness(Asset::Btc, &["030125", "050125"]);
    h.lifecycle.bootstrap(evening()).await.unwrap();
    assert_eq!(h.store.active_expiry().await, Some(expiry("030125")));
    assert!(h.lifecycle.check(evening()).await.unwrap().is_none());
    assert_eq!(h.store.active_expiry().await, Some(expiry("030125")));
}

#[tokio::test]
async fn test_aborted_transition_returns_to_stable() {
    let h = Arc::new(harness(Asset::Eth, &["010125"]));
    h.lifecycle.bootstrap(morning()).await.unwrap();
    h.directory
        .set(listings(Asset::Eth, &[3000, 3100], &["020125"]));
    h.adapter.stall_resubscribe();

    let task = {
        let h = h.clone();
        tokio::spawn(async move {
            let _ = h.lifecycle.check(morning()).await;
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.lifecycle.state(), LifecycleState::RollingOver);

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    assert_eq!(h.lifecycle.state(), LifecycleState::Stable);
    // The snapshot lock was released with the aborted task.
    assert!(h.store.snapshot().await.expiry().is_some());
}
