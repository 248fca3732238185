// src/snapshot.rs
//
// Per-asset best bid/ask table for the active expiry. The active expiry lives
// inside the same lock as the quotes, so a reader always sees a matching pair.

use crate::models::{Asset, ExpiryCode, InstrumentSymbol, OptionSide, Quote};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::{RwLock, RwLockWriteGuard};

/// Quotes for one asset, restricted to a single expiry.
#[derive(Clone, Debug, Default, Serialize)]
pub struct OptionChainSnapshot {
    expiry: Option<ExpiryCode>,
    calls: BTreeMap<u32, Quote>,
    puts: BTreeMap<u32, Quote>,
}

impl OptionChainSnapshot {
    /// An empty chain bound to `expiry`.
    pub fn new(expiry: ExpiryCode) -> Self {
        Self {
            expiry: Some(expiry),
            calls: BTreeMap::new(),
            puts: BTreeMap::new(),
        }
    }

    pub fn expiry(&self) -> Option<ExpiryCode> {
        self.expiry
    }

    pub fn side(&self, side: OptionSide) -> &BTreeMap<u32, Quote> {
        match side {
            OptionSide::Call => &self.calls,
            OptionSide::Put => &self.puts,
        }
    }

    fn side_mut(&mut self, side: OptionSide) -> &mut BTreeMap<u32, Quote> {
        match side {
            OptionSide::Call => &mut self.calls,
            OptionSide::Put => &mut self.puts,
        }
    }

    /// Quote for a strike, or an empty quote when none is held.
    pub fn quote(&self, side: OptionSide, strike: u32) -> Quote {
        self.side(side).get(&strike).copied().unwrap_or_default()
    }

    /// Inserts into this chain. Detached copies may be edited freely; the
    /// shared store only accepts writes through [`SnapshotStore`].
    pub fn insert(&mut self, side: OptionSide, strike: u32, quote: Quote) {
        self.side_mut(side).insert(strike, quote);
    }

    /// Number of instruments (calls + puts) currently held.
    pub fn len(&self) -> usize {
        self.calls.len() + self.puts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted union of strikes present on either side.
    pub fn strikes(&self) -> Vec<u32> {
        let set: BTreeSet<u32> = self.calls.keys().chain(self.puts.keys()).copied().collect();
        set.into_iter().collect()
    }

    /// Drops every quote and rebinds to a new expiry in one assignment.
    pub(crate) fn reset(&mut self, expiry: ExpiryCode) {
        *self = Self::new(expiry);
    }
}

/// Result of a write-through from the streaming adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    WrongAsset,
    /// Symbol belongs to a different expiry than the active one (e.g. a late
    /// message from a just-retired expiry).
    StaleExpiry,
    /// No expiry has been activated yet.
    Inactive,
}

/// Shared, lock-protected snapshot for one asset.
pub struct SnapshotStore {
    asset: Asset,
    inner: RwLock<OptionChainSnapshot>,
}

impl SnapshotStore {
    pub fn new(asset: Asset) -> Self {
        Self {
            asset,
            inner: RwLock::new(OptionChainSnapshot::default()),
        }
    }

    pub fn asset(&self) -> Asset {
        self.asset
    }

    pub async fn active_expiry(&self) -> Option<ExpiryCode> {
        self.inner.read().await.expiry
    }

    /// Consistent read-copy for a detection pass.
    pub async fn snapshot(&self) -> OptionChainSnapshot {
        self.inner.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Write-through for a single streamed quote.
    pub async fn apply_quote(&self, symbol: &InstrumentSymbol, quote: Quote) -> ApplyOutcome {
        if symbol.asset != self.asset {
            return ApplyOutcome::WrongAsset;
        }
        let mut chain = self.inner.write().await;
        match chain.expiry {
            None => ApplyOutcome::Inactive,
            Some(active) if active != symbol.expiry => ApplyOutcome::StaleExpiry,
            Some(_) => {
                chain.insert(symbol.side, symbol.strike, quote);
                ApplyOutcome::Applied
            }
        }
    }

    /// Clear-then-repopulate from one full batch. Entries for another asset or
    /// expiry are dropped. Returns the number of quotes kept.
    pub async fn replace_all(&self, batch: Vec<(InstrumentSymbol, Quote)>) -> usize {
        let mut chain = self.inner.write().await;
        let Some(active) = chain.expiry else {
            return 0;
        };

        let mut fresh = OptionChainSnapshot::new(active);
        for (symbol, quote) in batch {
            if symbol.asset == self.asset && symbol.expiry == active {
                fresh.insert(symbol.side, symbol.strike, quote);
            }
        }
        let kept = fresh.len();
        *chain = fresh;
        kept
    }

    /// Exclusive access for the expiry lifecycle manager's transition.
    pub(crate) async fn lock_for_transition(&self) -> RwLockWriteGuard<'_, OptionChainSnapshot> {
        self.inner.write().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expiry(code: &str) -> ExpiryCode {
        code.parse().unwrap()
    }

    fn sym(s: &str) -> InstrumentSymbol {
        InstrumentSymbol::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_apply_quote_guards() {
        let store = SnapshotStore::new(Asset::Eth);
        let q = Quote::new(1.0, 1.2);

        assert_eq!(
            store.apply_quote(&sym("C-ETH-3000-010125"), q).await,
            ApplyOutcome::Inactive
        );

        store.lock_for_transition().await.reset(expiry("010125"));

        assert_eq!(
            store.apply_quote(&sym("C-BTC-3000-010125"), q).await,
            ApplyOutcome::WrongAsset
        );
        assert_eq!(
            store.apply_quote(&sym("C-ETH-3000-311224"), q).await,
            ApplyOutcome::StaleExpiry
        );
        assert_eq!(
            store.apply_quote(&sym("C-ETH-3000-010125"), q).await,
            ApplyOutcome::Applied
        );
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_replace_all_clears_previous_content() {
        let store = SnapshotStore::new(Asset::Btc);
        store.lock_for_transition().await.reset(expiry("010125"));

        store
            .apply_quote(&sym("C-BTC-90000-010125"), Quote::new(5.0, 6.0))
            .await;

        let kept = store
            .replace_all(vec![
                (sym("C-BTC-100000-010125"), Quote::new(1.0, 2.0)),
                (sym("P-BTC-100000-010125"), Quote::new(3.0, 4.0)),
                (sym("P-BTC-100000-020125"), Quote::new(3.0, 4.0)),
            ])
            .await;

        assert_eq!(kept, 2);
        let snap = store.snapshot().await;
        assert!(snap.side(OptionSide::Call).get(&90_000).is_none());
        assert_eq!(snap.quote(OptionSide::Put, 100_000).best_bid, 3.0);
        assert_eq!(snap.strikes(), vec![100_000]);
    }

    #[test]
    fn test_reset_is_wholesale() {
        let mut chain = OptionChainSnapshot::new(expiry("010125"));
        chain.insert(OptionSide::Call, 100, Quote::new(1.0, 1.0));
        chain.reset(expiry("020125"));
        assert!(chain.is_empty());
        assert_eq!(chain.expiry(), Some(expiry("020125")));
    }
}
