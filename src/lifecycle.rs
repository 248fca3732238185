// src/lifecycle.rs
//
// Expiry lifecycle: picks the active expiry at startup, moves to the next one
// after the daily cutover, and recovers when the active expiry disappears from
// the directory. This is the only writer of the active expiry.

use crate::catalog::{listed_expiries, symbols_for_expiry};
use crate::error::Result;
use crate::models::{clock_string, Asset, ExpiryCode, InstrumentListing, OptionSide};
use crate::notify;
use crate::snapshot::SnapshotStore;
use crate::state::MonitorState;
use crate::traits::{IngestionAdapter, SharedDirectory, SharedNotifier};
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use chrono_tz::Tz;
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Exchange states considered tradable.
const LIVE_STATES: [&str; 1] = ["live"];

// =============================================================================
// Reference Clock
// =============================================================================

/// Exchange-local wall clock with a daily cutover.
#[derive(Clone, Copy, Debug)]
pub struct ReferenceClock {
    pub tz: Tz,
    pub cutover: NaiveTime,
}

impl ReferenceClock {
    pub fn new(tz: Tz, cutover: NaiveTime) -> Self {
        Self { tz, cutover }
    }

    pub fn is_after_cutover(&self, now: DateTime<Utc>) -> bool {
        now.with_timezone(&self.tz).time() >= self.cutover
    }

    fn local_date_expiry(&self, now: DateTime<Utc>, days_ahead: i64) -> ExpiryCode {
        let date = now.with_timezone(&self.tz).date_naive() + ChronoDuration::days(days_ahead);
        ExpiryCode::from_date(date)
    }

    /// Today's expiry before the cutover, tomorrow's from the cutover on.
    pub fn initial_expiry(&self, now: DateTime<Utc>) -> ExpiryCode {
        if self.is_after_cutover(now) {
            self.local_date_expiry(now, 1)
        } else {
            self.local_date_expiry(now, 0)
        }
    }

    /// Tomorrow's expiry once the cutover has passed.
    pub fn rollover_candidate(&self, now: DateTime<Utc>) -> Option<ExpiryCode> {
        self.is_after_cutover(now)
            .then(|| self.local_date_expiry(now, 1))
    }

    pub fn clock_string(&self, now: DateTime<Utc>) -> String {
        clock_string(now, self.tz)
    }
}

impl Default for ReferenceClock {
    fn default() -> Self {
        Self {
            tz: chrono_tz::Asia::Kolkata,
            cutover: NaiveTime::from_hms_opt(17, 30, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

// =============================================================================
// Expiry Resolution
// =============================================================================

/// Smallest listed expiry strictly after `current`, else the latest listed one.
pub fn resolve_next(current: ExpiryCode, listed: &BTreeSet<ExpiryCode>) -> Option<ExpiryCode> {
    listed
        .range((std::ops::Bound::Excluded(current), std::ops::Bound::Unbounded))
        .next()
        .or_else(|| listed.iter().next_back())
        .copied()
}

/// `target` if listed, otherwise resolved like a rollover from `target`.
pub fn resolve_initial(target: ExpiryCode, listed: &BTreeSet<ExpiryCode>) -> Option<ExpiryCode> {
    if listed.contains(&target) {
        Some(target)
    } else {
        resolve_next(target, listed)
    }
}

// =============================================================================
// Lifecycle Manager
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LifecycleState {
    Stable,
    RollingOver,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    Bootstrap,
    Cutover,
    Delisted,
}

/// Outcome of a completed transition.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub reason: TransitionReason,
    pub previous: Option<ExpiryCode>,
    pub next: ExpiryCode,
    pub symbols: Vec<String>,
}

/// Marks a transition in progress. Dropping it, including when the owning
/// task is aborted mid-transition, returns the manager to `Stable`.
struct TransitionGuard<'a>(&'a AtomicU8);

impl<'a> TransitionGuard<'a> {
    fn enter(phase: &'a AtomicU8) -> Self {
        phase.store(1, Ordering::Release);
        Self(phase)
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        self.0.store(0, Ordering::Release);
    }
}

pub struct ExpiryLifecycleManager {
    asset: Asset,
    store: Arc<SnapshotStore>,
    adapter: Arc<dyn IngestionAdapter>,
    directory: SharedDirectory,
    state: Arc<MonitorState>,
    notifier: SharedNotifier,
    clock: ReferenceClock,
    phase: AtomicU8,
}

impl ExpiryLifecycleManager {
    pub fn new(
        store: Arc<SnapshotStore>,
        adapter: Arc<dyn IngestionAdapter>,
        directory: SharedDirectory,
        state: Arc<MonitorState>,
        notifier: SharedNotifier,
        clock: ReferenceClock,
    ) -> Self {
        Self {
            asset: store.asset(),
            store,
            adapter,
            directory,
            state,
            notifier,
            clock,
            phase: AtomicU8::new(0),
        }
    }

    pub fn clock(&self) -> ReferenceClock {
        self.clock
    }

    pub fn state(&self) -> LifecycleState {
        match self.phase.load(Ordering::Acquire) {
            0 => LifecycleState::Stable,
            _ => LifecycleState::RollingOver,
        }
    }


    async fn listings(&self) -> Result<Vec<InstrumentListing>> {
        self.directory
            .list_instruments(self.asset, &OptionSide::ALL, &LIVE_STATES)
            .await
    }

    /// Activates the first expiry. Sends a "connected" notification instead
    /// of a rollover one. Falls back to the clock's expiry with no symbols
    /// when the directory has nothing listed yet.
    pub async fn bootstrap(&self, now: DateTime<Utc>) -> Result<Transition> {
        let target = self.clock.initial_expiry(now);
        let listings = self.listings().await?;
        let listed = listed_expiries(&listings);
        let next = resolve_initial(target, &listed).unwrap_or(target);
        if next != target {
            info!(
                "Lifecycle[{}]: {} is not listed, starting on {}",
                self.asset, target, next
            );
        }

        let transition = self
            .transition(TransitionReason::Bootstrap, next, &listings)
            .await;

        let text = format!(
            "🔗 {} Monitor Connected\n\n📅 Monitoring: {}\n📊 Symbols: {}\n⏰ Time: {}\n\n{} monitor is now live! 🚀",
            self.asset,
            next,
            transition.symbols.len(),
            self.clock.clock_string(now),
            self.asset
        );
        notify::deliver(&self.notifier, &text).await;
        Ok(transition)
    }

    /// One lifecycle check. Returns the transition performed, if any.
    /// Directory errors leave everything untouched.
    pub async fn check(&self, now: DateTime<Utc>) -> Result<Option<Transition>> {
        let Some(current) = self.store.active_expiry().await else {
            return self.bootstrap(now).await.map(Some);
        };

        let listings = self.listings().await?;
        let listed = listed_expiries(&listings);

        let mut decision = None;
        if let Some(candidate) = self.clock.rollover_candidate(now) {
            // Only roll forward: a later expiry picked on a previous cutover
            // stays active until tomorrow's date catches up with it.
            if candidate > current {
                info!(
                    "Lifecycle[{}]: Cutover passed, checking for expiry after {}",
                    self.asset, current
                );
                match resolve_next(current, &listed) {
                    Some(next) if next != current => {
                        decision = Some((TransitionReason::Cutover, next));
                    }
                    _ => info!(
                        "Lifecycle[{}]: No new expiry listed yet, keeping {}",
                        self.asset, current
                    ),
                }
            }
        }

        if decision.is_none() && !listed.is_empty() && !listed.contains(&current) {
            warn!(
                "Lifecycle[{}]: Active expiry {} is no longer listed",
                self.asset, current
            );
            if let Some(next) = resolve_next(current, &listed) {
                decision = Some((TransitionReason::Delisted, next));
            }
        }

        let Some((reason, next)) = decision else {
            return Ok(None);
        };

        let transition = self.transition(reason, next, &listings).await;
        let headline = match reason {
            TransitionReason::Delisted => "Expiry Update!",
            _ => "Expiry Rollover Complete!",
        };
        let text = format!(
            "🔄 {} {}\n\n📅 Now monitoring: {}\n⏰ Time: {}",
            self.asset,
            headline,
            next,
            self.clock.clock_string(now)
        );
        notify::deliver(&self.notifier, &text).await;
        Ok(Some(transition))
    }

    /// Reset, rule repoint and resubscription under one exclusive hold of the
    /// snapshot lock. Readers see either the old expiry with its quotes or the
    /// new expiry with an empty chain.
    async fn transition(
        &self,
        reason: TransitionReason,
        next: ExpiryCode,
        listings: &[InstrumentListing],
    ) -> Transition {
        let phase = TransitionGuard::enter(&self.phase);
        let symbols = symbols_for_expiry(listings, next);

        let previous = {
            let mut chain = self.store.lock_for_transition().await;
            let previous = chain.expiry();
            chain.reset(next);
            self.state.repoint_rules(self.asset, next);
            self.adapter.resubscribe(symbols.clone()).await;
            previous
        };

        if reason != TransitionReason::Bootstrap {
            self.state.health(self.asset).record_rollover();
        }
        drop(phase);

        info!(
            "Lifecycle[{}]: {:?} {} -> {} ({} symbols)",
            self.asset,
            reason,
            previous.map(|e| e.to_string()).unwrap_or_else(|| "none".into()),
            next,
            symbols.len()
        );

        Transition {
            reason,
            previous,
            next,
            symbols,
        }
    }
}
