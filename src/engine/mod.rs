// src/engine/mod.rs
//
// Orchestration. One `AssetMonitor` per asset drives an ingestion adapter, the
// expiry lifecycle manager and a rate-limited detection loop. The `Engine`
// holds every monitor behind `MonitorHandle` so the API can address them
// uniformly, and owns the runtime mutators that emit notifications.

use crate::detector::{self, Alert, ScanContext};
use crate::error::{MonitorError, Result};
use crate::lifecycle::{ExpiryLifecycleManager, LifecycleState, ReferenceClock};
use crate::models::{clock_string, Asset, ExpiryCode, OptionSide};
use crate::notify;
use crate::snapshot::{OptionChainSnapshot, SnapshotStore};
use crate::state::{HealthSnapshot, MonitorState, RuleChange};
use crate::traits::{IngestionAdapter, SharedDirectory, SharedNotifier};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

pub const DEFAULT_DETECTION_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_EXPIRY_CHECK_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MIN_QUOTED_SYMBOLS: usize = 10;

/// Timing and gating knobs shared by every monitor.
#[derive(Clone, Copy, Debug)]
pub struct MonitorSettings {
    pub detection_interval: Duration,
    pub expiry_check_interval: Duration,
    pub min_quoted_symbols: usize,
    pub clock: ReferenceClock,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            detection_interval: DEFAULT_DETECTION_INTERVAL,
            expiry_check_interval: DEFAULT_EXPIRY_CHECK_INTERVAL,
            min_quoted_symbols: DEFAULT_MIN_QUOTED_SYMBOLS,
            clock: ReferenceClock::default(),
        }
    }
}

/// Health view of one monitor.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub asset: Asset,
    pub feed: &'static str,
    pub running: bool,
    pub connected: bool,
    pub active_expiry: Option<ExpiryCode>,
    pub expiry_display: Option<String>,
    pub lifecycle: LifecycleState,
    pub quotes_held: usize,
    pub symbols_tracked: usize,
    pub threshold: f64,
    #[serde(flatten)]
    pub counters: HealthSnapshot,
}

/// Object-safe view of an `AssetMonitor`, independent of its adapter type.
#[async_trait]
pub trait MonitorHandle: Send + Sync {
    fn asset(&self) -> Asset;
    async fn start(&self) -> Result<()>;
    async fn stop(&self);
    async fn is_running(&self) -> bool;
    async fn active_expiry(&self) -> Option<ExpiryCode>;
    async fn chain(&self) -> OptionChainSnapshot;
    async fn status(&self) -> MonitorStatus;
}

// =============================================================================
// Asset Monitor
// =============================================================================

/// Everything the background loops need, shareable across tasks.
struct MonitorCore {
    asset: Asset,
    store: Arc<SnapshotStore>,
    lifecycle: ExpiryLifecycleManager,
    state: Arc<MonitorState>,
    notifier: SharedNotifier,
    settings: MonitorSettings,
}

impl MonitorCore {
    async fn detect_once(&self, now: DateTime<Utc>) -> Vec<Alert> {
        let chain = self.store.snapshot().await;
        let health = self.state.health(self.asset);
        health.record_tick(now);
        if chain.expiry().is_none() {
            return Vec::new();
        }

        let ctx = ScanContext {
            asset: self.asset,
            now,
            tz: self.settings.clock.tz,
        };
        let alerts = detector::evaluate(&self.state, &chain, ctx, self.settings.min_quoted_symbols);
        for alert in &alerts {
            health.record_alert();
            info!(
                "Monitor[{}]: {:?} alert: {}",
                self.asset,
                alert.kind,
                alert.text.lines().next().unwrap_or_default()
            );
            notify::dispatch(&self.notifier, alert.text.clone());
        }
        alerts
    }

    async fn detection_loop(self: Arc<Self>) {
        let mut ticker = interval(self.settings.detection_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.detect_once(Utc::now()).await;
        }
    }

    async fn expiry_loop(self: Arc<Self>) {
        let mut ticker = interval(self.settings.expiry_check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; bootstrap has just run.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = self.lifecycle.check(Utc::now()).await {
                warn!("Monitor[{}]: Expiry check failed: {}", self.asset, e);
            }
        }
    }
}

/// Per-asset orchestrator, generic over how quotes arrive.
pub struct AssetMonitor<A: IngestionAdapter + 'static> {
    adapter: Arc<A>,
    core: Arc<MonitorCore>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    starting: AtomicBool,
}

/// Clears the "start in progress" flag when `start` returns or is cancelled.
struct StartingFlag<'a>(&'a AtomicBool);

impl Drop for StartingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<A: IngestionAdapter + 'static> AssetMonitor<A> {
    pub fn new(
        adapter: Arc<A>,
        store: Arc<SnapshotStore>,
        directory: SharedDirectory,
        state: Arc<MonitorState>,
        notifier: SharedNotifier,
        settings: MonitorSettings,
    ) -> Self {
        let lifecycle = ExpiryLifecycleManager::new(
            store.clone(),
            adapter.clone(),
            directory,
            state.clone(),
            notifier.clone(),
            settings.clock,
        );
        Self {
            adapter,
            core: Arc::new(MonitorCore {
                asset: store.asset(),
                store,
                lifecycle,
                state,
                notifier,
                settings,
            }),
            tasks: Mutex::new(Vec::new()),
            starting: AtomicBool::new(false),
        }
    }

    pub fn adapter(&self) -> &Arc<A> {
        &self.adapter
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.core.store
    }

    pub fn lifecycle(&self) -> &ExpiryLifecycleManager {
        &self.core.lifecycle
    }

    /// One detection pass now. Alerts that pass the cooldown are dispatched
    /// and returned.
    pub async fn detect_once(&self, now: DateTime<Utc>) -> Vec<Alert> {
        self.core.detect_once(now).await
    }
}

#[async_trait]
impl<A: IngestionAdapter + 'static> MonitorHandle for AssetMonitor<A> {
    fn asset(&self) -> Asset {
        self.core.asset
    }

    /// Bootstraps the expiry, starts ingestion and spawns both loops.
    /// A no-op while already running or starting. A failed bootstrap is
    /// retried by the expiry loop.
    async fn start(&self) -> Result<()> {
        if self
            .starting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        let _starting = StartingFlag(&self.starting);
        if !self.tasks.lock().await.is_empty() {
            return Ok(());
        }

        // Bootstrap may wait on the network. The task lock is only taken to
        // register the loops.
        let asset = self.core.asset;
        info!(
            "Monitor[{}]: Starting ({} feed)",
            asset,
            self.adapter.kind()
        );
        if let Err(e) = self.core.lifecycle.bootstrap(Utc::now()).await {
            warn!("Monitor[{}]: Bootstrap failed, will retry: {}", asset, e);
        }
        self.adapter.start().await;

        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(self.core.clone().detection_loop()));
        tasks.push(tokio::spawn(self.core.clone().expiry_loop()));
        Ok(())
    }

    /// Stops ingestion and both loops. Idempotent.
    async fn stop(&self) {
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            let _ = handle.await;
        }
        self.adapter.stop().await;
        info!("Monitor[{}]: Stopped", self.core.asset);
    }

    async fn is_running(&self) -> bool {
        !self.tasks.lock().await.is_empty()
    }

    async fn active_expiry(&self) -> Option<ExpiryCode> {
        self.core.store.active_expiry().await
    }

    async fn chain(&self) -> OptionChainSnapshot {
        self.core.store.snapshot().await
    }

    async fn status(&self) -> MonitorStatus {
        let asset = self.core.asset;
        let chain = self.core.store.snapshot().await;
        let expiry = chain.expiry();
        MonitorStatus {
            asset,
            feed: self.adapter.kind(),
            running: self.is_running().await && self.adapter.is_running(),
            connected: self.adapter.is_connected(),
            active_expiry: expiry,
            expiry_display: expiry.map(|e| e.display_long()),
            lifecycle: self.core.lifecycle.state(),
            quotes_held: chain.len(),
            symbols_tracked: self.adapter.symbols().len(),
            threshold: self.core.state.threshold(asset),
            counters: self.core.state.health(asset).snapshot(),
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// All monitors plus the shared state they read.
pub struct Engine {
    monitors: BTreeMap<Asset, Arc<dyn MonitorHandle>>,
    state: Arc<MonitorState>,
    notifier: SharedNotifier,
    clock: ReferenceClock,
}

impl Engine {
    pub fn new(state: Arc<MonitorState>, notifier: SharedNotifier, clock: ReferenceClock) -> Self {
        Self {
            monitors: BTreeMap::new(),
            state,
            notifier,
            clock,
        }
    }

    pub fn add_monitor(mut self, monitor: Arc<dyn MonitorHandle>) -> Self {
        self.monitors.insert(monitor.asset(), monitor);
        self
    }

    pub fn state(&self) -> &Arc<MonitorState> {
        &self.state
    }

    pub fn clock(&self) -> ReferenceClock {
        self.clock
    }

    pub fn assets(&self) -> Vec<Asset> {
        self.monitors.keys().copied().collect()
    }

    pub fn monitor(&self, asset: Asset) -> Result<Arc<dyn MonitorHandle>> {
        self.monitors
            .get(&asset)
            .cloned()
            .ok_or_else(|| MonitorError::UnknownAsset(asset.to_string()))
    }

    pub async fn start_all(&self) {
        for monitor in self.monitors.values() {
            if let Err(e) = monitor.start().await {
                warn!("Engine: Failed to start {}: {}", monitor.asset(), e);
            }
        }
        info!("Engine: {} monitors started", self.monitors.len());
    }

    pub async fn stop_all(&self) {
        for monitor in self.monitors.values() {
            monitor.stop().await;
        }
    }

    pub async fn statuses(&self) -> Vec<MonitorStatus> {
        let mut out = Vec::with_capacity(self.monitors.len());
        for monitor in self.monitors.values() {
            out.push(monitor.status().await);
        }
        out
    }

    /// Sets the arbitrage threshold and announces it. Returns the old value.
    pub async fn update_threshold(&self, asset: Asset, threshold: f64) -> Result<f64> {
        self.monitor(asset)?;
        let previous = self.state.set_threshold(asset, threshold)?;
        info!(
            "Engine: {} threshold updated: ${:.2} → ${:.2}",
            asset, previous, threshold
        );
        let text = format!(
            "⚙️ {} Arbitrage Threshold Updated\n\n📊 New Value: ${:.2}\n⏰ Time: {}\n\nThreshold changed successfully!",
            asset,
            threshold,
            self.clock.clock_string(Utc::now())
        );
        notify::dispatch(&self.notifier, text);
        Ok(previous)
    }

    /// Replaces an alert rule, binding it to the asset's active expiry.
    /// Notifies only when a user-visible field changed.
    pub async fn update_rule(
        &self,
        asset: Asset,
        side: OptionSide,
        strike: u32,
        premium: f64,
        enabled: bool,
    ) -> Result<RuleChange> {
        let monitor = self.monitor(asset)?;
        let expiry = monitor.active_expiry().await;
        let was_active = self.state.any_rule_armed();

        let change = self
            .state
            .set_rule(asset, side, strike, premium, enabled, expiry)?;

        let now = Utc::now();
        if change.is_material() {
            info!("Engine: {} {} rule updated", asset, side);
            notify::dispatch(&self.notifier, rule_change_text(&change, now, self.clock));

            let is_active = self.state.any_rule_armed();
            if is_active != was_active {
                let stamp = self.clock.clock_string(now);
                let text = if is_active {
                    format!(
                        "🚀 OPTION ALERT SYSTEM ACTIVATED!\n\n📊 Active alerts: {}/4\n⏰ Time: {}",
                        self.state.armed_rule_count(),
                        stamp
                    )
                } else {
                    format!(
                        "⏸️ OPTION ALERT SYSTEM DEACTIVATED\n\n⏰ Time: {}\n\nNo alerts are currently monitored.",
                        stamp
                    )
                };
                notify::dispatch(&self.notifier, text);
            }
        }
        Ok(change)
    }
}

/// Config-change notification listing only the fields that moved.
pub fn rule_change_text(change: &RuleChange, now: DateTime<Utc>, clock: ReferenceClock) -> String {
    let before = &change.before;
    let after = &change.after;

    let mut changes = Vec::new();
    if before.strike != after.strike {
        let old = if before.strike == 0 {
            "Not set".to_string()
        } else {
            before.strike.to_string()
        };
        changes.push(format!("• Strike: {} → {}", old, after.strike));
    }
    if before.premium != after.premium {
        changes.push(format!(
            "• Premium: ${:.2} → ${:.2}",
            before.premium, after.premium
        ));
    }
    if before.enabled != after.enabled {
        let status = if after.enabled {
            "✅ MONITORING"
        } else {
            "⏸️ NOT MONITORING"
        };
        changes.push(format!("• Status: {}", status));
    }

    format!(
        "⚙️ *ALERT CONFIGURATION UPDATED*\n\n*{} {} ALERT*\n\n*Changes:*\n{}\n\n*New Configuration:*\n• Strike: {}\n• Premium: ${:.2}\n• Monitoring: {}\n• Expiry: {}\n\n*Updated:* {}",
        change.asset,
        change.side.to_string().to_uppercase(),
        changes.join("\n"),
        after.strike,
        after.premium,
        if after.enabled { "✅ ACTIVE" } else { "⏸️ INACTIVE" },
        after
            .bound_expiry
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Current".to_string()),
        clock_string(now, clock.tz)
    )
}
