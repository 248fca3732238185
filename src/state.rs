// src/state.rs
//
// Shared, injected state: alert rules, arbitrage thresholds, the cooldown gate
// and per-asset health counters. Detectors and the API hold an
// `Arc<MonitorState>`; nothing here is global.

use crate::cooldown::CooldownGate;
use crate::error::{MonitorError, Result};
use crate::models::{AlertRule, Asset, ExpiryCode, OptionSide};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Default per-asset arbitrage thresholds.
pub fn default_threshold(asset: Asset) -> f64 {
    match asset {
        Asset::Btc => 2.0,
        Asset::Eth => 0.16,
    }
}

// =============================================================================
// Health Counters
// =============================================================================

/// Monotonic observability counters for one asset.
#[derive(Default)]
pub struct AssetHealth {
    messages: AtomicU64,
    fetches: AtomicU64,
    fetch_errors: AtomicU64,
    malformed: AtomicU64,
    alerts: AtomicU64,
    rollovers: AtomicU64,
    connected: AtomicBool,
    /// Unix millis of the last completed detection tick (0 = never).
    last_tick_ms: AtomicI64,
}

/// Point-in-time copy of [`AssetHealth`] for serialization.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub messages_received: u64,
    pub fetch_count: u64,
    pub fetch_errors: u64,
    pub malformed_symbols: u64,
    pub alerts_sent: u64,
    pub rollover_count: u64,
    pub connected: bool,
    pub last_check: Option<DateTime<Utc>>,
}

impl AssetHealth {
    pub fn record_message(&self) -> u64 {
        self.messages.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_fetch(&self) -> u64 {
        self.fetches.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_fetch_error(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert(&self) {
        self.alerts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rollover(&self) {
        self.rollovers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn record_tick(&self, at: DateTime<Utc>) {
        self.last_tick_ms.store(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn rollovers(&self) -> u64 {
        self.rollovers.load(Ordering::Relaxed)
    }

    pub fn alerts(&self) -> u64 {
        self.alerts.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let last_tick = self.last_tick_ms.load(Ordering::Relaxed);
        HealthSnapshot {
            messages_received: self.messages.load(Ordering::Relaxed),
            fetch_count: self.fetches.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            malformed_symbols: self.malformed.load(Ordering::Relaxed),
            alerts_sent: self.alerts.load(Ordering::Relaxed),
            rollover_count: self.rollovers.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
            last_check: if last_tick == 0 {
                None
            } else {
                DateTime::from_timestamp_millis(last_tick)
            },
        }
    }
}

// =============================================================================
// Monitor State
// =============================================================================

/// A rule mutation as seen by the caller: what it was and what it is now.
#[derive(Debug, Clone)]
pub struct RuleChange {
    pub asset: Asset,
    pub side: OptionSide,
    pub before: AlertRule,
    pub after: AlertRule,
}

impl RuleChange {
    /// True when a user-visible field (strike, premium, enabled) changed.
    pub fn is_material(&self) -> bool {
        self.before.strike != self.after.strike
            || self.before.premium != self.after.premium
            || self.before.enabled != self.after.enabled
    }
}

pub struct MonitorState {
    rules: RwLock<HashMap<(Asset, OptionSide), AlertRule>>,
    thresholds: RwLock<HashMap<Asset, f64>>,
    cooldown: CooldownGate,
    health: HashMap<Asset, Arc<AssetHealth>>,
}

impl MonitorState {
    /// Rules start disabled and thresholds start at their defaults.
    pub fn new(cooldown_window: Duration) -> Self {
        let mut rules = HashMap::new();
        let mut thresholds = HashMap::new();
        let mut health = HashMap::new();
        for asset in Asset::ALL {
            for side in OptionSide::ALL {
                rules.insert((asset, side), AlertRule::default());
            }
            thresholds.insert(asset, default_threshold(asset));
            health.insert(asset, Arc::new(AssetHealth::default()));
        }

        Self {
            rules: RwLock::new(rules),
            thresholds: RwLock::new(thresholds),
            cooldown: CooldownGate::new(cooldown_window),
            health,
        }
    }

    pub fn cooldown(&self) -> &CooldownGate {
        &self.cooldown
    }

    pub fn health(&self, asset: Asset) -> Arc<AssetHealth> {
        self.health
            .get(&asset)
            .cloned()
            .unwrap_or_else(|| Arc::new(AssetHealth::default()))
    }

    // --- Thresholds ---

    pub fn threshold(&self, asset: Asset) -> f64 {
        self.thresholds
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&asset)
            .copied()
            .unwrap_or_else(|| default_threshold(asset))
    }

    /// Sets the arbitrage threshold; returns the previous value.
    pub fn set_threshold(&self, asset: Asset, threshold: f64) -> Result<f64> {
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(MonitorError::InvalidConfig(format!(
                "threshold must be positive, got {}",
                threshold
            )));
        }
        let mut map = self.thresholds.write().unwrap_or_else(|e| e.into_inner());
        let previous = map
            .insert(asset, threshold)
            .unwrap_or_else(|| default_threshold(asset));
        Ok(previous)
    }

    // --- Rules ---

    pub fn rule(&self, asset: Asset, side: OptionSide) -> AlertRule {
        self.rules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(asset, side))
            .cloned()
            .unwrap_or_default()
    }

    /// Rules of one asset, calls first.
    pub fn rules_for(&self, asset: Asset) -> Vec<(OptionSide, AlertRule)> {
        let rules = self.rules.read().unwrap_or_else(|e| e.into_inner());
        OptionSide::ALL
            .iter()
            .map(|side| (*side, rules.get(&(asset, *side)).cloned().unwrap_or_default()))
            .collect()
    }

    /// Replaces one rule. Validation failures leave the stored rule untouched.
    pub fn set_rule(
        &self,
        asset: Asset,
        side: OptionSide,
        strike: u32,
        premium: f64,
        enabled: bool,
        bound_expiry: Option<ExpiryCode>,
    ) -> Result<RuleChange> {
        if !premium.is_finite() || premium < 0.0 {
            return Err(MonitorError::InvalidConfig(format!(
                "premium must be a non-negative number, got {}",
                premium
            )));
        }

        let after = AlertRule {
            strike,
            premium,
            enabled,
            last_updated: Some(Utc::now()),
            bound_expiry,
        };

        let mut rules = self.rules.write().unwrap_or_else(|e| e.into_inner());
        let before = rules.insert((asset, side), after.clone()).unwrap_or_default();

        Ok(RuleChange {
            asset,
            side,
            before,
            after,
        })
    }

    /// Points every enabled rule of `asset` at `expiry`.
    pub fn repoint_rules(&self, asset: Asset, expiry: ExpiryCode) {
        let mut rules = self.rules.write().unwrap_or_else(|e| e.into_inner());
        for ((rule_asset, _), rule) in rules.iter_mut() {
            if *rule_asset == asset && rule.enabled {
                rule.bound_expiry = Some(expiry);
            }
        }
    }

    /// True when at least one rule (any asset) is armed.
    pub fn any_rule_armed(&self) -> bool {
        self.rules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .any(|r| r.is_armed())
    }

    pub fn armed_rule_count(&self) -> usize {
        self.rules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|r| r.is_armed())
            .count()
    }
}

impl Default for MonitorState {
    fn default() -> Self {
        Self::new(crate::cooldown::DEFAULT_ALERT_COOLDOWN)
    }
}
