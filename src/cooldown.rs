// src/cooldown.rs

use crate::models::{Asset, ExpiryCode, OptionSide};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default minimum gap between two notifications for the same condition.
pub const DEFAULT_ALERT_COOLDOWN: Duration = Duration::from_secs(60);

/// Identity of a logical alert condition.
///
/// Each detector owns one variant, so keys can never collide across detectors.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AlertKey {
    Arbitrage {
        asset: Asset,
        side: OptionSide,
        lower_strike: u32,
        upper_strike: u32,
        expiry: ExpiryCode,
    },
    Threshold {
        asset: Asset,
        side: OptionSide,
        strike: u32,
        rule_strike: u32,
    },
}

/// Deduplicates alerts by key within a fixed window.
///
/// Entries are never evicted; staleness is judged on lookup.
pub struct CooldownGate {
    window: Duration,
    last_fired: Mutex<HashMap<AlertKey, Instant>>,
}

impl CooldownGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fired: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns true (and records `now`) if `key` may fire.
    pub fn can_alert(&self, key: &AlertKey) -> bool {
        self.can_alert_at(key, Instant::now())
    }

    pub fn can_alert_at(&self, key: &AlertKey, now: Instant) -> bool {
        let mut map = self
            .last_fired
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let permitted = match map.get(key) {
            None => true,
            Some(last) => now.saturating_duration_since(*last) >= self.window,
        };
        if permitted {
            map.insert(key.clone(), now);
        }
        permitted
    }

    pub fn len(&self) -> usize {
        self.last_fired
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CooldownGate {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_COOLDOWN)
    }
}
