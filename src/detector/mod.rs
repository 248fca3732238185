// src/detector/mod.rs
//
// Detection passes over a read-copy of one asset's option chain. The scans are
// pure; `evaluate` runs both and filters the candidates through the shared
// cooldown gate.

pub mod arbitrage;
pub mod threshold;

use crate::cooldown::AlertKey;
use crate::models::Asset;
use crate::snapshot::OptionChainSnapshot;
use crate::state::MonitorState;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

/// What produced a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Arbitrage,
    Threshold,
    Rollover,
    Config,
    Lifecycle,
}

/// A notification ready for the sink.
#[derive(Clone, Debug)]
pub struct Alert {
    pub asset: Asset,
    pub kind: AlertKind,
    /// Deduplication identity. Only detector alerts carry one.
    pub key: Option<AlertKey>,
    pub text: String,
}

impl Alert {
    pub fn keyed(asset: Asset, kind: AlertKind, key: AlertKey, text: String) -> Self {
        Self {
            asset,
            kind,
            key: Some(key),
            text,
        }
    }

    pub fn unkeyed(asset: Asset, kind: AlertKind, text: String) -> Self {
        Self {
            asset,
            kind,
            key: None,
            text,
        }
    }
}

/// Inputs shared by both scans for one tick.
#[derive(Clone, Copy, Debug)]
pub struct ScanContext {
    pub asset: Asset,
    pub now: DateTime<Utc>,
    pub tz: Tz,
}

/// Runs the arbitrage scan then the threshold scan and returns the alerts the
/// cooldown gate lets through. Keyed alerts that are suppressed are dropped.
pub fn evaluate(
    state: &MonitorState,
    chain: &OptionChainSnapshot,
    ctx: ScanContext,
    min_quoted_symbols: usize,
) -> Vec<Alert> {
    let mut candidates = arbitrage::scan(
        chain,
        ctx,
        state.threshold(ctx.asset),
        min_quoted_symbols,
    );
    candidates.extend(threshold::scan(chain, ctx, &state.rules_for(ctx.asset)));

    candidates
        .into_iter()
        .filter(|alert| match &alert.key {
            Some(key) => state.cooldown().can_alert(key),
            None => true,
        })
        .collect()
}
