// src/detector/threshold.rs
//
// User strike/premium rules: a call rule watches strikes above its strike, a
// put rule watches strikes below it. Every qualifying strike alerts on its own.

use super::{Alert, AlertKind, ScanContext};
use crate::cooldown::AlertKey;
use crate::models::{AlertRule, OptionSide};
use crate::snapshot::OptionChainSnapshot;

/// A strike whose bid meets a rule's premium.
#[derive(Clone, Debug, PartialEq)]
pub struct ThresholdHit {
    pub side: OptionSide,
    pub strike: u32,
    pub bid: f64,
    pub rule_strike: u32,
    pub premium: f64,
}

/// Strikes on `side` that satisfy `rule`. Unarmed rules match nothing.
pub fn find_hits(chain: &OptionChainSnapshot, side: OptionSide, rule: &AlertRule) -> Vec<ThresholdHit> {
    if !rule.is_armed() {
        return Vec::new();
    }

    chain
        .side(side)
        .iter()
        .filter(|(strike, _)| match side {
            OptionSide::Call => **strike > rule.strike,
            OptionSide::Put => **strike < rule.strike,
        })
        .filter(|(_, quote)| quote.best_bid >= rule.premium)
        .map(|(strike, quote)| ThresholdHit {
            side,
            strike: *strike,
            bid: quote.best_bid,
            rule_strike: rule.strike,
            premium: rule.premium,
        })
        .collect()
}

pub fn scan(
    chain: &OptionChainSnapshot,
    ctx: ScanContext,
    rules: &[(OptionSide, AlertRule)],
) -> Vec<Alert> {
    let stamp = ctx.now.with_timezone(&ctx.tz).format("%Y-%m-%d %H:%M:%S");

    rules
        .iter()
        .flat_map(|(side, rule)| find_hits(chain, *side, rule))
        .map(|hit| {
            let key = AlertKey::Threshold {
                asset: ctx.asset,
                side: hit.side,
                strike: hit.strike,
                rule_strike: hit.rule_strike,
            };
            let comparator = match hit.side {
                OptionSide::Call => '>',
                OptionSide::Put => '<',
            };
            let text = format!(
                "🚨 *{asset} {side} ALERT TRIGGERED!*\n\n\
                 *Condition Met:*\n\
                 • Looking for: Strike {cmp} {rule_strike}\n\
                 • Bid Price ≥ ${premium:.2}\n\n\
                 *Found:*\n\
                 • Strike Price: {strike}\n\
                 • Current Bid: ${bid:.2}\n\n\
                 *Time:* {stamp}",
                asset = ctx.asset,
                side = hit.side.to_string().to_uppercase(),
                cmp = comparator,
                rule_strike = hit.rule_strike,
                premium = hit.premium,
                strike = hit.strike,
                bid = hit.bid,
                stamp = stamp,
            );
            Alert::keyed(ctx.asset, AlertKind::Threshold, key, text)
        })
        .collect()
}
