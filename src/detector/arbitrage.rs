// src/detector/arbitrage.rs
//
// Cross-strike arbitrage over adjacent strikes of one expiry.
//
// Call: buy the lower strike at its ask, sell the higher strike at its bid.
// Put:  buy the higher strike at its ask, sell the lower strike at its bid.
// A call spread is never worth less than zero, and the same holds for a put
// spread in the other direction, so a positive gap is a locked-in profit.

use super::{Alert, AlertKind, ScanContext};
use crate::cooldown::AlertKey;
use crate::models::{clock_string, OptionSide};
use crate::snapshot::OptionChainSnapshot;

/// One adjacent-strike mispricing, before cooldown gating.
#[derive(Clone, Debug, PartialEq)]
pub struct ArbitrageSignal {
    pub side: OptionSide,
    pub lower_strike: u32,
    pub upper_strike: u32,
    /// Price paid on the bought leg.
    pub buy_ask: f64,
    /// Price received on the sold leg.
    pub sell_bid: f64,
    pub gap: f64,
}

impl ArbitrageSignal {
    /// Strike bought first, strike sold second.
    pub fn legs(&self) -> (u32, u32) {
        match self.side {
            OptionSide::Call => (self.lower_strike, self.upper_strike),
            OptionSide::Put => (self.upper_strike, self.lower_strike),
        }
    }
}

/// Finds every adjacent pair whose gap is strictly positive and at least
/// `threshold`. Legs with no quote on the relevant side never fire.
pub fn find_signals(chain: &OptionChainSnapshot, threshold: f64) -> Vec<ArbitrageSignal> {
    let strikes = chain.strikes();
    let mut signals = Vec::new();

    for pair in strikes.windows(2) {
        let (s1, s2) = (pair[0], pair[1]);

        let call_ask = chain.quote(OptionSide::Call, s1).best_ask;
        let call_bid = chain.quote(OptionSide::Call, s2).best_bid;
        if let Some(gap) = qualifying_gap(call_ask, call_bid, threshold) {
            signals.push(ArbitrageSignal {
                side: OptionSide::Call,
                lower_strike: s1,
                upper_strike: s2,
                buy_ask: call_ask,
                sell_bid: call_bid,
                gap,
            });
        }

        let put_ask = chain.quote(OptionSide::Put, s2).best_ask;
        let put_bid = chain.quote(OptionSide::Put, s1).best_bid;
        if let Some(gap) = qualifying_gap(put_ask, put_bid, threshold) {
            signals.push(ArbitrageSignal {
                side: OptionSide::Put,
                lower_strike: s1,
                upper_strike: s2,
                buy_ask: put_ask,
                sell_bid: put_bid,
                gap,
            });
        }
    }

    signals
}

fn qualifying_gap(ask: f64, bid: f64, threshold: f64) -> Option<f64> {
    if ask <= 0.0 || bid <= 0.0 {
        return None;
    }
    let gap = bid - ask;
    (gap > 0.0 && gap >= threshold).then_some(gap)
}

/// Full arbitrage pass: liquidity floor, signal search, message rendering.
pub fn scan(
    chain: &OptionChainSnapshot,
    ctx: ScanContext,
    threshold: f64,
    min_quoted_symbols: usize,
) -> Vec<Alert> {
    if chain.len() < min_quoted_symbols {
        return Vec::new();
    }
    let Some(expiry) = chain.expiry() else {
        return Vec::new();
    };

    let clock = clock_string(ctx.now, ctx.tz);
    find_signals(chain, threshold)
        .into_iter()
        .map(|signal| {
            let key = AlertKey::Arbitrage {
                asset: ctx.asset,
                side: signal.side,
                lower_strike: signal.lower_strike,
                upper_strike: signal.upper_strike,
                expiry,
            };
            let (buy, sell) = signal.legs();
            let label = match signal.side {
                OptionSide::Call => "Call",
                OptionSide::Put => "Put",
            };
            let text = format!(
                "{} {} Alert {}\n{} (B) → {} (S)\n${:.2}    ${:.2}\nProfit: ${:.2}\n{} | {}",
                ctx.asset.badge(),
                ctx.asset,
                label,
                buy,
                sell,
                signal.buy_ask,
                signal.sell_bid,
                signal.gap,
                expiry.display_long(),
                clock
            );
            Alert::keyed(ctx.asset, AlertKind::Arbitrage, key, text)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::test_support::{chain, pad};
    use crate::models::Asset;
    use chrono::{TimeZone, Utc};

    fn ctx() -> ScanContext {
        ScanContext {
            asset: Asset::Btc,
            // 11:30:00 IST
            now: Utc.with_ymd_and_hms(2025, 1, 1, 6, 0, 0).unwrap(),
            tz: chrono_tz::Asia::Kolkata,
        }
    }

    #[test]
    fn test_call_arbitrage_fires_with_expected_text() {
        let mut snap = chain(
            "010125",
            &[
                (OptionSide::Call, 100_000, 0.0, 10.0),
                (OptionSide::Call, 101_000, 13.0, 0.0),
            ],
        );
        pad(&mut snap, 10);

        let alerts = scan(&snap, ctx(), 2.0, 10);
        assert_eq!(alerts.len(), 1);
        assert_eq!(
            alerts[0].text,
            "🔔 BTC Alert Call\n100000 (B) → 101000 (S)\n$10.00    $13.00\nProfit: $3.00\n01 Jan 25 | 11:30:00"
        );
        assert_eq!(
            alerts[0].key,
            Some(AlertKey::Arbitrage {
                asset: Asset::Btc,
                side: OptionSide::Call,
                lower_strike: 100_000,
                upper_strike: 101_000,
                expiry: "010125".parse().unwrap(),
            })
        );
    }

    #[test]
    fn test_small_call_gap_against_threshold() {
        let snap = chain(
            "010125",
            &[
                (OptionSide::Call, 100, 0.0, 5.00),
                (OptionSide::Call, 105, 5.20, 0.0),
            ],
        );
        assert_eq!(find_signals(&snap, 0.10).len(), 1);
        assert!(find_signals(&snap, 0.30).is_empty());
    }

    #[test]
    fn test_put_arbitrage_buys_upper_sells_lower() {
        let snap = chain(
            "010125",
            &[
                (OptionSide::Put, 3000, 8.0, 0.0),
                (OptionSide::Put, 3100, 0.0, 5.0),
            ],
        );

        let signals = find_signals(&snap, 0.16);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].side, OptionSide::Put);
        assert_eq!(signals[0].legs(), (3100, 3000));
        assert!((signals[0].gap - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_gap_below_threshold_is_silent() {
        let snap = chain(
            "010125",
            &[
                (OptionSide::Call, 100_000, 0.0, 10.0),
                (OptionSide::Call, 101_000, 11.0, 0.0),
            ],
        );
        assert!(find_signals(&snap, 2.0).is_empty());
        assert_eq!(find_signals(&snap, 1.0).len(), 1);
    }

    #[test]
    fn test_missing_leg_never_fires() {
        // Ask of zero means "no offer", not a free option.
        let snap = chain(
            "010125",
            &[
                (OptionSide::Call, 100_000, 0.0, 0.0),
                (OptionSide::Call, 101_000, 13.0, 0.0),
            ],
        );
        assert!(find_signals(&snap, 0.0).is_empty());
    }

    #[test]
    fn test_non_positive_gap_never_fires_even_at_zero_threshold() {
        let snap = chain(
            "010125",
            &[
                (OptionSide::Call, 100_000, 0.0, 10.0),
                (OptionSide::Call, 101_000, 10.0, 0.0),
                (OptionSide::Put, 100_000, 4.0, 0.0),
                (OptionSide::Put, 101_000, 0.0, 6.0),
            ],
        );
        assert!(find_signals(&snap, 0.0).is_empty());
    }

    #[test]
    fn test_only_adjacent_pairs_are_compared() {
        let snap = chain(
            "010125",
            &[
                (OptionSide::Call, 100, 0.0, 10.0),
                (OptionSide::Call, 110, 9.0, 11.0),
                (OptionSide::Call, 120, 15.0, 0.0),
            ],
        );
        let signals = find_signals(&snap, 0.5);
        // 100→110 has gap -1; 110→120 has gap 4; 100→120 is never considered.
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].legs(), (110, 120));
    }

    #[test]
    fn test_liquidity_floor() {
        let snap = chain(
            "010125",
            &[
                (OptionSide::Call, 100_000, 0.0, 10.0),
                (OptionSide::Call, 101_000, 13.0, 0.0),
            ],
        );
        assert!(scan(&snap, ctx(), 2.0, 10).is_empty());
        assert_eq!(scan(&snap, ctx(), 2.0, 2).len(), 1);
    }
}
