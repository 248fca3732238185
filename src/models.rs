// src/models.rs

use crate::error::{MonitorError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Assets and Sides
// =============================================================================

/// Underlying assets the monitor knows how to watch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Asset {
    Btc,
    Eth,
}

impl Asset {
    pub const ALL: [Asset; 2] = [Asset::Btc, Asset::Eth];

    pub fn as_str(&self) -> &'static str {
        match self {
            Asset::Btc => "BTC",
            Asset::Eth => "ETH",
        }
    }

    /// Marker prefixed to this asset's arbitrage alerts.
    pub fn badge(&self) -> &'static str {
        match self {
            Asset::Btc => "🔔",
            Asset::Eth => "🔵",
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Asset {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BTC" => Ok(Asset::Btc),
            "ETH" => Ok(Asset::Eth),
            _ => Err(MonitorError::UnknownAsset(s.to_string())),
        }
    }
}

/// Call or put.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionSide {
    Call,
    Put,
}

impl OptionSide {
    pub const ALL: [OptionSide; 2] = [OptionSide::Call, OptionSide::Put];

    /// Single-letter prefix used in exchange symbols.
    pub fn code(&self) -> &'static str {
        match self {
            OptionSide::Call => "C",
            OptionSide::Put => "P",
        }
    }

    /// Maps the directory's `contract_type` field.
    pub fn from_contract_type(contract_type: &str) -> Option<Self> {
        match contract_type {
            "call_options" => Some(OptionSide::Call),
            "put_options" => Some(OptionSide::Put),
            _ => None,
        }
    }

    pub fn contract_type(&self) -> &'static str {
        match self {
            OptionSide::Call => "call_options",
            OptionSide::Put => "put_options",
        }
    }
}

impl fmt::Display for OptionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionSide::Call => write!(f, "call"),
            OptionSide::Put => write!(f, "put"),
        }
    }
}

impl FromStr for OptionSide {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "call" | "c" => Ok(OptionSide::Call),
            "put" | "p" => Ok(OptionSide::Put),
            _ => Err(MonitorError::InvalidConfig(format!("unknown option side `{}`", s))),
        }
    }
}

// =============================================================================
// Expiry Codes
// =============================================================================

/// A contract expiry in the exchange's `DDMMYY` form.
///
/// Stored as a calendar date so ordering is chronological: `010225` sorts
/// after `310125` even though it is lexicographically smaller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExpiryCode(NaiveDate);

impl ExpiryCode {
    pub fn from_date(date: NaiveDate) -> Self {
        ExpiryCode(date)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// Canonical `DDMMYY` code, as it appears inside symbols.
    pub fn code(&self) -> String {
        self.0.format("%d%m%y").to_string()
    }

    /// Human form used in notifications, e.g. `01 Jan 25`.
    pub fn display_long(&self) -> String {
        self.0.format("%d %b %y").to_string()
    }
}

impl FromStr for ExpiryCode {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MonitorError::malformed(s, "expiry must be six digits DDMMYY"));
        }
        NaiveDate::parse_from_str(s, "%d%m%y")
            .map(ExpiryCode)
            .map_err(|e| MonitorError::malformed(s, format!("invalid expiry date: {}", e)))
    }
}

impl TryFrom<String> for ExpiryCode {
    type Error = MonitorError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ExpiryCode> for String {
    fn from(e: ExpiryCode) -> Self {
        e.code()
    }
}

impl fmt::Display for ExpiryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%d%m%y"))
    }
}

// =============================================================================
// Instrument Symbols
// =============================================================================

/// A parsed option symbol, e.g. `C-BTC-100000-010125`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct InstrumentSymbol {
    pub side: OptionSide,
    pub asset: Asset,
    pub strike: u32,
    pub expiry: ExpiryCode,
}

impl InstrumentSymbol {
    pub fn new(side: OptionSide, asset: Asset, strike: u32, expiry: ExpiryCode) -> Self {
        Self {
            side,
            asset,
            strike,
            expiry,
        }
    }

    /// Parses `{C|P}-{ASSET}-{STRIKE}-{DDMMYY}`.
    pub fn parse(symbol: &str) -> Result<Self> {
        let parts: Vec<&str> = symbol.split('-').collect();
        if parts.len() != 4 {
            return Err(MonitorError::malformed(
                symbol,
                format!("expected 4 dash-separated parts, got {}", parts.len()),
            ));
        }

        let side = match parts[0] {
            "C" => OptionSide::Call,
            "P" => OptionSide::Put,
            other => {
                return Err(MonitorError::malformed(
                    symbol,
                    format!("unknown side prefix `{}`", other),
                ))
            }
        };
        let asset: Asset = parts[1]
            .parse()
            .map_err(|_| MonitorError::malformed(symbol, format!("unknown asset `{}`", parts[1])))?;
        let strike: u32 = parts[2]
            .parse()
            .map_err(|_| MonitorError::malformed(symbol, format!("bad strike `{}`", parts[2])))?;
        if strike == 0 {
            return Err(MonitorError::malformed(symbol, "strike must be positive"));
        }
        let expiry: ExpiryCode = parts[3]
            .parse()
            .map_err(|_| MonitorError::malformed(symbol, format!("bad expiry `{}`", parts[3])))?;

        Ok(Self::new(side, asset, strike, expiry))
    }
}

impl fmt::Display for InstrumentSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.side.code(),
            self.asset,
            self.strike,
            self.expiry
        )
    }
}

/// One live instrument as reported by the instrument directory.
///
/// Strike and expiry come from structured metadata where the directory
/// provides them, so subscriptions never depend on string heuristics.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InstrumentListing {
    pub symbol: String,
    pub side: OptionSide,
    pub strike: u32,
    pub expiry: ExpiryCode,
}

// =============================================================================
// Quotes and Rules
// =============================================================================

/// Best bid/ask for one instrument. Zero means "no quote" on that side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Quote {
    pub best_bid: f64,
    pub best_ask: f64,
}

impl Quote {
    /// Builds a quote, mapping negative or non-finite prices to "no quote".
    pub fn new(best_bid: f64, best_ask: f64) -> Self {
        Self {
            best_bid: sanitize_price(best_bid),
            best_ask: sanitize_price(best_ask),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.best_bid == 0.0 && self.best_ask == 0.0
    }
}

fn sanitize_price(p: f64) -> f64 {
    if p.is_finite() && p > 0.0 {
        p
    } else {
        0.0
    }
}

/// A quote as delivered by a feed, before symbol parsing.
#[derive(Clone, Debug, PartialEq)]
pub struct RawQuote {
    pub symbol: String,
    pub best_bid: f64,
    pub best_ask: f64,
}

/// User-configured strike/premium rule for one asset and side.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Call rules look above this strike, put rules below it. Zero means unset.
    pub strike: u32,
    /// Minimum bid that qualifies.
    pub premium: f64,
    pub enabled: bool,
    pub last_updated: Option<DateTime<Utc>>,
    /// Expiry the rule was last bound to; repointed on rollover.
    pub bound_expiry: Option<ExpiryCode>,
}

impl AlertRule {
    /// A rule only fires when enabled and both levels are set.
    pub fn is_armed(&self) -> bool {
        self.enabled && self.strike > 0 && self.premium > 0.0
    }
}

// =============================================================================
// Time Helpers
// =============================================================================

/// Wall-clock `HH:MM:SS` in the reference timezone, used in alert bodies.
pub fn clock_string(now: DateTime<Utc>, tz: Tz) -> String {
    now.with_timezone(&tz).format("%H:%M:%S").to_string()
}

// --- Raw Delta Exchange Types (Used for JSON parsing only) ---

/// Inbound WebSocket frame. Only `l1_orderbook` and `subscriptions` matter.
#[derive(Debug, Deserialize, Clone)]
pub struct DeltaWsMessage {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub symbol: Option<String>,
    #[serde(default, deserialize_with = "de_price")]
    pub best_bid: f64,
    #[serde(default, deserialize_with = "de_price")]
    pub best_ask: f64,
}

/// `{ "success": bool, "result": [...] }` envelope used by the REST API.
#[derive(Debug, Deserialize)]
pub struct DeltaEnvelope<T> {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default = "Vec::new")]
    pub result: Vec<T>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeltaTicker {
    #[serde(default)]
    pub symbol: String,
    pub contract_type: Option<String>,
    pub quotes: Option<DeltaTickerQuotes>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DeltaTickerQuotes {
    #[serde(default, deserialize_with = "de_price")]
    pub best_bid: f64,
    #[serde(default, deserialize_with = "de_price")]
    pub best_ask: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeltaProduct {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub contract_type: String,
    #[serde(default, deserialize_with = "de_price")]
    pub strike_price: f64,
    pub state: Option<String>,
}

/// Delta sends prices as strings ("12.5"), numbers, or null.
fn de_price<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}
