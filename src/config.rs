// src/config.rs
//
// Configuration file parsing. A TOML file selects which assets to watch, how
// each one is fed (streamed or polled), the timing knobs and the notifier.
// Every field has a default, so an empty file is a valid configuration.

use crate::catalog::DELTA_REST_URL;
use crate::connectors::{DEFAULT_POLL_INTERVAL, DEFAULT_RECONNECT_DELAY, DELTA_WS_URL};
use crate::cooldown::DEFAULT_ALERT_COOLDOWN;
use crate::engine::{
    MonitorSettings, DEFAULT_DETECTION_INTERVAL, DEFAULT_EXPIRY_CHECK_INTERVAL,
    DEFAULT_MIN_QUOTED_SYMBOLS,
};
use crate::error::{MonitorError, Result};
use crate::lifecycle::ReferenceClock;
use crate::models::Asset;
use crate::notify::{LogNotifier, TelegramNotifier, TELEGRAM_API_URL};
use crate::state::default_threshold;
use crate::traits::SharedNotifier;
use chrono::NaiveTime;
use chrono_tz::Tz;
use log::{info, warn};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const TELEGRAM_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
pub const TELEGRAM_CHAT_ENV: &str = "TELEGRAM_CHAT_ID";

// =============================================================================
// Configuration Types
// =============================================================================

/// Root configuration structure.
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    /// Monitored assets; defaults to streamed ETH and polled BTC.
    #[serde(default = "default_assets")]
    pub assets: Vec<AssetConfig>,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

/// Global configuration settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Dashboard port (None = no dashboard)
    pub dashboard_port: Option<u16>,
    /// Minimum seconds between two alerts with the same key
    pub cooldown_secs: u64,
    /// Seconds between detection passes
    pub detection_interval_secs: u64,
    /// Seconds between expiry lifecycle checks
    pub expiry_check_secs: u64,
    /// Arbitrage scans are skipped below this many quoted instruments
    pub min_quoted_symbols: usize,
    /// IANA name of the exchange-local timezone
    pub timezone: String,
    /// Daily expiry cutover, `HH:MM` in `timezone`
    pub cutover: String,
    /// REST base for the instrument directory and ticker feed
    pub rest_url: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            dashboard_port: Some(10000),
            cooldown_secs: DEFAULT_ALERT_COOLDOWN.as_secs(),
            detection_interval_secs: DEFAULT_DETECTION_INTERVAL.as_secs(),
            expiry_check_secs: DEFAULT_EXPIRY_CHECK_INTERVAL.as_secs(),
            min_quoted_symbols: DEFAULT_MIN_QUOTED_SYMBOLS,
            timezone: "Asia/Kolkata".to_string(),
            cutover: "17:30".to_string(),
            rest_url: DELTA_REST_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    /// Push updates over the exchange WebSocket.
    Websocket,
    /// Full ticker batches over REST.
    Rest,
}

/// Configuration for one monitored asset.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetConfig {
    pub asset: Asset,
    pub feed: FeedKind,
    /// Arbitrage threshold; the asset default when omitted
    pub threshold: Option<f64>,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_ws_url() -> String {
    DELTA_WS_URL.to_string()
}

fn default_reconnect_delay_secs() -> u64 {
    DEFAULT_RECONNECT_DELAY.as_secs()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_assets() -> Vec<AssetConfig> {
    vec![
        AssetConfig {
            asset: Asset::Eth,
            feed: FeedKind::Websocket,
            threshold: None,
            ws_url: default_ws_url(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        },
        AssetConfig {
            asset: Asset::Btc,
            feed: FeedKind::Rest,
            threshold: None,
            ws_url: default_ws_url(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        },
    ]
}

impl AssetConfig {
    pub fn threshold(&self) -> f64 {
        self.threshold.unwrap_or_else(|| default_threshold(self.asset))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Notification transport. Credentials missing from the file are taken from
/// `TELEGRAM_BOT_TOKEN` / `TELEGRAM_CHAT_ID`.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub api_url: String,
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            api_url: TELEGRAM_API_URL.to_string(),
            bot_token: None,
            chat_id: None,
        }
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

impl Default for Config {
    fn default() -> Self {
        Self {
            global: GlobalConfig::default(),
            assets: default_assets(),
            notifier: NotifierConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(&path).map_err(|e| {
            MonitorError::InvalidConfig(format!(
                "failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_str(&contents)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)
            .map_err(|e| MonitorError::InvalidConfig(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Fills absent Telegram credentials from the environment.
    pub fn with_env_overrides(mut self) -> Self {
        if self.notifier.bot_token.is_none() {
            self.notifier.bot_token = std::env::var(TELEGRAM_TOKEN_ENV).ok().filter(|v| !v.is_empty());
        }
        if self.notifier.chat_id.is_none() {
            self.notifier.chat_id = std::env::var(TELEGRAM_CHAT_ENV).ok().filter(|v| !v.is_empty());
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        let g = &self.global;
        if g.cooldown_secs == 0 || g.detection_interval_secs == 0 || g.expiry_check_secs == 0 {
            return Err(MonitorError::InvalidConfig(
                "cooldown, detection and expiry intervals must be positive".into(),
            ));
        }
        self.timezone()?;
        self.cutover()?;
        check_url(&g.rest_url, &["http", "https"])?;
        check_url(&self.notifier.api_url, &["http", "https"])?;

        let mut seen = HashSet::new();
        for a in &self.assets {
            if !seen.insert(a.asset) {
                return Err(MonitorError::InvalidConfig(format!(
                    "asset {} configured twice",
                    a.asset
                )));
            }
            let threshold = a.threshold();
            if !threshold.is_finite() || threshold <= 0.0 {
                return Err(MonitorError::InvalidConfig(format!(
                    "{} threshold must be positive",
                    a.asset
                )));
            }
            match a.feed {
                FeedKind::Websocket => {
                    check_url(&a.ws_url, &["ws", "wss"])?;
                }
                FeedKind::Rest => {
                    if a.poll_interval_ms == 0 {
                        return Err(MonitorError::InvalidConfig(format!(
                            "{} poll interval must be positive",
                            a.asset
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.global.timezone.parse::<Tz>().map_err(|e| {
            MonitorError::InvalidConfig(format!("timezone `{}`: {}", self.global.timezone, e))
        })
    }

    pub fn cutover(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.global.cutover, "%H:%M").map_err(|e| {
            MonitorError::InvalidConfig(format!("cutover `{}`: {}", self.global.cutover, e))
        })
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.global.cooldown_secs)
    }

    pub fn settings(&self) -> Result<MonitorSettings> {
        Ok(MonitorSettings {
            detection_interval: Duration::from_secs(self.global.detection_interval_secs),
            expiry_check_interval: Duration::from_secs(self.global.expiry_check_secs),
            min_quoted_symbols: self.global.min_quoted_symbols,
            clock: ReferenceClock::new(self.timezone()?, self.cutover()?),
        })
    }

    /// Telegram when both credentials are known, otherwise log-only.
    pub fn build_notifier(&self) -> SharedNotifier {
        match (&self.notifier.bot_token, &self.notifier.chat_id) {
            (Some(token), Some(chat)) => {
                info!("Notifications: Telegram chat {}", chat);
                Arc::new(TelegramNotifier::new(
                    &self.notifier.api_url,
                    token.clone(),
                    chat.clone(),
                ))
            }
            _ => {
                warn!("Notifications: Telegram not configured, logging only");
                Arc::new(LogNotifier)
            }
        }
    }
}

fn check_url(raw: &str, schemes: &[&str]) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| MonitorError::InvalidConfig(format!("url `{}`: {}", raw, e)))?;
    if !schemes.contains(&url.scheme()) {
        return Err(MonitorError::InvalidConfig(format!(
            "url `{}` must use one of {:?}",
            raw, schemes
        )));
    }
    Ok(url)
}

// =============================================================================
// Default Configuration
// =============================================================================

/// Returns a default configuration string for documentation.
pub fn default_config_template() -> &'static str {
    r#"# Options Alert Bot Configuration
#
# Every key is optional. Telegram credentials may instead be supplied through
# the TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID environment variables; without
# them alerts are only logged.

[global]
# JSON API port (omit to disable)
dashboard_port = 10000

# Minimum seconds between two alerts for the same condition
cooldown_secs = 60

# Seconds between detection passes
detection_interval_secs = 2

# Seconds between expiry rollover checks
expiry_check_secs = 60

# Arbitrage scans are skipped below this many quoted instruments
min_quoted_symbols = 10

# Daily expiry cutover in the exchange timezone
timezone = "Asia/Kolkata"
cutover = "17:30"

rest_url = "https://api.india.delta.exchange/v2"

[[assets]]
asset = "ETH"
feed = "websocket"
threshold = 0.16
ws_url = "wss://socket.india.delta.exchange"
reconnect_delay_secs = 10

[[assets]]
asset = "BTC"
feed = "rest"
threshold = 2.0
poll_interval_ms = 1000

[notifier]
api_url = "https://api.telegram.org"
# bot_token = "123456:ABC..."
# chat_id = "-1001234567890"
"#
}

// =============================================================================
// Tests
// =============================================================================
