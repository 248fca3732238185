// tests/common/mod.rs
//
// In-memory fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use options_alert_bot::error::{MonitorError, Result};
use options_alert_bot::models::{Asset, InstrumentListing, InstrumentSymbol, OptionSide};
use options_alert_bot::traits::{IngestionAdapter, InstrumentDirectory, Notifier};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// 11:30:00 IST on 1 Jan 2025, before the cutover.
pub fn morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 6, 0, 0).unwrap()
}

/// 18:00:00 IST on 1 Jan 2025, after the cutover.
pub fn evening() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, 30, 0).unwrap()
}

/// Calls and puts at the given strikes for each expiry.
pub fn listings(asset: Asset, strikes: &[u32], expiries: &[&str]) -> Vec<InstrumentListing> {
    let mut out = Vec::new();
    for expiry in expiries {
        for strike in strikes {
            for side in OptionSide::ALL {
                let symbol = format!("{}-{}-{}-{}", side.code(), asset, strike, expiry);
                let parsed = InstrumentSymbol::parse(&symbol).unwrap();
                out.push(InstrumentListing {
                    symbol,
                    side,
                    strike: parsed.strike,
                    expiry: parsed.expiry,
                });
            }
        }
    }
    out
}

// --- Directory ---

#[derive(Default)]
pub struct FakeDirectory {
    listings: Mutex<Vec<InstrumentListing>>,
    fail: AtomicBool,
    delay_ms: AtomicU64,
    pub calls: AtomicUsize,
}

impl FakeDirectory {
    pub fn with(listings: Vec<InstrumentListing>) -> Self {
        let dir = Self::default();
        dir.set(listings);
        dir
    }

    pub fn set(&self, listings: Vec<InstrumentListing>) {
        *self.listings.lock().unwrap() = listings;
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Every listing call waits this long before answering.
    pub fn slow(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl InstrumentDirectory for FakeDirectory {
    async fn list_instruments(
        &self,
        asset: Asset,
        sides: &[OptionSide],
        _states: &[&str],
    ) -> Result<Vec<InstrumentListing>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(MonitorError::TransientFetch("directory offline".into()));
        }
        Ok(self
            .listings
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.symbol.contains(asset.as_str()) && sides.contains(&l.side))
            .cloned()
            .collect())
    }
}

// --- Adapter ---

#[derive(Default)]
pub struct FakeAdapter {
    symbols: Mutex<Vec<String>>,
    pub resubscribes: Mutex<Vec<Vec<String>>>,
    running: AtomicBool,
    stall: AtomicBool,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

impl FakeAdapter {
    /// Makes every later `resubscribe` hang forever.
    pub fn stall_resubscribe(&self) {
        self.stall.store(true, Ordering::SeqCst);
    }

    pub fn last_resubscribe(&self) -> Option<Vec<String>> {
        self.resubscribes.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl IngestionAdapter for FakeAdapter {
    fn kind(&self) -> &'static str {
        "fake"
    }

    async fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    async fn resubscribe(&self, symbols: Vec<String>) {
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        *self.symbols.lock().unwrap() = symbols.clone();
        self.resubscribes.lock().unwrap().push(symbols);
    }

    fn symbols(&self) -> Vec<String> {
        self.symbols.lock().unwrap().clone()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

// --- Notifier ---

#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.messages().iter().filter(|m| m.contains(needle)).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}
