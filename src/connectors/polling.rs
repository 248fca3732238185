// src/connectors/polling.rs

use crate::error::Result;
use crate::models::{Asset, InstrumentSymbol, Quote};
use crate::snapshot::SnapshotStore;
use crate::state::AssetHealth;
use crate::traits::{IngestionAdapter, QuoteFeed};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// One fetch-and-replace cycle, shared by the background loop and tests.
#[derive(Clone)]
pub struct PollWorker {
    asset: Asset,
    feed: Arc<dyn QuoteFeed>,
    store: Arc<SnapshotStore>,
    health: Arc<AssetHealth>,
}

impl PollWorker {
    /// Fetches one full batch and replaces the snapshot content with it.
    /// Returns the number of quotes kept for the active expiry.
    pub async fn poll_once(&self) -> Result<usize> {
        let fetch_no = self.health.record_fetch();

        let raw = match self.feed.fetch_quotes(self.asset).await {
            Ok(raw) => raw,
            Err(e) => {
                self.health.record_fetch_error();
                self.health.set_connected(false);
                return Err(e);
            }
        };
        self.health.set_connected(true);

        let mut batch = Vec::with_capacity(raw.len());
        for quote in raw {
            match InstrumentSymbol::parse(&quote.symbol) {
                Ok(symbol) if symbol.asset == self.asset => {
                    batch.push((symbol, Quote::new(quote.best_bid, quote.best_ask)));
                }
                Ok(_) => {}
                Err(e) => {
                    self.health.record_malformed();
                    debug!("DeltaPoller[{}]: {}", self.asset, e);
                }
            }
        }

        let kept = self.store.replace_all(batch).await;
        if fetch_no % 30 == 0 {
            info!(
                "DeltaPoller[{}]: Fetches={}, quotes held={}",
                self.asset, fetch_no, kept
            );
        }
        Ok(kept)
    }

    async fn run(self, period: Duration) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.poll_once().await {
                warn!("DeltaPoller[{}]: Fetch failed: {}", self.asset, e);
            }
        }
    }
}

/// Quotes pulled from a REST feed on a fixed interval.
pub struct DeltaPoller {
    worker: PollWorker,
    period: Duration,
    symbols: Mutex<Vec<String>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DeltaPoller {
    pub fn new(
        feed: Arc<dyn QuoteFeed>,
        store: Arc<SnapshotStore>,
        health: Arc<AssetHealth>,
        period: Duration,
    ) -> Self {
        Self {
            worker: PollWorker {
                asset: store.asset(),
                feed,
                store,
                health,
            },
            period,
            symbols: Mutex::new(Vec::new()),
            task: Mutex::new(None),
        }
    }

    pub async fn poll_once(&self) -> Result<usize> {
        self.worker.poll_once().await
    }
}

#[async_trait]
impl IngestionAdapter for DeltaPoller {
    fn kind(&self) -> &'static str {
        "rest"
    }

    async fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        *task = Some(tokio::spawn(self.worker.clone().run(self.period)));
        info!(
            "DeltaPoller[{}]: Polling every {}ms",
            self.worker.asset,
            self.period.as_millis()
        );
    }

    async fn stop(&self) {
        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
            self.worker.health.set_connected(false);
            info!("DeltaPoller[{}]: Stopped", self.worker.asset);
        }
    }

    /// The poller always fetches the whole chain; the symbol set only
    /// records what the active expiry currently lists.
    async fn resubscribe(&self, symbols: Vec<String>) {
        *self.symbols.lock().unwrap_or_else(|e| e.into_inner()) = symbols;
    }

    fn symbols(&self) -> Vec<String> {
        self.symbols.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    fn is_connected(&self) -> bool {
        self.worker.health.is_connected()
    }
}
