// src/traits.rs

use crate::error::Result;
use crate::models::{Asset, InstrumentListing, OptionSide, RawQuote};
use async_trait::async_trait;
use std::sync::Arc;

/// Source of live instrument metadata (the exchange's product listing).
#[async_trait]
pub trait InstrumentDirectory: Send + Sync {
    /// Lists live option instruments of `asset` matching the given sides and states.
    /// Instruments whose metadata cannot be interpreted are skipped, not errored.
    async fn list_instruments(
        &self,
        asset: Asset,
        sides: &[OptionSide],
        states: &[&str],
    ) -> Result<Vec<InstrumentListing>>;
}

/// A full quote batch for one asset, internally consistent as of one fetch.
#[async_trait]
pub trait QuoteFeed: Send + Sync {
    async fn fetch_quotes(&self, asset: Asset) -> Result<Vec<RawQuote>>;
}

/// Outbound alert transport.
///
/// Callers treat delivery as fire-and-forget: a failure is logged and never retried.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
}

/// Quote ingestion capability shared by the streaming and polling adapters.
#[async_trait]
pub trait IngestionAdapter: Send + Sync {
    /// Human-readable adapter kind for logs and health output.
    fn kind(&self) -> &'static str;

    /// Starts the background ingestion task. Calling it while running is a no-op.
    async fn start(&self);

    /// Stops ingestion (closes the connection or halts the poll loop). Idempotent.
    async fn stop(&self);

    /// Replaces the subscribed/fetched symbol set. The previous set is discarded.
    async fn resubscribe(&self, symbols: Vec<String>);

    /// Current symbol set.
    fn symbols(&self) -> Vec<String>;

    fn is_running(&self) -> bool;

    /// True while the adapter has a live upstream (socket open / last poll succeeded).
    fn is_connected(&self) -> bool;
}

pub type SharedDirectory = Arc<dyn InstrumentDirectory>;
pub type SharedNotifier = Arc<dyn Notifier>;
