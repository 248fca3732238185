// src/catalog/delta.rs
//
// Delta Exchange India REST client. Serves both the instrument directory
// (`/v2/products`) and the polled quote feed (`/v2/tickers`).

use crate::error::{MonitorError, Result};
use crate::models::{
    Asset, DeltaEnvelope, DeltaProduct, DeltaTicker, ExpiryCode, InstrumentListing,
    InstrumentSymbol, OptionSide, RawQuote,
};
use crate::traits::{InstrumentDirectory, QuoteFeed};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::time::Duration;
use url::Url;

pub const DELTA_REST_URL: &str = "https://api.india.delta.exchange/v2";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct DeltaCatalog {
    base_url: Url,
    http_client: reqwest::Client,
}

impl DeltaCatalog {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| MonitorError::InvalidConfig(format!("rest url `{}`: {}", base_url, e)))?;
        // Url::join replaces the last segment unless the path ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Ok(Self {
            base_url,
            http_client,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| MonitorError::InvalidConfig(format!("endpoint `{}`: {}", path, e)))
    }

    async fn get_envelope<T>(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        let response = self.http_client.get(url).query(query).send().await?;

        if !response.status().is_success() {
            return Err(MonitorError::TransientFetch(format!(
                "{} returned HTTP {}",
                path,
                response.status()
            )));
        }

        let body: DeltaEnvelope<T> = response.json().await?;
        if body.success == Some(false) {
            return Err(MonitorError::TransientFetch(format!(
                "{} answered success=false",
                path
            )));
        }
        Ok(body.result)
    }
}

#[async_trait]
impl InstrumentDirectory for DeltaCatalog {
    async fn list_instruments(
        &self,
        asset: Asset,
        sides: &[OptionSide],
        states: &[&str],
    ) -> Result<Vec<InstrumentListing>> {
        let contract_types = sides
            .iter()
            .map(|s| s.contract_type())
            .collect::<Vec<_>>()
            .join(",");
        let products: Vec<DeltaProduct> = self
            .get_envelope(
                "products",
                &[
                    ("contract_types", contract_types),
                    ("states", states.join(",")),
                ],
            )
            .await?;

        let total = products.len();
        let listings: Vec<InstrumentListing> = products
            .iter()
            .filter_map(|p| listing_from_product(asset, p))
            .filter(|l| sides.contains(&l.side))
            .collect();

        info!(
            "DeltaCatalog: {} live {} options out of {} products",
            listings.len(),
            asset,
            total
        );
        Ok(listings)
    }
}

#[async_trait]
impl QuoteFeed for DeltaCatalog {
    async fn fetch_quotes(&self, asset: Asset) -> Result<Vec<RawQuote>> {
        let tickers: Vec<DeltaTicker> = self
            .get_envelope(
                "tickers",
                &[
                    (
                        "contract_types",
                        format!(
                            "{},{}",
                            OptionSide::Call.contract_type(),
                            OptionSide::Put.contract_type()
                        ),
                    ),
                    ("underlying_asset_symbols", asset.to_string()),
                ],
            )
            .await?;

        let quotes: Vec<RawQuote> = tickers
            .iter()
            .filter_map(|t| quote_from_ticker(asset, t))
            .collect();
        debug!("DeltaCatalog: {} {} tickers", quotes.len(), asset);
        Ok(quotes)
    }
}

// =============================================================================
// Wire Conversion
// =============================================================================

/// Builds a listing from product metadata. Strike comes from `strike_price`
/// when present; the symbol is only split when the metadata is missing.
pub fn listing_from_product(asset: Asset, product: &DeltaProduct) -> Option<InstrumentListing> {
    let parts: Vec<&str> = product.symbol.split('-').collect();
    if parts.len() != 4 || parts[1] != asset.as_str() {
        return None;
    }

    let side = match OptionSide::from_contract_type(&product.contract_type) {
        Some(side) => side,
        None => match InstrumentSymbol::parse(&product.symbol) {
            Ok(sym) => sym.side,
            Err(_) => return None,
        },
    };

    let expiry: ExpiryCode = match parts[3].parse() {
        Ok(e) => e,
        Err(e) => {
            warn!("DeltaCatalog: Skipping {}: {}", product.symbol, e);
            return None;
        }
    };

    let strike = if product.strike_price.is_finite()
        && product.strike_price >= 1.0
        && product.strike_price <= u32::MAX as f64
    {
        product.strike_price.round() as u32
    } else {
        match parts[2].parse::<u32>() {
            Ok(s) if s > 0 => s,
            _ => {
                warn!("DeltaCatalog: Skipping {}: no usable strike", product.symbol);
                return None;
            }
        }
    };

    Some(InstrumentListing {
        symbol: product.symbol.clone(),
        side,
        strike,
        expiry,
    })
}

/// Keeps option tickers of `asset`; anything else in the batch is dropped.
pub fn quote_from_ticker(asset: Asset, ticker: &DeltaTicker) -> Option<RawQuote> {
    if let Some(ct) = ticker.contract_type.as_deref() {
        OptionSide::from_contract_type(ct)?;
    }
    if ticker.symbol.split('-').nth(1) != Some(asset.as_str()) {
        return None;
    }
    let quotes = ticker.quotes.clone().unwrap_or_default();
    Some(RawQuote {
        symbol: ticker.symbol.clone(),
        best_bid: quotes.best_bid,
        best_ask: quotes.best_ask,
    })
}
