// src/catalog/mod.rs
//
// Instrument discovery. The directory answers "which option contracts are live
// for this asset right now", and the helpers here reduce a listing to the
// expiries and symbols the lifecycle manager needs.

pub mod delta;

pub use delta::{DeltaCatalog, DELTA_REST_URL};

use crate::models::{ExpiryCode, InstrumentListing};
use std::collections::BTreeSet;

/// Distinct expiries present in a listing, oldest first.
pub fn listed_expiries(listings: &[InstrumentListing]) -> BTreeSet<ExpiryCode> {
    listings.iter().map(|l| l.expiry).collect()
}

/// Sorted, deduplicated symbols of one expiry.
pub fn symbols_for_expiry(listings: &[InstrumentListing], expiry: ExpiryCode) -> Vec<String> {
    let set: BTreeSet<&str> = listings
        .iter()
        .filter(|l| l.expiry == expiry)
        .map(|l| l.symbol.as_str())
        .collect();
    set.into_iter().map(String::from).collect()
}
