// src/connectors/mod.rs
//
// Quote ingestion adapters. Both write through into a `SnapshotStore` and
// expose the same start/stop/resubscribe surface to the orchestrator.

pub mod polling;
pub mod streaming;

pub use polling::{DeltaPoller, DEFAULT_POLL_INTERVAL};
pub use streaming::{DeltaStream, DEFAULT_RECONNECT_DELAY, DELTA_WS_URL};
