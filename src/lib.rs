// src/lib.rs

pub mod catalog;
pub mod config;
pub mod connectors;
pub mod cooldown;
pub mod dashboard;
pub mod detector;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod notify;
pub mod snapshot;
pub mod state;
pub mod traits;

pub use error::{MonitorError, Result};
