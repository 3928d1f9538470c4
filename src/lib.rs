//! Proxy Sentinel - scheduled proxy health checker
//!
//! Reads a list of proxies from a spreadsheet column, validates each one
//! through IP-echo services, writes the verdicts back and reports proxies
//! that went from valid to invalid since the previous run.

pub mod config;
pub mod error;
pub mod logging;
pub mod proxy;
pub mod report;
pub mod store;
pub mod tui;

pub use config::{FileConfig, Overrides, RunSettings};
pub use error::{SetupError, StoreError};
pub use proxy::*;
pub use report::{RunSummary, SheetLayout};
pub use store::{Column, GoogleSheetsStore, TabularStore};

/// Application result type
pub type Result<T> = anyhow::Result<T>;
