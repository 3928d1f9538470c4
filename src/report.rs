//! Reading run input from and writing verdicts back to a tabular store

use crate::error::{SetupError, StoreError};
use crate::proxy::changes::{baseline_statuses, detect_transitions};
use crate::proxy::models::VerdictRecord;
use crate::store::{CellUpdate, Column, TabularStore};
use indexmap::IndexSet;
use std::collections::HashMap;
use tracing::{debug, info};

/// Timestamp format written to the date column
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const STATUS_HEADER: &str = "Status";
const MESSAGE_HEADER: &str = "Message";
const DATE_HEADER: &str = "Checked At";
const PREVIOUS_STATUS_HEADER: &str = "Previous Status";

/// Largest row a Google Sheets grid can hold
pub const MAX_ROW: u32 = 10_000_000;

/// Where proxies are read from and results written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetLayout {
    pub proxy: Column,
    pub status: Column,
    pub message: Column,
    pub date: Column,
    pub previous_status: Column,
    /// First data row, 1-based
    pub start_row: u32,
}

impl SheetLayout {
    pub fn from_letters(
        proxy: &str,
        status: &str,
        message: &str,
        date: &str,
        previous_status: &str,
        start_row: u32,
    ) -> Result<Self, SetupError> {
        if start_row == 0 {
            return Err(SetupError::InvalidSetting("start row must be 1 or greater".to_string()));
        }
        if start_row > MAX_ROW {
            return Err(SetupError::InvalidSetting(format!(
                "start row {} is past the last sheet row ({})",
                start_row, MAX_ROW
            )));
        }
        Ok(Self {
            proxy: Column::parse(proxy)?,
            status: Column::parse(status)?,
            message: Column::parse(message)?,
            date: Column::parse(date)?,
            previous_status: Column::parse(previous_status)?,
            start_row,
        })
    }

    /// Row of the `index`-th proxy read from the proxy column
    pub fn row(&self, index: usize) -> u32 {
        let offset = u32::try_from(index).unwrap_or(u32::MAX);
        self.start_row.saturating_add(offset)
    }
}

impl Default for SheetLayout {
    fn default() -> Self {
        Self {
            proxy: Column::A,
            status: Column::B,
            message: Column::C,
            date: Column::D,
            previous_status: Column::E,
            start_row: 2,
        }
    }
}

/// Counts and transitions of one persisted run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub valid: usize,
    pub invalid: usize,
    pub total: usize,
    pub became_invalid: IndexSet<String>,
}

impl RunSummary {
    pub fn new(verdicts: &[VerdictRecord], became_invalid: IndexSet<String>) -> Self {
        let valid = verdicts.iter().filter(|v| v.is_valid).count();
        Self {
            valid,
            invalid: verdicts.len() - valid,
            total: verdicts.len(),
            became_invalid,
        }
    }
}

/// Proxies from the proxy column, in row order
pub async fn read_proxies(
    store: &dyn TabularStore,
    layout: &SheetLayout,
) -> Result<Vec<String>, StoreError> {
    let proxies = store.read_column(layout.proxy, layout.start_row).await?;
    info!(count = proxies.len(), column = %layout.proxy, "loaded proxies");
    Ok(proxies)
}

/// Status recorded by the previous run for each proxy
///
/// When a proxy appears more than once, the last row wins.
pub async fn read_previous_statuses(
    store: &dyn TabularStore,
    layout: &SheetLayout,
) -> Result<HashMap<String, String>, StoreError> {
    let proxies = store.read_column(layout.proxy, layout.start_row).await?;
    let mut previous = HashMap::new();
    for (index, proxy) in proxies.into_iter().enumerate() {
        if let Some(status) = store.read_cell(layout.row(index), layout.status).await? {
            let status = status.trim();
            if !status.is_empty() {
                previous.insert(proxy, status.to_string());
            }
        }
    }
    debug!(count = previous.len(), "read previous statuses");
    Ok(previous)
}

/// Cell writes for one run
///
/// `previous` is `None` when change tracking is off, in which case the
/// previous-status column is left alone.
pub fn build_updates(
    layout: &SheetLayout,
    verdicts: &[VerdictRecord],
    previous: Option<&HashMap<String, String>>,
    timestamp: &str,
) -> Vec<CellUpdate> {
    let baselines = previous.map(|prev| baseline_statuses(verdicts, prev));
    let mut updates = Vec::with_capacity(verdicts.len() * 4);

    for (index, verdict) in verdicts.iter().enumerate() {
        let row = layout.row(index);
        updates.push(CellUpdate::new(layout.status, row, verdict.status().as_str()));
        updates.push(CellUpdate::new(layout.message, row, verdict.message.clone()));
        updates.push(CellUpdate::new(layout.date, row, timestamp));
        if let Some(baselines) = &baselines {
            updates.push(CellUpdate::new(layout.previous_status, row, baselines[index].clone()));
        }
    }
    updates
}

/// Header cells missing from row 1
///
/// Only applies to the usual layout where data starts on row 2.
pub async fn missing_headers(
    store: &dyn TabularStore,
    layout: &SheetLayout,
) -> Result<Vec<CellUpdate>, StoreError> {
    if layout.start_row != 2 {
        return Ok(Vec::new());
    }
    let headers = [
        (layout.status, STATUS_HEADER),
        (layout.message, MESSAGE_HEADER),
        (layout.date, DATE_HEADER),
        (layout.previous_status, PREVIOUS_STATUS_HEADER),
    ];
    let mut updates = Vec::new();
    for (column, title) in headers {
        let existing = store.read_cell(1, column).await?;
        if existing.map_or(true, |v| v.trim().is_empty()) {
            updates.push(CellUpdate::new(column, 1, title));
        }
    }
    Ok(updates)
}

/// Write a run's verdicts back and report what changed
///
/// Previous statuses are read before anything is written.
pub async fn persist_run(
    store: &dyn TabularStore,
    layout: &SheetLayout,
    verdicts: &[VerdictRecord],
    track_changes: bool,
    timestamp: &str,
) -> Result<RunSummary, StoreError> {
    let previous = if track_changes {
        Some(read_previous_statuses(store, layout).await?)
    } else {
        None
    };

    let mut updates = build_updates(layout, verdicts, previous.as_ref(), timestamp);
    updates.extend(missing_headers(store, layout).await?);
    store.batch_write(&updates).await?;

    let became_invalid = previous
        .as_ref()
        .map(|prev| detect_transitions(verdicts, prev))
        .unwrap_or_default();
    let summary = RunSummary::new(verdicts, became_invalid);
    info!(
        valid = summary.valid,
        total = summary.total,
        became_invalid = summary.became_invalid.len(),
        "results written"
    );
    Ok(summary)
}
