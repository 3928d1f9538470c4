//! Tabular store access
//!
//! The engine never talks to the store; the run glue in [`crate::report`]
//! reads proxies and previous statuses from it and writes results back.

pub mod sheets;

use crate::error::{SetupError, StoreError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

pub use sheets::GoogleSheetsStore;

/// A single-letter spreadsheet column, `A` through `Z`
///
/// Multi-letter columns are rejected rather than guessed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Column(char);

impl Column {
    pub const A: Column = Column('A');
    pub const B: Column = Column('B');
    pub const C: Column = Column('C');
    pub const D: Column = Column('D');
    pub const E: Column = Column('E');

    pub fn parse(letter: &str) -> Result<Self, SetupError> {
        let trimmed = letter.trim();
        let mut chars = trimmed.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphabetic() => Ok(Column(c.to_ascii_uppercase())),
            _ => Err(SetupError::InvalidColumn(letter.to_string())),
        }
    }

    /// 1-based column index (`A` = 1)
    pub fn index(self) -> u32 {
        self.0 as u32 - 'A' as u32 + 1
    }

    pub fn letter(self) -> char {
        self.0
    }

    /// A1-style address of a cell in this column
    pub fn cell(self, row: u32) -> String {
        format!("{}{}", self.0, row)
    }
}

impl FromStr for Column {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Column::parse(s)
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One cell write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellUpdate {
    pub column: Column,
    pub row: u32,
    pub value: String,
}

impl CellUpdate {
    pub fn new(column: Column, row: u32, value: impl Into<String>) -> Self {
        Self {
            column,
            row,
            value: value.into(),
        }
    }

    /// A1-style range of this update, without a sheet prefix
    pub fn range(&self) -> String {
        self.column.cell(self.row)
    }
}

/// Spreadsheet-like store of string cells
#[async_trait]
pub trait TabularStore: Send + Sync {
    /// Values of `column` from `start_row` down, trimmed, blanks dropped
    async fn read_column(&self, column: Column, start_row: u32) -> Result<Vec<String>, StoreError>;

    async fn read_cell(&self, row: u32, column: Column) -> Result<Option<String>, StoreError>;

    async fn batch_write(&self, updates: &[CellUpdate]) -> Result<(), StoreError>;
}

/// Store kept in memory, keyed by (row, column index)
#[derive(Debug, Default)]
pub struct InMemoryStore {
    cells: Mutex<BTreeMap<(u32, u32), String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, row: u32, column: Column, value: impl Into<String>) {
        self.lock().insert((row, column.index()), value.into());
    }

    pub fn get(&self, row: u32, column: Column) -> Option<String> {
        self.lock().get(&(row, column.index())).cloned()
    }

    /// Fill `column` downwards from `start_row`
    pub fn fill_column(&self, column: Column, start_row: u32, values: &[&str]) {
        for (offset, value) in values.iter().enumerate() {
            self.set(start_row + offset as u32, column, *value);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<(u32, u32), String>> {
        // A panic while holding the lock leaves plain data behind; keep using it
        self.cells.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TabularStore for InMemoryStore {
    async fn read_column(&self, column: Column, start_row: u32) -> Result<Vec<String>, StoreError> {
        let index = column.index();
        Ok(self
            .lock()
            .iter()
            .filter(|((row, col), _)| *col == index && *row >= start_row)
            .map(|(_, value)| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .collect())
    }

    async fn read_cell(&self, row: u32, column: Column) -> Result<Option<String>, StoreError> {
        Ok(self.get(row, column))
    }

    async fn batch_write(&self, updates: &[CellUpdate]) -> Result<(), StoreError> {
        let mut cells = self.lock();
        for update in updates {
            cells.insert((update.row, update.column.index()), update.value.clone());
        }
        Ok(())
    }
}
