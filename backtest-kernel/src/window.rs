//! Causal view over a historical table.
//!
//! A `DataWindow` is built for one simulated step. Offset `0` is the current
//! row, negative offsets walk back in time, positive offsets are always an
//! error. Rows after the current index are never reachable even though they
//! physically exist in the backing table.
//!
//! ```text
//! window.get("close", 0)     // current close
//! window.get("close", -1)    // previous close
//! window.get("sma_20", -5)   // SMA five bars ago
//! ```

use chrono::{DateTime, Utc};
use common::WindowError;

use crate::data::HistoricalTable;

type WindowResult<T> = std::result::Result<T, WindowError>;

/// Read-only, lookback-bounded view ending at the current row
#[derive(Debug, Clone, Copy)]
pub struct DataWindow<'a> {
    table: &'a HistoricalTable,
    current: usize,
    start: usize,
    lookback: usize,
}

impl<'a> DataWindow<'a> {
    /// Construction is O(1): nothing is copied, only bounds are fixed.
    pub fn new(table: &'a HistoricalTable, current_index: usize, lookback: usize) -> WindowResult<Self> {
        if current_index >= table.len() {
            return Err(WindowError::OutOfRange {
                offset: 0,
                current: current_index,
                start: current_index.saturating_sub(lookback),
            });
        }

        Ok(Self {
            table,
            current: current_index,
            start: current_index.saturating_sub(lookback),
            lookback,
        })
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    /// First absolute row reachable through this window
    pub fn start_index(&self) -> usize {
        self.start
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    /// Number of rows visible, including the current one
    pub fn len(&self) -> usize {
        self.current - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.table.timestamps()[self.current]
    }

    pub fn timestamp_at(&self, offset: i64) -> WindowResult<DateTime<Utc>> {
        let idx = self.resolve(offset)?;
        Ok(self.table.timestamps()[idx])
    }

    pub fn contains(&self, column: &str) -> bool {
        self.table.contains(column)
    }

    pub fn get(&self, column: &str, offset: i64) -> WindowResult<f64> {
        self.column(column)?.get(offset)
    }

    /// Shorthand for `get("close", offset)`
    pub fn close(&self, offset: i64) -> WindowResult<f64> {
        self.get("close", offset)
    }

    /// Offset-addressable series for one column
    pub fn column(&self, column: &str) -> WindowResult<ColumnView<'a>> {
        let values = self
            .table
            .column(column)
            .ok_or_else(|| WindowError::UnknownColumn {
                column: column.to_string(),
            })?;

        Ok(ColumnView {
            values: &values[self.start..=self.current],
            current: self.current,
            start: self.start,
        })
    }

    fn resolve(&self, offset: i64) -> WindowResult<usize> {
        resolve_offset(offset, self.current, self.start)
    }
}

fn resolve_offset(offset: i64, current: usize, start: usize) -> WindowResult<usize> {
    if offset > 0 {
        return Err(WindowError::FutureOffset { offset });
    }
    let back = offset.unsigned_abs() as usize;
    if back > current - start {
        return Err(WindowError::OutOfRange {
            offset,
            current,
            start,
        });
    }
    Ok(current - back)
}

/// One column of a `DataWindow`, clipped to `start..=current`
#[derive(Debug, Clone, Copy)]
pub struct ColumnView<'a> {
    values: &'a [f64],
    current: usize,
    start: usize,
}

impl<'a> ColumnView<'a> {
    pub fn get(&self, offset: i64) -> WindowResult<f64> {
        let idx = resolve_offset(offset, self.current, self.start)?;
        Ok(self.values[idx - self.start])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Up to `lookback` past values followed by the current one
    pub fn history(&self, lookback: usize) -> &'a [f64] {
        let from = self.values.len().saturating_sub(lookback.saturating_add(1));
        &self.values[from..]
    }

    pub fn as_slice(&self) -> &'a [f64] {
        self.values
    }
}
