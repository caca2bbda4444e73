use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use common::{BacktestError, Bar, Result};

/// Columns every historical table must carry
pub const REQUIRED_COLUMNS: [&str; 5] = ["open", "high", "low", "close", "volume"];

/// Column holding aggressive buy volume when the source provides it
pub const TAKER_BUY_VOLUME: &str = "taker_buy_volume";

/// Time-indexed, column-oriented price table.
///
/// Timestamps are strictly increasing and every column has one value per row.
/// The engine only ever reads it; indicators are added before a run starts.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalTable {
    timestamps: Vec<DateTime<Utc>>,
    columns: BTreeMap<String, Vec<f64>>,
}

impl HistoricalTable {
    pub fn new(
        timestamps: Vec<DateTime<Utc>>,
        columns: BTreeMap<String, Vec<f64>>,
    ) -> Result<Self> {
        if let Some(pos) = timestamps.windows(2).position(|w| w[1] <= w[0]) {
            return Err(BacktestError::InvalidTable(format!(
                "timestamps must be strictly increasing: row {} ({}) is not after row {} ({})",
                pos + 1,
                timestamps[pos + 1],
                pos,
                timestamps[pos]
            )));
        }

        for required in REQUIRED_COLUMNS {
            if !columns.contains_key(required) {
                return Err(BacktestError::InvalidTable(format!(
                    "missing required column '{}'",
                    required
                )));
            }
        }

        for (name, values) in &columns {
            if values.len() != timestamps.len() {
                return Err(BacktestError::InvalidTable(format!(
                    "column '{}' has {} values, expected {}",
                    name,
                    values.len(),
                    timestamps.len()
                )));
            }
        }

        for required in REQUIRED_COLUMNS {
            check_finite(required, &columns[required])?;
        }

        Ok(Self {
            timestamps,
            columns,
        })
    }

    /// Skips validation so tests can feed the engine rows a loader would reject
    #[cfg(test)]
    pub(crate) fn new_unchecked(
        timestamps: Vec<DateTime<Utc>>,
        columns: BTreeMap<String, Vec<f64>>,
    ) -> Self {
        Self {
            timestamps,
            columns,
        }
    }

    /// Build a table from bars. `taker_buy_volume` becomes a column only when
    /// every bar carries it.
    pub fn from_bars(bars: &[Bar]) -> Result<Self> {
        let timestamps = bars.iter().map(|b| b.timestamp).collect();

        let mut columns = BTreeMap::new();
        columns.insert("open".to_string(), bars.iter().map(|b| b.open).collect());
        columns.insert("high".to_string(), bars.iter().map(|b| b.high).collect());
        columns.insert("low".to_string(), bars.iter().map(|b| b.low).collect());
        columns.insert("close".to_string(), bars.iter().map(|b| b.close).collect());
        columns.insert("volume".to_string(), bars.iter().map(|b| b.volume).collect());

        let taker_buy: Option<Vec<f64>> = bars.iter().map(|b| b.taker_buy_volume).collect();
        if let Some(values) = taker_buy {
            if !values.is_empty() {
                columns.insert(TAKER_BUY_VOLUME.to_string(), values);
            }
        }

        Self::new(timestamps, columns)
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn timestamp(&self, index: usize) -> Option<DateTime<Utc>> {
        self.timestamps.get(index).copied()
    }

    /// Smallest gap between consecutive rows
    pub fn bar_interval(&self) -> Option<Duration> {
        self.timestamps.windows(2).map(|w| w[1] - w[0]).min()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn column(&self, column: &str) -> Option<&[f64]> {
        self.columns.get(column).map(|v| v.as_slice())
    }

    pub fn require_column(&self, column: &str) -> Result<&[f64]> {
        self.column(column).ok_or_else(|| BacktestError::UnknownColumn {
            column: column.to_string(),
        })
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|k| k.as_str())
    }

    /// Add or replace a derived column
    pub fn insert_column(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        let name = name.into();
        if values.len() != self.len() {
            return Err(BacktestError::InvalidTable(format!(
                "column '{}' has {} values, expected {}",
                name,
                values.len(),
                self.len()
            )));
        }
        if REQUIRED_COLUMNS.contains(&name.as_str()) {
            check_finite(&name, &values)?;
        }
        self.columns.insert(name, values);
        Ok(())
    }

    pub fn closes(&self) -> &[f64] {
        &self.columns["close"]
    }
}

/// Price and volume columns must hold real numbers on every row
fn check_finite(name: &str, values: &[f64]) -> Result<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(row) => Err(BacktestError::InvalidTable(format!(
            "column '{}' has non-finite value {} at row {}",
            name, values[row], row
        ))),
        None => Ok(()),
    }
}
