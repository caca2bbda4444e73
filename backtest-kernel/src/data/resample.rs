//! OHLCV aggregation to a coarser bar size.
//!
//! Buckets are aligned to the Unix epoch, closed on the left and labelled
//! with their start time, so a `1h` bucket labelled 10:00 holds the rows
//! in `[10:00, 11:00)`. Only OHLCV and taker buy volume survive; indicator
//! columns must be computed after resampling.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use common::{BacktestError, Result, Timeframe};
use tracing::{debug, info};

use super::table::{HistoricalTable, TAKER_BUY_VOLUME};

/// Aggregate `table` into `timeframe` bars.
///
/// open is the first value in the bucket, high the max, low the min, close
/// the last; volume and taker buy volume are summed. A bucket with no rows
/// repeats the previous bucket's OHLC with zero volume. `1m` returns the
/// table unchanged.
pub fn resample(table: &HistoricalTable, timeframe: Timeframe) -> Result<HistoricalTable> {
    if timeframe == Timeframe::M1 || table.is_empty() {
        debug!(%timeframe, "no resampling needed");
        return Ok(table.clone());
    }
    if let Some(interval) = table.bar_interval() {
        if interval > timeframe.duration() {
            return Err(BacktestError::InvalidParameter(format!(
                "cannot resample {}-minute bars to {}",
                interval.num_minutes(),
                timeframe
            )));
        }
    }

    let timestamps = table.timestamps();
    let open = table.require_column("open")?;
    let high = table.require_column("high")?;
    let low = table.require_column("low")?;
    let close = table.require_column("close")?;
    let volume = table.require_column("volume")?;
    let taker = table.column(TAKER_BUY_VOLUME);

    let step = timeframe.duration().num_seconds();
    let bucket_of = |ts: &DateTime<Utc>| ts.timestamp().div_euclid(step) * step;
    let first = bucket_of(&timestamps[0]);
    let last = bucket_of(&timestamps[timestamps.len() - 1]);
    let count = ((last - first) / step + 1) as usize;

    let mut out = Buckets::with_capacity(count, taker.is_some());
    let mut row = 0;
    for bucket in 0..count {
        let start = first + bucket as i64 * step;
        let label = Utc.timestamp_opt(start, 0).single().ok_or_else(|| {
            BacktestError::InvalidTable(format!("bucket start {} is out of range", start))
        })?;

        let from = row;
        while row < timestamps.len() && timestamps[row].timestamp() < start + step {
            row += 1;
        }

        if from == row {
            out.push_gap(label);
            continue;
        }
        let rows = from..row;
        out.push(
            label,
            [
                open[from],
                high[rows.clone()].iter().copied().fold(f64::MIN, f64::max),
                low[rows.clone()].iter().copied().fold(f64::MAX, f64::min),
                close[row - 1],
                volume[rows.clone()].iter().sum(),
            ],
            taker.map(|t| t[rows].iter().sum()),
        );
    }

    info!(
        %timeframe,
        from_rows = table.len(),
        to_rows = out.timestamps.len(),
        gaps = out.gaps,
        "resampled data"
    );
    out.into_table()
}

struct Buckets {
    timestamps: Vec<DateTime<Utc>>,
    ohlcv: [Vec<f64>; 5],
    taker: Option<Vec<f64>>,
    gaps: usize,
}

impl Buckets {
    fn with_capacity(count: usize, with_taker: bool) -> Self {
        Self {
            timestamps: Vec::with_capacity(count),
            ohlcv: std::array::from_fn(|_| Vec::with_capacity(count)),
            taker: with_taker.then(|| Vec::with_capacity(count)),
            gaps: 0,
        }
    }

    fn push(&mut self, label: DateTime<Utc>, ohlcv: [f64; 5], taker: Option<f64>) {
        self.timestamps.push(label);
        for (column, value) in self.ohlcv.iter_mut().zip(ohlcv) {
            column.push(value);
        }
        if let (Some(column), Some(value)) = (self.taker.as_mut(), taker) {
            column.push(value);
        }
    }

    /// Forward-fill OHLC from the previous bucket
    fn push_gap(&mut self, label: DateTime<Utc>) {
        let prev = |column: &Vec<f64>| column.last().copied().unwrap_or(f64::NAN);
        let [open, high, low, close, _] = &self.ohlcv;
        let ohlcv = [prev(open), prev(high), prev(low), prev(close), 0.0];
        self.gaps += 1;
        self.push(label, ohlcv, Some(0.0));
    }

    fn into_table(self) -> Result<HistoricalTable> {
        let [open, high, low, close, volume] = self.ohlcv;
        let mut columns = BTreeMap::new();
        columns.insert("open".to_string(), open);
        columns.insert("high".to_string(), high);
        columns.insert("low".to_string(), low);
        columns.insert("close".to_string(), close);
        columns.insert("volume".to_string(), volume);
        if let Some(taker) = self.taker {
            columns.insert(TAKER_BUY_VOLUME.to_string(), taker);
        }
        HistoricalTable::new(self.timestamps, columns)
    }
}
