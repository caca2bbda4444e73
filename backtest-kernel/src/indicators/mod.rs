pub mod atr;
pub mod cvd;
pub mod ema;
pub mod sma;

pub use atr::{calculate_atr, true_range, true_range_series};
pub use cvd::calculate_cvd_ratio;
pub use ema::calculate_ema;
pub use sma::calculate_sma;

use common::{BacktestError, IndicatorSpec, Result};
use tracing::{debug, info};

use crate::data::{HistoricalTable, TAKER_BUY_VOLUME};

/// Compute one indicator over the whole table
pub fn compute_indicator(table: &HistoricalTable, spec: &IndicatorSpec) -> Result<Vec<f64>> {
    let values = match spec {
        IndicatorSpec::Sma { period } => {
            check_period(spec, *period)?;
            calculate_sma(table.require_column("close")?, *period)
        }
        IndicatorSpec::Ema { period } => {
            check_period(spec, *period)?;
            calculate_ema(table.require_column("close")?, *period)
        }
        IndicatorSpec::Atr { period, method } => {
            check_period(spec, *period)?;
            calculate_atr(
                table.require_column("high")?,
                table.require_column("low")?,
                table.require_column("close")?,
                *period,
                *method,
            )
        }
        IndicatorSpec::CvdRatio { window } => {
            check_period(spec, *window)?;
            calculate_cvd_ratio(
                table.require_column("volume")?,
                table.require_column(TAKER_BUY_VOLUME)?,
                *window,
            )
        }
        IndicatorSpec::CvdRatioMinutes { window_minutes } => {
            check_period(spec, *window_minutes)?;
            let window = minutes_to_bars(table, *window_minutes);
            debug!(window_minutes, window, "cvd window in bars");
            calculate_cvd_ratio(
                table.require_column("volume")?,
                table.require_column(TAKER_BUY_VOLUME)?,
                window,
            )
        }
    };
    Ok(values)
}

/// Precompute every indicator and store it as a table column.
///
/// Must run before the engine; the engine never writes to the table.
pub fn apply_indicators(table: &mut HistoricalTable, specs: &[IndicatorSpec]) -> Result<()> {
    for spec in specs {
        let name = spec.column_name();
        let values = compute_indicator(table, spec)?;
        let warmup = values.iter().take_while(|v| v.is_nan()).count();
        debug!(column = %name, warmup, "computed indicator");
        table.insert_column(name, values)?;
    }
    if !specs.is_empty() {
        info!(count = specs.len(), rows = table.len(), "indicators applied");
    }
    Ok(())
}

/// Whole bars covered by `minutes` at the table's bar size, at least one
fn minutes_to_bars(table: &HistoricalTable, minutes: usize) -> usize {
    let bar_minutes = table
        .bar_interval()
        .map(|d| d.num_minutes().max(1) as usize)
        .unwrap_or(1);
    (minutes / bar_minutes).max(1)
}

fn check_period(spec: &IndicatorSpec, period: usize) -> Result<()> {
    if period == 0 {
        return Err(BacktestError::InvalidParameter(format!(
            "{} needs a period of at least 1",
            spec.column_name()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{generate_flat_bars, generate_synthetic_bars, resample};
    use common::{AtrMethod, Timeframe};

    #[test]
    fn test_apply_indicators_adds_named_columns() {
        let mut table = HistoricalTable::from_bars(&generate_synthetic_bars(60, 100.0, 3)).unwrap();
        let specs = vec![
            IndicatorSpec::Sma { period: 20 },
            IndicatorSpec::Ema { period: 9 },
            IndicatorSpec::Atr {
                period: 14,
                method: AtrMethod::Ema,
            },
            IndicatorSpec::CvdRatio { window: 5 },
        ];

        apply_indicators(&mut table, &specs).unwrap();

        for name in ["sma_20", "ema_9", "atr_14_ema", "cvd_ratio_5"] {
            assert_eq!(table.column(name).unwrap().len(), 60, "{}", name);
        }
        assert!(table.column("sma_20").unwrap()[18].is_nan());
        assert!(!table.column("sma_20").unwrap()[19].is_nan());
    }

    #[test]
    fn test_cvd_needs_taker_buy_volume() {
        let mut table = HistoricalTable::from_bars(&generate_flat_bars(10, 1.0)).unwrap();

        let err = apply_indicators(&mut table, &[IndicatorSpec::CvdRatio { window: 3 }]);
        assert!(matches!(err, Err(BacktestError::UnknownColumn { .. })));
    }

    #[test]
    fn test_cvd_window_in_minutes_follows_bar_size() {
        let bars = generate_synthetic_bars(120, 100.0, 4);
        let minute_table = HistoricalTable::from_bars(&bars).unwrap();
        let five_minute = resample(&minute_table, Timeframe::M5).unwrap();

        // 15 minutes is 3 five-minute bars
        let by_minutes = compute_indicator(
            &five_minute,
            &IndicatorSpec::CvdRatioMinutes { window_minutes: 15 },
        )
        .unwrap();
        let by_bars =
            compute_indicator(&five_minute, &IndicatorSpec::CvdRatio { window: 3 }).unwrap();
        assert_eq!(by_minutes, by_bars);

        // shorter than one bar still uses a single bar
        assert_eq!(minutes_to_bars(&five_minute, 2), 1);
        assert_eq!(minutes_to_bars(&minute_table, 15), 15);
    }

    #[test]
    fn test_zero_period_rejected() {
        let mut table = HistoricalTable::from_bars(&generate_flat_bars(10, 1.0)).unwrap();

        let err = apply_indicators(&mut table, &[IndicatorSpec::Sma { period: 0 }]);
        assert!(matches!(err, Err(BacktestError::InvalidParameter(_))));
    }
}
