use common::{Direction, Result};

use super::{crossed_above, crossed_below, EntryStrategy};
use crate::window::DataWindow;

/// Close crosses its SMA between the previous and the current bar
#[derive(Debug, Clone)]
pub struct PriceCrossSma {
    pub sma_column: String,
    pub direction: Direction,
}

impl PriceCrossSma {
    pub fn new(sma_column: impl Into<String>, direction: Direction) -> Self {
        Self {
            sma_column: sma_column.into(),
            direction,
        }
    }
}

impl EntryStrategy for PriceCrossSma {
    fn name(&self) -> &str {
        "price_cross_sma"
    }

    fn should_enter(&self, window: &DataWindow<'_>) -> Result<Option<Direction>> {
        let close = window.column("close")?;
        let sma = window.column(&self.sma_column)?;

        let (prev_close, prev_sma) = (close.get(-1)?, sma.get(-1)?);
        let (cur_close, cur_sma) = (close.get(0)?, sma.get(0)?);

        let fired = match self.direction {
            Direction::Long => prev_close < prev_sma && cur_close > cur_sma,
            Direction::Short => prev_close > prev_sma && cur_close < cur_sma,
        };
        Ok(fired.then_some(self.direction))
    }

    fn required_columns(&self) -> Vec<String> {
        vec!["close".to_string(), self.sma_column.clone()]
    }
}

/// EMA crosses above SMA for longs, below it for shorts
#[derive(Debug, Clone)]
pub struct EmaCrossSma {
    pub ema_column: String,
    pub sma_column: String,
    pub allow_short: bool,
}

impl EmaCrossSma {
    pub fn new(ema_column: impl Into<String>, sma_column: impl Into<String>) -> Self {
        Self {
            ema_column: ema_column.into(),
            sma_column: sma_column.into(),
            allow_short: false,
        }
    }

    pub fn with_short(mut self, allow_short: bool) -> Self {
        self.allow_short = allow_short;
        self
    }

    fn cross(&self, window: &DataWindow<'_>) -> Result<Option<Direction>> {
        let ema = window.column(&self.ema_column)?;
        let sma = window.column(&self.sma_column)?;

        let (prev_ema, prev_sma) = (ema.get(-1)?, sma.get(-1)?);
        let (cur_ema, cur_sma) = (ema.get(0)?, sma.get(0)?);

        if crossed_above(prev_ema, prev_sma, cur_ema, cur_sma) {
            return Ok(Some(Direction::Long));
        }
        if self.allow_short && crossed_below(prev_ema, prev_sma, cur_ema, cur_sma) {
            return Ok(Some(Direction::Short));
        }
        Ok(None)
    }
}

impl EntryStrategy for EmaCrossSma {
    fn name(&self) -> &str {
        "ema_cross_sma"
    }

    fn should_enter(&self, window: &DataWindow<'_>) -> Result<Option<Direction>> {
        self.cross(window)
    }

    fn required_columns(&self) -> Vec<String> {
        vec![self.ema_column.clone(), self.sma_column.clone()]
    }
}

/// [`EmaCrossSma`] confirmed by order flow.
///
/// A bullish cross needs the CVD ratio above `threshold`; a bearish cross
/// needs it below `-threshold`.
#[derive(Debug, Clone)]
pub struct EmaCrossSmaCvd {
    pub cross: EmaCrossSma,
    pub cvd_column: String,
    pub threshold: f64,
}

impl EmaCrossSmaCvd {
    pub fn new(cross: EmaCrossSma, cvd_column: impl Into<String>, threshold: f64) -> Self {
        Self {
            cross,
            cvd_column: cvd_column.into(),
            threshold,
        }
    }
}

impl EntryStrategy for EmaCrossSmaCvd {
    fn name(&self) -> &str {
        "ema_cross_sma_cvd"
    }

    fn should_enter(&self, window: &DataWindow<'_>) -> Result<Option<Direction>> {
        let Some(direction) = self.cross.cross(window)? else {
            return Ok(None);
        };

        let ratio = window.get(&self.cvd_column, 0)?;
        let confirmed = match direction {
            Direction::Long => ratio > self.threshold,
            Direction::Short => ratio < -self.threshold,
        };
        Ok(confirmed.then_some(direction))
    }

    fn required_columns(&self) -> Vec<String> {
        let mut columns = self.cross.required_columns();
        columns.push(self.cvd_column.clone());
        columns
    }
}

/// Reads a precomputed signal: positive is long, negative is short
#[derive(Debug, Clone)]
pub struct SignalColumn {
    pub column: String,
}

impl SignalColumn {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }
}

impl EntryStrategy for SignalColumn {
    fn name(&self) -> &str {
        "signal_column"
    }

    fn should_enter(&self, window: &DataWindow<'_>) -> Result<Option<Direction>> {
        let value = window.get(&self.column, 0)?;
        Ok(if value > 0.0 {
            Some(Direction::Long)
        } else if value < 0.0 {
            Some(Direction::Short)
        } else {
            None
        })
    }

    fn required_columns(&self) -> Vec<String> {
        vec![self.column.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{bars_from_closes, HistoricalTable};
    use common::{BacktestError, WindowError};

    fn table(closes: &[f64], extra: &[(&str, &[f64])]) -> HistoricalTable {
        let mut table = HistoricalTable::from_bars(&bars_from_closes(closes)).unwrap();
        for (name, values) in extra {
            table.insert_column(*name, values.to_vec()).unwrap();
        }
        table
    }

    #[test]
    fn test_price_cross_sma_long() {
        let sma: &[f64] = &[10.0, 10.0, 10.0];
        let t = table(&[9.0, 11.0, 12.0], &[("sma_2", sma)]);
        let strategy = PriceCrossSma::new("sma_2", Direction::Long);

        let at1 = DataWindow::new(&t, 1, 5).unwrap();
        let at2 = DataWindow::new(&t, 2, 5).unwrap();
        assert_eq!(strategy.should_enter(&at1).unwrap(), Some(Direction::Long));
        assert_eq!(strategy.should_enter(&at2).unwrap(), None);
    }

    #[test]
    fn test_ema_cross_sma_both_directions() {
        let ema: &[f64] = &[1.0, 3.0, 1.0];
        let sma: &[f64] = &[2.0, 2.0, 2.0];
        let t = table(&[1.0, 1.0, 1.0], &[("ema_3", ema), ("sma_5", sma)]);

        let long_only = EmaCrossSma::new("ema_3", "sma_5");
        let both = EmaCrossSma::new("ema_3", "sma_5").with_short(true);

        let up = DataWindow::new(&t, 1, 1).unwrap();
        let down = DataWindow::new(&t, 2, 1).unwrap();
        assert_eq!(long_only.should_enter(&up).unwrap(), Some(Direction::Long));
        assert_eq!(long_only.should_enter(&down).unwrap(), None);
        assert_eq!(both.should_enter(&down).unwrap(), Some(Direction::Short));
    }

    #[test]
    fn test_nan_warmup_never_signals() {
        let ema: &[f64] = &[f64::NAN, 3.0];
        let sma: &[f64] = &[f64::NAN, 2.0];
        let t = table(&[1.0, 1.0], &[("ema_3", ema), ("sma_5", sma)]);
        let window = DataWindow::new(&t, 1, 1).unwrap();

        assert_eq!(
            EmaCrossSma::new("ema_3", "sma_5")
                .should_enter(&window)
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_cvd_confirmation() {
        let ema: &[f64] = &[1.0, 3.0];
        let sma: &[f64] = &[2.0, 2.0];
        let weak: &[f64] = &[0.0, 10.0];
        let strong: &[f64] = &[0.0, 35.0];
        let t = table(
            &[1.0, 1.0],
            &[("ema_3", ema), ("sma_5", sma), ("cvd_weak", weak), ("cvd_strong", strong)],
        );
        let window = DataWindow::new(&t, 1, 1).unwrap();

        let weak = EmaCrossSmaCvd::new(EmaCrossSma::new("ema_3", "sma_5"), "cvd_weak", 20.0);
        let strong = EmaCrossSmaCvd::new(EmaCrossSma::new("ema_3", "sma_5"), "cvd_strong", 20.0);
        assert_eq!(weak.should_enter(&window).unwrap(), None);
        assert_eq!(strong.should_enter(&window).unwrap(), Some(Direction::Long));
    }

    #[test]
    fn test_signal_column() {
        let signal: &[f64] = &[1.0, -2.0, 0.0, f64::NAN];
        let t = table(&[1.0, 1.0, 1.0, 1.0], &[("signal", signal)]);
        let strategy = SignalColumn::new("signal");

        let at = |i| strategy.should_enter(&DataWindow::new(&t, i, 0).unwrap()).unwrap();
        assert_eq!(at(0), Some(Direction::Long));
        assert_eq!(at(1), Some(Direction::Short));
        assert_eq!(at(2), None);
        assert_eq!(at(3), None);
    }

    #[test]
    fn test_missing_column_propagates() {
        let t = table(&[1.0, 2.0], &[]);
        let window = DataWindow::new(&t, 1, 1).unwrap();

        let err = PriceCrossSma::new("sma_20", Direction::Long)
            .should_enter(&window)
            .unwrap_err();
        assert!(matches!(
            err,
            BacktestError::Window(WindowError::UnknownColumn { .. })
        ));
    }
}
