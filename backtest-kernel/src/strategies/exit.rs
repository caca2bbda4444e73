use chrono::{DateTime, Utc};
use common::{Direction, ExitReason, PositionSnapshot, Result};

use super::{ExitDecision, ExitStrategy};
use crate::window::DataWindow;

/// Close after the position has been held for a fixed number of bars
#[derive(Debug, Clone)]
pub struct HoldBars {
    pub bars: usize,
}

impl HoldBars {
    pub fn new(bars: usize) -> Self {
        Self { bars }
    }
}

impl ExitStrategy for HoldBars {
    fn name(&self) -> &str {
        "hold_bars"
    }

    fn should_exit(
        &self,
        _window: &DataWindow<'_>,
        _entry_price: f64,
        _entry_time: DateTime<Utc>,
        position: &PositionSnapshot,
    ) -> Result<ExitDecision> {
        if position.bars_held() >= self.bars {
            Ok(ExitDecision::exit(ExitReason::TimeExit))
        } else {
            Ok(ExitDecision::hold())
        }
    }
}

/// Percentage take-profit and stop-loss around the entry price.
///
/// Returns are measured in the position's favour: `price / entry - 1` for
/// longs and `entry / price - 1` for shorts.
#[derive(Debug, Clone)]
pub struct FixedTpSl {
    /// 0.05 = 5%
    pub tp_percent: f64,
    pub sl_percent: f64,
}

impl FixedTpSl {
    pub fn new(tp_percent: f64, sl_percent: f64) -> Self {
        Self {
            tp_percent,
            sl_percent,
        }
    }

    /// Price levels at which the take-profit and stop-loss trigger
    pub fn levels(&self, entry_price: f64, direction: Direction) -> (f64, f64) {
        match direction {
            Direction::Long => (
                entry_price * (1.0 + self.tp_percent),
                entry_price * (1.0 - self.sl_percent),
            ),
            Direction::Short => (
                entry_price / (1.0 + self.tp_percent),
                entry_price / (1.0 - self.sl_percent),
            ),
        }
    }
}

impl ExitStrategy for FixedTpSl {
    fn name(&self) -> &str {
        "fixed_tp_sl"
    }

    fn should_exit(
        &self,
        window: &DataWindow<'_>,
        entry_price: f64,
        _entry_time: DateTime<Utc>,
        position: &PositionSnapshot,
    ) -> Result<ExitDecision> {
        let price = window.close(0)?;
        let pnl_pct = match position.direction {
            Direction::Long => price / entry_price - 1.0,
            Direction::Short => entry_price / price - 1.0,
        };
        let (tp, sl) = self.levels(entry_price, position.direction);

        let decision = if pnl_pct >= self.tp_percent {
            ExitDecision::exit(ExitReason::TakeProfit)
        } else if pnl_pct <= -self.sl_percent {
            ExitDecision::exit(ExitReason::StopLoss)
        } else {
            ExitDecision::hold()
        };
        Ok(decision.with_levels(tp, sl))
    }

    fn stop_loss_estimate(
        &self,
        _window: &DataWindow<'_>,
        entry_price: f64,
        direction: Direction,
    ) -> Result<Option<f64>> {
        let (_, sl) = self.levels(entry_price, direction);
        Ok(Some(sl).filter(|v| v.is_finite()))
    }
}

/// Take-profit and stop-loss at multiples of the current ATR
#[derive(Debug, Clone)]
pub struct AtrBasedExit {
    pub atr_column: String,
    pub tp_multiplier: f64,
    pub sl_multiplier: f64,
}

impl AtrBasedExit {
    pub fn new(atr_column: impl Into<String>, tp_multiplier: f64, sl_multiplier: f64) -> Self {
        Self {
            atr_column: atr_column.into(),
            tp_multiplier,
            sl_multiplier,
        }
    }

    fn levels(&self, entry_price: f64, atr: f64, direction: Direction) -> (f64, f64) {
        let sign = direction.sign();
        (
            entry_price + sign * atr * self.tp_multiplier,
            entry_price - sign * atr * self.sl_multiplier,
        )
    }
}

impl ExitStrategy for AtrBasedExit {
    fn name(&self) -> &str {
        "atr_based_exit"
    }

    fn should_exit(
        &self,
        window: &DataWindow<'_>,
        entry_price: f64,
        _entry_time: DateTime<Utc>,
        position: &PositionSnapshot,
    ) -> Result<ExitDecision> {
        let atr = window.get(&self.atr_column, 0)?;
        let price = window.close(0)?;
        let (tp, sl) = self.levels(entry_price, atr, position.direction);

        let (tp_hit, sl_hit) = match position.direction {
            Direction::Long => (price >= tp, price <= sl),
            Direction::Short => (price <= tp, price >= sl),
        };

        let decision = if tp_hit {
            ExitDecision::exit(ExitReason::TakeProfit)
        } else if sl_hit {
            ExitDecision::exit(ExitReason::StopLoss)
        } else {
            ExitDecision::hold()
        };
        Ok(decision.with_levels(tp, sl))
    }

    fn stop_loss_estimate(
        &self,
        window: &DataWindow<'_>,
        entry_price: f64,
        direction: Direction,
    ) -> Result<Option<f64>> {
        let atr = window.get(&self.atr_column, 0)?;
        let (_, sl) = self.levels(entry_price, atr, direction);
        Ok(Some(sl).filter(|v| v.is_finite()))
    }

    fn required_columns(&self) -> Vec<String> {
        vec![self.atr_column.clone()]
    }
}

/// Never signals; positions close only on reversal or at the end of data
#[derive(Debug, Clone, Default)]
pub struct NeverExit;

impl ExitStrategy for NeverExit {
    fn name(&self) -> &str {
        "never_exit"
    }

    fn should_exit(
        &self,
        _window: &DataWindow<'_>,
        _entry_price: f64,
        _entry_time: DateTime<Utc>,
        _position: &PositionSnapshot,
    ) -> Result<ExitDecision> {
        Ok(ExitDecision::hold())
    }
}
