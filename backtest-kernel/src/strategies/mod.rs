//! Pluggable decision collaborators.
//!
//! The engine is handed one entry strategy, one exit strategy and one risk
//! manager at construction. Each reads market data only through the
//! [`DataWindow`] it is given for the current step.

pub mod entry;
pub mod exit;
pub mod factory;
pub mod risk;

pub use entry::{EmaCrossSma, EmaCrossSmaCvd, PriceCrossSma, SignalColumn};
pub use exit::{AtrBasedExit, FixedTpSl, HoldBars, NeverExit};
pub use factory::{build_entry, build_exit, build_risk};
pub use risk::{FixedFraction, FixedPercentRisk};

use chrono::{DateTime, Utc};
use common::{Direction, ExitReason, PositionSnapshot, Result};

use crate::window::DataWindow;

/// Decides when to open a position and in which direction
pub trait EntryStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// `None` means no signal on this step
    fn should_enter(&self, window: &DataWindow<'_>) -> Result<Option<Direction>>;

    /// Table columns this strategy reads
    fn required_columns(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Outcome of one exit check, including the live TP/SL levels if any
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExitDecision {
    pub exit: bool,
    pub reason: Option<ExitReason>,
    pub take_profit: Option<f64>,
    pub stop_loss: Option<f64>,
}

impl ExitDecision {
    pub fn hold() -> Self {
        Self::default()
    }

    pub fn exit(reason: ExitReason) -> Self {
        Self {
            exit: true,
            reason: Some(reason),
            ..Self::default()
        }
    }

    /// Attach price levels; non-finite levels are dropped
    pub fn with_levels(mut self, take_profit: f64, stop_loss: f64) -> Self {
        self.take_profit = Some(take_profit).filter(|v| v.is_finite());
        self.stop_loss = Some(stop_loss).filter(|v| v.is_finite());
        self
    }
}

/// Decides when to close the open position
pub trait ExitStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn should_exit(
        &self,
        window: &DataWindow<'_>,
        entry_price: f64,
        entry_time: DateTime<Utc>,
        position: &PositionSnapshot,
    ) -> Result<ExitDecision>;

    /// Stop-loss price the strategy would use for an entry at `entry_price`.
    /// Handed to the risk manager for sizing.
    fn stop_loss_estimate(
        &self,
        _window: &DataWindow<'_>,
        _entry_price: f64,
        _direction: Direction,
    ) -> Result<Option<f64>> {
        Ok(None)
    }

    fn required_columns(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Account state passed to [`RiskManager::can_trade`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskContext {
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub peak_equity: f64,
    pub in_position: bool,
}

/// Gates trading and sizes new positions
pub trait RiskManager: Send + Sync {
    fn name(&self) -> &str;

    /// `drawdown` is the current fractional drop from the equity peak (0.1 = 10%)
    fn can_trade(&self, capital: f64, drawdown: f64, context: &RiskContext) -> bool;

    /// Monetary amount to commit to the position
    fn calculate_position_size(
        &self,
        capital: f64,
        entry_price: f64,
        stop_loss: Option<f64>,
        direction: Direction,
        volatility: Option<f64>,
    ) -> f64;
}

/// Shared crossover test: `a` moved from at-or-below `b` to strictly above it
pub(crate) fn crossed_above(prev_a: f64, prev_b: f64, a: f64, b: f64) -> bool {
    prev_a <= prev_b && a > b
}

pub(crate) fn crossed_below(prev_a: f64, prev_b: f64, a: f64, b: f64) -> bool {
    prev_a >= prev_b && a < b
}
