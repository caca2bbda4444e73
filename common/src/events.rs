use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Direction, ExitReason};

/// Why an entry signal did not produce a position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    /// Requested direction is switched off in the trading mode
    DirectionDisabled,
    InsufficientCapital { required: f64, available: f64 },
    NonPositiveQuantity { quantity: f64 },
}

/// Structured record of something the engine did during a run.
///
/// The engine never logs on its own; callers decide where these go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    RunStarted {
        rows: usize,
        first_index: usize,
        lookback: usize,
        initial_capital: f64,
    },
    PositionOpened {
        index: usize,
        timestamp: DateTime<Utc>,
        direction: Direction,
        price: f64,
        quantity: f64,
        position_value: f64,
        commission: f64,
        cash_after: f64,
        equity_after: f64,
    },
    PositionClosed {
        index: usize,
        timestamp: DateTime<Utc>,
        direction: Direction,
        price: f64,
        reason: ExitReason,
        bars_held: usize,
        net_pnl: f64,
        net_pnl_percent: f64,
    },
    EntryRejected {
        index: usize,
        timestamp: DateTime<Utc>,
        direction: Direction,
        reason: RejectReason,
    },
    TradingSuspended {
        index: usize,
        timestamp: DateTime<Utc>,
        cash: f64,
        drawdown_pct: f64,
    },
    TradingResumed {
        index: usize,
        timestamp: DateTime<Utc>,
    },
    /// The row's close was not finite; the step placed no orders
    PriceUnavailable {
        index: usize,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        steps: usize,
        trades: usize,
        final_equity: f64,
    },
}
