use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::EngineEvent;

/// OHLCV bar data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Aggressive buy volume, used for order-flow (CVD) indicators
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taker_buy_volume: Option<f64>,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            taker_buy_volume: None,
        }
    }

    pub fn with_taker_buy_volume(mut self, volume: f64) -> Self {
        self.taker_buy_volume = Some(volume);
        self
    }
}

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TimeExit,
    Signal,
    /// Closed to open the opposite direction in the same step
    Reversal,
    /// Forced close at the final row of the run
    EndOfData,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::TakeProfit => "TAKE_PROFIT",
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::TimeExit => "TIME_EXIT",
            ExitReason::Signal => "SIGNAL",
            ExitReason::Reversal => "REVERSAL",
            ExitReason::EndOfData => "END_OF_DATA",
        };
        f.write_str(s)
    }
}

/// The single open position held by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub direction: Direction,
    pub entry_index: usize,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub quantity: f64,
    /// Notional committed at entry (`quantity * entry_price`)
    pub position_value: f64,
    pub entry_commission: f64,
    /// Collateral set aside for a short; zero for longs
    pub margin_used: f64,
    /// Equity base used for percentage P&L
    pub equity_before_entry: f64,
}

impl Position {
    /// Mark-to-market value of the holding, negative for short liabilities
    pub fn signed_value(&self, price: f64) -> f64 {
        self.direction.sign() * self.quantity * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.direction.sign() * (self.quantity * price - self.position_value)
    }

    pub fn unrealized_pnl_pct(&self, price: f64) -> f64 {
        if self.entry_price == 0.0 {
            0.0
        } else {
            self.direction.sign() * (price / self.entry_price - 1.0) * 100.0
        }
    }

    pub fn snapshot(&self, current_index: usize) -> PositionSnapshot {
        PositionSnapshot {
            direction: self.direction,
            entry_index: self.entry_index,
            current_index,
            entry_price: self.entry_price,
            quantity: self.quantity,
            position_value: self.position_value,
        }
    }
}

/// Read-only view of the open position handed to exit strategies
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub direction: Direction,
    pub entry_index: usize,
    pub current_index: usize,
    pub entry_price: f64,
    pub quantity: f64,
    pub position_value: f64,
}

impl PositionSnapshot {
    pub fn bars_held(&self) -> usize {
        self.current_index.saturating_sub(self.entry_index)
    }
}

/// Exit leg of a trade, written once when the position closes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeExit {
    pub exit_index: usize,
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub exit_value: f64,
    pub exit_reason: ExitReason,
    pub commission_exit: f64,
    pub gross_pnl: f64,
    pub net_pnl: f64,
    /// Price move in the position's favour, in percent
    pub pnl_percent: f64,
    /// Net P&L against the equity recorded at entry, in percent
    pub net_pnl_percent: f64,
    pub bars_held: usize,
    pub cash_before_exit: f64,
    pub cash_after_exit: f64,
    pub equity_after_exit: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
}

/// Audit record of one open -> close cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: usize,
    pub direction: Direction,
    pub entry_index: usize,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub quantity: f64,
    pub position_value: f64,
    pub commission_entry: f64,
    pub margin_used: f64,
    pub equity_before_entry: f64,
    pub cash_after_entry: f64,
    pub equity_after_entry: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit: Option<TradeExit>,
}

impl Trade {
    pub fn is_closed(&self) -> bool {
        self.exit.is_some()
    }

    pub fn net_pnl(&self) -> f64 {
        self.exit.as_ref().map(|e| e.net_pnl).unwrap_or(0.0)
    }

    pub fn gross_pnl(&self) -> f64 {
        self.exit.as_ref().map(|e| e.gross_pnl).unwrap_or(0.0)
    }

    pub fn total_commission(&self) -> f64 {
        self.commission_entry + self.exit.as_ref().map(|e| e.commission_exit).unwrap_or(0.0)
    }

    pub fn bars_held(&self) -> usize {
        self.exit.as_ref().map(|e| e.bars_held).unwrap_or(0)
    }
}

/// Mark-to-market state after one simulated step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquitySample {
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub cash: f64,
    pub margin_used: f64,
    pub price: f64,
    pub in_position: bool,
}

/// Per-step audit snapshot for plotting and review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub in_position: bool,
    pub trading_allowed: bool,
    pub available_balance: f64,
    pub total_equity: f64,
    pub direction: Option<Direction>,
    pub position_size: Option<f64>,
    pub entry_price: Option<f64>,
    pub position_value: Option<f64>,
    pub unrealized_pnl: Option<f64>,
    pub unrealized_pnl_percent: Option<f64>,
    pub take_profit: Option<f64>,
    pub stop_loss: Option<f64>,
}

/// Aggregated run metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub initial_capital: f64,
    pub final_cash: f64,
    pub final_equity: f64,
    pub total_return_pct: f64,
    pub total_net_pnl: f64,
    pub total_gross_pnl: f64,
    pub total_commission: f64,
    pub avg_net_pnl: f64,
    pub avg_bars_held: f64,
    pub profit_factor: f64,
    pub max_drawdown_pct: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Backtest result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub summary: BacktestSummary,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquitySample>,
    pub drawdown_curve: Vec<(usize, f64)>,
    pub journal: Vec<JournalEntry>,
    pub events: Vec<EngineEvent>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub risk_manager: String,
}
