//! Route engine events to `tracing`.

use common::{EngineEvent, RejectReason};
use tracing::{debug, info, warn};

/// Emit an engine event through the installed `tracing` subscriber
pub trait LogEvent {
    fn log(&self);
}

impl LogEvent for EngineEvent {
    fn log(&self) {
        match self {
            EngineEvent::RunStarted {
                rows,
                first_index,
                lookback,
                initial_capital,
            } => info!(
                rows,
                first_index, lookback, initial_capital, "backtest started"
            ),
            EngineEvent::PositionOpened {
                index,
                timestamp,
                direction,
                price,
                quantity,
                position_value,
                commission,
                cash_after,
                equity_after,
            } => info!(
                index,
                %timestamp,
                %direction,
                price,
                quantity,
                position_value,
                commission,
                cash_after,
                equity_after,
                "entry"
            ),
            EngineEvent::PositionClosed {
                index,
                timestamp,
                direction,
                price,
                reason,
                bars_held,
                net_pnl,
                net_pnl_percent,
            } => info!(
                index,
                %timestamp,
                %direction,
                price,
                %reason,
                bars_held,
                net_pnl,
                net_pnl_percent,
                "exit"
            ),
            EngineEvent::EntryRejected {
                index,
                timestamp,
                direction,
                reason,
            } => match reason {
                RejectReason::DirectionDisabled => {
                    debug!(index, %timestamp, %direction, "entry signal for disabled direction")
                }
                RejectReason::InsufficientCapital {
                    required,
                    available,
                } => warn!(
                    index,
                    %timestamp,
                    %direction,
                    required,
                    available,
                    "entry rejected: insufficient capital"
                ),
                RejectReason::NonPositiveQuantity { quantity } => warn!(
                    index,
                    %timestamp,
                    %direction,
                    quantity,
                    "entry rejected: non-positive quantity"
                ),
            },
            EngineEvent::TradingSuspended {
                index,
                timestamp,
                cash,
                drawdown_pct,
            } => warn!(index, %timestamp, cash, drawdown_pct, "trading suspended by risk manager"),
            EngineEvent::TradingResumed { index, timestamp } => {
                info!(index, %timestamp, "trading resumed")
            }
            EngineEvent::PriceUnavailable { index, timestamp } => {
                warn!(index, %timestamp, "close is not finite, step skipped")
            }
            EngineEvent::RunCompleted {
                steps,
                trades,
                final_equity,
            } => info!(steps, trades, final_equity, "backtest completed"),
        }
    }
}

/// Log every event in order
pub fn log_events(events: &[EngineEvent]) {
    for event in events {
        event.log();
    }
}
