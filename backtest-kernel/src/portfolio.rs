use chrono::{DateTime, Utc};
use common::{Direction, ExitReason, Position, RejectReason, Trade, TradeExit};

/// Single-slot account: cash, short margin, at most one open position and
/// the ledger of every trade opened so far.
///
/// `cash + margin_used` plus the signed value of the open position always
/// reconciles with the trades processed.
#[derive(Debug)]
pub struct Portfolio {
    initial_capital: f64,
    commission: f64,
    cash: f64,
    margin_used: f64,
    position: Option<Position>,
    trades: Vec<Trade>,
}

impl Portfolio {
    pub fn new(initial_capital: f64, commission: f64) -> Self {
        Self {
            initial_capital,
            commission,
            cash: initial_capital,
            margin_used: 0.0,
            position: None,
            trades: Vec::new(),
        }
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    /// Get available cash
    pub fn cash(&self) -> f64 {
        self.cash
    }

    /// Collateral locked by an open short
    pub fn margin_used(&self) -> f64 {
        self.margin_used
    }

    /// Mark-to-market equity at `price`
    pub fn equity(&self, price: f64) -> f64 {
        self.cash
            + self.margin_used
            + self
                .position
                .as_ref()
                .map(|p| p.signed_value(price))
                .unwrap_or(0.0)
    }

    pub fn has_position(&self) -> bool {
        self.position.is_some()
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn into_trades(self) -> Vec<Trade> {
        self.trades
    }

    /// Open a position worth `amount` at `price`.
    ///
    /// Nothing changes (and no commission is charged) when the entry is
    /// rejected.
    pub fn open_position(
        &mut self,
        direction: Direction,
        index: usize,
        timestamp: DateTime<Utc>,
        price: f64,
        amount: f64,
    ) -> Result<&Trade, RejectReason> {
        if amount > self.cash {
            return Err(RejectReason::InsufficientCapital {
                required: amount,
                available: self.cash,
            });
        }
        let quantity = amount / price;
        // Also catches NaN from a degenerate size or price
        if quantity.is_nan() || quantity <= 0.0 || quantity.is_infinite() {
            return Err(RejectReason::NonPositiveQuantity { quantity });
        }

        let position_value = amount;
        let commission = position_value * self.commission;
        let equity_before_entry = self.equity(price);

        let margin_used = match direction {
            Direction::Long => {
                self.cash -= position_value + commission;
                0.0
            }
            Direction::Short => {
                self.cash -= commission;
                self.margin_used += position_value;
                position_value
            }
        };

        self.position = Some(Position {
            direction,
            entry_index: index,
            entry_time: timestamp,
            entry_price: price,
            quantity,
            position_value,
            entry_commission: commission,
            margin_used,
            equity_before_entry,
        });

        let trade = Trade {
            id: self.trades.len() + 1,
            direction,
            entry_index: index,
            entry_time: timestamp,
            entry_price: price,
            quantity,
            position_value,
            commission_entry: commission,
            margin_used,
            equity_before_entry,
            cash_after_entry: self.cash,
            equity_after_entry: self.equity(price),
            exit: None,
        };
        self.trades.push(trade);
        Ok(&self.trades[self.trades.len() - 1])
    }

    /// Close the open position at `price`, completing its trade record
    pub fn close_position(
        &mut self,
        index: usize,
        timestamp: DateTime<Utc>,
        price: f64,
        reason: ExitReason,
        take_profit: Option<f64>,
        stop_loss: Option<f64>,
    ) -> Option<&Trade> {
        let position = self.position.take()?;

        let exit_value = position.quantity * price;
        let commission_exit = exit_value * self.commission;
        let cash_before_exit = self.cash;

        let gross_pnl = match position.direction {
            Direction::Long => {
                self.cash += exit_value - commission_exit;
                exit_value - position.position_value
            }
            Direction::Short => {
                self.cash += position.margin_used - exit_value - commission_exit;
                self.margin_used -= position.margin_used;
                position.position_value - exit_value
            }
        };
        let net_pnl = gross_pnl - (position.entry_commission + commission_exit);

        let net_pnl_percent = if position.equity_before_entry != 0.0 {
            net_pnl / position.equity_before_entry * 100.0
        } else {
            0.0
        };

        let exit = TradeExit {
            exit_index: index,
            exit_time: timestamp,
            exit_price: price,
            exit_value,
            exit_reason: reason,
            commission_exit,
            gross_pnl,
            net_pnl,
            pnl_percent: position.unrealized_pnl_pct(price),
            net_pnl_percent,
            bars_held: index.saturating_sub(position.entry_index),
            cash_before_exit,
            cash_after_exit: self.cash,
            equity_after_exit: self.equity(price),
            take_profit,
            stop_loss,
        };

        let trade = self.trades.last_mut()?;
        trade.exit = Some(exit);
        Some(trade)
    }
}
