use common::Direction;

use super::{RiskContext, RiskManager};

/// Risk a fixed fraction of capital per trade.
///
/// The position is sized so that hitting the stop loses `risk_per_trade` of
/// capital, capped at `max_position_pct` of capital. Without a stop estimate
/// a 10% stop is assumed.
#[derive(Debug, Clone)]
pub struct FixedPercentRisk {
    pub risk_per_trade: f64,
    pub max_position_pct: f64,
    /// Minimum quantity; smaller positions are sized to zero
    pub min_position_size: f64,
    /// Fractional drawdown beyond which new entries are blocked
    pub max_drawdown: f64,
    pub min_capital: f64,
    /// Typical volatility; sizes are halved when the current value is more than twice this
    pub reference_volatility: Option<f64>,
}

impl Default for FixedPercentRisk {
    fn default() -> Self {
        Self {
            risk_per_trade: 0.02,
            max_position_pct: 1.0,
            min_position_size: 0.0,
            max_drawdown: 0.10,
            min_capital: 100.0,
            reference_volatility: None,
        }
    }
}

impl FixedPercentRisk {
    pub fn new(risk_per_trade: f64) -> Self {
        Self {
            risk_per_trade,
            ..Self::default()
        }
    }

    pub fn with_max_position_pct(mut self, pct: f64) -> Self {
        self.max_position_pct = pct;
        self
    }

    pub fn with_max_drawdown(mut self, max_drawdown: f64) -> Self {
        self.max_drawdown = max_drawdown;
        self
    }

    fn adjust_for_volatility(&self, value: f64, volatility: Option<f64>) -> f64 {
        match (volatility, self.reference_volatility) {
            (Some(current), Some(reference)) if reference > 0.0 && current / reference > 2.0 => {
                value * 0.5
            }
            _ => value,
        }
    }
}

impl RiskManager for FixedPercentRisk {
    fn name(&self) -> &str {
        "fixed_percent"
    }

    fn can_trade(&self, capital: f64, drawdown: f64, _context: &RiskContext) -> bool {
        drawdown <= self.max_drawdown && capital >= self.min_capital
    }

    fn calculate_position_size(
        &self,
        capital: f64,
        entry_price: f64,
        stop_loss: Option<f64>,
        direction: Direction,
        volatility: Option<f64>,
    ) -> f64 {
        if entry_price <= 0.0 {
            return 0.0;
        }

        let stop = stop_loss.unwrap_or(match direction {
            Direction::Long => entry_price * 0.9,
            Direction::Short => entry_price * 1.1,
        });
        let risk_per_unit = match direction {
            Direction::Long => entry_price - stop,
            Direction::Short => stop - entry_price,
        };

        // Stop on the wrong side of the entry
        if risk_per_unit <= 0.0 {
            return capital * 0.01;
        }

        let risk_amount = capital * self.risk_per_trade;
        let max_value = capital * self.max_position_pct;
        let value = (risk_amount / risk_per_unit * entry_price).min(max_value);

        if value / entry_price < self.min_position_size {
            return 0.0;
        }

        self.adjust_for_volatility(value, volatility)
    }
}

/// Commit a constant fraction of available capital to every position
#[derive(Debug, Clone)]
pub struct FixedFraction {
    pub fraction: f64,
}

impl FixedFraction {
    pub fn new(fraction: f64) -> Self {
        Self { fraction }
    }
}

impl RiskManager for FixedFraction {
    fn name(&self) -> &str {
        "fixed_fraction"
    }

    fn can_trade(&self, _capital: f64, _drawdown: f64, _context: &RiskContext) -> bool {
        true
    }

    fn calculate_position_size(
        &self,
        capital: f64,
        _entry_price: f64,
        _stop_loss: Option<f64>,
        _direction: Direction,
        _volatility: Option<f64>,
    ) -> f64 {
        capital * self.fraction
    }
}
