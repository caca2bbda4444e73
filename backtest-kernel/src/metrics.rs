use common::{BacktestSummary, EquitySample, Trade};

/// End-of-run aggregation over the trade ledger and equity samples
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Aggregate closed trades and the equity trace into a summary.
    ///
    /// A run without completed trades yields a capital-preservation summary
    /// carrying a message rather than an error.
    pub fn calculate(
        equity_curve: &[EquitySample],
        trades: &[Trade],
        initial_capital: f64,
        final_cash: f64,
    ) -> BacktestSummary {
        let final_equity = equity_curve
            .last()
            .map(|s| s.equity)
            .unwrap_or(final_cash);
        let total_return_pct = if initial_capital != 0.0 {
            (final_equity / initial_capital - 1.0) * 100.0
        } else {
            0.0
        };

        let closed: Vec<&Trade> = trades.iter().filter(|t| t.is_closed()).collect();
        if closed.is_empty() {
            return BacktestSummary {
                initial_capital,
                final_cash,
                final_equity,
                total_return_pct,
                max_drawdown_pct: Self::calculate_max_drawdown(equity_curve),
                message: Some("No trades executed".to_string()),
                ..BacktestSummary::default()
            };
        }

        let stats = Self::calculate_trade_stats(&closed);

        BacktestSummary {
            total_trades: closed.len(),
            winning_trades: stats.winning,
            losing_trades: closed.len() - stats.winning,
            win_rate: stats.winning as f64 / closed.len() as f64 * 100.0,
            initial_capital,
            final_cash,
            final_equity,
            total_return_pct,
            total_net_pnl: stats.total_net,
            total_gross_pnl: stats.total_gross,
            total_commission: stats.total_commission,
            avg_net_pnl: stats.total_net / closed.len() as f64,
            avg_bars_held: stats.total_bars as f64 / closed.len() as f64,
            profit_factor: stats.profit_factor,
            max_drawdown_pct: Self::calculate_max_drawdown(equity_curve),
            message: None,
        }
    }

    /// Largest percentage drop from a running equity peak, in `[0, 100]`
    pub fn calculate_max_drawdown(equity_curve: &[EquitySample]) -> f64 {
        Self::calculate_drawdown_curve(equity_curve)
            .into_iter()
            .map(|(_, dd)| dd)
            .fold(0.0, f64::max)
    }

    /// Drawdown percentage at every sample, keyed by row index
    pub fn calculate_drawdown_curve(equity_curve: &[EquitySample]) -> Vec<(usize, f64)> {
        let Some(first) = equity_curve.first() else {
            return vec![];
        };

        let mut max_equity = first.equity;
        equity_curve
            .iter()
            .map(|sample| {
                if sample.equity > max_equity {
                    max_equity = sample.equity;
                }
                let drawdown = if max_equity > 0.0 {
                    ((max_equity - sample.equity) / max_equity * 100.0).clamp(0.0, 100.0)
                } else {
                    0.0
                };
                (sample.index, drawdown)
            })
            .collect()
    }

    /// Calculate trade statistics
    fn calculate_trade_stats(trades: &[&Trade]) -> TradeStats {
        let mut stats = TradeStats::default();
        let mut gross_wins = 0.0;
        let mut gross_losses = 0.0;

        for trade in trades {
            let net = trade.net_pnl();
            let gross = trade.gross_pnl();

            if net > 0.0 {
                stats.winning += 1;
            }
            if gross > 0.0 {
                gross_wins += gross;
            } else if gross < 0.0 {
                gross_losses += gross;
            }

            stats.total_net += net;
            stats.total_gross += gross;
            stats.total_commission += trade.total_commission();
            stats.total_bars += trade.bars_held();
        }

        stats.profit_factor = if gross_losses < 0.0 {
            gross_wins / gross_losses.abs()
        } else {
            f64::INFINITY
        };

        stats
    }
}

#[derive(Debug, Default)]
struct TradeStats {
    winning: usize,
    total_net: f64,
    total_gross: f64,
    total_commission: f64,
    total_bars: usize,
    profit_factor: f64,
}
