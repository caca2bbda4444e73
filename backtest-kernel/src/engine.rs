use chrono::{DateTime, Utc};
use common::{
    BacktestError, BacktestResult, Direction, EngineEvent, EquitySample, ExitReason,
    JournalEntry, RejectReason, Result, RunConfig,
};

use crate::data::HistoricalTable;
use crate::metrics::MetricsCalculator;
use crate::portfolio::Portfolio;
use crate::strategies::{EntryStrategy, ExitStrategy, RiskContext, RiskManager};
use crate::window::DataWindow;

/// Row-by-row simulation driven by injected entry, exit and risk collaborators.
///
/// The engine holds no per-run state, so one instance can run any number of
/// tables.
pub struct BacktestEngine {
    config: RunConfig,
    entry: Box<dyn EntryStrategy>,
    exit: Box<dyn ExitStrategy>,
    risk: Box<dyn RiskManager>,
}

/// Mutable state of a single run
struct RunState {
    portfolio: Portfolio,
    equity_curve: Vec<EquitySample>,
    journal: Vec<JournalEntry>,
    events: Vec<EngineEvent>,
    peak_equity: f64,
    trading_allowed: bool,
    /// Most recent finite close, used to mark rows whose close is unusable
    last_price: Option<f64>,
}

/// Where a step currently is: row, time and mark price
#[derive(Clone, Copy)]
struct Step {
    index: usize,
    timestamp: DateTime<Utc>,
    price: f64,
    /// False when the row's close is not finite; no orders are placed on it
    tradable: bool,
}

impl BacktestEngine {
    /// Fails when the configuration cannot be run (e.g. no direction enabled)
    pub fn new(
        config: RunConfig,
        entry: Box<dyn EntryStrategy>,
        exit: Box<dyn ExitStrategy>,
        risk: Box<dyn RiskManager>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            entry,
            exit,
            risk,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run the simulation over `table`.
    ///
    /// The first simulated row is `lookback_window`; earlier rows only serve
    /// as history. Per-step rejections become events; window and column
    /// contract violations abort the run.
    pub fn run(&self, table: &HistoricalTable) -> Result<BacktestResult> {
        let lookback = self.config.lookback_window;
        let rows = table.len();

        // Minimum data check
        let required = lookback.saturating_add(1);
        if rows < required {
            return Err(BacktestError::InsufficientData {
                required,
                actual: rows,
            });
        }
        self.check_columns(table)?;

        let mut state = RunState {
            portfolio: Portfolio::new(self.config.initial_capital, self.config.commission),
            equity_curve: Vec::with_capacity(rows - lookback),
            journal: Vec::with_capacity(rows - lookback),
            events: Vec::new(),
            peak_equity: self.config.initial_capital,
            trading_allowed: true,
            last_price: None,
        };
        state.events.push(EngineEvent::RunStarted {
            rows,
            first_index: lookback,
            lookback,
            initial_capital: self.config.initial_capital,
        });

        let last = rows - 1;
        for i in lookback..rows {
            let window = DataWindow::new(table, i, lookback)?;
            let close = window.close(0)?;
            let tradable = close.is_finite();
            if tradable {
                state.last_price = Some(close);
            }
            let step = Step {
                index: i,
                timestamp: window.timestamp(),
                price: state.last_price.unwrap_or(close),
                tradable,
            };
            self.step(&mut state, &window, step, i == last)?;
        }

        let final_cash = state.portfolio.cash();
        let summary = MetricsCalculator::calculate(
            &state.equity_curve,
            state.portfolio.trades(),
            self.config.initial_capital,
            final_cash,
        );
        let drawdown_curve = MetricsCalculator::calculate_drawdown_curve(&state.equity_curve);

        state.events.push(EngineEvent::RunCompleted {
            steps: rows - lookback,
            trades: state.portfolio.trades().len(),
            final_equity: summary.final_equity,
        });

        Ok(BacktestResult {
            summary,
            trades: state.portfolio.into_trades(),
            equity_curve: state.equity_curve,
            drawdown_curve,
            journal: state.journal,
            events: state.events,
            start: table.timestamp(lookback),
            end: table.timestamp(last),
            risk_manager: self.risk.name().to_string(),
        })
    }

    /// Every column a collaborator declares must exist before the run starts
    fn check_columns(&self, table: &HistoricalTable) -> Result<()> {
        let declared = self
            .entry
            .required_columns()
            .into_iter()
            .chain(self.exit.required_columns())
            .chain(self.config.volatility_column.clone());
        for column in declared {
            table.require_column(&column)?;
        }
        Ok(())
    }

    fn step(
        &self,
        state: &mut RunState,
        window: &DataWindow<'_>,
        step: Step,
        is_last: bool,
    ) -> Result<()> {
        let allowed = self.update_trading_permission(state, step);
        let mut levels = (None, None);

        if !step.tradable {
            // Hold whatever is open; decisions wait for the next usable row
            state.events.push(EngineEvent::PriceUnavailable {
                index: step.index,
                timestamp: step.timestamp,
            });
        } else if let Some(position) = state.portfolio.position().cloned() {
            let decision = self.exit.should_exit(
                window,
                position.entry_price,
                position.entry_time,
                &position.snapshot(step.index),
            )?;
            levels = (decision.take_profit, decision.stop_loss);

            if decision.exit {
                let reason = decision.reason.unwrap_or(ExitReason::Signal);
                self.close(state, step, reason, levels);
            } else if self.config.trading_mode.allow_reversal && allowed {
                if let Some(direction) = self.entry.should_enter(window)? {
                    if direction != position.direction {
                        if self.config.trading_mode.allows(direction) {
                            self.close(state, step, ExitReason::Reversal, levels);
                            self.enter(state, window, step, direction)?;
                        } else {
                            reject(state, step, direction, RejectReason::DirectionDisabled);
                        }
                    }
                }
            }
        } else if allowed {
            if let Some(direction) = self.entry.should_enter(window)? {
                if self.config.trading_mode.allows(direction) {
                    self.enter(state, window, step, direction)?;
                } else {
                    reject(state, step, direction, RejectReason::DirectionDisabled);
                }
            }
        }

        // On an unusable final row this closes at the last finite close
        if is_last && state.portfolio.has_position() {
            self.close(state, step, ExitReason::EndOfData, levels);
        }

        self.record(state, step, allowed, levels);
        Ok(())
    }

    /// Ask the risk manager whether new entries are allowed on this step
    fn update_trading_permission(&self, state: &mut RunState, step: Step) -> bool {
        let cash = state.portfolio.cash();
        let equity = state.portfolio.equity(step.price);
        state.peak_equity = state.peak_equity.max(equity);
        let drawdown = if state.peak_equity > 0.0 {
            (state.peak_equity - equity) / state.peak_equity
        } else {
            0.0
        };

        let context = RiskContext {
            index: step.index,
            timestamp: step.timestamp,
            equity,
            peak_equity: state.peak_equity,
            in_position: state.portfolio.has_position(),
        };
        let allowed = self.risk.can_trade(cash, drawdown, &context);

        if allowed != state.trading_allowed {
            state.events.push(if allowed {
                EngineEvent::TradingResumed {
                    index: step.index,
                    timestamp: step.timestamp,
                }
            } else {
                EngineEvent::TradingSuspended {
                    index: step.index,
                    timestamp: step.timestamp,
                    cash,
                    drawdown_pct: drawdown * 100.0,
                }
            });
            state.trading_allowed = allowed;
        }
        allowed
    }

    fn enter(
        &self,
        state: &mut RunState,
        window: &DataWindow<'_>,
        step: Step,
        direction: Direction,
    ) -> Result<()> {
        let stop_loss = self
            .exit
            .stop_loss_estimate(window, step.price, direction)?;
        let volatility = match &self.config.volatility_column {
            Some(column) => Some(window.get(column, 0)?).filter(|v| v.is_finite()),
            None => None,
        };
        let amount = self.risk.calculate_position_size(
            state.portfolio.cash(),
            step.price,
            stop_loss,
            direction,
            volatility,
        );

        let opened = state.portfolio.open_position(
            direction,
            step.index,
            step.timestamp,
            step.price,
            amount,
        );
        let event = match opened {
            Ok(trade) => EngineEvent::PositionOpened {
                index: step.index,
                timestamp: step.timestamp,
                direction,
                price: step.price,
                quantity: trade.quantity,
                position_value: trade.position_value,
                commission: trade.commission_entry,
                cash_after: trade.cash_after_entry,
                equity_after: trade.equity_after_entry,
            },
            Err(reason) => EngineEvent::EntryRejected {
                index: step.index,
                timestamp: step.timestamp,
                direction,
                reason,
            },
        };
        state.events.push(event);
        Ok(())
    }

    fn close(
        &self,
        state: &mut RunState,
        step: Step,
        reason: ExitReason,
        (take_profit, stop_loss): (Option<f64>, Option<f64>),
    ) {
        let closed = state.portfolio.close_position(
            step.index,
            step.timestamp,
            step.price,
            reason,
            take_profit,
            stop_loss,
        );
        let Some(trade) = closed else {
            return;
        };
        let Some(exit) = trade.exit.as_ref() else {
            return;
        };
        let event = EngineEvent::PositionClosed {
            index: step.index,
            timestamp: step.timestamp,
            direction: trade.direction,
            price: step.price,
            reason,
            bars_held: exit.bars_held,
            net_pnl: exit.net_pnl,
            net_pnl_percent: exit.net_pnl_percent,
        };
        state.events.push(event);
    }

    /// Append the post-step equity sample and journal entry
    fn record(
        &self,
        state: &mut RunState,
        step: Step,
        allowed: bool,
        (take_profit, stop_loss): (Option<f64>, Option<f64>),
    ) {
        let portfolio = &state.portfolio;
        let equity = portfolio.equity(step.price);
        let position = portfolio.position();

        state.equity_curve.push(EquitySample {
            index: step.index,
            timestamp: step.timestamp,
            equity,
            cash: portfolio.cash(),
            margin_used: portfolio.margin_used(),
            price: step.price,
            in_position: position.is_some(),
        });

        // Levels only describe a position that is still open
        let levels_apply = position.is_some_and(|p| p.entry_index < step.index);
        state.journal.push(JournalEntry {
            index: step.index,
            timestamp: step.timestamp,
            price: step.price,
            in_position: position.is_some(),
            trading_allowed: allowed,
            available_balance: portfolio.cash(),
            total_equity: equity,
            direction: position.map(|p| p.direction),
            position_size: position.map(|p| p.quantity),
            entry_price: position.map(|p| p.entry_price),
            position_value: position.map(|p| p.quantity * step.price),
            unrealized_pnl: position.map(|p| p.unrealized_pnl(step.price)),
            unrealized_pnl_percent: position.map(|p| p.unrealized_pnl_pct(step.price)),
            take_profit: take_profit.filter(|_| levels_apply),
            stop_loss: stop_loss.filter(|_| levels_apply),
        });
    }
}

fn reject(state: &mut RunState, step: Step, direction: Direction, reason: RejectReason) {
    state.events.push(EngineEvent::EntryRejected {
        index: step.index,
        timestamp: step.timestamp,
        direction,
        reason,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{bars_from_closes, generate_flat_bars, generate_synthetic_bars};
    use crate::strategies::{
        EmaCrossSma, ExitDecision, FixedFraction, FixedPercentRisk, FixedTpSl, HoldBars, NeverExit,
        SignalColumn,
    };
    use approx::assert_relative_eq;
    use common::{PositionSnapshot, TradingMode, WindowError};

    fn table_with_signal(closes: &[f64], signal: &[f64]) -> HistoricalTable {
        let mut table = HistoricalTable::from_bars(&bars_from_closes(closes)).unwrap();
        table.insert_column("signal", signal.to_vec()).unwrap();
        table
    }

    fn engine(
        config: RunConfig,
        exit: Box<dyn ExitStrategy>,
        risk: Box<dyn RiskManager>,
    ) -> BacktestEngine {
        BacktestEngine::new(config, Box::new(SignalColumn::new("signal")), exit, risk).unwrap()
    }

    #[test]
    fn test_no_direction_is_construction_error() {
        let mode = TradingMode {
            allow_long: false,
            allow_short: false,
            allow_reversal: false,
        };
        let config = RunConfig::default().with_trading_mode(mode);

        let err = BacktestEngine::new(
            config,
            Box::new(SignalColumn::new("signal")),
            Box::new(NeverExit),
            Box::new(FixedFraction::new(0.5)),
        )
        .err();
        assert!(matches!(err, Some(BacktestError::NoDirectionEnabled)));
    }

    #[test]
    fn test_insufficient_data() {
        let table = HistoricalTable::from_bars(&generate_flat_bars(50, 10.0)).unwrap();
        let engine = BacktestEngine::new(
            RunConfig::default().with_lookback(100),
            Box::new(EmaCrossSma::new("close", "close")),
            Box::new(NeverExit),
            Box::new(FixedFraction::new(0.5)),
        )
        .unwrap();

        assert!(matches!(
            engine.run(&table),
            Err(BacktestError::InsufficientData {
                required: 101,
                actual: 50
            })
        ));
    }

    #[test]
    fn test_maximal_lookback_is_insufficient() {
        let table = HistoricalTable::from_bars(&generate_flat_bars(5, 10.0)).unwrap();
        let engine = engine(
            RunConfig::default().with_lookback(usize::MAX),
            Box::new(NeverExit),
            Box::new(FixedFraction::new(0.5)),
        );

        assert!(matches!(
            engine.run(&table),
            Err(BacktestError::InsufficientData {
                required: usize::MAX,
                actual: 5
            })
        ));
    }

    #[test]
    fn test_missing_strategy_column_aborts() {
        let table = HistoricalTable::from_bars(&generate_flat_bars(10, 10.0)).unwrap();
        let engine = engine(
            RunConfig::default().with_lookback(2),
            Box::new(NeverExit),
            Box::new(FixedFraction::new(0.5)),
        );

        assert!(matches!(
            engine.run(&table),
            Err(BacktestError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn test_hold_bars_round_trip() {
        let closes = [100.0, 100.0, 100.0, 110.0, 120.0, 120.0];
        let signal = [0.0, 0.0, 1.0, 0.0, 0.0, 0.0];
        let table = table_with_signal(&closes, &signal);
        let engine = engine(
            RunConfig::default().with_lookback(1).with_commission(0.0),
            Box::new(HoldBars::new(2)),
            Box::new(FixedFraction::new(0.5)),
        );

        let result = engine.run(&table).unwrap();

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        let exit = trade.exit.as_ref().unwrap();
        assert_eq!(trade.entry_index, 2);
        assert_eq!(exit.exit_index, 4);
        assert_eq!(exit.exit_reason, ExitReason::TimeExit);
        // 50 units from 100 to 120
        assert_relative_eq!(exit.gross_pnl, 1000.0);
        assert_relative_eq!(result.summary.final_equity, 11000.0);
        assert_eq!(result.equity_curve.len(), 5);
        assert_eq!(result.journal.len(), 5);
    }

    #[test]
    fn test_disabled_direction_is_rejected() {
        let table = table_with_signal(&[10.0, 10.0, 10.0], &[0.0, -1.0, 0.0]);
        let engine = engine(
            RunConfig::default().with_lookback(1),
            Box::new(NeverExit),
            Box::new(FixedFraction::new(0.5)),
        );

        let result = engine.run(&table).unwrap();

        assert!(result.trades.is_empty());
        assert!(result.events.iter().any(|e| matches!(
            e,
            EngineEvent::EntryRejected {
                reason: RejectReason::DirectionDisabled,
                ..
            }
        )));
        assert_eq!(
            result.summary.message.as_deref(),
            Some("No trades executed")
        );
    }

    #[test]
    fn test_exit_levels_recorded() {
        let closes = [100.0, 100.0, 101.0, 106.0];
        let signal = [0.0, 1.0, 0.0, 0.0];
        let table = table_with_signal(&closes, &signal);
        let engine = engine(
            RunConfig::default().with_lookback(1),
            Box::new(FixedTpSl::new(0.05, 0.02)),
            Box::new(FixedPercentRisk::new(0.01)),
        );

        let result = engine.run(&table).unwrap();

        let exit = result.trades[0].exit.as_ref().unwrap();
        assert_eq!(exit.exit_reason, ExitReason::TakeProfit);
        assert_relative_eq!(exit.take_profit.unwrap(), 105.0);
        assert_relative_eq!(exit.stop_loss.unwrap(), 98.0);

        // journal of the bar after entry carries the live levels
        let journal = &result.journal[1];
        assert_eq!(journal.index, 2);
        assert!(journal.in_position);
        assert_relative_eq!(journal.take_profit.unwrap(), 105.0);
    }

    #[test]
    fn test_risk_gate_suspends_entries() {
        // Equity drops 20% while long; the default manager blocks at 10%
        let closes = [100.0, 100.0, 80.0, 80.0, 80.0];
        let signal = [0.0, 1.0, 0.0, 0.0, 1.0];
        let table = table_with_signal(&closes, &signal);
        let risk = FixedPercentRisk::new(0.5);
        let engine = engine(
            RunConfig::default().with_lookback(1).with_commission(0.0),
            Box::new(HoldBars::new(1)),
            Box::new(risk),
        );

        let result = engine.run(&table).unwrap();

        assert_eq!(result.trades.len(), 1);
        assert!(result
            .events
            .iter()
            .any(|e| matches!(e, EngineEvent::TradingSuspended { .. })));
        assert!(!result.journal.last().unwrap().trading_allowed);
    }

    #[test]
    fn test_future_read_aborts_run() {
        struct Peek;
        impl ExitStrategy for Peek {
            fn name(&self) -> &str {
                "peek"
            }

            fn should_exit(
                &self,
                window: &DataWindow<'_>,
                _entry_price: f64,
                _entry_time: DateTime<Utc>,
                _position: &PositionSnapshot,
            ) -> Result<ExitDecision> {
                window.close(1)?;
                Ok(ExitDecision::hold())
            }
        }

        let table = table_with_signal(&[1.0, 1.0, 1.0, 1.0], &[0.0, 1.0, 0.0, 0.0]);
        let engine = engine(
            RunConfig::default().with_lookback(1),
            Box::new(Peek),
            Box::new(FixedFraction::new(0.5)),
        );

        assert!(matches!(
            engine.run(&table),
            Err(BacktestError::Window(WindowError::FutureOffset { offset: 1 }))
        ));
    }

    #[test]
    fn test_events_are_ordered() {
        let bars = generate_synthetic_bars(300, 100.0, 9);
        let mut table = HistoricalTable::from_bars(&bars).unwrap();
        let signal: Vec<f64> = (0..300).map(|i| if i % 37 == 0 { 1.0 } else { 0.0 }).collect();
        table.insert_column("signal", signal).unwrap();
        let engine = engine(
            RunConfig::default().with_lookback(20),
            Box::new(HoldBars::new(10)),
            Box::new(FixedFraction::new(0.9)),
        );

        let result = engine.run(&table).unwrap();

        assert!(matches!(
            result.events.first(),
            Some(EngineEvent::RunStarted { first_index: 20, .. })
        ));
        assert!(matches!(
            result.events.last(),
            Some(EngineEvent::RunCompleted { steps: 280, .. })
        ));
        let opened = result
            .events
            .iter()
            .filter(|e| matches!(e, EngineEvent::PositionOpened { .. }))
            .count();
        assert_eq!(opened, result.trades.len());
        assert!(result.trades.iter().all(|t| t.is_closed()));
    }

    /// Bypasses table validation so a row can carry a non-finite close
    fn table_with_gap(closes: &[f64], signal: &[f64]) -> HistoricalTable {
        use chrono::{Duration, TimeZone};
        use std::collections::BTreeMap;

        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let timestamps = (0..closes.len())
            .map(|i| start + Duration::minutes(i as i64))
            .collect();
        let mut columns = BTreeMap::new();
        for name in ["open", "high", "low", "close"] {
            columns.insert(name.to_string(), closes.to_vec());
        }
        columns.insert("volume".to_string(), vec![1000.0; closes.len()]);
        columns.insert("signal".to_string(), signal.to_vec());
        HistoricalTable::new_unchecked(timestamps, columns)
    }

    #[test]
    fn test_non_finite_close_defers_exit() {
        let closes = [100.0, 100.0, 100.0, f64::NAN, 100.0, 100.0];
        let signal = [0.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        let engine = engine(
            RunConfig::default().with_lookback(1).with_commission(0.0),
            Box::new(HoldBars::new(2)),
            Box::new(FixedFraction::new(0.5)),
        );

        let result = engine.run(&table_with_gap(&closes, &signal)).unwrap();

        assert_eq!(result.trades.len(), 1);
        let exit = result.trades[0].exit.as_ref().unwrap();
        assert_eq!(exit.exit_index, 4);
        assert_eq!(exit.exit_reason, ExitReason::TimeExit);
        assert!(result.summary.final_cash.is_finite());
        assert_relative_eq!(result.summary.final_equity, 10000.0);
        assert!(result.equity_curve.iter().all(|s| s.equity.is_finite()));
        assert_relative_eq!(result.equity_curve[2].price, 100.0);
        assert!(result
            .events
            .iter()
            .any(|e| matches!(e, EngineEvent::PriceUnavailable { index: 3, .. })));
    }

    #[test]
    fn test_non_finite_final_close_uses_last_price() {
        let closes = [100.0, 100.0, 110.0, f64::NAN];
        let signal = [0.0, 1.0, 0.0, 0.0];
        let engine = engine(
            RunConfig::default().with_lookback(1).with_commission(0.0),
            Box::new(NeverExit),
            Box::new(FixedFraction::new(0.5)),
        );

        let result = engine.run(&table_with_gap(&closes, &signal)).unwrap();

        let exit = result.trades[0].exit.as_ref().unwrap();
        assert_eq!(exit.exit_index, 3);
        assert_eq!(exit.exit_reason, ExitReason::EndOfData);
        assert_relative_eq!(exit.exit_price, 110.0);
        assert_relative_eq!(result.summary.final_cash, 10500.0);
    }
}
