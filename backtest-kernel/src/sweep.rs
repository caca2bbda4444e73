//! Take-profit / stop-loss parameter grid.
//!
//! Every grid point gets its own engine; the table is shared read-only
//! across rayon workers.

use common::{BacktestConfig, BacktestError, BacktestSummary, Result, StrategySpec};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::data::HistoricalTable;
use crate::engine::BacktestEngine;
use crate::strategies::{build_entry, build_exit, build_risk};

/// One grid point and its outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResult {
    pub run_id: usize,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub summary: BacktestSummary,
}

/// Parameter names carrying the take-profit and stop-loss for an exit strategy
fn tp_sl_keys(exit: &StrategySpec) -> Result<(&'static str, &'static str)> {
    match exit.name.as_str() {
        "atr_based_exit" => Ok(("tp_multiplier", "sl_multiplier")),
        "fixed_tp_sl" => Ok(("tp_percent", "sl_percent")),
        other => Err(BacktestError::ConfigError(format!(
            "exit strategy '{}' has no take-profit / stop-loss to sweep",
            other
        ))),
    }
}

/// Run the cartesian product of `take_profits` x `stop_losses`.
///
/// Results come back ordered by run id, which follows the input order with
/// stop-loss varying fastest. A grid point whose backtest fails is logged and
/// left out.
pub fn run_sweep(
    config: &BacktestConfig,
    table: &HistoricalTable,
    take_profits: &[f64],
    stop_losses: &[f64],
) -> Result<Vec<SweepResult>> {
    let (tp_key, sl_key) = tp_sl_keys(&config.strategy.exit)?;

    let grid: Vec<(usize, f64, f64)> = take_profits
        .iter()
        .flat_map(|&tp| stop_losses.iter().map(move |&sl| (tp, sl)))
        .enumerate()
        .map(|(id, (tp, sl))| (id + 1, tp, sl))
        .collect();

    info!(runs = grid.len(), rows = table.len(), "starting parameter sweep");

    let mut results: Vec<SweepResult> = grid
        .par_iter()
        .filter_map(|&(run_id, tp, sl)| {
            let exit = config
                .strategy
                .exit
                .clone()
                .with_param(tp_key, tp)
                .with_param(sl_key, sl);
            match run_single(config, &exit, table) {
                Ok(summary) => Some(SweepResult {
                    run_id,
                    take_profit: tp,
                    stop_loss: sl,
                    summary,
                }),
                Err(e) => {
                    warn!(run_id, tp, sl, error = %e, "sweep run failed");
                    None
                }
            }
        })
        .collect();

    results.sort_by_key(|r| r.run_id);
    info!(completed = results.len(), "parameter sweep finished");
    Ok(results)
}

fn run_single(
    config: &BacktestConfig,
    exit: &StrategySpec,
    table: &HistoricalTable,
) -> Result<BacktestSummary> {
    let engine = BacktestEngine::new(
        config.engine.clone(),
        build_entry(&config.strategy.entry)?,
        build_exit(exit)?,
        build_risk(config.strategy.risk.as_ref())?,
    )?;
    Ok(engine.run(table)?.summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::generate_synthetic_bars;
    use crate::indicators::apply_indicators;
    use common::{DataSource, IndicatorSpec, RunConfig, StrategyConfig};

    fn config() -> BacktestConfig {
        BacktestConfig {
            engine: RunConfig::default().with_lookback(30),
            data: DataSource::Synthetic {
                bars: 400,
                seed: 5,
                initial_price: 100.0,
            },
            timeframe: None,
            indicators: vec![
                IndicatorSpec::Ema { period: 5 },
                IndicatorSpec::Sma { period: 20 },
            ],
            strategy: StrategyConfig {
                entry: StrategySpec::new("ema_cross_sma")
                    .with_param("ema_period", 5)
                    .with_param("sma_period", 20),
                exit: StrategySpec::new("fixed_tp_sl"),
                risk: Some(StrategySpec::new("fixed_fraction").with_param("fraction", 0.5)),
            },
            output: None,
        }
    }

    fn table(config: &BacktestConfig) -> HistoricalTable {
        let mut table =
            HistoricalTable::from_bars(&generate_synthetic_bars(400, 100.0, 5)).unwrap();
        apply_indicators(&mut table, &config.indicators).unwrap();
        table
    }

    #[test]
    fn test_sweep_is_ordered_and_deterministic() {
        let config = config();
        let table = table(&config);
        let tps = [0.01, 0.02, 0.03];
        let sls = [0.005, 0.01];

        let first = run_sweep(&config, &table, &tps, &sls).unwrap();
        let second = run_sweep(&config, &table, &tps, &sls).unwrap();

        assert_eq!(first.len(), 6);
        let ids: Vec<usize> = first.iter().map(|r| r.run_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(first[1].take_profit, 0.01);
        assert_eq!(first[1].stop_loss, 0.01);
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.summary, b.summary);
        }
    }

    #[test]
    fn test_sweep_requires_tp_sl_exit() {
        let mut config = config();
        config.strategy.exit = StrategySpec::new("hold_bars");
        let table = table(&config);

        assert!(run_sweep(&config, &table, &[0.01], &[0.01]).is_err());
    }
}
