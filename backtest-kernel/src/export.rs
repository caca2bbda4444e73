//! Run artifacts on disk.
//!
//! `save_run` writes one directory per run holding:
//! - `metrics.json`: summary plus run metadata
//! - `trades.csv`: one row per closed trade
//! - `journal.csv`: per-bar state
//! - `equity.csv`: equity, cash and margin per simulated bar
//! - `config.json`: the configuration that produced the run

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use common::{
    BacktestConfig, BacktestError, BacktestResult, BacktestSummary, EquitySample, JournalEntry,
    Result, Trade,
};
use serde::Serialize;
use tracing::info;

/// Everything in the result except the per-bar series
#[derive(Debug, Serialize)]
struct RunMetrics<'a> {
    summary: &'a BacktestSummary,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    bars_simulated: usize,
    risk_manager: &'a str,
}

pub fn export_trades_csv(trades: &[Trade]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "id",
        "direction",
        "entry_index",
        "entry_time",
        "entry_price",
        "quantity",
        "position_value",
        "margin_used",
        "commission_entry",
        "exit_index",
        "exit_time",
        "exit_price",
        "exit_reason",
        "commission_exit",
        "gross_pnl",
        "net_pnl",
        "net_pnl_percent",
        "bars_held",
        "take_profit",
        "stop_loss",
        "equity_after_exit",
    ])
    .map_err(csv_error)?;

    for trade in trades {
        // open trades never reach a finished result
        let Some(exit) = &trade.exit else {
            continue;
        };
        wtr.write_record([
            trade.id.to_string(),
            trade.direction.to_string(),
            trade.entry_index.to_string(),
            trade.entry_time.to_rfc3339(),
            format!("{:.6}", trade.entry_price),
            format!("{:.6}", trade.quantity),
            format!("{:.2}", trade.position_value),
            format!("{:.2}", trade.margin_used),
            format!("{:.4}", trade.commission_entry),
            exit.exit_index.to_string(),
            exit.exit_time.to_rfc3339(),
            format!("{:.6}", exit.exit_price),
            exit.exit_reason.to_string(),
            format!("{:.4}", exit.commission_exit),
            format!("{:.2}", exit.gross_pnl),
            format!("{:.2}", exit.net_pnl),
            format!("{:.4}", exit.net_pnl_percent),
            exit.bars_held.to_string(),
            optional(exit.take_profit),
            optional(exit.stop_loss),
            format!("{:.2}", exit.equity_after_exit),
        ])
        .map_err(csv_error)?;
    }

    finish(wtr)
}

pub fn export_equity_csv(equity_curve: &[EquitySample]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "index",
        "timestamp",
        "price",
        "equity",
        "cash",
        "margin_used",
        "in_position",
    ])
    .map_err(csv_error)?;
    for sample in equity_curve {
        wtr.write_record([
            sample.index.to_string(),
            sample.timestamp.to_rfc3339(),
            format!("{:.6}", sample.price),
            format!("{:.2}", sample.equity),
            format!("{:.2}", sample.cash),
            format!("{:.2}", sample.margin_used),
            sample.in_position.to_string(),
        ])
        .map_err(csv_error)?;
    }
    finish(wtr)
}

pub fn export_journal_csv(journal: &[JournalEntry]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "index",
        "timestamp",
        "price",
        "in_position",
        "trading_allowed",
        "available_balance",
        "total_equity",
        "direction",
        "position_size",
        "entry_price",
        "position_value",
        "unrealized_pnl",
        "unrealized_pnl_percent",
        "take_profit",
        "stop_loss",
    ])
    .map_err(csv_error)?;
    for entry in journal {
        wtr.write_record([
            entry.index.to_string(),
            entry.timestamp.to_rfc3339(),
            format!("{:.6}", entry.price),
            entry.in_position.to_string(),
            entry.trading_allowed.to_string(),
            format!("{:.2}", entry.available_balance),
            format!("{:.2}", entry.total_equity),
            entry.direction.map(|d| d.to_string()).unwrap_or_default(),
            optional(entry.position_size),
            optional(entry.entry_price),
            optional(entry.position_value),
            optional(entry.unrealized_pnl),
            optional(entry.unrealized_pnl_percent),
            optional(entry.take_profit),
            optional(entry.stop_loss),
        ])
        .map_err(csv_error)?;
    }
    finish(wtr)
}

/// Save the artifact set for one run under `save_dir`.
///
/// The directory is named `{entry}_{exit}[_{timeframe}]_{%Y%m%d_%H%M%S}`.
/// Returns its path.
pub fn save_run(
    result: &BacktestResult,
    config: &BacktestConfig,
    save_dir: &Path,
) -> Result<PathBuf> {
    let mut name = format!("{}_{}", config.strategy.entry.name, config.strategy.exit.name);
    if let Some(timeframe) = config.timeframe {
        name.push_str(&format!("_{}", timeframe));
    }
    let name: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    let run_dir = save_dir.join(format!(
        "{}_{}",
        name,
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ));
    std::fs::create_dir_all(&run_dir)?;

    let metrics = RunMetrics {
        summary: &result.summary,
        start: result.start,
        end: result.end,
        bars_simulated: result.equity_curve.len(),
        risk_manager: &result.risk_manager,
    };
    std::fs::write(
        run_dir.join("metrics.json"),
        serde_json::to_string_pretty(&metrics)?,
    )?;
    std::fs::write(run_dir.join("trades.csv"), export_trades_csv(&result.trades)?)?;
    std::fs::write(run_dir.join("journal.csv"), export_journal_csv(&result.journal)?)?;
    std::fs::write(
        run_dir.join("equity.csv"),
        export_equity_csv(&result.equity_curve)?,
    )?;
    std::fs::write(
        run_dir.join("config.json"),
        serde_json::to_string_pretty(config)?,
    )?;

    info!(path = %run_dir.display(), trades = result.trades.len(), "run saved");
    Ok(run_dir)
}

fn optional(value: Option<f64>) -> String {
    value.map(|v| format!("{:.6}", v)).unwrap_or_default()
}

fn csv_error(e: csv::Error) -> BacktestError {
    BacktestError::CsvError(e.to_string())
}

fn finish(wtr: csv::Writer<Vec<u8>>) -> Result<String> {
    let data = wtr
        .into_inner()
        .map_err(|e| BacktestError::CsvError(e.to_string()))?;
    String::from_utf8(data).map_err(|e| BacktestError::CsvError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::bars_from_closes;
    use crate::strategies::{FixedFraction, HoldBars, SignalColumn};
    use crate::{BacktestEngine, HistoricalTable};
    use common::{DataSource, RunConfig, StrategyConfig, StrategySpec, Timeframe};

    fn result() -> BacktestResult {
        let bars = bars_from_closes(&[100.0, 100.0, 110.0, 120.0, 120.0]);
        let mut table = HistoricalTable::from_bars(&bars).unwrap();
        table
            .insert_column("signal", vec![0.0, 1.0, 0.0, 0.0, 0.0])
            .unwrap();
        BacktestEngine::new(
            RunConfig::default().with_lookback(1).with_commission(0.0),
            Box::new(SignalColumn::new("signal")),
            Box::new(HoldBars::new(2)),
            Box::new(FixedFraction::new(0.5)),
        )
        .unwrap()
        .run(&table)
        .unwrap()
    }

    fn config() -> BacktestConfig {
        BacktestConfig {
            engine: RunConfig::default(),
            data: DataSource::Synthetic {
                bars: 5,
                seed: 1,
                initial_price: 100.0,
            },
            timeframe: Some(Timeframe::M5),
            indicators: vec![],
            strategy: StrategyConfig {
                entry: StrategySpec::new("signal_column"),
                exit: StrategySpec::new("hold_bars").with_param("bars", 2),
                risk: None,
            },
            output: None,
        }
    }

    fn read_rows(text: &str) -> Vec<csv::StringRecord> {
        csv::Reader::from_reader(text.as_bytes())
            .records()
            .collect::<std::result::Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_trades_csv_has_one_row_per_trade() {
        let result = result();
        let text = export_trades_csv(&result.trades).unwrap();

        let rows = read_rows(&text);
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][1], "LONG");
        assert_eq!(&rows[0][2], "1");
        assert_eq!(&rows[0][9], "3");
        assert_eq!(&rows[0][14], "1000.00");
        // no levels for a time exit
        assert_eq!(&rows[0][18], "");
    }

    #[test]
    fn test_equity_and_journal_rows_match_simulated_bars() {
        let result = result();

        let equity = read_rows(&export_equity_csv(&result.equity_curve).unwrap());
        let journal = read_rows(&export_journal_csv(&result.journal).unwrap());

        assert_eq!(equity.len(), 4);
        assert_eq!(journal.len(), 4);
        assert_eq!(&equity[0][0], "1");
        assert_eq!(&equity[3][3], "11000.00");
        assert_eq!(&journal[1][3], "true");
        assert_eq!(&journal[1][7], "LONG");
        assert_eq!(&journal[3][7], "");
    }

    #[test]
    fn test_save_run_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let result = result();
        let config = config();

        let run_dir = save_run(&result, &config, dir.path()).unwrap();

        let name = run_dir.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("signal_column_hold_bars_5m_"), "{}", name);
        for file in ["metrics.json", "trades.csv", "journal.csv", "equity.csv", "config.json"] {
            assert!(run_dir.join(file).is_file(), "missing {}", file);
        }

        let metrics: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(run_dir.join("metrics.json")).unwrap())
                .unwrap();
        assert_eq!(metrics["summary"]["total_trades"], 1);
        assert_eq!(metrics["bars_simulated"], 4);
        assert_eq!(metrics["risk_manager"], "fixed_fraction");

        let saved: BacktestConfig =
            serde_json::from_str(&std::fs::read_to_string(run_dir.join("config.json")).unwrap())
                .unwrap();
        assert_eq!(saved, config);
    }
}
