use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use backtest_kernel::{
    apply_indicators, build_entry, build_exit, build_risk, load_file, load_source, log_events,
    resample, run_sweep, save_run, BacktestConfig, BacktestEngine, BacktestError, BacktestResult,
    HistoricalTable, SweepResult, Timeframe, TradingMode,
};
use common::{DataSource, IndicatorSpec, OutputConfig, RunConfig, StrategyConfig, StrategySpec};

#[derive(Parser, Debug)]
#[command(name = "backtest-kernel")]
#[command(version = "0.1.0")]
#[command(about = "Deterministic bar-by-bar backtest kernel", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single backtest
    Run(RunArgs),
    /// Run a take-profit / stop-loss grid in parallel
    Sweep(SweepArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Backtest config file (TOML or JSON). Without it a synthetic EMA/SMA crossover run is used.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Initial capital
    #[arg(long)]
    capital: Option<f64>,

    /// Commission rate per leg (0.001 = 0.1%)
    #[arg(long)]
    commission: Option<f64>,

    /// Lookback window in bars
    #[arg(long)]
    lookback: Option<usize>,

    /// Allow short entries
    #[arg(long)]
    allow_short: bool,

    /// Reverse on opposite signals (implies --allow-short)
    #[arg(long)]
    reversal: bool,

    /// Data file path (CSV/JSON), replaces the configured data source
    #[arg(short = 'f', long)]
    data_file: Option<PathBuf>,

    /// Number of synthetic bars, replaces the configured data source
    #[arg(long, conflicts_with = "data_file")]
    synthetic_bars: Option<usize>,

    /// Seed for synthetic data
    #[arg(long)]
    seed: Option<u64>,

    /// Resample bars to this timeframe (1m, 5m, 15m, 1h, 4h, 1d, ...)
    #[arg(short, long, value_parser = parse_timeframe)]
    timeframe: Option<Timeframe>,

    /// Write metrics, trades, journal and equity files under this directory
    #[arg(long)]
    save_dir: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    output: OutputFormat,

    /// Pretty print JSON output
    #[arg(long)]
    pretty: bool,
}

#[derive(Args, Debug)]
struct SweepArgs {
    /// Backtest config file (TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Take-profit values, comma separated
    #[arg(long = "tp", value_delimiter = ',', required = true)]
    take_profits: Vec<f64>,

    /// Stop-loss values, comma separated
    #[arg(long = "sl", value_delimiter = ',', required = true)]
    stop_losses: Vec<f64>,

    /// Resample bars to this timeframe
    #[arg(short, long, value_parser = parse_timeframe)]
    timeframe: Option<Timeframe>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    output: OutputFormat,

    /// Pretty print JSON output
    #[arg(long)]
    pretty: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args),
        Command::Sweep(args) => sweep(args),
    }
}

fn run(args: RunArgs) -> Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    apply_overrides(&mut config, &args);
    config.engine.validate()?;

    let table = build_table(&config)?;
    let engine = BacktestEngine::new(
        config.engine.clone(),
        build_entry(&config.strategy.entry)?,
        build_exit(&config.strategy.exit)?,
        build_risk(config.strategy.risk.as_ref())?,
    )?;

    info!(
        rows = table.len(),
        entry = %config.strategy.entry.name,
        exit = %config.strategy.exit.name,
        "running backtest"
    );
    let result = engine.run(&table)?;
    log_events(&result.events);

    if let Some(output) = &config.output {
        let run_dir = save_run(&result, &config, &output.save_dir)
            .with_context(|| format!("failed to save run under {}", output.save_dir.display()))?;
        info!(path = %run_dir.display(), "results saved");
    }

    match args.output {
        OutputFormat::Json => print_json(&result, args.pretty)?,
        OutputFormat::Text => print_text_report(&result),
    }
    Ok(())
}

fn sweep(args: SweepArgs) -> Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    if args.timeframe.is_some() {
        config.timeframe = args.timeframe;
    }
    let table = build_table(&config)?;

    let results = run_sweep(&config, &table, &args.take_profits, &args.stop_losses)?;

    match args.output {
        OutputFormat::Json => print_json(&results, args.pretty)?,
        OutputFormat::Text => print_sweep_table(&results),
    }
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<BacktestConfig> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "loading config");
            BacktestConfig::from_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))
        }
        None => Ok(default_config()),
    }
}

/// EMA(9)/SMA(21) crossover on synthetic bars with a fixed 5% / 2% exit
fn default_config() -> BacktestConfig {
    BacktestConfig {
        engine: RunConfig::default(),
        data: DataSource::Synthetic {
            bars: 2000,
            seed: 42,
            initial_price: 100.0,
        },
        timeframe: None,
        indicators: vec![
            IndicatorSpec::Ema { period: 9 },
            IndicatorSpec::Sma { period: 21 },
        ],
        strategy: StrategyConfig {
            entry: StrategySpec::new("ema_cross_sma")
                .with_param("ema_period", 9)
                .with_param("sma_period", 21),
            exit: StrategySpec::new("fixed_tp_sl")
                .with_param("tp_percent", 0.05)
                .with_param("sl_percent", 0.02),
            risk: None,
        },
        output: None,
    }
}

fn apply_overrides(config: &mut BacktestConfig, args: &RunArgs) {
    let engine = &mut config.engine;
    if let Some(capital) = args.capital {
        engine.initial_capital = capital;
    }
    if let Some(commission) = args.commission {
        engine.commission = commission;
    }
    if let Some(lookback) = args.lookback {
        engine.lookback_window = lookback;
    }
    if args.reversal {
        engine.trading_mode = TradingMode::with_reversal();
    } else if args.allow_short {
        engine.trading_mode.allow_short = true;
    }

    // Crossover entries only emit shorts when asked to
    if (args.reversal || args.allow_short)
        && config.strategy.entry.name.starts_with("ema_cross_sma")
        && !config.strategy.entry.params.contains_key("allow_short")
    {
        config.strategy.entry = config
            .strategy
            .entry
            .clone()
            .with_param("allow_short", true);
    }

    if let Some(path) = &args.data_file {
        config.data = DataSource::File { path: path.clone() };
    } else if let Some(bars) = args.synthetic_bars {
        let (seed, initial_price) = match config.data {
            DataSource::Synthetic {
                seed, initial_price, ..
            } => (seed, initial_price),
            DataSource::File { .. } => (42, 100.0),
        };
        config.data = DataSource::Synthetic {
            bars,
            seed,
            initial_price,
        };
    }
    if let (Some(new_seed), DataSource::Synthetic { seed, .. }) = (args.seed, &mut config.data) {
        *seed = new_seed;
    }

    if args.timeframe.is_some() {
        config.timeframe = args.timeframe;
    }
    if let Some(save_dir) = &args.save_dir {
        config.output = Some(OutputConfig {
            save_dir: save_dir.clone(),
        });
    }
}

fn parse_timeframe(s: &str) -> std::result::Result<Timeframe, String> {
    s.parse().map_err(|e: BacktestError| e.to_string())
}

fn build_table(config: &BacktestConfig) -> Result<HistoricalTable> {
    let mut table = match &config.data {
        DataSource::File { path } => {
            info!(path = %path.display(), "loading data");
            load_file(path).with_context(|| format!("failed to load {}", path.display()))?
        }
        source => load_source(source)?,
    };
    if let Some(timeframe) = config.timeframe {
        table = resample(&table, timeframe)?;
    }
    apply_indicators(&mut table, &config.indicators)?;
    Ok(table)
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", json);
    Ok(())
}

fn print_text_report(result: &BacktestResult) {
    let summary = &result.summary;
    let fmt_time = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string())
    };

    println!();
    println!("================================================================");
    println!("  BACKTEST REPORT");
    println!("================================================================");
    println!();
    println!("  Period: {} to {}", fmt_time(result.start), fmt_time(result.end));
    println!("  Bars Simulated: {}", result.equity_curve.len());
    println!("  Risk Manager: {}", result.risk_manager);
    if let Some(message) = &summary.message {
        println!("  Note: {}", message);
    }
    println!();
    println!("----------------------------------------------------------------");
    println!("  CAPITAL");
    println!("----------------------------------------------------------------");
    println!("  Initial Capital:  ${:>12.2}", summary.initial_capital);
    println!("  Final Cash:       ${:>12.2}", summary.final_cash);
    println!("  Final Equity:     ${:>12.2}", summary.final_equity);
    println!(
        "  Total Return:     ${:>12.2} ({:+.2}%)",
        summary.final_equity - summary.initial_capital,
        summary.total_return_pct
    );
    println!();
    println!("----------------------------------------------------------------");
    println!("  RISK");
    println!("----------------------------------------------------------------");
    println!("  Max Drawdown:     {:>12.2}%", summary.max_drawdown_pct);
    println!("  Commission Paid:  ${:>12.2}", summary.total_commission);
    println!();
    println!("----------------------------------------------------------------");
    println!("  TRADE STATISTICS");
    println!("----------------------------------------------------------------");
    println!("  Total Trades:     {:>12}", summary.total_trades);
    println!("  Winning Trades:   {:>12}", summary.winning_trades);
    println!("  Losing Trades:    {:>12}", summary.losing_trades);
    println!("  Win Rate:         {:>12.1}%", summary.win_rate);
    println!("  Gross P&L:        ${:>12.2}", summary.total_gross_pnl);
    println!("  Net P&L:          ${:>12.2}", summary.total_net_pnl);
    println!("  Avg Net P&L:      ${:>12.2}", summary.avg_net_pnl);
    println!("  Profit Factor:    {:>12.3}", summary.profit_factor);
    println!("  Avg Bars Held:    {:>12.1}", summary.avg_bars_held);
    println!();
    println!("================================================================");

    if !result.trades.is_empty() {
        println!();
        println!("  RECENT TRADES (last 5)");
        println!("----------------------------------------------------------------");
        for trade in result.trades.iter().rev().take(5) {
            match &trade.exit {
                Some(exit) => println!(
                    "  {} {} -> {} | P&L: ${:+.2} ({:+.2}%) | {} bars | {}",
                    trade.direction,
                    trade.entry_time.format("%Y-%m-%d %H:%M"),
                    exit.exit_time.format("%Y-%m-%d %H:%M"),
                    exit.net_pnl,
                    exit.net_pnl_percent,
                    exit.bars_held,
                    exit.exit_reason
                ),
                None => println!(
                    "  {} {} -> open",
                    trade.direction,
                    trade.entry_time.format("%Y-%m-%d %H:%M")
                ),
            }
        }
        println!();
    }
}

fn print_sweep_table(results: &[SweepResult]) {
    println!();
    println!("================================================================");
    println!("  PARAMETER SWEEP ({} runs)", results.len());
    println!("================================================================");
    println!(
        "  {:>4} {:>8} {:>8} {:>7} {:>8} {:>10} {:>8}",
        "id", "tp", "sl", "trades", "win %", "return %", "max dd"
    );
    println!("----------------------------------------------------------------");
    for r in results {
        println!(
            "  {:>4} {:>8.4} {:>8.4} {:>7} {:>8.1} {:>10.2} {:>8.2}",
            r.run_id,
            r.take_profit,
            r.stop_loss,
            r.summary.total_trades,
            r.summary.win_rate,
            r.summary.total_return_pct,
            r.summary.max_drawdown_pct
        );
    }
    println!();
}
