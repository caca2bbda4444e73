pub mod data;
pub mod engine;
pub mod events;
pub mod export;
pub mod indicators;
pub mod metrics;
pub mod portfolio;
pub mod strategies;
pub mod sweep;
pub mod window;

pub use data::{generate_synthetic_bars, load_file, load_source, resample, HistoricalTable};
pub use engine::BacktestEngine;
pub use events::{log_events, LogEvent};
pub use export::save_run;
pub use indicators::apply_indicators;
pub use metrics::MetricsCalculator;
pub use portfolio::Portfolio;
pub use strategies::{
    build_entry, build_exit, build_risk, EntryStrategy, ExitDecision, ExitStrategy, RiskContext,
    RiskManager,
};
pub use sweep::{run_sweep, SweepResult};
pub use window::{ColumnView, DataWindow};

// Re-export common types
pub use common::{
    BacktestConfig, BacktestError, BacktestResult, BacktestSummary, Bar, Direction, EngineEvent,
    ExitReason, Result, RunConfig, Timeframe, Trade, TradingMode,
};
