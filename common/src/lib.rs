pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::{
    AtrMethod, BacktestConfig, DataSource, IndicatorSpec, OutputConfig, RunConfig, StrategyConfig,
    StrategySpec, Timeframe, TradingMode,
};
pub use error::{BacktestError, Result, WindowError};
pub use events::{EngineEvent, RejectReason};
pub use types::*;
