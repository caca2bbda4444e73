use thiserror::Error;

/// Invalid access through a data window.
///
/// These are contract violations by a strategy, never market conditions, so
/// the engine propagates them instead of skipping the step.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WindowError {
    #[error("Positive offset {offset} not allowed: cannot access future data")]
    FutureOffset { offset: i64 },

    #[error("Offset {offset} out of range (current index {current}, window starts at {start})")]
    OutOfRange { offset: i64, current: usize, start: usize },

    #[error("Column '{column}' not found in data")]
    UnknownColumn { column: String },
}

#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Invalid trading mode: at least one of long or short trading must be enabled")]
    NoDirectionEnabled,

    #[error("Insufficient data: need at least {required} bars, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid historical table: {0}")]
    InvalidTable(String),

    #[error("Column '{column}' not found in historical table")]
    UnknownColumn { column: String },

    #[error("Data window error: {0}")]
    Window(#[from] WindowError),

    #[error("Unknown {kind} strategy '{name}'")]
    UnknownStrategy { kind: String, name: String },

    #[error("Data loading error: {0}")]
    DataLoadError(String),

    #[error("CSV parse error: {0}")]
    CsvError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BacktestError>;
