pub mod loader;
pub mod resample;
pub mod synthetic;
pub mod table;

pub use loader::{load_csv, load_json, read_csv};
pub use resample::resample;
pub use synthetic::{bars_from_closes, generate_flat_bars, generate_synthetic_bars};
pub use table::{HistoricalTable, REQUIRED_COLUMNS, TAKER_BUY_VOLUME};

use std::path::Path;

use common::{BacktestError, DataSource, Result};

/// Load a table from file, detecting format from extension
pub fn load_file(path: &Path) -> Result<HistoricalTable> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "csv" => load_csv(path),
        "json" => load_json(path),
        _ => Err(BacktestError::DataLoadError(format!(
            "Unsupported file format: {}",
            ext
        ))),
    }
}

/// Materialise the configured data source
pub fn load_source(source: &DataSource) -> Result<HistoricalTable> {
    match source {
        DataSource::File { path } => load_file(path),
        DataSource::Synthetic {
            bars,
            seed,
            initial_price,
        } => HistoricalTable::from_bars(&generate_synthetic_bars(*bars, *initial_price, *seed)),
    }
}
