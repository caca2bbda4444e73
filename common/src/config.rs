use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BacktestError, Result};

/// Which directions the engine may trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingMode {
    pub allow_long: bool,
    pub allow_short: bool,
    /// Close and re-open in the opposite direction on an opposite entry signal
    pub allow_reversal: bool,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::long_only()
    }
}

impl TradingMode {
    pub fn long_only() -> Self {
        Self {
            allow_long: true,
            allow_short: false,
            allow_reversal: false,
        }
    }

    pub fn short_only() -> Self {
        Self {
            allow_long: false,
            allow_short: true,
            allow_reversal: false,
        }
    }

    pub fn both() -> Self {
        Self {
            allow_long: true,
            allow_short: true,
            allow_reversal: false,
        }
    }

    pub fn with_reversal() -> Self {
        Self {
            allow_long: true,
            allow_short: true,
            allow_reversal: true,
        }
    }

    pub fn allows(&self, direction: crate::types::Direction) -> bool {
        match direction {
            crate::types::Direction::Long => self.allow_long,
            crate::types::Direction::Short => self.allow_short,
        }
    }
}

/// Engine run parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub initial_capital: f64,
    /// Fraction of notional charged on each leg (0.001 = 0.1%)
    pub commission: f64,
    /// Trailing bars visible to a decision; also the first simulated row
    pub lookback_window: usize,
    pub trading_mode: TradingMode,
    /// Column passed to the risk manager as current volatility
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volatility_column: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10000.0,
            commission: 0.001,
            lookback_window: 100,
            trading_mode: TradingMode::default(),
            volatility_column: None,
        }
    }
}

impl RunConfig {
    pub fn with_capital(mut self, capital: f64) -> Self {
        self.initial_capital = capital;
        self
    }

    pub fn with_commission(mut self, commission: f64) -> Self {
        self.commission = commission;
        self
    }

    pub fn with_lookback(mut self, lookback: usize) -> Self {
        self.lookback_window = lookback;
        self
    }

    pub fn with_trading_mode(mut self, mode: TradingMode) -> Self {
        self.trading_mode = mode;
        self
    }

    pub fn with_volatility_column(mut self, column: impl Into<String>) -> Self {
        self.volatility_column = Some(column.into());
        self
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if !self.trading_mode.allow_long && !self.trading_mode.allow_short {
            return Err(BacktestError::NoDirectionEnabled);
        }
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(BacktestError::InvalidParameter(format!(
                "initial capital must be positive, got {}",
                self.initial_capital
            )));
        }
        if !self.commission.is_finite() || !(0.0..1.0).contains(&self.commission) {
            return Err(BacktestError::InvalidParameter(format!(
                "commission must be in [0, 1), got {}",
                self.commission
            )));
        }
        Ok(())
    }
}

/// ATR smoothing method
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtrMethod {
    #[default]
    Wilder,
    Ema,
}

/// Indicator to precompute as a table column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum IndicatorSpec {
    Sma {
        period: usize,
    },
    Ema {
        period: usize,
    },
    Atr {
        period: usize,
        #[serde(default)]
        method: AtrMethod,
    },
    /// Rolling (buy - sell) / total volume, in percent
    CvdRatio {
        window: usize,
    },
    /// `CvdRatio` with the window given in minutes of market time; the bar
    /// count is derived from the table's bar interval
    CvdRatioMinutes {
        window_minutes: usize,
    },
}

impl IndicatorSpec {
    /// Column name the indicator is stored under, e.g. `sma_20` or `atr_14_ema`
    pub fn column_name(&self) -> String {
        match self {
            IndicatorSpec::Sma { period } => format!("sma_{}", period),
            IndicatorSpec::Ema { period } => format!("ema_{}", period),
            IndicatorSpec::Atr {
                period,
                method: AtrMethod::Wilder,
            } => format!("atr_{}", period),
            IndicatorSpec::Atr {
                period,
                method: AtrMethod::Ema,
            } => format!("atr_{}_ema", period),
            IndicatorSpec::CvdRatio { window } => format!("cvd_ratio_{}", window),
            IndicatorSpec::CvdRatioMinutes { window_minutes } => {
                format!("cvd_ratio_{}min", window_minutes)
            }
        }
    }
}

/// Bar size the loaded data is resampled to before indicators run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "3h")]
    H3,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "8h")]
    H8,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 13] = [
        Timeframe::M1,
        Timeframe::M3,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H2,
        Timeframe::H3,
        Timeframe::H4,
        Timeframe::H6,
        Timeframe::H8,
        Timeframe::H12,
        Timeframe::D1,
    ];

    pub fn minutes(&self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M3 => 3,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H2 => 120,
            Timeframe::H3 => 180,
            Timeframe::H4 => 240,
            Timeframe::H6 => 360,
            Timeframe::H8 => 480,
            Timeframe::H12 => 720,
            Timeframe::D1 => 1440,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.minutes())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H3 => "3h",
            Timeframe::H4 => "4h",
            Timeframe::H6 => "6h",
            Timeframe::H8 => "8h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = BacktestError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|tf| tf.as_str() == s)
            .ok_or_else(|| {
                let supported: Vec<&str> = Self::ALL.iter().map(|tf| tf.as_str()).collect();
                BacktestError::ConfigError(format!(
                    "Unsupported timeframe: {}. Supported: {}",
                    s,
                    supported.join(", ")
                ))
            })
    }
}

/// Where historical bars come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DataSource {
    File {
        path: PathBuf,
    },
    Synthetic {
        bars: usize,
        #[serde(default = "default_seed")]
        seed: u64,
        #[serde(default = "default_initial_price")]
        initial_price: f64,
    },
}

fn default_seed() -> u64 {
    42
}

fn default_initial_price() -> f64 {
    100.0
}

/// A named collaborator plus its free-form parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySpec {
    pub name: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl StrategySpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn f64_param(&self, key: &str, default: f64) -> Result<f64> {
        match self.params.get(key) {
            None => Ok(default),
            Some(v) => v.as_f64().ok_or_else(|| self.bad_param(key, "a number")),
        }
    }

    pub fn usize_param(&self, key: &str, default: usize) -> Result<usize> {
        match self.params.get(key) {
            None => Ok(default),
            Some(v) => v
                .as_u64()
                .map(|n| n as usize)
                .ok_or_else(|| self.bad_param(key, "a non-negative integer")),
        }
    }

    pub fn bool_param(&self, key: &str, default: bool) -> Result<bool> {
        match self.params.get(key) {
            None => Ok(default),
            Some(v) => v.as_bool().ok_or_else(|| self.bad_param(key, "a boolean")),
        }
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    fn bad_param(&self, key: &str, expected: &str) -> BacktestError {
        BacktestError::ConfigError(format!(
            "parameter '{}' of '{}' must be {}",
            key, self.name, expected
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub entry: StrategySpec,
    pub exit: StrategySpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<StrategySpec>,
}

/// Where run artifacts are written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub save_dir: PathBuf,
}

/// Complete file-level configuration of one backtest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    #[serde(default)]
    pub engine: RunConfig,
    pub data: DataSource,
    /// Resample loaded bars to this size; `None` keeps the source bars
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<Timeframe>,
    #[serde(default)]
    pub indicators: Vec<IndicatorSpec>,
    pub strategy: StrategyConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputConfig>,
}

impl BacktestConfig {
    /// Load from a `.toml` or `.json` file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        let config: Self = match ext.as_str() {
            "toml" => Self::from_toml_str(&text)?,
            "json" => serde_json::from_str(&text)?,
            _ => {
                return Err(BacktestError::ConfigError(format!(
                    "Unsupported config format: {}",
                    ext
                )))
            }
        };
        config.engine.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| BacktestError::ConfigError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[engine]
initial_capital = 5000.0
commission = 0.0005
lookback_window = 50

[engine.trading_mode]
allow_long = true
allow_short = true
allow_reversal = true

[data]
source = "synthetic"
bars = 500

[[indicators]]
name = "ema"
period = 9

[[indicators]]
name = "atr"
period = 14
method = "ema"

[strategy.entry]
name = "ema_cross_sma"
params = { ema_column = "ema_9", sma_column = "sma_21" }

[strategy.exit]
name = "atr_based_exit"
params = { atr_column = "atr_14_ema", tp_multiplier = 3.0, sl_multiplier = 1.5 }
"#;

    #[test]
    fn test_parse_toml_config() {
        let config = BacktestConfig::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.engine.initial_capital, 5000.0);
        assert_eq!(config.engine.lookback_window, 50);
        assert!(config.engine.trading_mode.allow_reversal);
        assert_eq!(
            config.data,
            DataSource::Synthetic {
                bars: 500,
                seed: 42,
                initial_price: 100.0
            }
        );
        assert_eq!(config.indicators.len(), 2);
        assert_eq!(config.indicators[1].column_name(), "atr_14_ema");
        assert_eq!(config.strategy.exit.f64_param("tp_multiplier", 0.0).unwrap(), 3.0);
        assert!(config.strategy.risk.is_none());
    }

    #[test]
    fn test_no_direction_enabled_is_rejected() {
        let config = RunConfig::default().with_trading_mode(TradingMode {
            allow_long: false,
            allow_short: false,
            allow_reversal: true,
        });

        assert!(matches!(
            config.validate(),
            Err(BacktestError::NoDirectionEnabled)
        ));
    }

    #[test]
    fn test_invalid_capital_and_commission() {
        assert!(RunConfig::default().with_capital(0.0).validate().is_err());
        assert!(RunConfig::default().with_commission(-0.01).validate().is_err());
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn test_indicator_column_names() {
        assert_eq!(IndicatorSpec::Sma { period: 200 }.column_name(), "sma_200");
        assert_eq!(
            IndicatorSpec::Atr {
                period: 21,
                method: AtrMethod::Wilder
            }
            .column_name(),
            "atr_21"
        );
        assert_eq!(IndicatorSpec::CvdRatio { window: 3 }.column_name(), "cvd_ratio_3");
    }

    #[test]
    fn test_timeframe_parsing() {
        let tf: Timeframe = "15m".parse().unwrap();
        assert_eq!(tf, Timeframe::M15);
        assert_eq!(tf.minutes(), 15);
        assert_eq!(Timeframe::D1.to_string(), "1d");
        assert!(matches!(
            "7m".parse::<Timeframe>(),
            Err(BacktestError::ConfigError(_))
        ));
    }

    #[test]
    fn test_timeframe_and_output_sections() {
        let text = format!(
            "timeframe = \"4h\"\n{}\n[output]\nsave_dir = \"runs\"\n",
            SAMPLE
        );
        let config = BacktestConfig::from_toml_str(&text).unwrap();

        assert_eq!(config.timeframe, Some(Timeframe::H4));
        assert_eq!(
            config.output,
            Some(OutputConfig {
                save_dir: PathBuf::from("runs")
            })
        );
        assert!(BacktestConfig::from_toml_str(SAMPLE).unwrap().timeframe.is_none());
    }

    #[test]
    fn test_cvd_minutes_column_name() {
        let spec = IndicatorSpec::CvdRatioMinutes { window_minutes: 15 };
        assert_eq!(spec.column_name(), "cvd_ratio_15min");
    }

    #[test]
    fn test_strategy_param_type_mismatch() {
        let spec = StrategySpec::new("hold_bars").with_param("bars", "ten");
        assert!(spec.usize_param("bars", 10).is_err());
        assert_eq!(spec.usize_param("missing", 7).unwrap(), 7);
    }
}
