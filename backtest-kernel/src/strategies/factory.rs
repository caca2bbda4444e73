//! Build collaborators from configuration.
//!
//! Names are resolved here, at the edge. The engine itself only ever sees
//! the trait objects.

use common::{AtrMethod, BacktestError, Direction, IndicatorSpec, Result, StrategySpec};

use super::{
    AtrBasedExit, EmaCrossSma, EmaCrossSmaCvd, EntryStrategy, ExitStrategy, FixedFraction,
    FixedPercentRisk, FixedTpSl, HoldBars, NeverExit, PriceCrossSma, RiskManager, SignalColumn,
};

pub fn build_entry(spec: &StrategySpec) -> Result<Box<dyn EntryStrategy>> {
    let strategy: Box<dyn EntryStrategy> = match spec.name.as_str() {
        "price_cross_sma" | "price_above_sma" => {
            let sma = column_param(spec, "sma_column", "period", 20, |period| {
                IndicatorSpec::Sma { period }
            })?;
            let direction = match spec.str_param("direction").unwrap_or("long") {
                "long" | "LONG" => Direction::Long,
                "short" | "SHORT" => Direction::Short,
                other => {
                    return Err(BacktestError::ConfigError(format!(
                        "unknown direction '{}' for {}",
                        other, spec.name
                    )))
                }
            };
            Box::new(PriceCrossSma::new(sma, direction))
        }
        "ema_cross_sma" => Box::new(ema_cross(spec)?),
        "ema_cross_sma_cvd" => {
            let cvd = if spec.str_param("cvd_column").is_none()
                && spec.params.contains_key("cvd_window_minutes")
            {
                let window_minutes = spec.usize_param("cvd_window_minutes", 15)?;
                IndicatorSpec::CvdRatioMinutes { window_minutes }.column_name()
            } else {
                column_param(spec, "cvd_column", "cvd_window", 15, |window| {
                    IndicatorSpec::CvdRatio { window }
                })?
            };
            let threshold = spec.f64_param("cvd_ratio_threshold", 20.0)?;
            Box::new(EmaCrossSmaCvd::new(ema_cross(spec)?, cvd, threshold))
        }
        "signal_column" => Box::new(SignalColumn::new(
            spec.str_param("column").unwrap_or("signal"),
        )),
        _ => return Err(unknown("entry", spec)),
    };
    Ok(strategy)
}

pub fn build_exit(spec: &StrategySpec) -> Result<Box<dyn ExitStrategy>> {
    let strategy: Box<dyn ExitStrategy> = match spec.name.as_str() {
        "hold_bars" => Box::new(HoldBars::new(spec.usize_param("bars", 10)?)),
        "fixed_tp_sl" => {
            let tp = spec.f64_param("tp_percent", 0.05)?;
            let sl = spec.f64_param("sl_percent", 0.02)?;
            if tp <= 0.0 || !(0.0..1.0).contains(&sl) || sl == 0.0 {
                return Err(BacktestError::InvalidParameter(format!(
                    "fixed_tp_sl needs tp_percent > 0 and 0 < sl_percent < 1, got {} / {}",
                    tp, sl
                )));
            }
            Box::new(FixedTpSl::new(tp, sl))
        }
        "atr_based_exit" => {
            let method = match spec.str_param("method").unwrap_or("wilder") {
                "wilder" => AtrMethod::Wilder,
                "ema" => AtrMethod::Ema,
                other => {
                    return Err(BacktestError::ConfigError(format!(
                        "unknown ATR method '{}'",
                        other
                    )))
                }
            };
            let atr = column_param(spec, "atr_column", "atr_period", 14, |period| {
                IndicatorSpec::Atr { period, method }
            })?;
            let tp = spec.f64_param("tp_multiplier", 9.0)?;
            let sl = spec.f64_param("sl_multiplier", 5.5)?;
            if tp <= 0.0 || sl <= 0.0 {
                return Err(BacktestError::InvalidParameter(format!(
                    "atr_based_exit multipliers must be positive, got {} / {}",
                    tp, sl
                )));
            }
            Box::new(AtrBasedExit::new(atr, tp, sl))
        }
        "never_exit" => Box::new(NeverExit),
        _ => return Err(unknown("exit", spec)),
    };
    Ok(strategy)
}

/// `None` selects the default fixed-percent manager
pub fn build_risk(spec: Option<&StrategySpec>) -> Result<Box<dyn RiskManager>> {
    let Some(spec) = spec else {
        return Ok(Box::new(FixedPercentRisk::default()));
    };

    let manager: Box<dyn RiskManager> = match spec.name.as_str() {
        "fixed_percent" | "fixed_percent_risk" => {
            let defaults = FixedPercentRisk::default();
            let reference_volatility = match spec.params.get("reference_volatility") {
                Some(_) => Some(spec.f64_param("reference_volatility", 0.0)?),
                None => None,
            };
            Box::new(FixedPercentRisk {
                risk_per_trade: spec.f64_param("risk_per_trade", defaults.risk_per_trade)?,
                max_position_pct: spec.f64_param("max_position_pct", defaults.max_position_pct)?,
                min_position_size: spec
                    .f64_param("min_position_size", defaults.min_position_size)?,
                max_drawdown: spec.f64_param("max_drawdown", defaults.max_drawdown)?,
                min_capital: spec.f64_param("min_capital", defaults.min_capital)?,
                reference_volatility,
            })
        }
        "fixed_fraction" => {
            let fraction = spec.f64_param("fraction", 0.95)?;
            if fraction <= 0.0 || fraction > 1.0 {
                return Err(BacktestError::InvalidParameter(format!(
                    "fixed_fraction needs 0 < fraction <= 1, got {}",
                    fraction
                )));
            }
            Box::new(FixedFraction::new(fraction))
        }
        _ => return Err(unknown("risk", spec)),
    };
    Ok(manager)
}

fn ema_cross(spec: &StrategySpec) -> Result<EmaCrossSma> {
    let ema = column_param(spec, "ema_column", "ema_period", 59, |period| {
        IndicatorSpec::Ema { period }
    })?;
    let sma = column_param(spec, "sma_column", "sma_period", 200, |period| {
        IndicatorSpec::Sma { period }
    })?;
    Ok(EmaCrossSma::new(ema, sma).with_short(spec.bool_param("allow_short", false)?))
}

/// An explicit column name wins; otherwise the name is derived from a period
fn column_param(
    spec: &StrategySpec,
    column_key: &str,
    period_key: &str,
    default_period: usize,
    indicator: impl Fn(usize) -> IndicatorSpec,
) -> Result<String> {
    if let Some(column) = spec.str_param(column_key) {
        return Ok(column.to_string());
    }
    let period = spec.usize_param(period_key, default_period)?;
    Ok(indicator(period).column_name())
}

fn unknown(kind: &str, spec: &StrategySpec) -> BacktestError {
    BacktestError::UnknownStrategy {
        kind: kind.to_string(),
        name: spec.name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_entry_derives_columns() {
        let spec = StrategySpec::new("ema_cross_sma_cvd")
            .with_param("ema_period", 9)
            .with_param("sma_period", 21)
            .with_param("cvd_window", 5);

        let entry = build_entry(&spec).unwrap();
        assert_eq!(entry.name(), "ema_cross_sma_cvd");
        assert_eq!(entry.required_columns(), vec!["ema_9", "sma_21", "cvd_ratio_5"]);
    }

    #[test]
    fn test_cvd_window_in_minutes() {
        let spec = StrategySpec::new("ema_cross_sma_cvd")
            .with_param("ema_period", 9)
            .with_param("sma_period", 21)
            .with_param("cvd_window_minutes", 30);

        let entry = build_entry(&spec).unwrap();
        assert_eq!(entry.required_columns(), vec!["ema_9", "sma_21", "cvd_ratio_30min"]);
    }

    #[test]
    fn test_build_exit_atr_method() {
        let spec = StrategySpec::new("atr_based_exit")
            .with_param("atr_period", 21)
            .with_param("method", "ema");

        let exit = build_exit(&spec).unwrap();
        assert_eq!(exit.required_columns(), vec!["atr_21_ema"]);
    }

    #[test]
    fn test_unknown_names() {
        assert!(matches!(
            build_entry(&StrategySpec::new("rsi_dip")).err(),
            Some(BacktestError::UnknownStrategy { .. })
        ));
        assert!(matches!(
            build_exit(&StrategySpec::new("trailing")).err(),
            Some(BacktestError::UnknownStrategy { .. })
        ));
        assert!(matches!(
            build_risk(Some(&StrategySpec::new("kelly"))).err(),
            Some(BacktestError::UnknownStrategy { .. })
        ));
    }

    #[test]
    fn test_invalid_parameters() {
        let spec = StrategySpec::new("fixed_tp_sl").with_param("sl_percent", 1.5);
        assert!(build_exit(&spec).is_err());

        let spec = StrategySpec::new("fixed_fraction").with_param("fraction", 0.0);
        assert!(build_risk(Some(&spec)).is_err());
    }

    #[test]
    fn test_default_risk_manager() {
        assert_eq!(build_risk(None).unwrap().name(), "fixed_percent");
    }
}
