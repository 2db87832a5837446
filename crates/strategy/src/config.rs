use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StrategyConfigError {
    #[error("unknown strategy {0:?}")]
    UnknownStrategy(String),
    #[error("strategy setting {0} is missing")]
    Missing(&'static str),
    #[error("strategy setting {key} has invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("SIGNAL_MIN_TICKS must be at least 3 to compute a deviation, got {0}")]
    TooFewTicks(usize),
}

const SIGNAL_MIN_TICKS: &str = "SIGNAL_MIN_TICKS";
const LONG_TAKE: &str = "LONG_TAKE";
const LONG_STOP: &str = "LONG_STOP";
const SHORT_TAKE: &str = "SHORT_TAKE";
const SHORT_STOP: &str = "SHORT_STOP";

/// Typed parameters of the spread deviation strategy.
///
/// Take and stop values are multipliers applied to the entry price. Keys the
/// engine does not know are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpreadStrategyConfig {
    pub signal_min_ticks: usize,
    pub long_take: Decimal,
    pub long_stop: Decimal,
    pub short_take: Decimal,
    pub short_stop: Decimal,
}

impl SpreadStrategyConfig {
    pub fn from_settings(settings: &HashMap<String, Value>) -> Result<Self, StrategyConfigError> {
        let signal_min_ticks: usize = parse(settings, SIGNAL_MIN_TICKS)?;
        if signal_min_ticks < 3 {
            return Err(StrategyConfigError::TooFewTicks(signal_min_ticks));
        }

        Ok(Self {
            signal_min_ticks,
            long_take: parse(settings, LONG_TAKE)?,
            long_stop: parse(settings, LONG_STOP)?,
            short_take: parse(settings, SHORT_TAKE)?,
            short_stop: parse(settings, SHORT_STOP)?,
        })
    }
}

fn parse<T: FromStr>(settings: &HashMap<String, Value>, key: &'static str) -> Result<T, StrategyConfigError> {
    let raw = match settings.get(key) {
        None => return Err(StrategyConfigError::Missing(key)),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => {
            return Err(StrategyConfigError::Invalid {
                key,
                value: other.to_string(),
            });
        }
    };
    raw.parse()
        .map_err(|_| StrategyConfigError::Invalid { key, value: raw.clone() })
}
