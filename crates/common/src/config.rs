use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::errors::ConfigError;

const DEFAULT_REST_URL: &str = "https://invest-public-api.tinkoff.ru/rest";
const DEFAULT_WS_URL: &str = "wss://invest-public-api.tinkoff.ru/ws/tinkoff.public.invest.api.contract.v1.MarketDataStreamService/MarketDataStream";

/// Per-strategy settings. The identity fields come from the strategies file,
/// the instrument fields are refreshed from the broker before every session.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StrategySettings {
    pub name: String,
    pub figi: String,
    #[serde(default)]
    pub ticker: String,
    #[serde(default = "default_max_lots")]
    pub max_lots_per_order: i64,
    /// Strategy specific parameters, validated by the strategy itself.
    #[serde(default)]
    pub settings: HashMap<String, serde_json::Value>,
    #[serde(default = "default_lot_size")]
    pub lot_size: i64,
    #[serde(default)]
    pub short_enabled_flag: bool,
    #[serde(default)]
    pub basic_asset_figi: String,
    #[serde(default = "default_basic_asset_size")]
    pub basic_asset_size: Decimal,
}

fn default_max_lots() -> i64 {
    1
}

fn default_lot_size() -> i64 {
    1
}

fn default_basic_asset_size() -> Decimal {
    Decimal::ONE
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvestSettings {
    pub token: String,
    pub app_name: String,
    pub rest_url: String,
    pub ws_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountSettings {
    pub account_id: Option<String>,
    pub min_rub_on_account: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradingSettings {
    pub exchange: String,
    /// Stream cutoff, measured back from the session end.
    pub stop_trade_before_close: Duration,
    /// New signals are ignored once the session end is this close.
    pub stop_signals_before_close: Duration,
    pub reconnect_delay: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlogSettings {
    pub blog_status: bool,
    pub bot_token: String,
    pub chat_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeepSettings {
    pub data_folder: String,
    pub batch_size: usize,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub invest: InvestSettings,
    pub account: AccountSettings,
    pub trading: TradingSettings,
    pub blog: BlogSettings,
    pub keep: KeepSettings,
    pub strategies_file: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| -> Result<String, ConfigError> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };
        let text = |key: &'static str, default: &str| -> String {
            lookup(key).unwrap_or_else(|| default.to_string())
        };

        let invest = InvestSettings {
            token: required("INVEST_TOKEN")?,
            app_name: text("INVEST_APP_NAME", "pair-spread-bot"),
            rest_url: text("INVEST_REST_URL", DEFAULT_REST_URL),
            ws_url: text("INVEST_WS_URL", DEFAULT_WS_URL),
        };

        let account = AccountSettings {
            account_id: lookup("ACCOUNT_ID").filter(|v| !v.trim().is_empty()),
            min_rub_on_account: parse_or(&lookup, "MIN_RUB_ON_ACCOUNT", 5_000)?,
        };

        let trading = TradingSettings {
            exchange: text("EXCHANGE", "MOEX"),
            stop_trade_before_close: Duration::from_secs(parse_or(
                &lookup,
                "STOP_TRADE_BEFORE_CLOSE_SECS",
                300,
            )?),
            stop_signals_before_close: Duration::from_secs(parse_or(
                &lookup,
                "STOP_SIGNALS_BEFORE_CLOSE_SECS",
                3_600,
            )?),
            reconnect_delay: Duration::from_millis(parse_or(
                &lookup,
                "STREAM_RECONNECT_DELAY_MS",
                1_000,
            )?),
        };

        let blog_status: bool = parse_or(&lookup, "TELEGRAM_ENABLED", false)?;
        let blog = if blog_status {
            let chat_id = required("TELEGRAM_CHAT_ID")?;
            BlogSettings {
                blog_status,
                bot_token: required("TELEGRAM_BOT_TOKEN")?,
                chat_id: chat_id.trim().parse().map_err(|_| ConfigError::Invalid {
                    key: "TELEGRAM_CHAT_ID",
                    value: chat_id.clone(),
                })?,
            }
        } else {
            BlogSettings {
                blog_status,
                bot_token: String::new(),
                chat_id: 0,
            }
        };

        let keep = KeepSettings {
            data_folder: text("WORKDIR", "."),
            batch_size: positive(parse_or(&lookup, "KEEP_BATCH_SIZE", 1_000)?, "KEEP_BATCH_SIZE")?,
            queue_capacity: positive(
                parse_or(&lookup, "KEEP_QUEUE_CAPACITY", 2_000)?,
                "KEEP_QUEUE_CAPACITY",
            )?,
        };

        Ok(Self {
            invest,
            account,
            trading,
            blog,
            keep,
            strategies_file: text("STRATEGIES_FILE", "strategies.json"),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn positive(value: usize, key: &'static str) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        });
    }
    Ok(value)
}

pub fn parse_strategies(path: &str, raw: &str) -> Result<Vec<StrategySettings>, ConfigError> {
    serde_json::from_str(raw).map_err(|source| ConfigError::StrategiesFormat {
        path: path.to_string(),
        source,
    })
}

pub fn load_strategies(path: &str) -> Result<Vec<StrategySettings>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::StrategiesFile {
        path: path.to_string(),
        source,
    })?;
    parse_strategies(path, &raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_token_is_set() {
        let settings = Settings::from_lookup(lookup_from(&[("INVEST_TOKEN", "t.secret")])).unwrap();

        assert_eq!(settings.invest.token, "t.secret");
        assert_eq!(settings.invest.rest_url, DEFAULT_REST_URL);
        assert_eq!(settings.account.account_id, None);
        assert_eq!(settings.account.min_rub_on_account, 5_000);
        assert_eq!(settings.trading.exchange, "MOEX");
        assert_eq!(settings.trading.stop_trade_before_close, Duration::from_secs(300));
        assert_eq!(settings.trading.stop_signals_before_close, Duration::from_secs(3_600));
        assert_eq!(settings.trading.reconnect_delay, Duration::from_secs(1));
        assert!(!settings.blog.blog_status);
        assert_eq!(settings.keep.batch_size, 1_000);
        assert_eq!(settings.keep.queue_capacity, 2_000);
    }

    #[test]
    fn missing_token_fails_fast() {
        let err = Settings::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("INVEST_TOKEN")));
    }

    #[test]
    fn telegram_requires_chat_id_when_enabled() {
        let err = Settings::from_lookup(lookup_from(&[
            ("INVEST_TOKEN", "t"),
            ("TELEGRAM_ENABLED", "true"),
            ("TELEGRAM_BOT_TOKEN", "bot"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("TELEGRAM_CHAT_ID")));

        let settings = Settings::from_lookup(lookup_from(&[
            ("INVEST_TOKEN", "t"),
            ("TELEGRAM_ENABLED", "true"),
            ("TELEGRAM_BOT_TOKEN", "bot"),
            ("TELEGRAM_CHAT_ID", "-100200"),
        ]))
        .unwrap();
        assert_eq!(settings.blog.chat_id, -100200);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = Settings::from_lookup(lookup_from(&[
            ("INVEST_TOKEN", "t"),
            ("KEEP_BATCH_SIZE", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "KEEP_BATCH_SIZE", .. }));
    }

    #[test]
    fn garbage_number_is_reported_with_its_key() {
        let err = Settings::from_lookup(lookup_from(&[
            ("INVEST_TOKEN", "t"),
            ("STOP_TRADE_BEFORE_CLOSE_SECS", "five"),
        ]))
        .unwrap_err();
        match err {
            ConfigError::Invalid { key, value } => {
                assert_eq!(key, "STOP_TRADE_BEFORE_CLOSE_SECS");
                assert_eq!(value, "five");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn strategies_file_accepts_numbers_and_strings() {
        let raw = r#"[
            {
                "name": "SpreadDeviation",
                "figi": "FUTSI0325000",
                "ticker": "SiH5",
                "max_lots_per_order": 2,
                "settings": {"SIGNAL_MIN_TICKS": 30, "LONG_TAKE": "1.01"}
            }
        ]"#;

        let strategies = parse_strategies("inline", raw).unwrap();
        assert_eq!(strategies.len(), 1);
        let s = &strategies[0];
        assert_eq!(s.max_lots_per_order, 2);
        assert_eq!(s.lot_size, 1);
        assert_eq!(s.basic_asset_size, dec!(1));
        assert_eq!(s.settings["SIGNAL_MIN_TICKS"], serde_json::json!(30));
    }

    #[test]
    fn broken_strategies_file_is_a_format_error() {
        let err = parse_strategies("broken.json", "{not json").unwrap_err();
        assert!(matches!(err, ConfigError::StrategiesFormat { .. }));
    }
}
