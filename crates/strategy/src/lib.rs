pub mod config;
pub mod services;
pub mod spread_window;

use common::config::StrategySettings;
use common::models::{OrderBookSnapshot, TradeSignal};
use rust_decimal::Decimal;

pub use config::{SpreadStrategyConfig, StrategyConfigError};
pub use services::SpreadStrategy;
pub use spread_window::SpreadWindow;

/// Every strategy the bot can run, selected by the `name` in the strategies file.
pub enum Strategy {
    SpreadDeviation(SpreadStrategy),
}

impl Strategy {
    pub fn from_settings(settings: StrategySettings) -> Result<Self, StrategyConfigError> {
        match settings.name.as_str() {
            SpreadStrategy::NAME => Ok(Strategy::SpreadDeviation(SpreadStrategy::new(settings)?)),
            other => Err(StrategyConfigError::UnknownStrategy(other.to_string())),
        }
    }

    pub fn settings(&self) -> &StrategySettings {
        match self {
            Strategy::SpreadDeviation(s) => s.settings(),
        }
    }

    pub fn refresh(&mut self, lot_size: i64, short_enabled: bool, basic_asset_size: Decimal, basic_asset_figi: &str) {
        match self {
            Strategy::SpreadDeviation(s) => s.refresh(lot_size, short_enabled, basic_asset_size, basic_asset_figi),
        }
    }

    pub fn analyze_book(&mut self, book: &OrderBookSnapshot) -> Option<TradeSignal> {
        match self {
            Strategy::SpreadDeviation(s) => s.analyze_book(book),
        }
    }

    /// Figis whose order books this strategy consumes.
    pub fn figis(&self) -> Vec<String> {
        let settings = self.settings();
        vec![settings.figi.clone(), settings.basic_asset_figi.clone()]
    }
}
