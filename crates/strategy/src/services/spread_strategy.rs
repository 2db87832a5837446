use common::config::StrategySettings;
use common::models::{OrderBookSnapshot, SignalType, TradeSignal};
use rust_decimal::Decimal;
use tracing::{debug, error, info};

use crate::config::{SpreadStrategyConfig, StrategyConfigError};
use crate::spread_window::SpreadWindow;

/// Watches the spread between a derivative and its underlying and signals
/// when the latest spread leaves the `mean ± std_dev` band of the previous
/// `signal_min_ticks` distinct values.
pub struct SpreadStrategy {
    settings: StrategySettings,
    config: SpreadStrategyConfig,
    last_book: Option<OrderBookSnapshot>,
    last_paired_book: Option<OrderBookSnapshot>,
    long_spreads: SpreadWindow,
    short_spreads: SpreadWindow,
}

impl SpreadStrategy {
    pub const NAME: &'static str = "SpreadDeviation";

    pub fn new(settings: StrategySettings) -> Result<Self, StrategyConfigError> {
        let config = SpreadStrategyConfig::from_settings(&settings.settings)?;
        info!(
            figi = %settings.figi,
            ticker = %settings.ticker,
            window = config.signal_min_ticks,
            "Spread strategy configured"
        );
        Ok(Self {
            long_spreads: SpreadWindow::new(config.signal_min_ticks),
            short_spreads: SpreadWindow::new(config.signal_min_ticks),
            settings,
            config,
            last_book: None,
            last_paired_book: None,
        })
    }

    pub fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    pub fn config(&self) -> &SpreadStrategyConfig {
        &self.config
    }

    pub fn long_window(&self) -> &SpreadWindow {
        &self.long_spreads
    }

    pub fn short_window(&self) -> &SpreadWindow {
        &self.short_spreads
    }

    /// Applies instrument data fetched from the broker. The pair may have
    /// changed, so collected spreads and cached books are discarded.
    pub fn refresh(&mut self, lot_size: i64, short_enabled: bool, basic_asset_size: Decimal, basic_asset_figi: &str) {
        self.settings.lot_size = lot_size;
        self.settings.short_enabled_flag = short_enabled;
        self.settings.basic_asset_size = basic_asset_size;
        self.settings.basic_asset_figi = basic_asset_figi.to_string();

        self.last_book = None;
        self.last_paired_book = None;
        self.long_spreads.clear();
        self.short_spreads.clear();
    }

    pub fn analyze_book(&mut self, book: &OrderBookSnapshot) -> Option<TradeSignal> {
        if book.figi == self.settings.figi {
            self.last_book = Some(book.clone());
        } else if book.figi == self.settings.basic_asset_figi {
            self.last_paired_book = Some(book.clone());
        } else {
            error!(
                figi = %book.figi,
                strategy_figi = %self.settings.figi,
                "ConfigurationError: order book routed to a strategy that does not trade it"
            );
            return None;
        }

        let (long_spread, short_spread) = self.current_spreads()?;

        let signal = if self.long_spreads.is_ready() && self.short_spreads.is_ready() {
            self.evaluate(long_spread, short_spread, book)
        } else {
            None
        };

        self.long_spreads.push(long_spread);
        self.short_spreads.push(short_spread);

        signal
    }

    fn current_spreads(&self) -> Option<(Decimal, Decimal)> {
        let book = self.last_book.as_ref()?;
        let paired = self.last_paired_book.as_ref()?;
        let size = self.settings.basic_asset_size;

        match (book.best_ask(), book.best_bid(), paired.best_bid(), paired.best_ask()) {
            (Some(ask), Some(bid), Some(paired_bid), Some(paired_ask)) => {
                Some((ask - paired_bid * size, bid - paired_ask * size))
            }
            _ => {
                debug!(figi = %self.settings.figi, "One side of the pair has an empty book, spread skipped");
                None
            }
        }
    }

    fn evaluate(&self, long_spread: Decimal, short_spread: Decimal, book: &OrderBookSnapshot) -> Option<TradeSignal> {
        let primary = self.last_book.as_ref()?;

        // A spread equal to the window tail is not a new observation.
        let long_moved = self.long_spreads.last() != Some(long_spread);
        let short_moved = self.short_spreads.last() != Some(short_spread);

        if long_moved {
            if let Some(lower) = self.long_spreads.lower_band() {
                if long_spread < lower {
                    let entry = primary.best_ask()?;
                    debug!(%long_spread, %lower, "Long spread below band");
                    return Some(self.signal(
                        SignalType::Long,
                        entry * self.config.long_take,
                        entry * self.config.long_stop,
                        book,
                    ));
                }
            }
        }

        if self.settings.short_enabled_flag && short_moved {
            if let Some(upper) = self.short_spreads.upper_band() {
                if short_spread > upper {
                    let entry = primary.best_bid()?;
                    debug!(%short_spread, %upper, "Short spread above band");
                    return Some(self.signal(
                        SignalType::Short,
                        entry * self.config.short_take,
                        entry * self.config.short_stop,
                        book,
                    ));
                }
            }
        }

        None
    }

    fn signal(&self, signal_type: SignalType, take: Decimal, stop: Decimal, book: &OrderBookSnapshot) -> TradeSignal {
        TradeSignal {
            figi: self.settings.figi.clone(),
            signal_type,
            take_profit_level: take,
            stop_loss_level: stop,
            created_at: book.time,
        }
    }
}
