use common::models::{OrderState, TradeSignal};
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::info;

use crate::trade_results::TradeOrder;

/// Formats trading day events into human readable messages and publishes
/// them to whoever listens (the Telegram service). Without a channel
/// messages only go to the log.
#[derive(Clone, Default)]
pub struct Blogger {
    notification_tx: Option<broadcast::Sender<String>>,
}

impl Blogger {
    pub fn new(notification_tx: Option<broadcast::Sender<String>>) -> Self {
        Self { notification_tx }
    }

    fn send(&self, message: String) {
        info!("Blog: {}", message);
        if let Some(tx) = &self.notification_tx {
            // No receivers is fine, notifications are best effort.
            let _ = tx.send(message);
        }
    }

    pub fn start_trading_message(&self, tickers: &[String], cash: Decimal) {
        self.send(format!(
            "Trading day started. Instruments: {}. Free cash: {:.2} rub",
            tickers.join(", "),
            cash
        ));
    }

    pub fn no_trading_message(&self, reason: &str) {
        self.send(format!("No trading today: {reason}"));
    }

    pub fn signal_message(&self, signal: &TradeSignal) {
        self.send(format!("New signal: {signal}"));
    }

    pub fn open_position_message(&self, order: &TradeOrder) {
        self.send(format!(
            "Open {} position on {}, {} lots (order {}). Take profit {}, stop loss {}",
            order.signal.signal_type,
            order.signal.figi,
            order.lots,
            order.open_order_id,
            order.signal.take_profit_level.round_dp(4),
            order.signal.stop_loss_level.round_dp(4)
        ));
    }

    pub fn close_position_message(&self, order: &TradeOrder) {
        self.send(format!(
            "Close {} position on {} (order {})",
            order.signal.signal_type,
            order.signal.figi,
            order.close_order_id.as_deref().unwrap_or("-")
        ));
    }

    pub fn summary_message(&self) {
        self.send("Trading day summary:".to_string());
    }

    pub fn trading_depo_summary_message(&self, before: Decimal, after: Decimal) {
        let profit = after - before;
        let percent = if before.is_zero() {
            Decimal::ZERO
        } else {
            profit / before * Decimal::ONE_HUNDRED
        };
        self.send(format!(
            "Cash before: {:.2} rub, after: {:.2} rub. Profit: {:.2} rub ({:.2}%)",
            before, after, profit, percent
        ));
    }

    pub fn summary_open_signal_message(&self, order: &TradeOrder, open_state: &OrderState) {
        self.send(format!(
            "Still open: {} {}. Opened by {} at {} ({:?})",
            order.signal.signal_type,
            order.signal.figi,
            order.open_order_id,
            open_state.executed_order_price,
            open_state.status
        ));
    }

    pub fn summary_closed_signal_message(
        &self,
        order: &TradeOrder,
        open_state: &OrderState,
        close_state: Option<&OrderState>,
    ) {
        let close = close_state
            .map(|s| format!("{} ({:?})", s.executed_order_price, s.status))
            .unwrap_or_else(|| "unknown".to_string());
        self.send(format!(
            "Closed: {} {}. Open {} ({:?}), close {}",
            order.signal.signal_type, order.signal.figi, open_state.executed_order_price, open_state.status, close
        ));
    }

    pub fn fail_message(&self) {
        self.send("Trading failed today, no results. Open positions should be closed manually.".to_string());
    }

    pub fn final_message(&self) {
        self.send("Trading day finished.".to_string());
    }
}
