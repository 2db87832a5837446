use std::collections::HashMap;

use common::models::TradeSignal;
use tracing::warn;

/// A position opened on a signal, and the order that closed it once closed.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeOrder {
    pub open_order_id: String,
    pub close_order_id: Option<String>,
    pub lots: i64,
    pub signal: TradeSignal,
}

/// Positions of one trading day, keyed by figi. At most one open position per figi.
#[derive(Debug, Default)]
pub struct TradeResults {
    open: HashMap<String, TradeOrder>,
    closed: HashMap<String, Vec<TradeOrder>>,
}

impl TradeResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_position(&mut self, figi: &str, open_order_id: &str, lots: i64, signal: TradeSignal) -> TradeOrder {
        let order = TradeOrder {
            open_order_id: open_order_id.to_string(),
            close_order_id: None,
            lots,
            signal,
        };
        if let Some(replaced) = self.open.insert(figi.to_string(), order.clone()) {
            warn!("Open position for {} replaced without close: {:?}", figi, replaced);
        }
        order
    }

    pub fn close_position(&mut self, figi: &str, close_order_id: &str) -> Option<TradeOrder> {
        let mut order = self.open.remove(figi)?;
        order.close_order_id = Some(close_order_id.to_string());
        self.closed.entry(figi.to_string()).or_default().push(order.clone());
        Some(order)
    }

    pub fn current_trade_order(&self, figi: &str) -> Option<&TradeOrder> {
        self.open.get(figi)
    }

    pub fn open_orders(&self) -> &HashMap<String, TradeOrder> {
        &self.open
    }

    pub fn closed_orders(&self) -> &HashMap<String, Vec<TradeOrder>> {
        &self.closed
    }
}
