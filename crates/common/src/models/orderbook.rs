use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Levels requested per side when subscribing to order books.
pub const ORDERBOOK_DEPTH: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: i64,
}

/// Order book as received from the market data stream. Bids and asks are
/// ordered best to worst.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub figi: String,
    pub time: DateTime<Utc>,
    pub depth: u32,
    pub is_consistent: bool,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|level| level.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|level| level.price)
    }
}

/// Flattened row written to the `order_books` table.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBookInsert {
    pub time: DateTime<Utc>,
    pub figi: String,
    pub is_consistent: bool,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl From<&OrderBookSnapshot> for OrderBookInsert {
    fn from(book: &OrderBookSnapshot) -> Self {
        let depth = ORDERBOOK_DEPTH as usize;
        Self {
            time: book.time,
            figi: book.figi.clone(),
            is_consistent: book.is_consistent,
            bids: book.bids.iter().take(depth).copied().collect(),
            asks: book.asks.iter().take(depth).copied().collect(),
        }
    }
}
