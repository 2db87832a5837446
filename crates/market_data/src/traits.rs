use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::errors::RemoteError;
use common::models::{
    Account, FutureInfo, InstrumentShort, OrderBookSnapshot, OrderState, PostOrderResult, SecurityPosition,
    TodaySchedule, TradingDaySchedule,
};
use rust_decimal::Decimal;

#[async_trait]
pub trait InstrumentsApi: Send + Sync {
    async fn trading_schedules(
        &self,
        exchange: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TradingDaySchedule>, RemoteError>;

    async fn future_by_figi(&self, figi: &str) -> Result<FutureInfo, RemoteError>;

    async fn find_instrument(&self, query: &str) -> Result<Vec<InstrumentShort>, RemoteError>;
}

#[async_trait]
pub trait OperationsApi: Send + Sync {
    async fn get_accounts(&self) -> Result<Vec<Account>, RemoteError>;

    /// Free roubles on the account.
    async fn available_cash(&self, account_id: &str) -> Result<Decimal, RemoteError>;

    async fn positions(&self, account_id: &str) -> Result<Vec<SecurityPosition>, RemoteError>;
}

#[async_trait]
pub trait OrdersApi: Send + Sync {
    async fn post_market_order(
        &self,
        account_id: &str,
        figi: &str,
        lots: i64,
        is_buy: bool,
    ) -> Result<PostOrderResult, RemoteError>;

    async fn order_state(&self, account_id: &str, order_id: &str) -> Result<OrderState, RemoteError>;

    async fn cancel_all_orders(&self, account_id: &str) -> Result<(), RemoteError>;
}

/// Anything other than order books is skipped by the stream consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketDataEvent {
    OrderBook(OrderBookSnapshot),
    Candle { figi: String },
    Trade { figi: String },
    TradingStatus { figi: String },
    Ping,
    SubscriptionAck,
}

/// One open market data subscription.
#[async_trait]
pub trait Subscription: Send + Sync {
    /// `None` when the server ended the stream.
    async fn next_event(&mut self) -> Option<Result<MarketDataEvent, RemoteError>>;

    /// Tears the subscription down. Calling it twice is harmless.
    fn stop(&mut self);
}

#[async_trait]
pub trait MarketDataStreamApi: Send + Sync {
    async fn open_orderbook_stream(&self, figis: &[String], depth: u32) -> Result<Box<dyn Subscription>, RemoteError>;
}

#[async_trait]
pub trait TradingCalendar: Send + Sync {
    async fn today_schedule(&self, now: DateTime<Utc>) -> Result<TodaySchedule, RemoteError>;
}
