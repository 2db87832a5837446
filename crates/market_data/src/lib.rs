pub mod remote;
pub mod services;
pub mod traits;

pub use remote::{InvestClient, InvestStreamClient};
pub use services::{ExchangeCalendar, OrderBookStream};
pub use traits::{
    InstrumentsApi, MarketDataEvent, MarketDataStreamApi, OperationsApi, OrdersApi, Subscription, TradingCalendar,
};
