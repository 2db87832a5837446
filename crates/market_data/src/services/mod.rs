pub mod calendar_service;
pub mod orderbook_stream;

pub use calendar_service::ExchangeCalendar;
pub use orderbook_stream::OrderBookStream;
