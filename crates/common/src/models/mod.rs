pub mod instrument;
pub mod orderbook;
pub mod schedule;
pub mod signal;

pub use instrument::{
    Account, FutureInfo, InstrumentShort, OrderExecutionStatus, OrderState, PostOrderResult,
    SecurityPosition,
};
pub use orderbook::{ORDERBOOK_DEPTH, OrderBookInsert, OrderBookSnapshot, PriceLevel};
pub use schedule::{TodaySchedule, TradingDaySchedule};
pub use signal::{SignalType, TradeSignal};
