pub mod blogger;
pub mod telegram_service;
pub mod trade_service;
pub mod trader;
