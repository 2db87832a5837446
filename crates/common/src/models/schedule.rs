use chrono::{DateTime, NaiveDate, Utc};

/// One calendar day as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingDaySchedule {
    pub date: NaiveDate,
    pub is_trading_day: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// What the scheduler needs to know about today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TodaySchedule {
    pub is_trading_day: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// When to look at the calendar again.
    pub next_check: DateTime<Utc>,
}
