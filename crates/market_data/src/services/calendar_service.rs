use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Days, Utc};
use tracing::{debug, info};

use common::errors::RemoteError;
use common::models::TodaySchedule;

use crate::traits::{InstrumentsApi, TradingCalendar};

/// Today's session hours for one exchange, read from the broker's trading schedules.
pub struct ExchangeCalendar {
    api: Arc<dyn InstrumentsApi>,
    exchange: String,
}

impl ExchangeCalendar {
    pub fn new(api: Arc<dyn InstrumentsApi>, exchange: impl Into<String>) -> Self {
        Self {
            api,
            exchange: exchange.into(),
        }
    }
}

/// Midnight UTC after `now`.
pub fn next_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive().checked_add_days(Days::new(1)).unwrap_or(now.date_naive());
    tomorrow.and_time(chrono::NaiveTime::MIN).and_utc()
}

#[async_trait]
impl TradingCalendar for ExchangeCalendar {
    async fn today_schedule(&self, now: DateTime<Utc>) -> Result<TodaySchedule, RemoteError> {
        let days = self
            .api
            .trading_schedules(&self.exchange, now, now + chrono::Duration::days(1))
            .await?;
        let today = now.date_naive();
        let next_check = next_midnight(now);

        let schedule = days
            .iter()
            .find(|day| day.date == today)
            .and_then(|day| match (day.is_trading_day, day.start_time, day.end_time) {
                (true, Some(start_time), Some(end_time)) => Some(TodaySchedule {
                    is_trading_day: true,
                    start_time,
                    end_time,
                    next_check,
                }),
                _ => None,
            });

        match schedule {
            Some(schedule) => {
                info!(
                    "{} trades today from {} to {}",
                    self.exchange, schedule.start_time, schedule.end_time
                );
                Ok(schedule)
            }
            None => {
                debug!("{} has no session on {}", self.exchange, today);
                Ok(TodaySchedule {
                    is_trading_day: false,
                    start_time: now,
                    end_time: now,
                    next_check,
                })
            }
        }
    }
}
