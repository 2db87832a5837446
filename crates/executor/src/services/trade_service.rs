use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, info};

use common::clock::{Clock, duration_until};
use common::config::{AccountSettings, TradingSettings};
use common::errors::RemoteError;
use common::models::{OrderBookInsert, TodaySchedule};
use market_data::traits::{OperationsApi, TradingCalendar};
use storage::BatchSink;
use strategy::Strategy;

use crate::services::blogger::Blogger;
use crate::services::trader::{Trader, TradingContext};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("trading calendar lookup failed: {0}")]
    Calendar(#[source] RemoteError),
    #[error("failed to list accounts: {0}")]
    Account(#[source] RemoteError),
    #[error("no open account with full access found")]
    NoTradingAccount,
}

/// One trading day of work, started once the session opened.
#[async_trait]
pub trait SessionRunner: Send {
    async fn trade_day(&mut self, end_time: DateTime<Utc>) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerState {
    AwaitSchedule,
    AwaitOpen(TodaySchedule),
    Trading(TodaySchedule),
    AwaitNextSchedule(DateTime<Utc>),
}

/// Drives `AwaitSchedule -> AwaitOpen -> Trading -> AwaitNextSchedule -> ...` forever.
pub struct SessionScheduler<R> {
    calendar: Arc<dyn TradingCalendar>,
    runner: R,
    clock: Arc<dyn Clock>,
    blogger: Blogger,
}

impl<R: SessionRunner> SessionScheduler<R> {
    pub fn new(calendar: Arc<dyn TradingCalendar>, runner: R, clock: Arc<dyn Clock>, blogger: Blogger) -> Self {
        Self {
            calendar,
            runner,
            clock,
            blogger,
        }
    }

    /// Only returns when the calendar can not be read.
    pub async fn run(mut self) -> Result<(), SchedulerError> {
        info!("Start every day trading");
        let mut state = SchedulerState::AwaitSchedule;
        loop {
            state = self.step(state).await?;
        }
    }

    pub async fn step(&mut self, state: SchedulerState) -> Result<SchedulerState, SchedulerError> {
        match state {
            SchedulerState::AwaitSchedule => {
                info!("Check trading schedule on today");
                let now = self.clock.now();
                let schedule = self
                    .calendar
                    .today_schedule(now)
                    .await
                    .map_err(SchedulerError::Calendar)?;

                if schedule.is_trading_day && now <= schedule.end_time {
                    info!(
                        "Today is trading day. Start time: {}, End time: {}, Next time: {}",
                        schedule.start_time, schedule.end_time, schedule.next_check
                    );
                    Ok(SchedulerState::AwaitOpen(schedule))
                } else {
                    info!("This is not the time for trading. Sleep until {}", schedule.next_check);
                    Ok(SchedulerState::AwaitNextSchedule(schedule.next_check))
                }
            }
            SchedulerState::AwaitOpen(schedule) => {
                self.sleep_to(schedule.start_time).await;
                info!("Trading day has been started");
                Ok(SchedulerState::Trading(schedule))
            }
            SchedulerState::Trading(schedule) => {
                match self.runner.trade_day(schedule.end_time).await {
                    Ok(()) => info!("Trading day has been completed. Next time {}", schedule.next_check),
                    Err(e) => {
                        error!("Trading day failed: {:#}", e);
                        self.blogger.fail_message();
                    }
                }
                Ok(SchedulerState::AwaitNextSchedule(schedule.next_check))
            }
            SchedulerState::AwaitNextSchedule(next_check) => {
                self.sleep_to(next_check).await;
                Ok(SchedulerState::AwaitSchedule)
            }
        }
    }

    async fn sleep_to(&self, target: DateTime<Utc>) {
        let wait = duration_until(self.clock.now(), target);
        if !wait.is_zero() {
            info!("Sleep until {} ({:?})", target, wait);
            sleep(wait).await;
        }
    }
}

/// Configured account, or the first open one with full access.
pub async fn resolve_account_id(
    operations: &dyn OperationsApi,
    settings: &AccountSettings,
) -> Result<String, SchedulerError> {
    if let Some(account_id) = &settings.account_id {
        return Ok(account_id.clone());
    }
    let accounts = operations.get_accounts().await.map_err(SchedulerError::Account)?;
    accounts
        .into_iter()
        .find(|account| account.is_open && account.has_full_access)
        .map(|account| account.id)
        .ok_or(SchedulerError::NoTradingAccount)
}

/// Finds the trading account and trades every session of the exchange calendar.
pub async fn run_scheduler<S>(
    context: TradingContext<S>,
    strategies: Vec<Strategy>,
    account_settings: AccountSettings,
    trading_settings: TradingSettings,
) -> Result<(), SchedulerError>
where
    S: BatchSink<OrderBookInsert> + 'static,
{
    info!("Finding account for trading");
    let account_id = resolve_account_id(context.broker.operations.as_ref(), &account_settings).await?;
    info!("Account id: {}", account_id);

    let calendar = context.calendar.clone();
    let clock = context.clock.clone();
    let blogger = context.blogger.clone();
    let trader = Trader::new(context, account_id, strategies, account_settings, trading_settings);

    SessionScheduler::new(calendar, trader, clock, blogger).run().await
}
