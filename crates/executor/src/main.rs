use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tokio::sync::broadcast;
use tracing::{debug, info};

use common::clock::{Clock, SystemClock};
use common::config::{Settings, load_strategies};
use common::logger;
use market_data::{ExchangeCalendar, InvestClient, InvestStreamClient};
use storage::SqliteSink;
use storage::db::RotatingPool;
use strategy::Strategy;

use crate::services::blogger::Blogger;
use crate::services::telegram_service::TelegramService;
use crate::services::trade_service::run_scheduler;
use crate::services::trader::{Broker, TradingContext};

mod services;
mod trade_results;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    logger::setup_logger();
    debug!("System starting up...");

    let settings = Settings::from_env()?;

    let strategies = load_strategies(&settings.strategies_file)?
        .into_iter()
        .map(Strategy::from_settings)
        .collect::<Result<Vec<_>, _>>()
        .context("invalid strategy settings")?;
    info!("Loaded {} strategies from {}", strategies.len(), settings.strategies_file);

    let notification_tx = if settings.blog.blog_status {
        let (tx, rx) = broadcast::channel::<String>(100);
        let telegram = TelegramService::new(&settings.blog);
        tokio::spawn(telegram.start(rx));
        Some(tx)
    } else {
        info!("Telegram notifications are disabled");
        None
    };

    let client = Arc::new(InvestClient::new(&settings.invest)?);
    let stream = Arc::new(InvestStreamClient::new(&settings.invest));
    let calendar = Arc::new(ExchangeCalendar::new(client.clone(), settings.trading.exchange.clone()));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let rotating_pool = Arc::new(RotatingPool::new(settings.keep.data_folder.clone(), clock.clone()).await?);
    let sink = Arc::new(SqliteSink::new(rotating_pool));

    let context = TradingContext {
        broker: Broker {
            instruments: client.clone(),
            operations: client.clone(),
            orders: client,
            stream,
        },
        calendar,
        clock,
        blogger: Blogger::new(notification_tx),
        sink,
        keep: settings.keep,
    };

    run_scheduler(context, strategies, settings.account, settings.trading).await?;
    Ok(())
}
