use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tracing::{debug, error, info, warn};

use common::clock::Clock;
use common::config::{AccountSettings, KeepSettings, TradingSettings};
use common::errors::StreamError;
use common::models::{OrderBookInsert, OrderBookSnapshot, SignalType, TradeSignal};
use market_data::OrderBookStream;
use market_data::traits::{InstrumentsApi, MarketDataStreamApi, OperationsApi, OrdersApi, TradingCalendar};
use storage::{BatchSink, Keeper, keep_channel};
use strategy::Strategy;

use crate::services::blogger::Blogger;
use crate::services::trade_service::SessionRunner;
use crate::trade_results::TradeResults;

/// Broker endpoints the bot talks to.
#[derive(Clone)]
pub struct Broker {
    pub instruments: Arc<dyn InstrumentsApi>,
    pub operations: Arc<dyn OperationsApi>,
    pub orders: Arc<dyn OrdersApi>,
    pub stream: Arc<dyn MarketDataStreamApi>,
}

/// Everything a trader needs besides its strategies and settings.
pub struct TradingContext<S> {
    pub broker: Broker,
    pub calendar: Arc<dyn TradingCalendar>,
    pub clock: Arc<dyn Clock>,
    pub blogger: Blogger,
    pub sink: Arc<S>,
    pub keep: KeepSettings,
}

/// Runs one trading day: picks tradeable strategies, streams order books
/// until the cutoff, persists every book, trades the signals and closes
/// whatever is still open at the end.
pub struct Trader<S> {
    broker: Broker,
    clock: Arc<dyn Clock>,
    blogger: Blogger,
    sink: Arc<S>,
    keep: KeepSettings,
    account_id: String,
    strategies: Vec<Strategy>,
    account_settings: AccountSettings,
    trading_settings: TradingSettings,
}

/// State of one trading day.
#[derive(Default)]
struct DayState {
    results: TradeResults,
    current_books: HashMap<String, OrderBookSnapshot>,
}

fn before(end_time: DateTime<Utc>, margin: Duration) -> DateTime<Utc> {
    end_time - chrono::Duration::from_std(margin).unwrap_or_else(|_| chrono::Duration::zero())
}

impl<S> Trader<S>
where
    S: BatchSink<OrderBookInsert> + 'static,
{
    pub fn new(
        context: TradingContext<S>,
        account_id: String,
        strategies: Vec<Strategy>,
        account_settings: AccountSettings,
        trading_settings: TradingSettings,
    ) -> Self {
        Self {
            broker: context.broker,
            clock: context.clock,
            blogger: context.blogger,
            sink: context.sink,
            keep: context.keep,
            account_id,
            strategies,
            account_settings,
            trading_settings,
        }
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    /// Refreshes every strategy from today's instrument data and maps each
    /// figi of a tradeable pair to the strategies consuming it.
    async fn select_strategies(&mut self) -> anyhow::Result<BTreeMap<String, Vec<usize>>> {
        let mut routes: BTreeMap<String, Vec<usize>> = BTreeMap::new();

        for (idx, strategy) in self.strategies.iter_mut().enumerate() {
            let figi = strategy.settings().figi.clone();
            let future = self
                .broker
                .instruments
                .future_by_figi(&figi)
                .await
                .with_context(|| format!("failed to load instrument {figi}"))?;

            if !future.is_tradeable() {
                warn!(
                    %figi,
                    otc = future.otc_flag,
                    buy = future.buy_available_flag,
                    sell = future.sell_available_flag,
                    api = future.api_trade_available_flag,
                    "Instrument is not tradeable today, strategy skipped"
                );
                continue;
            }

            let basic_assets = self
                .broker
                .instruments
                .find_instrument(&future.basic_asset_position_uid)
                .await
                .with_context(|| format!("failed to find basic asset of {figi}"))?;
            let Some(basic_asset) = basic_assets.into_iter().next() else {
                warn!(%figi, basic_asset = %future.basic_asset, "Basic asset not found, strategy skipped");
                continue;
            };

            strategy.refresh(
                future.lot,
                future.short_enabled_flag,
                future.basic_asset_size,
                &basic_asset.figi,
            );
            info!(
                %figi,
                ticker = %future.ticker,
                paired = %basic_asset.figi,
                lot = future.lot,
                short = future.short_enabled_flag,
                "Strategy selected for today"
            );

            for routed in strategy.figis() {
                routes.entry(routed).or_default().push(idx);
            }
        }

        Ok(routes)
    }

    async fn trade(&mut self, end_time: DateTime<Utc>) -> anyhow::Result<()> {
        let routes = self.select_strategies().await?;
        if routes.is_empty() {
            info!("Nothing to trade today");
            self.blogger.no_trading_message("no tradeable instruments");
            return Ok(());
        }

        let cash_before = self
            .broker
            .operations
            .available_cash(&self.account_id)
            .await
            .context("failed to read available cash")?;
        let min_cash = Decimal::from(self.account_settings.min_rub_on_account);
        if cash_before < min_cash {
            warn!("Not enough cash for trading: {} < {}", cash_before, min_cash);
            self.blogger
                .no_trading_message(&format!("free cash {:.2} rub is below {} rub", cash_before, min_cash));
            return Ok(());
        }

        let primaries = self.routed_primaries(&routes);
        let tickers: Vec<String> = primaries
            .iter()
            .filter_map(|&idx| self.strategies.get(idx))
            .map(|s| format!("{} ({})", s.settings().ticker, s.settings().figi))
            .collect();
        self.blogger.start_trading_message(&tickers, cash_before);

        let (keeper, worker) = keep_channel(self.sink.clone(), self.keep.batch_size, self.keep.queue_capacity);
        let worker_handle = tokio::spawn(worker.run());

        let mut day = DayState::default();
        let streamed = self.consume(end_time, &routes, &keeper, &mut day).await;

        self.close_all_positions(&primaries, &mut day).await;

        keeper.stop().await;
        if let Err(e) = worker_handle.await {
            error!("Keep worker ended abnormally: {}", e);
        }

        streamed.context("market data stream failed")?;

        self.report_summary(cash_before, &day.results).await;
        Ok(())
    }

    fn routed_primaries(&self, routes: &BTreeMap<String, Vec<usize>>) -> Vec<usize> {
        let mut primaries: Vec<usize> = routes
            .iter()
            .flat_map(|(figi, indices)| {
                indices
                    .iter()
                    .copied()
                    .filter(move |&idx| self.strategies.get(idx).is_some_and(|s| &s.settings().figi == figi))
            })
            .collect();
        primaries.sort_unstable();
        primaries.dedup();
        primaries
    }

    async fn consume(
        &mut self,
        end_time: DateTime<Utc>,
        routes: &BTreeMap<String, Vec<usize>>,
        keeper: &Keeper<OrderBookInsert>,
        day: &mut DayState,
    ) -> Result<(), StreamError> {
        let cutoff = before(end_time, self.trading_settings.stop_trade_before_close);
        let signal_cutoff = before(end_time, self.trading_settings.stop_signals_before_close);
        let figis: Vec<String> = routes.keys().cloned().collect();

        let mut stream = OrderBookStream::new(
            self.broker.stream.clone(),
            self.clock.clone(),
            figis,
            cutoff,
            self.trading_settings.reconnect_delay,
        );

        while let Some(item) = stream.next().await {
            let book = item?;

            if let Some(current) = day.current_books.get(&book.figi) {
                if book.time < current.time {
                    debug!(figi = %book.figi, time = %book.time, "Stale order book skipped");
                    continue;
                }
            }
            keeper.save_data(OrderBookInsert::from(&book));
            day.current_books.insert(book.figi.clone(), book.clone());

            if let Err(e) = self.check_exit_levels(&book, &mut day.results).await {
                error!(figi = %book.figi, "Failed to close position: {:#}", e);
            }

            if self.clock.now() >= signal_cutoff {
                continue;
            }
            let Some(indices) = routes.get(&book.figi) else {
                continue;
            };
            for &idx in indices {
                let Some(signal) = self.strategies.get_mut(idx).and_then(|s| s.analyze_book(&book)) else {
                    continue;
                };
                if let Err(e) = self.handle_signal(idx, signal, day).await {
                    error!(figi = %book.figi, "Failed to handle signal: {:#}", e);
                }
            }
        }

        Ok(())
    }

    /// Closes the open position on `book.figi` once its take profit or stop loss is crossed.
    async fn check_exit_levels(&self, book: &OrderBookSnapshot, results: &mut TradeResults) -> anyhow::Result<()> {
        let Some(order) = results.current_trade_order(&book.figi) else {
            return Ok(());
        };
        let take = order.signal.take_profit_level;
        let stop = order.signal.stop_loss_level;

        let crossed = match order.signal.signal_type {
            SignalType::Long => book.best_bid().map(|bid| bid >= take || bid <= stop),
            SignalType::Short => book.best_ask().map(|ask| ask <= take || ask >= stop),
            SignalType::Close => None,
        };

        if crossed == Some(true) {
            info!(figi = %book.figi, %take, %stop, "Exit level reached");
            self.close_tracked_position(&book.figi, results).await?;
        }
        Ok(())
    }

    async fn handle_signal(&self, idx: usize, signal: TradeSignal, day: &mut DayState) -> anyhow::Result<()> {
        info!("New signal: {}", signal);
        self.blogger.signal_message(&signal);

        let figi = signal.figi.clone();
        if signal.signal_type == SignalType::Close {
            return self.close_tracked_position(&figi, &mut day.results).await;
        }
        if day.results.current_trade_order(&figi).is_some() {
            info!(%figi, "Position is already open, signal skipped");
            return Ok(());
        }

        let strategy = self
            .strategies
            .get(idx)
            .ok_or_else(|| anyhow!("no strategy at index {idx}"))?;
        let settings = strategy.settings();

        let book = day
            .current_books
            .get(&figi)
            .ok_or_else(|| anyhow!("no order book for {figi}"))?;
        let price = match signal.signal_type {
            SignalType::Long => book.best_ask(),
            _ => book.best_bid(),
        }
        .ok_or_else(|| anyhow!("empty order book for {figi}"))?;

        let cash = self
            .broker
            .operations
            .available_cash(&self.account_id)
            .await
            .context("failed to read available cash")?;
        let lots = affordable_lots(cash, price, settings.lot_size, settings.max_lots_per_order);
        if lots < 1 {
            warn!(%figi, %cash, %price, lot = settings.lot_size, "Not enough cash for one lot");
            return Ok(());
        }

        let is_buy = signal.signal_type == SignalType::Long;
        let posted = self
            .broker
            .orders
            .post_market_order(&self.account_id, &figi, lots, is_buy)
            .await
            .with_context(|| format!("failed to post order for {figi}"))?;

        if posted.status.is_filled() {
            let order = day.results.open_position(&figi, &posted.order_id, lots, signal);
            self.blogger.open_position_message(&order);
        } else {
            warn!(%figi, order_id = %posted.order_id, status = ?posted.status, "Order is not filled, no position opened");
        }
        Ok(())
    }

    async fn close_tracked_position(&self, figi: &str, results: &mut TradeResults) -> anyhow::Result<()> {
        let Some(order) = results.current_trade_order(figi) else {
            debug!(%figi, "No open position to close");
            return Ok(());
        };
        let is_buy = order.signal.signal_type == SignalType::Short;
        let posted = self
            .broker
            .orders
            .post_market_order(&self.account_id, figi, order.lots, is_buy)
            .await
            .with_context(|| format!("failed to post close order for {figi}"))?;

        if let Some(closed) = results.close_position(figi, &posted.order_id) {
            self.blogger.close_position_message(&closed);
        }
        Ok(())
    }

    /// Cancels active orders and flattens the balance of every traded figi.
    async fn close_all_positions(&self, primaries: &[usize], day: &mut DayState) {
        info!("Closing all positions");
        if let Err(e) = self.broker.orders.cancel_all_orders(&self.account_id).await {
            error!("Failed to cancel orders: {}", e);
        }

        let positions = match self.broker.operations.positions(&self.account_id).await {
            Ok(positions) => positions,
            Err(e) => {
                error!("Failed to read positions, closing tracked positions only: {}", e);
                let open: Vec<String> = day.results.open_orders().keys().cloned().collect();
                for figi in open {
                    if let Err(e) = self.close_tracked_position(&figi, &mut day.results).await {
                        error!(%figi, "Failed to close position: {:#}", e);
                    }
                }
                return;
            }
        };

        for settings in primaries.iter().filter_map(|&idx| self.strategies.get(idx)).map(Strategy::settings) {
            let balance = positions
                .iter()
                .filter(|p| p.figi == settings.figi)
                .map(|p| p.balance)
                .sum::<i64>();
            let lots = balance.abs() / settings.lot_size.max(1);
            if lots == 0 {
                continue;
            }

            info!(figi = %settings.figi, balance, lots, "Closing balance");
            match self
                .broker
                .orders
                .post_market_order(&self.account_id, &settings.figi, lots, balance < 0)
                .await
            {
                Ok(posted) => {
                    if let Some(closed) = day.results.close_position(&settings.figi, &posted.order_id) {
                        self.blogger.close_position_message(&closed);
                    }
                }
                Err(e) => error!(figi = %settings.figi, "Failed to close balance: {}", e),
            }
        }
    }

    async fn report_summary(&self, cash_before: Decimal, results: &TradeResults) {
        self.blogger.summary_message();

        match self.broker.operations.available_cash(&self.account_id).await {
            Ok(cash_after) => self.blogger.trading_depo_summary_message(cash_before, cash_after),
            Err(e) => error!("Failed to read cash for summary: {}", e),
        }

        for order in results.open_orders().values() {
            match self.broker.orders.order_state(&self.account_id, &order.open_order_id).await {
                Ok(state) => self.blogger.summary_open_signal_message(order, &state),
                Err(e) => error!(order_id = %order.open_order_id, "Failed to read order state: {}", e),
            }
        }

        for order in results.closed_orders().values().flatten() {
            let open_state = match self.broker.orders.order_state(&self.account_id, &order.open_order_id).await {
                Ok(state) => state,
                Err(e) => {
                    error!(order_id = %order.open_order_id, "Failed to read order state: {}", e);
                    continue;
                }
            };
            let close_state = match &order.close_order_id {
                Some(id) => self.broker.orders.order_state(&self.account_id, id).await.ok(),
                None => None,
            };
            self.blogger
                .summary_closed_signal_message(order, &open_state, close_state.as_ref());
        }

        self.blogger.final_message();
    }
}

/// `min(max_lots, floor(cash / (lot_size * price)))`, zero when nothing is affordable.
fn affordable_lots(cash: Decimal, price: Decimal, lot_size: i64, max_lots: i64) -> i64 {
    let lot_price = price * Decimal::from(lot_size.max(1));
    if lot_price <= Decimal::ZERO {
        return 0;
    }
    let affordable = (cash / lot_price).floor().to_i64().unwrap_or(0);
    affordable.min(max_lots).max(0)
}

#[async_trait]
impl<S> SessionRunner for Trader<S>
where
    S: BatchSink<OrderBookInsert> + 'static,
{
    async fn trade_day(&mut self, end_time: DateTime<Utc>) -> anyhow::Result<()> {
        info!("Start trading until {}", end_time);
        self.trade(end_time).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use common::clock::ManualClock;
    use common::config::StrategySettings;
    use common::errors::{RemoteError, StatusCode};
    use common::models::{
        Account, FutureInfo, InstrumentShort, OrderExecutionStatus, OrderState, PostOrderResult, PriceLevel,
        SecurityPosition, TradingDaySchedule,
    };
    use market_data::traits::{MarketDataEvent, Subscription};
    use mockall::mock;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use storage::SinkError;
    use tokio::sync::broadcast;

    const PRIMARY: &str = "FUTSI0325000";
    const PAIRED: &str = "BBG0013HGFT4";

    mock! {
        Instruments {}

        #[async_trait]
        impl InstrumentsApi for Instruments {
            async fn trading_schedules(
                &self,
                exchange: &str,
                from: DateTime<Utc>,
                to: DateTime<Utc>,
            ) -> Result<Vec<TradingDaySchedule>, RemoteError>;
            async fn future_by_figi(&self, figi: &str) -> Result<FutureInfo, RemoteError>;
            async fn find_instrument(&self, query: &str) -> Result<Vec<InstrumentShort>, RemoteError>;
        }
    }

    mock! {
        Operations {}

        #[async_trait]
        impl OperationsApi for Operations {
            async fn get_accounts(&self) -> Result<Vec<Account>, RemoteError>;
            async fn available_cash(&self, account_id: &str) -> Result<Decimal, RemoteError>;
            async fn positions(&self, account_id: &str) -> Result<Vec<SecurityPosition>, RemoteError>;
        }
    }

    mock! {
        Orders {}

        #[async_trait]
        impl OrdersApi for Orders {
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
    }

    mock! {
        Calendar {}

        #[async_trait]
        impl TradingCalendar for Calendar {
            async fn today_schedule(&self, now: DateTime<Utc>) -> Result<common::models::TodaySchedule, RemoteError>;
        }
    }

    /// Replays books, then jumps the clock past any cutoff and ends.
    struct ScriptedSubscription {
        events: VecDeque<OrderBookSnapshot>,
        clock: Arc<ManualClock>,
    }

    #[async_trait]
    impl Subscription for ScriptedSubscription {
        async fn next_event(&mut self) -> Option<Result<MarketDataEvent, RemoteError>> {
            match self.events.pop_front() {
                Some(book) => Some(Ok(MarketDataEvent::OrderBook(book))),
                None => {
                    self.clock.advance(ChronoDuration::days(1));
                    None
                }
            }
        }

        fn stop(&mut self) {}
    }

    struct ScriptedStream {
        books: Mutex<Option<Vec<OrderBookSnapshot>>>,
        open_error: Option<RemoteError>,
        clock: Arc<ManualClock>,
        opens: AtomicUsize,
    }

    #[async_trait]
    impl MarketDataStreamApi for ScriptedStream {
        async fn open_orderbook_stream(&self, figis: &[String], _depth: u32) -> Result<Box<dyn Subscription>, RemoteError> {
            assert_eq!(figis, [PAIRED.to_string(), PRIMARY.to_string()]);
            self.opens.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = &self.open_error {
                return Err(e.clone());
            }
            let books = self.books.lock().unwrap().take().unwrap_or_default();
            Ok(Box::new(ScriptedSubscription {
                events: books.into(),
                clock: self.clock.clone(),
            }))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        rows: Mutex<Vec<OrderBookInsert>>,
    }

    #[async_trait]
    impl BatchSink<OrderBookInsert> for RecordingSink {
        fn table(&self) -> &str {
            "order_books"
        }

        async fn bulk_write(&self, records: &[OrderBookInsert]) -> Result<(), SinkError> {
            self.rows.lock().unwrap().extend_from_slice(records);
            Ok(())
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 7, 0, 0).unwrap()
    }

    fn end_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 20, 50, 0).unwrap()
    }

    fn book(figi: &str, seq: i64, bid: Decimal, ask: Decimal) -> OrderBookSnapshot {
        OrderBookSnapshot {
            figi: figi.to_string(),
            time: start() + ChronoDuration::seconds(seq),
            depth: 10,
            is_consistent: true,
            bids: vec![PriceLevel { price: bid, quantity: 5 }],
            asks: vec![PriceLevel { price: ask, quantity: 5 }],
        }
    }

    fn primary(seq: i64, ask: Decimal) -> OrderBookSnapshot {
        book(PRIMARY, seq, ask - dec!(1), ask)
    }

    fn strategy_settings() -> StrategySettings {
        let params = [
            ("SIGNAL_MIN_TICKS", json!(3)),
            ("LONG_TAKE", json!("1.02")),
            ("LONG_STOP", json!("0.99")),
            ("SHORT_TAKE", json!("0.98")),
            ("SHORT_STOP", json!("1.01")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        StrategySettings {
            name: "SpreadDeviation".to_string(),
            figi: PRIMARY.to_string(),
            ticker: "SiH5".to_string(),
            max_lots_per_order: 2,
            settings: params,
            lot_size: 1,
            short_enabled_flag: false,
            basic_asset_figi: String::new(),
            basic_asset_size: Decimal::ONE,
        }
    }

    fn future(tradeable: bool) -> FutureInfo {
        FutureInfo {
            figi: PRIMARY.to_string(),
            ticker: "SiH5".to_string(),
            lot: 1,
            short_enabled_flag: false,
            otc_flag: !tradeable,
            buy_available_flag: true,
            sell_available_flag: true,
            api_trade_available_flag: true,
            basic_asset: "USD000UTSTOM".to_string(),
            basic_asset_size: dec!(10),
            basic_asset_position_uid: "uid-usd".to_string(),
        }
    }

    fn instruments(tradeable: bool) -> MockInstruments {
        let mut api = MockInstruments::new();
        api.expect_future_by_figi()
            .withf(|figi| figi == PRIMARY)
            .returning(move |_| Ok(future(tradeable)));
        api.expect_find_instrument()
            .withf(|query| query == "uid-usd")
            .returning(|_| {
                Ok(vec![InstrumentShort {
                    figi: PAIRED.to_string(),
                    ticker: "USD000UTSTOM".to_string(),
                }])
            });
        api
    }

    fn filled(order_id: &str) -> OrderState {
        OrderState {
            order_id: order_id.to_string(),
            status: OrderExecutionStatus::Fill,
            lots_executed: 2,
            executed_order_price: dec!(1000),
            total_order_amount: dec!(2000),
        }
    }

    struct Harness {
        trader: Trader<RecordingSink>,
        sink: Arc<RecordingSink>,
        stream: Arc<ScriptedStream>,
        rx: broadcast::Receiver<String>,
    }

    fn harness(
        instruments: MockInstruments,
        operations: MockOperations,
        orders: MockOrders,
        books: Vec<OrderBookSnapshot>,
        open_error: Option<RemoteError>,
    ) -> Harness {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap()));
        let stream = Arc::new(ScriptedStream {
            books: Mutex::new(Some(books)),
            open_error,
            clock: clock.clone(),
            opens: AtomicUsize::new(0),
        });
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = broadcast::channel(64);
        let context = TradingContext {
            broker: Broker {
                instruments: Arc::new(instruments),
                operations: Arc::new(operations),
                orders: Arc::new(orders),
                stream: stream.clone(),
            },
            calendar: Arc::new(MockCalendar::new()),
            clock,
            blogger: Blogger::new(Some(tx)),
            sink: sink.clone(),
            keep: KeepSettings {
                data_folder: ".".to_string(),
                batch_size: 2,
                queue_capacity: 64,
            },
        };
        let strategy = Strategy::from_settings(strategy_settings()).unwrap();
        let trader = Trader::new(
            context,
            "2000123".to_string(),
            vec![strategy],
            AccountSettings {
                account_id: None,
                min_rub_on_account: 5_000,
            },
            TradingSettings {
                exchange: "MOEX".to_string(),
                stop_trade_before_close: Duration::from_secs(300),
                stop_signals_before_close: Duration::from_secs(3600),
                reconnect_delay: Duration::from_secs(1),
            },
        );
        Harness {
            trader,
            sink,
            stream,
            rx,
        }
    }

    fn messages(rx: &mut broadcast::Receiver<String>) -> Vec<String> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn trading_day_opens_on_signal_and_closes_at_take_profit() {
        let books = vec![
            book(PAIRED, 0, dec!(100), dec!(101)),
            primary(1, dec!(1010)),
            primary(2, dec!(1012)),
            primary(3, dec!(1011)),
            // long spread drops below the band: LONG, take 1020, stop 990
            primary(4, dec!(1000)),
            // stale duplicate of an older book
            primary(2, dec!(1012)),
            // bid 1021 crosses the take profit
            primary(5, dec!(1022)),
        ];

        let mut operations = MockOperations::new();
        operations
            .expect_available_cash()
            .withf(|account| account == "2000123")
            .returning(|_| Ok(dec!(100000)));
        operations.expect_positions().times(1).returning(|_| Ok(vec![]));

        let mut orders = MockOrders::new();
        orders
            .expect_post_market_order()
            .withf(|_, figi, lots, is_buy| figi == PRIMARY && *lots == 2 && *is_buy)
            .times(1)
            .returning(|_, _, _, _| {
                Ok(PostOrderResult {
                    order_id: "open-1".to_string(),
                    status: OrderExecutionStatus::Fill,
                })
            });
        orders
            .expect_post_market_order()
            .withf(|_, figi, lots, is_buy| figi == PRIMARY && *lots == 2 && !*is_buy)
            .times(1)
            .returning(|_, _, _, _| {
                Ok(PostOrderResult {
                    order_id: "close-1".to_string(),
                    status: OrderExecutionStatus::Fill,
                })
            });
        orders.expect_cancel_all_orders().times(1).returning(|_| Ok(()));
        orders
            .expect_order_state()
            .returning(|_, order_id| Ok(filled(order_id)));

        let mut h = harness(instruments(true), operations, orders, books, None);
        h.trader.trade_day(end_time()).await.unwrap();

        let rows = h.sink.rows.lock().unwrap().clone();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0].figi, PAIRED);
        assert_eq!(rows[5].asks[0].price, dec!(1022));

        let log = messages(&mut h.rx);
        assert!(log.iter().any(|m| m.starts_with("Trading day started")), "{log:?}");
        assert!(log.iter().any(|m| m.starts_with("New signal: LONG FUTSI0325000 take=1020.00 stop=990.00")), "{log:?}");
        assert!(log.iter().any(|m| m.starts_with("Open LONG position on FUTSI0325000, 2 lots")), "{log:?}");
        assert!(log.iter().any(|m| m.starts_with("Close LONG position on FUTSI0325000 (order close-1)")), "{log:?}");
        assert!(log.iter().any(|m| m.starts_with("Closed: LONG FUTSI0325000")), "{log:?}");
        assert_eq!(log.last().map(String::as_str), Some("Trading day finished."));

        match &h.trader.strategies()[0] {
            Strategy::SpreadDeviation(s) => {
                assert_eq!(s.settings().basic_asset_figi, PAIRED);
                assert_eq!(s.settings().basic_asset_size, dec!(10));
            }
        }
    }

    #[tokio::test]
    async fn open_balance_is_flattened_after_the_stream() {
        let books = vec![
            book(PAIRED, 0, dec!(100), dec!(101)),
            primary(1, dec!(1010)),
            primary(2, dec!(1012)),
            primary(3, dec!(1011)),
            primary(4, dec!(1000)),
        ];

        let mut operations = MockOperations::new();
        operations.expect_available_cash().returning(|_| Ok(dec!(100000)));
        operations.expect_positions().times(1).returning(|_| {
            Ok(vec![SecurityPosition {
                figi: PRIMARY.to_string(),
                balance: 2,
            }])
        });

        let mut orders = MockOrders::new();
        orders
            .expect_post_market_order()
            .withf(|_, _, _, is_buy| *is_buy)
            .times(1)
            .returning(|_, _, _, _| {
                Ok(PostOrderResult {
                    order_id: "open-1".to_string(),
                    status: OrderExecutionStatus::Fill,
                })
            });
        orders
            .expect_post_market_order()
            .withf(|_, figi, lots, is_buy| figi == PRIMARY && *lots == 2 && !*is_buy)
            .times(1)
            .returning(|_, _, _, _| {
                Ok(PostOrderResult {
                    order_id: "eod-close".to_string(),
                    status: OrderExecutionStatus::Fill,
                })
            });
        orders.expect_cancel_all_orders().times(1).returning(|_| Ok(()));
        orders
            .expect_order_state()
            .returning(|_, order_id| Ok(filled(order_id)));

        let mut h = harness(instruments(true), operations, orders, books, None);
        h.trader.trade_day(end_time()).await.unwrap();

        let log = messages(&mut h.rx);
        assert!(log.iter().any(|m| m.contains("(order eod-close)")), "{log:?}");
        assert!(!log.iter().any(|m| m.starts_with("Still open")), "{log:?}");
    }

    #[tokio::test]
    async fn low_cash_skips_the_day() {
        let mut operations = MockOperations::new();
        operations.expect_available_cash().times(1).returning(|_| Ok(dec!(4999.99)));
        operations.expect_positions().never();
        let mut orders = MockOrders::new();
        orders.expect_post_market_order().never();
        orders.expect_cancel_all_orders().never();

        let mut h = harness(instruments(true), operations, orders, vec![], None);
        h.trader.trade_day(end_time()).await.unwrap();

        assert_eq!(h.stream.opens.load(Ordering::SeqCst), 0);
        assert_eq!(
            messages(&mut h.rx),
            vec!["No trading today: free cash 4999.99 rub is below 5000 rub".to_string()]
        );
    }

    #[tokio::test]
    async fn untradeable_instrument_skips_the_day() {
        let mut instruments = MockInstruments::new();
        instruments.expect_future_by_figi().returning(|_| Ok(future(false)));
        instruments.expect_find_instrument().never();
        let mut operations = MockOperations::new();
        operations.expect_available_cash().never();

        let mut h = harness(instruments, operations, MockOrders::new(), vec![], None);
        h.trader.trade_day(end_time()).await.unwrap();

        assert_eq!(h.stream.opens.load(Ordering::SeqCst), 0);
        assert_eq!(
            messages(&mut h.rx),
            vec!["No trading today: no tradeable instruments".to_string()]
        );
    }

    #[tokio::test]
    async fn fatal_stream_error_still_cleans_up_and_fails_the_day() {
        let mut operations = MockOperations::new();
        operations.expect_available_cash().times(1).returning(|_| Ok(dec!(100000)));
        operations.expect_positions().times(1).returning(|_| Ok(vec![]));
        let mut orders = MockOrders::new();
        orders.expect_cancel_all_orders().times(1).returning(|_| Ok(()));
        orders.expect_post_market_order().never();

        let mut h = harness(
            instruments(true),
            operations,
            orders,
            vec![],
            Some(RemoteError::new(StatusCode::Unauthenticated, "token expired")),
        );
        let err = h.trader.trade_day(end_time()).await.unwrap_err();

        assert!(format!("{err:#}").contains("token expired"), "{err:#}");
        assert!(!messages(&mut h.rx).iter().any(|m| m == "Trading day finished."));
    }

    #[tokio::test]
    async fn instrument_lookup_failure_fails_the_day() {
        let mut instruments = MockInstruments::new();
        instruments
            .expect_future_by_figi()
            .returning(|_| Err(RemoteError::new(StatusCode::NotFound, "no such figi")));

        let mut h = harness(instruments, MockOperations::new(), MockOrders::new(), vec![], None);
        let err = h.trader.trade_day(end_time()).await.unwrap_err();

        assert!(format!("{err:#}").contains(PRIMARY));
    }

    #[test]
    fn lots_are_capped_by_cash_and_settings() {
        assert_eq!(affordable_lots(dec!(100000), dec!(1000), 1, 2), 2);
        assert_eq!(affordable_lots(dec!(2500), dec!(1000), 1, 5), 2);
        assert_eq!(affordable_lots(dec!(2500), dec!(1000), 10, 5), 0);
        assert_eq!(affordable_lots(dec!(2500), Decimal::ZERO, 1, 5), 0);
    }
}
