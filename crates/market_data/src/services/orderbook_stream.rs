use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::Stream;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use common::clock::{Clock, duration_until};
use common::errors::StreamError;
use common::models::{ORDERBOOK_DEPTH, OrderBookSnapshot};

use crate::traits::{MarketDataEvent, MarketDataStreamApi, Subscription};

/// Pull-based order book stream that survives transient failures until `cutoff`.
///
/// Every opened subscription is stopped exactly once, whichever way the stream
/// ends: cutoff, retryable failure, fatal failure, [`OrderBookStream::stop`] or drop.
pub struct OrderBookStream {
    api: Arc<dyn MarketDataStreamApi>,
    clock: Arc<dyn Clock>,
    figis: Vec<String>,
    cutoff: DateTime<Utc>,
    reconnect_delay: Duration,
    subscription: Option<Box<dyn Subscription>>,
    finished: bool,
}

impl OrderBookStream {
    pub fn new(
        api: Arc<dyn MarketDataStreamApi>,
        clock: Arc<dyn Clock>,
        figis: Vec<String>,
        cutoff: DateTime<Utc>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            api,
            clock,
            figis,
            cutoff,
            reconnect_delay,
            subscription: None,
            finished: false,
        }
    }

    pub fn cutoff(&self) -> DateTime<Utc> {
        self.cutoff
    }

    /// Next order book, `None` once the cutoff passed or the stream was stopped.
    /// A fatal failure is yielded once and ends the stream.
    pub async fn next(&mut self) -> Option<Result<OrderBookSnapshot, StreamError>> {
        if self.finished {
            return None;
        }

        loop {
            if self.past_cutoff() {
                return None;
            }

            if self.subscription.is_none() {
                match self.api.open_orderbook_stream(&self.figis, ORDERBOOK_DEPTH).await {
                    Ok(subscription) => {
                        info!("Subscribed to order books of {:?} until {}", self.figis, self.cutoff);
                        self.subscription = Some(subscription);
                    }
                    Err(e) if e.is_retryable() => {
                        warn!("Failed to open market data stream: {}. Retrying in {:?}", e, self.reconnect_delay);
                        self.backoff().await;
                        continue;
                    }
                    Err(e) => {
                        error!("Market data stream can not be opened: {}", e);
                        self.stop();
                        return Some(Err(StreamError::Fatal(e)));
                    }
                }
            }

            let Some(subscription) = self.subscription.as_mut() else {
                continue;
            };
            // A silent socket must not hold the stream past the cutoff.
            let remaining = duration_until(self.clock.now(), self.cutoff);
            let event = match timeout(remaining, subscription.next_event()).await {
                Ok(event) => event,
                Err(_) => {
                    info!("No market data before cutoff {}, closing market data stream", self.cutoff);
                    self.stop();
                    return None;
                }
            };

            if self.past_cutoff() {
                return None;
            }

            match event {
                Some(Ok(MarketDataEvent::OrderBook(book))) => return Some(Ok(book)),
                Some(Ok(other)) => debug!("Skipping market data event {:?}", other),
                Some(Err(e)) if e.is_retryable() => {
                    warn!("Market data stream failed: {}. Reconnecting in {:?}", e, self.reconnect_delay);
                    self.close_subscription();
                    self.backoff().await;
                }
                Some(Err(e)) => {
                    error!("Market data stream failed: {}", e);
                    self.stop();
                    return Some(Err(StreamError::Fatal(e)));
                }
                None => {
                    warn!("Market data stream ended by server. Reconnecting in {:?}", self.reconnect_delay);
                    self.close_subscription();
                    self.backoff().await;
                }
            }
        }
    }

    /// Ends the stream. Safe to call more than once.
    pub fn stop(&mut self) {
        self.finished = true;
        self.close_subscription();
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<OrderBookSnapshot, StreamError>> + Send {
        futures_util::stream::unfold(self, |mut stream| async move {
            let item = stream.next().await?;
            Some((item, stream))
        })
    }

    /// Waits `reconnect_delay`, but never beyond the cutoff.
    async fn backoff(&self) {
        let remaining = duration_until(self.clock.now(), self.cutoff);
        sleep(self.reconnect_delay.min(remaining)).await;
    }

    fn past_cutoff(&mut self) -> bool {
        if self.clock.now() < self.cutoff {
            return false;
        }
        info!("Trading cutoff {} reached, closing market data stream", self.cutoff);
        self.stop();
        true
    }

    fn close_subscription(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.stop();
        }
    }
}

impl Drop for OrderBookStream {
    fn drop(&mut self) {
        self.close_subscription();
    }
}
