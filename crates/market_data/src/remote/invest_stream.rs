use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use common::config::InvestSettings;
use common::errors::{RemoteError, StatusCode};
use common::models::{OrderBookSnapshot, PriceLevel};

use super::invest_client::http_status_code;
use super::invest_response::ErrorBody;
use super::quotation::{Quotation, i64_from_str_or_num};
use crate::traits::{MarketDataEvent, MarketDataStreamApi, Subscription};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeRequest<'a> {
    subscribe_order_book_request: SubscribeOrderBook<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeOrderBook<'a> {
    subscription_action: &'a str,
    instruments: Vec<OrderBookInstrument<'a>>,
}

#[derive(Serialize)]
struct OrderBookInstrument<'a> {
    figi: &'a str,
    depth: u32,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct StreamPayload {
    orderbook: Option<OrderBookDto>,
    candle: Option<FigiDto>,
    trade: Option<FigiDto>,
    trading_status: Option<FigiDto>,
    ping: Option<Value>,
    subscribe_order_book_response: Option<SubscribeResponseDto>,
}

#[derive(Deserialize)]
struct FigiDto {
    #[serde(default)]
    figi: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderBookDto {
    figi: String,
    #[serde(default)]
    depth: u32,
    #[serde(default)]
    is_consistent: bool,
    #[serde(default)]
    bids: Vec<OrderDto>,
    #[serde(default)]
    asks: Vec<OrderDto>,
    time: DateTime<Utc>,
}

#[derive(Deserialize)]
struct OrderDto {
    price: Quotation,
    #[serde(deserialize_with = "i64_from_str_or_num")]
    quantity: i64,
}

impl From<OrderBookDto> for OrderBookSnapshot {
    fn from(dto: OrderBookDto) -> Self {
        let levels = |orders: Vec<OrderDto>| {
            orders
                .into_iter()
                .map(|o| PriceLevel {
                    price: o.price.to_decimal(),
                    quantity: o.quantity,
                })
                .collect()
        };
        Self {
            figi: dto.figi,
            time: dto.time,
            depth: dto.depth,
            is_consistent: dto.is_consistent,
            bids: levels(dto.bids),
            asks: levels(dto.asks),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeResponseDto {
    #[serde(default)]
    order_book_subscriptions: Vec<SubscriptionStatusDto>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionStatusDto {
    #[serde(default)]
    figi: String,
    #[serde(default)]
    subscription_status: String,
}

/// Decodes one text frame. Frames the consumer has no use for decode to `Ok(None)`.
pub fn parse_stream_message(text: &str) -> Result<Option<MarketDataEvent>, RemoteError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| RemoteError::new(StatusCode::Internal, format!("undecodable stream frame: {e}")))?;

    if let Some(error) = value.get("error") {
        let body: ErrorBody = serde_json::from_value(error.clone())
            .map_err(|e| RemoteError::new(StatusCode::Unknown, format!("undecodable stream error: {e}")))?;
        return Err(body.into_remote_error());
    }

    let body = value.get("result").cloned().unwrap_or(value);
    let payload: StreamPayload = serde_json::from_value(body)
        .map_err(|e| RemoteError::new(StatusCode::Internal, format!("unexpected stream payload: {e}")))?;

    if let Some(book) = payload.orderbook {
        return Ok(Some(MarketDataEvent::OrderBook(book.into())));
    }
    if let Some(response) = payload.subscribe_order_book_response {
        for status in &response.order_book_subscriptions {
            match status.subscription_status.as_str() {
                "SUBSCRIPTION_STATUS_SUCCESS" => {}
                "SUBSCRIPTION_STATUS_TOO_MANY_REQUESTS" => {
                    return Err(RemoteError::new(
                        StatusCode::ResourceExhausted,
                        format!("order book subscription for {} throttled", status.figi),
                    ));
                }
                other => {
                    return Err(RemoteError::new(
                        StatusCode::InvalidArgument,
                        format!("order book subscription for {} failed: {}", status.figi, other),
                    ));
                }
            }
        }
        return Ok(Some(MarketDataEvent::SubscriptionAck));
    }
    if let Some(candle) = payload.candle {
        return Ok(Some(MarketDataEvent::Candle { figi: candle.figi }));
    }
    if let Some(trade) = payload.trade {
        return Ok(Some(MarketDataEvent::Trade { figi: trade.figi }));
    }
    if let Some(status) = payload.trading_status {
        return Ok(Some(MarketDataEvent::TradingStatus { figi: status.figi }));
    }
    if payload.ping.is_some() {
        return Ok(Some(MarketDataEvent::Ping));
    }
    Ok(None)
}

fn handshake_error(e: tungstenite::Error) -> RemoteError {
    match e {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            let code = match status {
                401 | 403 => http_status_code(status),
                _ => StatusCode::Unavailable,
            };
            RemoteError::new(code, format!("stream handshake rejected with HTTP {status}"))
        }
        other => RemoteError::unavailable(format!("stream connection failed: {other}")),
    }
}

/// Market data stream over the gateway's WebSocket endpoint.
pub struct InvestStreamClient {
    url: String,
    token: String,
    app_name: String,
}

impl InvestStreamClient {
    pub fn new(settings: &InvestSettings) -> Self {
        Self {
            url: settings.ws_url.clone(),
            token: settings.token.clone(),
            app_name: settings.app_name.clone(),
        }
    }

    fn header(value: &str) -> Result<HeaderValue, RemoteError> {
        HeaderValue::from_str(value)
            .map_err(|e| RemoteError::new(StatusCode::InvalidArgument, format!("invalid header value: {e}")))
    }
}

#[async_trait]
impl MarketDataStreamApi for InvestStreamClient {
    async fn open_orderbook_stream(&self, figis: &[String], depth: u32) -> Result<Box<dyn Subscription>, RemoteError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| RemoteError::new(StatusCode::InvalidArgument, format!("invalid stream url: {e}")))?;
        let headers = request.headers_mut();
        headers.insert(AUTHORIZATION, Self::header(&format!("Bearer {}", self.token))?);
        headers.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("json"));
        headers.insert("x-app-name", Self::header(&self.app_name)?);

        info!("Connecting to market data stream for {:?}", figis);
        let (mut socket, _) = tokio_tungstenite::connect_async(request).await.map_err(handshake_error)?;

        let subscribe = SubscribeRequest {
            subscribe_order_book_request: SubscribeOrderBook {
                subscription_action: "SUBSCRIPTION_ACTION_SUBSCRIBE",
                instruments: figis.iter().map(|figi| OrderBookInstrument { figi, depth }).collect(),
            },
        };
        let payload = serde_json::to_string(&subscribe)
            .map_err(|e| RemoteError::new(StatusCode::Internal, format!("failed to encode subscribe request: {e}")))?;
        socket
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| RemoteError::unavailable(format!("failed to send subscribe request: {e}")))?;

        Ok(Box::new(InvestStreamSubscription { socket: Some(socket) }))
    }
}

pub struct InvestStreamSubscription {
    socket: Option<Socket>,
}

#[async_trait]
impl Subscription for InvestStreamSubscription {
    async fn next_event(&mut self) -> Option<Result<MarketDataEvent, RemoteError>> {
        loop {
            let socket = self.socket.as_mut()?;
            match socket.next().await {
                None => return None,
                Some(Err(e)) => return Some(Err(RemoteError::unavailable(format!("stream read failed: {e}")))),
                Some(Ok(Message::Text(text))) => match parse_stream_message(text.as_str()) {
                    Ok(Some(event)) => return Some(Ok(event)),
                    Ok(None) => debug!("Skipping unrecognised stream frame"),
                    Err(e) => return Some(Err(e)),
                },
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = socket.send(Message::Pong(payload)).await {
                        warn!("Failed to answer stream ping: {}", e);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Stream closed by server: {:?}", frame);
                    return None;
                }
                Some(Ok(_)) => continue,
            }
        }
    }

    fn stop(&mut self) {
        if self.socket.take().is_some() {
            debug!("Market data subscription stopped");
        }
    }
}
