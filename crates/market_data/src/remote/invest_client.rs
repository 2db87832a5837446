use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use common::config::InvestSettings;
use common::errors::{RemoteError, StatusCode};
use common::models::{
    Account, FutureInfo, InstrumentShort, OrderState, PostOrderResult, SecurityPosition, TradingDaySchedule,
};

use super::invest_response::{
    AccountsResponse, ErrorBody, FindInstrumentResponse, FutureResponse, OrderStateDto, OrdersResponse,
    PositionsResponse, PostOrderResponse, TradingSchedulesResponse,
};
use super::CONTRACT_PREFIX;
use crate::traits::{InstrumentsApi, OperationsApi, OrdersApi};

const MAX_RETRIES: u32 = 3;
const RUB: &str = "rub";

#[derive(Debug, Serialize)]
struct TradingSchedulesRequest<'a> {
    exchange: &'a str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentRequest<'a> {
    id_type: &'a str,
    id: &'a str,
}

#[derive(Debug, Serialize)]
struct FindInstrumentRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Serialize)]
struct EmptyRequest {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AccountRequest<'a> {
    account_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderRequest<'a> {
    figi: &'a str,
    quantity: String,
    direction: &'a str,
    account_id: &'a str,
    order_type: &'a str,
    order_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderIdRequest<'a> {
    account_id: &'a str,
    order_id: &'a str,
}

/// JSON gateway client for the broker's unary API.
#[derive(Clone)]
pub struct InvestClient {
    client: Client,
    base_url: String,
    token: String,
    app_name: String,
}

impl InvestClient {
    pub fn new(settings: &InvestSettings) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .user_agent(settings.app_name.clone())
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| RemoteError::new(StatusCode::InvalidArgument, format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: settings.rest_url.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
            app_name: settings.app_name.clone(),
        })
    }

    async fn call<Req, Resp>(&self, service: &str, method: &str, body: &Req) -> Result<Resp, RemoteError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let mut retry_count = 0;

        loop {
            match self.call_once(service, method, body).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && retry_count < MAX_RETRIES => {
                    retry_count += 1;
                    let backoff = Duration::from_millis(500 * 2_u64.pow(retry_count));
                    warn!(
                        "{}/{} failed with {}, retrying in {:?} (attempt {}/{})",
                        service, method, e, backoff, retry_count, MAX_RETRIES
                    );
                    sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_once<Req, Resp>(&self, service: &str, method: &str, body: &Req) -> Result<Resp, RemoteError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{}.{}/{}", self.base_url, CONTRACT_PREFIX, service, method);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("x-app-name", &self.app_name)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<ErrorBody>(&text) {
                Ok(body) if body.code != 0 => body.into_remote_error(),
                _ => RemoteError::new(http_status_code(status.as_u16()), format!("HTTP {status}: {text}")),
            });
        }

        serde_json::from_str(&text)
            .map_err(|e| RemoteError::new(StatusCode::Internal, format!("unexpected {method} response: {e}")))
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::new(StatusCode::DeadlineExceeded, e.to_string())
    } else {
        RemoteError::unavailable(e.to_string())
    }
}

pub(crate) fn http_status_code(status: u16) -> StatusCode {
    match status {
        400 => StatusCode::InvalidArgument,
        401 => StatusCode::Unauthenticated,
        403 => StatusCode::PermissionDenied,
        404 => StatusCode::NotFound,
        429 => StatusCode::ResourceExhausted,
        500..=599 => StatusCode::Unavailable,
        _ => StatusCode::Unknown,
    }
}

#[async_trait]
impl InstrumentsApi for InvestClient {
    async fn trading_schedules(
        &self,
        exchange: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TradingDaySchedule>, RemoteError> {
        let response: TradingSchedulesResponse = self
            .call(
                "InstrumentsService",
                "TradingSchedules",
                &TradingSchedulesRequest { exchange, from, to },
            )
            .await?;

        Ok(response
            .exchanges
            .iter()
            .filter(|schedule| schedule.exchange.is_empty() || schedule.exchange.eq_ignore_ascii_case(exchange))
            .flat_map(|schedule| schedule.days.iter().map(|day| day.to_model()))
            .collect())
    }

    async fn future_by_figi(&self, figi: &str) -> Result<FutureInfo, RemoteError> {
        let response: FutureResponse = self
            .call(
                "InstrumentsService",
                "FutureBy",
                &InstrumentRequest {
                    id_type: "INSTRUMENT_ID_TYPE_FIGI",
                    id: figi,
                },
            )
            .await?;
        Ok(response.instrument.into())
    }

    async fn find_instrument(&self, query: &str) -> Result<Vec<InstrumentShort>, RemoteError> {
        let response: FindInstrumentResponse = self
            .call("InstrumentsService", "FindInstrument", &FindInstrumentRequest { query })
            .await?;
        Ok(response.instruments.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl OperationsApi for InvestClient {
    async fn get_accounts(&self) -> Result<Vec<Account>, RemoteError> {
        let response: AccountsResponse = self.call("UsersService", "GetAccounts", &EmptyRequest {}).await?;
        Ok(response.accounts.into_iter().map(Into::into).collect())
    }

    async fn available_cash(&self, account_id: &str) -> Result<Decimal, RemoteError> {
        let response: PositionsResponse = self
            .call("OperationsService", "GetPositions", &AccountRequest { account_id })
            .await?;
        Ok(response
            .money
            .iter()
            .filter(|money| money.currency.eq_ignore_ascii_case(RUB))
            .map(|money| money.to_decimal())
            .sum())
    }

    async fn positions(&self, account_id: &str) -> Result<Vec<SecurityPosition>, RemoteError> {
        let response: PositionsResponse = self
            .call("OperationsService", "GetPositions", &AccountRequest { account_id })
            .await?;
        Ok(response
            .securities
            .into_iter()
            .chain(response.futures)
            .map(Into::into)
            .collect())
    }
}

#[async_trait]
impl OrdersApi for InvestClient {
    async fn post_market_order(
        &self,
        account_id: &str,
        figi: &str,
        lots: i64,
        is_buy: bool,
    ) -> Result<PostOrderResult, RemoteError> {
        let direction = if is_buy {
            "ORDER_DIRECTION_BUY"
        } else {
            "ORDER_DIRECTION_SELL"
        };
        info!("Placing market order: {} {} lots of {}", direction, lots, figi);

        let response: PostOrderResponse = self
            .call(
                "OrdersService",
                "PostOrder",
                &OrderRequest {
                    figi,
                    quantity: lots.to_string(),
                    direction,
                    account_id,
                    order_type: "ORDER_TYPE_MARKET",
                    order_id: Uuid::new_v4().to_string(),
                },
            )
            .await?;
        Ok(response.into())
    }

    async fn order_state(&self, account_id: &str, order_id: &str) -> Result<OrderState, RemoteError> {
        let response: OrderStateDto = self
            .call("OrdersService", "GetOrderState", &OrderIdRequest { account_id, order_id })
            .await?;
        Ok(response.into())
    }

    async fn cancel_all_orders(&self, account_id: &str) -> Result<(), RemoteError> {
        let response: OrdersResponse = self
            .call("OrdersService", "GetOrders", &AccountRequest { account_id })
            .await?;

        for order in response.orders {
            info!("Cancelling order {}", order.order_id);
            let _: serde_json::Value = self
                .call(
                    "OrdersService",
                    "CancelOrder",
                    &OrderIdRequest {
                        account_id,
                        order_id: &order.order_id,
                    },
                )
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_statuses_follow_the_retry_policy() {
        assert!(RemoteError::new(http_status_code(503), "").is_retryable());
        assert!(RemoteError::new(http_status_code(429), "").is_retryable());
        assert!(!RemoteError::new(http_status_code(401), "").is_retryable());
        assert!(!RemoteError::new(http_status_code(400), "").is_retryable());
    }

    #[test]
    fn market_order_request_uses_gateway_field_names() {
        let request = OrderRequest {
            figi: "FUTSI0325000",
            quantity: 3.to_string(),
            direction: "ORDER_DIRECTION_BUY",
            account_id: "2000123",
            order_type: "ORDER_TYPE_MARKET",
            order_id: "b1".to_string(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["quantity"], "3");
        assert_eq!(json["accountId"], "2000123");
        assert_eq!(json["orderType"], "ORDER_TYPE_MARKET");
        assert_eq!(json["orderId"], "b1");
    }
}
