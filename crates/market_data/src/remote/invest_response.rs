use chrono::{DateTime, Utc};
use serde::Deserialize;

use common::errors::{RemoteError, StatusCode};
use common::models::{
    Account, FutureInfo, InstrumentShort, OrderExecutionStatus, OrderState, PostOrderResult, SecurityPosition,
    TradingDaySchedule,
};

use super::quotation::{MoneyValue, Quotation, i64_from_str_or_num};

/// Error body returned by the gateway for failed calls.
#[derive(Deserialize, Debug)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub description: String,
}

impl ErrorBody {
    pub fn into_remote_error(self) -> RemoteError {
        let message = if self.description.is_empty() {
            self.message
        } else {
            format!("{} ({})", self.message, self.description)
        };
        RemoteError::new(StatusCode::from(self.code), message)
    }
}

#[derive(Deserialize, Debug)]
pub struct TradingSchedulesResponse {
    #[serde(default)]
    pub exchanges: Vec<TradingScheduleDto>,
}

#[derive(Deserialize, Debug)]
pub struct TradingScheduleDto {
    #[serde(default)]
    pub exchange: String,
    #[serde(default)]
    pub days: Vec<TradingDayDto>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TradingDayDto {
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub is_trading_day: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl TradingDayDto {
    pub fn to_model(&self) -> TradingDaySchedule {
        // Non-trading days come back with epoch timestamps.
        let real = |t: Option<DateTime<Utc>>| t.filter(|t| t.timestamp() > 0);
        TradingDaySchedule {
            date: self.date.date_naive(),
            is_trading_day: self.is_trading_day,
            start_time: real(self.start_time),
            end_time: real(self.end_time),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct FutureResponse {
    pub instrument: FutureDto,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FutureDto {
    pub figi: String,
    #[serde(default)]
    pub ticker: String,
    #[serde(default)]
    pub lot: i64,
    #[serde(default)]
    pub short_enabled_flag: bool,
    #[serde(default)]
    pub otc_flag: bool,
    #[serde(default)]
    pub buy_available_flag: bool,
    #[serde(default)]
    pub sell_available_flag: bool,
    #[serde(default)]
    pub api_trade_available_flag: bool,
    #[serde(default)]
    pub basic_asset: String,
    #[serde(default)]
    pub basic_asset_size: Quotation,
    #[serde(default)]
    pub basic_asset_position_uid: String,
}

impl From<FutureDto> for FutureInfo {
    fn from(dto: FutureDto) -> Self {
        Self {
            figi: dto.figi,
            ticker: dto.ticker,
            lot: dto.lot,
            short_enabled_flag: dto.short_enabled_flag,
            otc_flag: dto.otc_flag,
            buy_available_flag: dto.buy_available_flag,
            sell_available_flag: dto.sell_available_flag,
            api_trade_available_flag: dto.api_trade_available_flag,
            basic_asset: dto.basic_asset,
            basic_asset_size: dto.basic_asset_size.to_decimal(),
            basic_asset_position_uid: dto.basic_asset_position_uid,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct FindInstrumentResponse {
    #[serde(default)]
    pub instruments: Vec<InstrumentShortDto>,
}

#[derive(Deserialize, Debug)]
pub struct InstrumentShortDto {
    pub figi: String,
    #[serde(default)]
    pub ticker: String,
}

impl From<InstrumentShortDto> for InstrumentShort {
    fn from(dto: InstrumentShortDto) -> Self {
        Self {
            figi: dto.figi,
            ticker: dto.ticker,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct AccountsResponse {
    #[serde(default)]
    pub accounts: Vec<AccountDto>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AccountDto {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub access_level: String,
}

impl From<AccountDto> for Account {
    fn from(dto: AccountDto) -> Self {
        Self {
            is_open: dto.status == "ACCOUNT_STATUS_OPEN",
            has_full_access: dto.access_level == "ACCOUNT_ACCESS_LEVEL_FULL_ACCESS",
            id: dto.id,
            name: dto.name,
        }
    }
}

pub fn execution_status(raw: &str) -> OrderExecutionStatus {
    match raw {
        "EXECUTION_REPORT_STATUS_FILL" => OrderExecutionStatus::Fill,
        "EXECUTION_REPORT_STATUS_PARTIALLYFILL" => OrderExecutionStatus::PartiallyFill,
        "EXECUTION_REPORT_STATUS_NEW" => OrderExecutionStatus::New,
        "EXECUTION_REPORT_STATUS_REJECTED" => OrderExecutionStatus::Rejected,
        "EXECUTION_REPORT_STATUS_CANCELLED" => OrderExecutionStatus::Cancelled,
        _ => OrderExecutionStatus::Unspecified,
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PostOrderResponse {
    pub order_id: String,
    #[serde(default)]
    pub execution_report_status: String,
}

impl From<PostOrderResponse> for PostOrderResult {
    fn from(dto: PostOrderResponse) -> Self {
        Self {
            status: execution_status(&dto.execution_report_status),
            order_id: dto.order_id,
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OrderStateDto {
    pub order_id: String,
    #[serde(default)]
    pub execution_report_status: String,
    #[serde(default, deserialize_with = "i64_from_str_or_num")]
    pub lots_executed: i64,
    #[serde(default)]
    pub executed_order_price: MoneyValue,
    #[serde(default)]
    pub total_order_amount: MoneyValue,
}

impl From<OrderStateDto> for OrderState {
    fn from(dto: OrderStateDto) -> Self {
        Self {
            status: execution_status(&dto.execution_report_status),
            lots_executed: dto.lots_executed,
            executed_order_price: dto.executed_order_price.to_decimal(),
            total_order_amount: dto.total_order_amount.to_decimal(),
            order_id: dto.order_id,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct OrdersResponse {
    #[serde(default)]
    pub orders: Vec<OrderStateDto>,
}

#[derive(Deserialize, Debug)]
pub struct PositionsResponse {
    #[serde(default)]
    pub money: Vec<MoneyValue>,
    #[serde(default)]
    pub securities: Vec<PositionDto>,
    #[serde(default)]
    pub futures: Vec<PositionDto>,
}

#[derive(Deserialize, Debug)]
pub struct PositionDto {
    pub figi: String,
    #[serde(default, deserialize_with = "i64_from_str_or_num")]
    pub balance: i64,
}

impl From<PositionDto> for SecurityPosition {
    fn from(dto: PositionDto) -> Self {
        Self {
            figi: dto.figi,
            balance: dto.balance,
        }
    }
}
