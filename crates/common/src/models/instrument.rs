use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq)]
pub struct FutureInfo {
    pub figi: String,
    pub ticker: String,
    pub lot: i64,
    pub short_enabled_flag: bool,
    pub otc_flag: bool,
    pub buy_available_flag: bool,
    pub sell_available_flag: bool,
    pub api_trade_available_flag: bool,
    pub basic_asset: String,
    pub basic_asset_size: Decimal,
    pub basic_asset_position_uid: String,
}

impl FutureInfo {
    pub fn is_tradeable(&self) -> bool {
        !self.otc_flag
            && self.buy_available_flag
            && self.sell_available_flag
            && self.api_trade_available_flag
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentShort {
    pub figi: String,
    pub ticker: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub is_open: bool,
    pub has_full_access: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SecurityPosition {
    pub figi: String,
    pub balance: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderExecutionStatus {
    Fill,
    PartiallyFill,
    New,
    Rejected,
    Cancelled,
    Unspecified,
}

impl OrderExecutionStatus {
    pub fn is_filled(&self) -> bool {
        matches!(self, Self::Fill | Self::PartiallyFill)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostOrderResult {
    pub order_id: String,
    pub status: OrderExecutionStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderState {
    pub order_id: String,
    pub status: OrderExecutionStatus,
    pub lots_executed: i64,
    pub executed_order_price: Decimal,
    pub total_order_amount: Decimal,
}
