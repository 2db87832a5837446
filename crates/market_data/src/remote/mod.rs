pub mod invest_client;
pub mod invest_response;
pub mod invest_stream;
pub mod quotation;

pub use invest_client::InvestClient;
pub use invest_stream::{InvestStreamClient, parse_stream_message};
pub use quotation::{MoneyValue, Quotation};

/// Package prefix of every gateway method path.
pub const CONTRACT_PREFIX: &str = "tinkoff.public.invest.api.contract.v1";
