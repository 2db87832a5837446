use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};

const NANO_SCALE: u32 = 9;

/// Fixed point number as the broker sends it: integer part plus billionths.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Quotation {
    #[serde(default, deserialize_with = "i64_from_str_or_num")]
    pub units: i64,
    #[serde(default)]
    pub nano: i32,
}

impl Quotation {
    pub fn to_decimal(self) -> Decimal {
        Decimal::from(self.units) + Decimal::new(i64::from(self.nano), NANO_SCALE)
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct MoneyValue {
    #[serde(default)]
    pub currency: String,
    #[serde(default, deserialize_with = "i64_from_str_or_num")]
    pub units: i64,
    #[serde(default)]
    pub nano: i32,
}

impl MoneyValue {
    pub fn to_decimal(&self) -> Decimal {
        Quotation {
            units: self.units,
            nano: self.nano,
        }
        .to_decimal()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StrOrNum {
    Str(String),
    Num(i64),
}

/// int64 fields arrive as JSON strings from the gateway, but numbers are accepted too.
pub fn i64_from_str_or_num<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match StrOrNum::deserialize(deserializer)? {
        StrOrNum::Num(n) => Ok(n),
        StrOrNum::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
