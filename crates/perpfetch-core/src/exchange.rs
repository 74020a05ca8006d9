use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Exchanges with a built-in USDT perpetual source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    Binance,
    Okx,
    Bybit,
    Bitget,
}

impl ExchangeId {
    pub const ALL: [Self; 4] = [Self::Binance, Self::Okx, Self::Bybit, Self::Bitget];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Okx => "okx",
            Self::Bybit => "bybit",
            Self::Bitget => "bitget",
        }
    }

    /// Upper-case form used in environment variable names.
    pub const fn env_prefix(self) -> &'static str {
        match self {
            Self::Binance => "BINANCE",
            Self::Okx => "OKX",
            Self::Bybit => "BYBIT",
            Self::Bitget => "BITGET",
        }
    }
}

impl Display for ExchangeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "binance" => Ok(Self::Binance),
            "okx" => Ok(Self::Okx),
            "bybit" => Ok(Self::Bybit),
            "bitget" => Ok(Self::Bitget),
            other => Err(ValidationError::InvalidExchange {
                value: other.to_owned(),
            }),
        }
    }
}
