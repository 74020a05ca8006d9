use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_ASSET_LEN: usize = 20;

/// Contract family of a symbol. Only USDT-margined perpetuals are served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    Perpetual,
}

/// Exchange-neutral perpetual contract identity, e.g. `BTC/USDT`.
///
/// Serialized as its `BASE/QUOTE` display form; deserialization goes through
/// [`Symbol::parse`], so the asset rules hold for decoded values too.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol {
    base: String,
    quote: String,
    contract: ContractKind,
}

impl Symbol {
    pub fn new(base: &str, quote: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            base: normalize_asset(base)?,
            quote: normalize_asset(quote)?,
            contract: ContractKind::Perpetual,
        })
    }

    /// USDT-quoted perpetual for `base`.
    pub fn usdt(base: &str) -> Result<Self, ValidationError> {
        Self::new(base, "USDT")
    }

    /// Parses `BASE/QUOTE` or `BASE-QUOTE`.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        let (base, quote) = trimmed
            .split_once('/')
            .or_else(|| trimmed.split_once('-'))
            .ok_or_else(|| ValidationError::InvalidSymbol {
                value: trimmed.to_owned(),
            })?;
        Self::new(base, quote)
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn quote(&self) -> &str {
        &self.quote
    }

    pub const fn contract(&self) -> ContractKind {
        self.contract
    }

    /// Concatenated pair, e.g. `BTCUSDT`.
    pub fn pair(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl TryFrom<String> for Symbol {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.to_string()
    }
}

fn normalize_asset(input: &str) -> Result<String, ValidationError> {
    let normalized = input.trim().to_ascii_uppercase();
    if normalized.is_empty() {
        return Err(ValidationError::EmptyAsset);
    }
    if normalized.len() > MAX_ASSET_LEN || !normalized.chars().all(|ch| ch.is_ascii_alphanumeric())
    {
        return Err(ValidationError::InvalidAsset {
            value: input.to_owned(),
        });
    }
    Ok(normalized)
}
