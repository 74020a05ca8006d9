use thiserror::Error;

/// Construction-time validation errors for domain values and configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol asset cannot be empty")]
    EmptyAsset,
    #[error("symbol asset '{value}' must be ASCII alphanumeric")]
    InvalidAsset { value: String },
    #[error("symbol '{value}' must look like BASE/QUOTE or BASE-QUOTE")]
    InvalidSymbol { value: String },

    #[error("invalid interval '{value}', expected one of 1m, 3m, 5m, 15m, 30m, 1h, 2h, 4h, 6h, 12h, 1d, 3d, 1w, 1M")]
    InvalidInterval { value: String },
    #[error("invalid exchange '{value}', expected one of binance, okx, bybit, bitget")]
    InvalidExchange { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
    #[error("unix millisecond timestamp {value} is out of range")]
    TimestampOutOfRange { value: i64 },

    #[error("limit must be a positive integer")]
    NonPositiveLimit,
    #[error("limit {limit} exceeds the maximum of {max} entries")]
    LimitAboveMaximum { limit: u32, max: u32 },
    #[error("window start {start} must be earlier than end {end}")]
    InvertedWindow { start: String, end: String },

    #[error("configuration value '{key}' is invalid: '{value}'")]
    InvalidConfig { key: String, value: String },
}
