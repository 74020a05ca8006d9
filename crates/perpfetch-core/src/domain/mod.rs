//! # Domain Models
//!
//! Exchange-neutral value types shared by every source.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Symbol`] | Perpetual contract identity (`BTC/USDT`) |
//! | [`Interval`] | Candle granularity (1m .. 1M) |
//! | [`UtcDateTime`] | UTC timestamp used for query windows |
//! | [`Kline`] | Six-field OHLCV candle |
//! | [`FundingRatePoint`] | Settled funding rate |
//! | [`FundingRateSnapshot`] | Current funding rate with next settlement |
//! | [`Ticker`] | Last/mark/index price snapshot |
//! | [`MarkPricePoint`], [`IndexPricePoint`], [`PremiumIndexPoint`] | Point-in-time values |
//! | [`OpenInterest`] | Latest open interest |
//! | [`Instrument`] | Contract metadata |
//!
//! Prices, rates and quantities are [`rust_decimal::Decimal`]; nothing here
//! goes through binary floating point. All records are immutable values built
//! fresh for every call.

mod interval;
mod models;
mod symbol;
mod timestamp;

pub use interval::Interval;
pub use models::{
    klines_strictly_ascending, normalize_klines, FundingRatePoint, FundingRateSnapshot,
    IndexPricePoint, Instrument, Kline, MarkPricePoint, OpenInterest, PremiumIndexPoint, Ticker,
};
pub use symbol::{ContractKind, Symbol};
pub use timestamp::UtcDateTime;
