use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// OHLCV candle. Field order and count are part of the compatibility surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kline {
    /// Bucket open time, unix milliseconds.
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Kline {
    pub const fn new(
        open_time: i64,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Candle whose four prices are the same value and whose volume is zero.
    pub const fn flat(open_time: i64, value: Decimal) -> Self {
        Self::new(open_time, value, value, value, value, Decimal::ZERO)
    }
}

/// One settled funding rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingRatePoint {
    pub funding_time: i64,
    pub rate: Decimal,
}

/// Current funding rate plus the next settlement time when the venue reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingRateSnapshot {
    pub funding_time: i64,
    pub rate: Decimal,
    pub next_funding_time: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    pub timestamp: i64,
    pub last_price: Decimal,
    pub mark_price: Option<Decimal>,
    pub index_price: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPricePoint {
    pub timestamp: i64,
    pub value: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPricePoint {
    pub timestamp: i64,
    pub value: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PremiumIndexPoint {
    pub timestamp: i64,
    pub value: Decimal,
}

/// Latest open interest, counted in the base asset (coins, not contracts or
/// quote notional).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenInterest {
    pub timestamp: i64,
    pub value: Decimal,
}

/// Contract metadata. `status` is always the exchange-native status string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub tick_size: Decimal,
    pub step_size: Decimal,
    pub min_qty: Decimal,
    pub max_qty: Decimal,
    pub status: String,
}

/// Sorts by open time and drops repeated open times, keeping the first seen.
pub fn normalize_klines(mut klines: Vec<Kline>) -> Vec<Kline> {
    klines.sort_by_key(|kline| kline.open_time);
    klines.dedup_by_key(|kline| kline.open_time);
    klines
}

pub fn klines_strictly_ascending(klines: &[Kline]) -> bool {
    klines
        .windows(2)
        .all(|pair| pair[0].open_time < pair[1].open_time)
}
