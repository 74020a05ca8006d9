use std::sync::Arc;

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::adapters::common::{
    de_decimal, de_millis, de_opt_decimal, de_opt_millis, decode_json, finish_klines,
    klines_from_rows, now_millis, RestSupport,
};
use crate::config::ExchangeSettings;
use crate::data_source::{
    CapabilitySet, FundingRateWindow, HistoricalWindow, Metric, PerpDataSource, SourceError,
    SourceFuture, TransientCause,
};
use crate::http_client::{HttpClient, HttpResponse};
use crate::{
    ExchangeId, FundingRatePoint, FundingRateSnapshot, IndexPricePoint, Instrument, Interval,
    Kline, MarkPricePoint, OpenInterest, PremiumIndexPoint, Symbol, Ticker,
};

const PRICE_KLINES_PATH: &str = "/v5/market/kline";
const INDEX_KLINES_PATH: &str = "/v5/market/index-price-kline";
const MARK_KLINES_PATH: &str = "/v5/market/mark-price-kline";
const PREMIUM_KLINES_PATH: &str = "/v5/market/premium-index-price-kline";
const FUNDING_HISTORY_PATH: &str = "/v5/market/funding/history";
const TICKERS_PATH: &str = "/v5/market/tickers";
const INSTRUMENTS_PATH: &str = "/v5/market/instruments-info";

const CATEGORY: &str = "linear";
const KLINE_MAX_LIMIT: u32 = 1_000;
const FUNDING_MAX_LIMIT: u32 = 200;
const INSTRUMENTS_PAGE_LIMIT: u32 = 1_000;
const INSTRUMENTS_MAX_PAGES: usize = 20;

const RATE_LIMIT_CODES: [i64; 2] = [10_006, 10_018];
const SERVER_CODES: [i64; 2] = [10_000, 10_016];
const PARAMETER_ERROR_CODE: i64 = 10_001;

/// Bybit v5 linear perpetual adapter. Bybit has no three-day candles.
pub struct BybitAdapter {
    rest: RestSupport,
}

fn interval_code(interval: Interval) -> Option<&'static str> {
    match interval {
        Interval::OneMinute => Some("1"),
        Interval::ThreeMinutes => Some("3"),
        Interval::FiveMinutes => Some("5"),
        Interval::FifteenMinutes => Some("15"),
        Interval::ThirtyMinutes => Some("30"),
        Interval::OneHour => Some("60"),
        Interval::TwoHours => Some("120"),
        Interval::FourHours => Some("240"),
        Interval::SixHours => Some("360"),
        Interval::TwelveHours => Some("720"),
        Interval::OneDay => Some("D"),
        Interval::ThreeDays => None,
        Interval::OneWeek => Some("W"),
        Interval::OneMonth => Some("M"),
    }
}

impl BybitAdapter {
    pub fn new(settings: ExchangeSettings, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            rest: RestSupport::new(ExchangeId::Bybit, settings, http_client),
        }
    }

    async fn klines(
        &self,
        path: &str,
        window: HistoricalWindow,
        metric: Metric,
    ) -> Result<Vec<Kline>, SourceError> {
        let interval = interval_code(window.interval).ok_or_else(|| {
            SourceError::interval_not_supported(window.interval, metric)
                .with_exchange(ExchangeId::Bybit)
        })?;
        let limit = window.capped_limit(KLINE_MAX_LIMIT);
        let request = self
            .rest
            .request(path)
            .with_query("category", CATEGORY)
            .with_query("symbol", window.symbol.pair())
            .with_query("interval", interval)
            .with_optional_query("start", window.start_millis())
            .with_optional_query("end", window.end_millis())
            .with_query("limit", limit);

        // Price candles carry volume at index 5; the derived series stop at close.
        let has_volume = path == PRICE_KLINES_PATH;
        let klines = self
            .rest
            .fetch(request, |response| {
                let result: ListResult<Vec<Value>> = decode(response, metric)?;
                klines_from_rows(&result.list, has_volume)
            })
            .await?;
        Ok(finish_klines(klines, limit, window.start.is_some()))
    }

    async fn ticker(&self, symbol: &Symbol, metric: Metric) -> Result<(TickerEntry, i64), SourceError> {
        let request = self
            .rest
            .request(TICKERS_PATH)
            .with_query("category", CATEGORY)
            .with_query("symbol", symbol.pair());
        self.rest
            .fetch(request, |response| {
                let (result, server_time) = decode_with_time::<ListResult<TickerEntry>>(response, metric)?;
                let ticker = result.list.into_iter().next().ok_or_else(|| {
                    SourceError::invalid_response(format!("bybit returned no ticker for {metric}"))
                })?;
                let timestamp = ticker.timestamp.or(server_time).unwrap_or_else(now_millis);
                Ok((ticker, timestamp))
            })
            .await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    ret_code: Option<i64>,
    #[serde(default)]
    ret_msg: String,
    #[serde(default)]
    result: Value,
    #[serde(default, deserialize_with = "de_opt_millis")]
    time: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResult<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
    #[serde(default)]
    next_page_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingEntry {
    #[serde(deserialize_with = "de_decimal")]
    funding_rate: Decimal,
    #[serde(deserialize_with = "de_millis")]
    funding_rate_timestamp: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerEntry {
    #[serde(deserialize_with = "de_decimal")]
    last_price: Decimal,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    index_price: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    mark_price: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    funding_rate: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_millis")]
    next_funding_time: Option<i64>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    open_interest: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_millis")]
    timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentEntry {
    symbol: String,
    #[serde(default)]
    contract_type: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    base_coin: String,
    #[serde(default)]
    quote_coin: String,
    #[serde(default)]
    price_filter: PriceFilter,
    #[serde(default)]
    lot_size_filter: LotSizeFilter,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceFilter {
    #[serde(default, deserialize_with = "de_opt_decimal")]
    tick_size: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LotSizeFilter {
    #[serde(default, deserialize_with = "de_opt_decimal")]
    qty_step: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    min_order_qty: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    max_order_qty: Option<Decimal>,
}

impl InstrumentEntry {
    fn into_instrument(self) -> Result<Instrument, SourceError> {
        let symbol = self.symbol;
        let missing = |field: &str| {
            SourceError::invalid_response(format!("bybit instrument {symbol} missing {field}"))
        };
        Ok(Instrument {
            tick_size: self.price_filter.tick_size.ok_or_else(|| missing("tickSize"))?,
            step_size: self.lot_size_filter.qty_step.ok_or_else(|| missing("qtyStep"))?,
            min_qty: self
                .lot_size_filter
                .min_order_qty
                .ok_or_else(|| missing("minOrderQty"))?,
            max_qty: self
                .lot_size_filter
                .max_order_qty
                .ok_or_else(|| missing("maxOrderQty"))?,
            base_asset: self.base_coin,
            quote_asset: self.quote_coin,
            status: self.status,
            symbol,
        })
    }
}

fn missing_field(field: &str) -> SourceError {
    SourceError::invalid_response(format!("bybit ticker missing {field}"))
        .with_exchange(ExchangeId::Bybit)
}

fn decode<T: DeserializeOwned>(response: HttpResponse, metric: Metric) -> Result<T, SourceError> {
    decode_with_time(response, metric).map(|(result, _)| result)
}

/// Unwraps `{retCode, retMsg, result, time}` and returns the result with the server time.
fn decode_with_time<T: DeserializeOwned>(
    response: HttpResponse,
    metric: Metric,
) -> Result<(T, Option<i64>), SourceError> {
    // Bybit answers 403 when an IP exceeds its request budget.
    if response.status == 403 {
        return Err(SourceError::rate_limited("bybit denied the request (HTTP 403)"));
    }

    let envelope = match decode_json::<Envelope>(&response.body, metric.as_str()) {
        Ok(envelope) => envelope,
        Err(_) if !response.is_success() => {
            return Err(SourceError::validation(format!(
                "bybit rejected the request (HTTP {})",
                response.status
            )))
        }
        Err(error) => return Err(error),
    };

    match envelope.ret_code {
        Some(0) => {}
        Some(code) => return Err(classify(code, envelope.ret_msg)),
        None if !response.is_success() => {
            return Err(SourceError::validation(format!(
                "bybit rejected the request (HTTP {})",
                response.status
            )))
        }
        None => {}
    }

    let result = serde_json::from_value(envelope.result).map_err(|error| {
        SourceError::invalid_response(format!("malformed {metric} payload: {error}")).with_cause(error)
    })?;
    Ok((result, envelope.time))
}

fn classify(code: i64, msg: String) -> SourceError {
    if RATE_LIMIT_CODES.contains(&code) {
        SourceError::rate_limited(format!("{msg} (bybit code {code})"))
    } else if SERVER_CODES.contains(&code) {
        SourceError::transient(TransientCause::Server, format!("{msg} (bybit code {code})"))
    } else if code == PARAMETER_ERROR_CODE && msg.to_ascii_lowercase().contains("symbol") {
        SourceError::symbol_not_supported(format!("{msg} (bybit code {code})"))
    } else {
        SourceError::validation(format!("{msg} (bybit code {code})"))
    }
}

impl PerpDataSource for BybitAdapter {
    fn id(&self) -> ExchangeId {
        ExchangeId::Bybit
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::full()
    }

    fn max_limit(&self, metric: Metric) -> u32 {
        match metric {
            Metric::FundingRateHistory => FUNDING_MAX_LIMIT,
            _ => KLINE_MAX_LIMIT,
        }
    }

    fn price_klines<'a>(&'a self, window: HistoricalWindow) -> SourceFuture<'a, Vec<Kline>> {
        Box::pin(self.klines(PRICE_KLINES_PATH, window, Metric::PriceKlines))
    }

    fn index_price_klines<'a>(
        &'a self,
        window: HistoricalWindow,
    ) -> SourceFuture<'a, Vec<Kline>> {
        Box::pin(self.klines(INDEX_KLINES_PATH, window, Metric::IndexPriceKlines))
    }

    fn mark_price_klines<'a>(&'a self, window: HistoricalWindow) -> SourceFuture<'a, Vec<Kline>> {
        Box::pin(self.klines(MARK_KLINES_PATH, window, Metric::MarkPriceKlines))
    }

    fn premium_index_klines<'a>(
        &'a self,
        window: HistoricalWindow,
    ) -> SourceFuture<'a, Vec<Kline>> {
        Box::pin(self.klines(PREMIUM_KLINES_PATH, window, Metric::PremiumIndexKlines))
    }

    fn funding_rate_history<'a>(
        &'a self,
        window: FundingRateWindow,
    ) -> SourceFuture<'a, Vec<FundingRatePoint>> {
        Box::pin(async move {
            let request = self
                .rest
                .request(FUNDING_HISTORY_PATH)
                .with_query("category", CATEGORY)
                .with_query("symbol", window.symbol.pair())
                .with_optional_query("startTime", window.start_millis())
                .with_optional_query("endTime", window.end_millis())
                .with_query("limit", window.capped_limit(FUNDING_MAX_LIMIT));

            let result: ListResult<FundingEntry> = self
                .rest
                .fetch(request, |response| decode(response, Metric::FundingRateHistory))
                .await?;

            let mut points = result
                .list
                .into_iter()
                .map(|entry| FundingRatePoint {
                    funding_time: entry.funding_rate_timestamp,
                    rate: entry.funding_rate,
                })
                .collect::<Vec<_>>();
            points.sort_by_key(|point| point.funding_time);
            Ok(points)
        })
    }

    fn latest_ticker<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Ticker> {
        Box::pin(async move {
            let (ticker, timestamp) = self.ticker(&symbol, Metric::LatestTicker).await?;
            Ok(Ticker {
                timestamp,
                last_price: ticker.last_price,
                mark_price: ticker.mark_price,
                index_price: ticker.index_price,
            })
        })
    }

    fn latest_mark_price<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, MarkPricePoint> {
        Box::pin(async move {
            let (ticker, timestamp) = self.ticker(&symbol, Metric::LatestMarkPrice).await?;
            Ok(MarkPricePoint {
                timestamp,
                value: ticker.mark_price.ok_or_else(|| missing_field("markPrice"))?,
            })
        })
    }

    fn latest_index_price<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, IndexPricePoint> {
        Box::pin(async move {
            let (ticker, timestamp) = self.ticker(&symbol, Metric::LatestIndexPrice).await?;
            Ok(IndexPricePoint {
                timestamp,
                value: ticker.index_price.ok_or_else(|| missing_field("indexPrice"))?,
            })
        })
    }

    fn latest_premium_index<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, PremiumIndexPoint> {
        Box::pin(async move {
            let window = HistoricalWindow::new(symbol, Interval::OneMinute).with_limit(1);
            let klines = self
                .klines(PREMIUM_KLINES_PATH, window, Metric::LatestPremiumIndex)
                .await?;
            let latest = klines.last().ok_or_else(|| {
                SourceError::invalid_response("bybit returned no premium index kline")
                    .with_exchange(ExchangeId::Bybit)
            })?;
            Ok(PremiumIndexPoint {
                timestamp: latest.open_time,
                value: latest.close,
            })
        })
    }

    fn latest_funding_rate<'a>(
        &'a self,
        symbol: Symbol,
    ) -> SourceFuture<'a, FundingRateSnapshot> {
        Box::pin(async move {
            let (ticker, timestamp) = self.ticker(&symbol, Metric::LatestFundingRate).await?;
            Ok(FundingRateSnapshot {
                funding_time: timestamp,
                rate: ticker
                    .funding_rate
                    .ok_or_else(|| missing_field("fundingRate"))?,
                next_funding_time: ticker.next_funding_time,
            })
        })
    }

    fn open_interest<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, OpenInterest> {
        Box::pin(async move {
            // The ticker snapshot is fresher than the bucketed open-interest feed.
            let (ticker, timestamp) = self.ticker(&symbol, Metric::OpenInterest).await?;
            Ok(OpenInterest {
                timestamp,
                value: ticker
                    .open_interest
                    .ok_or_else(|| missing_field("openInterest"))?,
            })
        })
    }

    fn instruments<'a>(&'a self) -> SourceFuture<'a, Vec<Instrument>> {
        Box::pin(async move {
            let mut instruments = Vec::new();
            let mut cursor: Option<String> = None;

            for _ in 0..INSTRUMENTS_MAX_PAGES {
                let request = self
                    .rest
                    .request(INSTRUMENTS_PATH)
                    .with_query("category", CATEGORY)
                    .with_query("limit", INSTRUMENTS_PAGE_LIMIT)
                    .with_optional_query("cursor", cursor.take());
                let page: ListResult<InstrumentEntry> = self
                    .rest
                    .fetch(request, |response| decode(response, Metric::Instruments))
                    .await?;

                for entry in page.list {
                    if entry.contract_type == "LinearPerpetual" && entry.quote_coin == "USDT" {
                        instruments.push(
                            entry
                                .into_instrument()
                                .map_err(|error| error.with_exchange(ExchangeId::Bybit))?,
                        );
                    }
                }

                match page.next_page_cursor {
                    Some(next) if !next.is_empty() => cursor = Some(next),
                    _ => return Ok(instruments),
                }
            }

            Err(SourceError::invalid_response(format!(
                "bybit instrument pagination did not terminate after {INSTRUMENTS_MAX_PAGES} pages"
            ))
            .with_exchange(ExchangeId::Bybit))
        })
    }
}
