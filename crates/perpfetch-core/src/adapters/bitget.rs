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
    SourceFuture,
};
use crate::http_client::{HttpClient, HttpResponse};
use crate::{
    ExchangeId, FundingRatePoint, FundingRateSnapshot, IndexPricePoint, Instrument, Interval,
    Kline, MarkPricePoint, OpenInterest, PremiumIndexPoint, Symbol, Ticker,
};

const CANDLES_PATH: &str = "/api/mix/v1/market/candles";
const FUNDING_HISTORY_PATH: &str = "/api/mix/v1/market/history-fundRate";
const TICKER_PATH: &str = "/api/mix/v1/market/ticker";
const MARK_PRICE_PATH: &str = "/api/mix/v1/market/mark-price";
const FUNDING_TIME_PATH: &str = "/api/mix/v1/market/funding-time";
const OPEN_INTEREST_PATH: &str = "/api/mix/v1/market/open-interest";

const PRODUCT_SUFFIX: &str = "_UMCBL";
const SUCCESS_CODE: &str = "00000";
const RATE_LIMIT_CODE: &str = "429";
const KLINE_MAX_LIMIT: u32 = 1_000;
const FUNDING_MAX_LIMIT: u32 = 100;
const FUNDING_MAX_PAGES: u32 = 10;

/// Bitget mix v1 USDT-M adapter. The v1 market API has no instrument listing.
pub struct BitgetAdapter {
    rest: RestSupport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandleKind {
    Price,
    Index,
    Mark,
    Premium,
}

impl CandleKind {
    const fn kline_type(self) -> Option<&'static str> {
        match self {
            Self::Price => None,
            Self::Index => Some("index"),
            Self::Mark => Some("mark"),
            Self::Premium => Some("premium"),
        }
    }
}

fn granularity(interval: Interval) -> &'static str {
    match interval {
        Interval::OneMinute => "1m",
        Interval::ThreeMinutes => "3m",
        Interval::FiveMinutes => "5m",
        Interval::FifteenMinutes => "15m",
        Interval::ThirtyMinutes => "30m",
        Interval::OneHour => "1H",
        Interval::TwoHours => "2H",
        Interval::FourHours => "4H",
        Interval::SixHours => "6H",
        Interval::TwelveHours => "12H",
        Interval::OneDay => "1D",
        Interval::ThreeDays => "3D",
        Interval::OneWeek => "1W",
        Interval::OneMonth => "1M",
    }
}

fn product_id(symbol: &Symbol) -> String {
    format!("{}{PRODUCT_SUFFIX}", symbol.pair())
}

/// Bitget requires both ends of the candle range. Missing ends are derived
/// from the interval and the limit, counting back from now.
fn candle_range(window: &HistoricalWindow, limit: u32, now: i64) -> (i64, i64) {
    let span = window.interval.duration_ms() * i64::from(limit);
    let end = window.end_millis().unwrap_or(now);
    let start = window.start_millis().unwrap_or(end - span);
    if start >= end {
        ((end - span).max(0), end)
    } else {
        (start, end)
    }
}

impl BitgetAdapter {
    pub fn new(settings: ExchangeSettings, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            rest: RestSupport::new(ExchangeId::Bitget, settings, http_client),
        }
    }

    async fn candles(
        &self,
        kind: CandleKind,
        window: HistoricalWindow,
        metric: Metric,
    ) -> Result<Vec<Kline>, SourceError> {
        let limit = window.capped_limit(KLINE_MAX_LIMIT);
        let (start, end) = candle_range(&window, limit, now_millis());
        let request = self
            .rest
            .request(CANDLES_PATH)
            .with_query("symbol", product_id(&window.symbol))
            .with_query("granularity", granularity(window.interval))
            .with_query("startTime", start)
            .with_query("endTime", end)
            .with_query("limit", limit)
            .with_optional_query("kLineType", kind.kline_type());

        let klines = self
            .rest
            .fetch(request, |response| {
                let rows = decode_candles(response, metric)?;
                klines_from_rows(&rows, kind == CandleKind::Price)
            })
            .await?;
        Ok(finish_klines(klines, limit, window.start.is_some()))
    }

    async fn data<T: DeserializeOwned>(
        &self,
        path: &str,
        symbol: &Symbol,
        metric: Metric,
    ) -> Result<(T, Option<i64>), SourceError> {
        let request = self.rest.request(path).with_query("symbol", product_id(symbol));
        self.rest
            .fetch(request, |response| decode(response, metric))
            .await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    code: Value,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Value,
    #[serde(default, deserialize_with = "de_opt_millis")]
    request_time: Option<i64>,
}

impl Envelope {
    fn code(&self) -> Option<String> {
        match &self.code {
            Value::String(code) => Some(code.clone()),
            Value::Number(code) => Some(code.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingEntry {
    #[serde(deserialize_with = "de_decimal")]
    funding_rate: Decimal,
    #[serde(default, deserialize_with = "de_opt_millis")]
    settle_time: Option<i64>,
    #[serde(default, deserialize_with = "de_opt_millis")]
    funding_time: Option<i64>,
}

impl FundingEntry {
    fn into_point(self) -> Result<FundingRatePoint, SourceError> {
        let funding_time = self.settle_time.or(self.funding_time).ok_or_else(|| {
            SourceError::invalid_response("bitget funding entry has no settleTime")
                .with_exchange(ExchangeId::Bitget)
        })?;
        Ok(FundingRatePoint {
            funding_time,
            rate: self.funding_rate,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerData {
    #[serde(deserialize_with = "de_decimal")]
    last: Decimal,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    index_price: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    funding_rate: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_millis")]
    timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkPriceData {
    #[serde(deserialize_with = "de_decimal")]
    mark_price: Decimal,
    #[serde(default, deserialize_with = "de_opt_millis")]
    timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingTimeData {
    #[serde(deserialize_with = "de_millis")]
    funding_time: i64,
}

#[derive(Debug, Deserialize)]
struct OpenInterestData {
    #[serde(deserialize_with = "de_decimal")]
    amount: Decimal,
    #[serde(default, deserialize_with = "de_opt_millis")]
    timestamp: Option<i64>,
}

fn missing_field(field: &str) -> SourceError {
    SourceError::invalid_response(format!("bitget ticker missing {field}"))
        .with_exchange(ExchangeId::Bitget)
}

/// Ascending and de-duplicated; keeps the oldest `limit` points of an
/// anchored window, otherwise the newest.
fn finish_funding(
    mut points: Vec<FundingRatePoint>,
    limit: usize,
    anchored_at_start: bool,
) -> Vec<FundingRatePoint> {
    points.sort_by_key(|point| point.funding_time);
    points.dedup_by_key(|point| point.funding_time);
    if points.len() > limit {
        if anchored_at_start {
            points.truncate(limit);
        } else {
            let excess = points.len() - limit;
            points.drain(..excess);
        }
    }
    points
}

fn denied(response: &HttpResponse) -> Option<SourceError> {
    (response.status == 403)
        .then(|| SourceError::rate_limited("bitget denied the request (HTTP 403)"))
}

fn rejection(response: &HttpResponse, envelope: Option<&Envelope>) -> SourceError {
    match envelope.and_then(|envelope| envelope.code().map(|code| (code, envelope.msg.clone()))) {
        Some((code, msg)) if code != SUCCESS_CODE => classify(&code, msg),
        _ => SourceError::validation(format!(
            "bitget rejected the request (HTTP {})",
            response.status
        )),
    }
}

fn classify(code: &str, msg: String) -> SourceError {
    if code == RATE_LIMIT_CODE {
        SourceError::rate_limited(format!("{msg} (bitget code {code})"))
    } else if msg.to_ascii_lowercase().contains("symbol") {
        SourceError::symbol_not_supported(format!("{msg} (bitget code {code})"))
    } else {
        SourceError::validation(format!("{msg} (bitget code {code})"))
    }
}

/// Candles come back as a bare array; failures still use the envelope.
fn decode_candles(response: HttpResponse, metric: Metric) -> Result<Vec<Vec<Value>>, SourceError> {
    if let Some(error) = denied(&response) {
        return Err(error);
    }
    if !response.is_success() {
        let envelope = serde_json::from_str::<Envelope>(&response.body).ok();
        return Err(rejection(&response, envelope.as_ref()));
    }

    match serde_json::from_str::<Vec<Vec<Value>>>(&response.body) {
        Ok(rows) => Ok(rows),
        Err(_) => {
            let envelope: Envelope = decode_json(&response.body, metric.as_str())?;
            match envelope.code() {
                Some(code) if code != SUCCESS_CODE => Err(classify(&code, envelope.msg)),
                _ => serde_json::from_value(envelope.data).map_err(|error| {
                    SourceError::invalid_response(format!("malformed {metric} payload: {error}"))
                        .with_cause(error)
                }),
            }
        }
    }
}

/// Unwraps `{code, msg, requestTime, data}`; returns the data and the request time.
fn decode<T: DeserializeOwned>(
    response: HttpResponse,
    metric: Metric,
) -> Result<(T, Option<i64>), SourceError> {
    if let Some(error) = denied(&response) {
        return Err(error);
    }

    let envelope = match decode_json::<Envelope>(&response.body, metric.as_str()) {
        Ok(envelope) => envelope,
        Err(_) if !response.is_success() => return Err(rejection(&response, None)),
        Err(error) => return Err(error),
    };
    if !response.is_success() || envelope.code().is_some_and(|code| code != SUCCESS_CODE) {
        return Err(rejection(&response, Some(&envelope)));
    }

    let data = serde_json::from_value(envelope.data).map_err(|error| {
        SourceError::invalid_response(format!("malformed {metric} payload: {error}")).with_cause(error)
    })?;
    Ok((data, envelope.request_time))
}

impl PerpDataSource for BitgetAdapter {
    fn id(&self) -> ExchangeId {
        ExchangeId::Bitget
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::full().without(Metric::Instruments)
    }

    fn max_limit(&self, metric: Metric) -> u32 {
        match metric {
            Metric::FundingRateHistory => FUNDING_MAX_LIMIT,
            _ => KLINE_MAX_LIMIT,
        }
    }

    fn price_klines<'a>(&'a self, window: HistoricalWindow) -> SourceFuture<'a, Vec<Kline>> {
        Box::pin(self.candles(CandleKind::Price, window, Metric::PriceKlines))
    }

    fn index_price_klines<'a>(
        &'a self,
        window: HistoricalWindow,
    ) -> SourceFuture<'a, Vec<Kline>> {
        Box::pin(self.candles(CandleKind::Index, window, Metric::IndexPriceKlines))
    }

    fn mark_price_klines<'a>(&'a self, window: HistoricalWindow) -> SourceFuture<'a, Vec<Kline>> {
        Box::pin(self.candles(CandleKind::Mark, window, Metric::MarkPriceKlines))
    }

    fn premium_index_klines<'a>(
        &'a self,
        window: HistoricalWindow,
    ) -> SourceFuture<'a, Vec<Kline>> {
        Box::pin(self.candles(CandleKind::Premium, window, Metric::PremiumIndexKlines))
    }

    fn funding_rate_history<'a>(
        &'a self,
        window: FundingRateWindow,
    ) -> SourceFuture<'a, Vec<FundingRatePoint>> {
        Box::pin(async move {
            // The v1 endpoint pages newest first by count only; the time
            // window is applied here, walking back until it is covered.
            let limit = window.capped_limit(FUNDING_MAX_LIMIT) as usize;
            let start = window.start_millis();
            let end = window.end_millis();
            let mut points = Vec::new();

            for page_no in 1..=FUNDING_MAX_PAGES {
                let request = self
                    .rest
                    .request(FUNDING_HISTORY_PATH)
                    .with_query("symbol", product_id(&window.symbol))
                    .with_query("pageSize", FUNDING_MAX_LIMIT)
                    .with_query("pageNo", page_no);
                let (entries, _): (Vec<FundingEntry>, _) = self
                    .rest
                    .fetch(request, |response| decode(response, Metric::FundingRateHistory))
                    .await?;

                let last_page = entries.len() < FUNDING_MAX_LIMIT as usize;
                let mut oldest: Option<i64> = None;
                for entry in entries {
                    let point = entry.into_point()?;
                    oldest = Some(oldest.map_or(point.funding_time, |seen| seen.min(point.funding_time)));
                    let after_start = start.map_or(true, |start| point.funding_time >= start);
                    let before_end = end.map_or(true, |end| point.funding_time < end);
                    if after_start && before_end {
                        points.push(point);
                    }
                }

                let covered = match start {
                    Some(start) => oldest.is_some_and(|oldest| oldest <= start),
                    None => points.len() >= limit,
                };
                if last_page || covered {
                    return Ok(finish_funding(points, limit, start.is_some()));
                }
            }

            Err(SourceError::validation(format!(
                "bitget serves the newest {} funding points; the window reaches further back",
                FUNDING_MAX_PAGES * FUNDING_MAX_LIMIT
            ))
            .with_exchange(ExchangeId::Bitget))
        })
    }

    fn latest_ticker<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Ticker> {
        Box::pin(async move {
            let (ticker, request_time): (TickerData, _) =
                self.data(TICKER_PATH, &symbol, Metric::LatestTicker).await?;
            let (mark, _): (MarkPriceData, _) =
                self.data(MARK_PRICE_PATH, &symbol, Metric::LatestTicker).await?;

            Ok(Ticker {
                timestamp: ticker.timestamp.or(request_time).unwrap_or_else(now_millis),
                last_price: ticker.last,
                mark_price: Some(mark.mark_price),
                index_price: ticker.index_price,
            })
        })
    }

    fn latest_mark_price<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, MarkPricePoint> {
        Box::pin(async move {
            let (mark, request_time): (MarkPriceData, _) = self
                .data(MARK_PRICE_PATH, &symbol, Metric::LatestMarkPrice)
                .await?;
            Ok(MarkPricePoint {
                timestamp: mark.timestamp.or(request_time).unwrap_or_else(now_millis),
                value: mark.mark_price,
            })
        })
    }

    fn latest_index_price<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, IndexPricePoint> {
        Box::pin(async move {
            let (ticker, request_time): (TickerData, _) = self
                .data(TICKER_PATH, &symbol, Metric::LatestIndexPrice)
                .await?;
            Ok(IndexPricePoint {
                timestamp: ticker.timestamp.or(request_time).unwrap_or_else(now_millis),
                value: ticker
                    .index_price
                    .ok_or_else(|| missing_field("indexPrice"))?,
            })
        })
    }

    fn latest_premium_index<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, PremiumIndexPoint> {
        Box::pin(async move {
            let window = HistoricalWindow::new(symbol, Interval::OneMinute).with_limit(1);
            let klines = self
                .candles(CandleKind::Premium, window, Metric::LatestPremiumIndex)
                .await?;
            let latest = klines.last().ok_or_else(|| {
                SourceError::invalid_response("bitget returned no premium index kline")
                    .with_exchange(ExchangeId::Bitget)
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
            let (ticker, request_time): (TickerData, _) = self
                .data(TICKER_PATH, &symbol, Metric::LatestFundingRate)
                .await?;
            let (next, _): (FundingTimeData, _) = self
                .data(FUNDING_TIME_PATH, &symbol, Metric::LatestFundingRate)
                .await?;
            Ok(FundingRateSnapshot {
                funding_time: ticker.timestamp.or(request_time).unwrap_or_else(now_millis),
                rate: ticker
                    .funding_rate
                    .ok_or_else(|| missing_field("fundingRate"))?,
                next_funding_time: Some(next.funding_time),
            })
        })
    }

    fn open_interest<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, OpenInterest> {
        Box::pin(async move {
            let (data, request_time): (OpenInterestData, _) = self
                .data(OPEN_INTEREST_PATH, &symbol, Metric::OpenInterest)
                .await?;
            Ok(OpenInterest {
                timestamp: data.timestamp.or(request_time).unwrap_or_else(now_millis),
                value: data.amount,
            })
        })
    }

    fn instruments<'a>(&'a self) -> SourceFuture<'a, Vec<Instrument>> {
        Box::pin(async move {
            Err(SourceError::capability_unsupported(Metric::Instruments)
                .with_exchange(ExchangeId::Bitget))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::{SourceErrorKind, TransientCause};
    use crate::http_client::StaticHttpClient;
    use crate::UtcDateTime;

    fn adapter(http: &StaticHttpClient) -> BitgetAdapter {
        BitgetAdapter::new(
            ExchangeSettings::default_for(ExchangeId::Bitget),
            Arc::new(http.clone()),
        )
    }

    fn btc() -> Symbol {
        Symbol::usdt("BTC").expect("valid")
    }

    const SETTLE_T0: i64 = 1_700_000_000_000;
    const EIGHT_HOURS: i64 = 28_800_000;

    /// Funding history page holding settlements `first..last`, newest first.
    fn funding_page(first: i64, last: i64) -> String {
        let rows = (first..last)
            .map(|i| {
                format!(
                    r#"{{"symbol":"BTCUSDT","fundingRate":"0.0001","settleTime":"{}"}}"#,
                    SETTLE_T0 - i * EIGHT_HOURS
                )
            })
            .collect::<Vec<_>>()
            .join(",");
        format!(r#"{{"code":"00000","msg":"success","data":[{rows}]}}"#)
    }

    fn millis(value: i64) -> UtcDateTime {
        UtcDateTime::from_unix_millis(value).expect("valid")
    }

    #[test]
    fn candle_range_counts_back_from_the_end() {
        let window = HistoricalWindow::new(btc(), Interval::OneHour);
        assert_eq!(candle_range(&window, 10, 36_000_000), (0, 36_000_000));

        let window = window.with_end(UtcDateTime::from_unix_millis(72_000_000).expect("valid"));
        assert_eq!(candle_range(&window, 2, 0), (64_800_000, 72_000_000));
    }

    #[tokio::test]
    async fn premium_candles_use_kline_type_and_product_suffix() {
        let http = StaticHttpClient::new().with_json(
            CANDLES_PATH,
            r#"[["1700000000000","0.0001","0.0002","0.0000","0.00015","0","0"]]"#,
        );
        let window = HistoricalWindow::new(btc(), Interval::OneMinute).with_limit(1);

        let klines = adapter(&http).premium_index_klines(window).await.expect("klines");

        assert_eq!(klines.len(), 1);
        assert_eq!(klines[0].close, Decimal::new(15, 5));
        let request = &http.requests()[0];
        assert_eq!(request.query_value("symbol"), Some("BTCUSDT_UMCBL"));
        assert_eq!(request.query_value("kLineType"), Some("premium"));
        assert_eq!(request.query_value("granularity"), Some("1m"));
        assert!(request.query_value("startTime").is_some());
    }

    #[tokio::test]
    async fn enveloped_candle_errors_are_classified() {
        let http = StaticHttpClient::new().with_response(
            CANDLES_PATH,
            Ok(HttpResponse::new(
                400,
                r#"{"code":"40034","msg":"Parameter symbol does not exist","data":null}"#,
            )),
        );
        let window = HistoricalWindow::new(btc(), Interval::OneMinute);

        let error = adapter(&http).price_klines(window).await.expect_err("must fail");

        assert_eq!(error.kind(), SourceErrorKind::SymbolNotSupported);
        assert_eq!(error.exchange(), Some(ExchangeId::Bitget));
    }

    #[tokio::test]
    async fn funding_history_is_filtered_to_the_window() {
        let http = StaticHttpClient::new().with_json(
            FUNDING_HISTORY_PATH,
            r#"{"code":"00000","msg":"success","requestTime":1700000000000,"data":[
                {"symbol":"BTCUSDT","fundingRate":"0.0003","settleTime":"1700028800000"},
                {"symbol":"BTCUSDT","fundingRate":"0.0002","settleTime":"1700000000000"},
                {"symbol":"BTCUSDT","fundingRate":"0.0001","settleTime":"1699971200000"}
            ]}"#,
        );
        let window = FundingRateWindow::new(btc()).with_start(millis(1_699_990_000_000));

        let points = adapter(&http).funding_rate_history(window).await.expect("points");

        assert_eq!(
            points.iter().map(|p| p.funding_time).collect::<Vec<_>>(),
            vec![1_700_000_000_000, 1_700_028_800_000]
        );
        assert_eq!(http.requests()[0].query_value("pageSize"), Some("100"));
    }

    #[tokio::test]
    async fn funding_history_pages_back_to_an_older_window() {
        let http = StaticHttpClient::new();
        http.push_response(FUNDING_HISTORY_PATH, Ok(HttpResponse::ok_json(funding_page(0, 100))));
        http.push_response(FUNDING_HISTORY_PATH, Ok(HttpResponse::ok_json(funding_page(100, 200))));
        let window = FundingRateWindow::new(btc())
            .with_start(millis(SETTLE_T0 - 150 * EIGHT_HOURS))
            .with_end(millis(SETTLE_T0 - 120 * EIGHT_HOURS));

        let points = adapter(&http).funding_rate_history(window).await.expect("points");

        assert_eq!(points.len(), 30);
        assert_eq!(points[0].funding_time, SETTLE_T0 - 150 * EIGHT_HOURS);
        assert_eq!(points[29].funding_time, SETTLE_T0 - 121 * EIGHT_HOURS);
        let requests = http.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].query_value("pageNo"), Some("2"));
    }

    #[tokio::test]
    async fn funding_window_beyond_the_served_history_is_rejected() {
        let http = StaticHttpClient::new().with_json(FUNDING_HISTORY_PATH, funding_page(0, 100));
        let window = FundingRateWindow::new(btc())
            .with_start(millis(1_500_000_000_000))
            .with_end(millis(1_500_100_000_000));

        let error = adapter(&http)
            .funding_rate_history(window)
            .await
            .expect_err("window is older than every page");

        assert_eq!(error.kind(), SourceErrorKind::Validation);
        assert_eq!(error.exchange(), Some(ExchangeId::Bitget));
        assert_eq!(http.request_count(), FUNDING_MAX_PAGES as usize);
    }

    #[tokio::test]
    async fn funding_entry_without_settle_time_is_an_invalid_response() {
        let http = StaticHttpClient::new().with_json(
            FUNDING_HISTORY_PATH,
            r#"{"code":"00000","msg":"success","data":[
                {"symbol":"BTCUSDT","fundingRate":"0.0002","settleTime":"1700000000000"},
                {"symbol":"BTCUSDT","fundingRate":"0.0001"}
            ]}"#,
        );

        let error = adapter(&http)
            .funding_rate_history(FundingRateWindow::new(btc()))
            .await
            .expect_err("must fail");

        assert_eq!(error.kind(), SourceErrorKind::InvalidResponse);
        assert_eq!(error.exchange(), Some(ExchangeId::Bitget));
    }

    #[tokio::test]
    async fn ticker_without_index_or_funding_is_an_invalid_response() {
        let http = StaticHttpClient::new()
            .with_json(
                TICKER_PATH,
                r#"{"code":"00000","msg":"success","requestTime":1700000000999,"data":
                    {"symbol":"BTCUSDT_UMCBL","last":"43000","timestamp":"1700000000500"}}"#,
            )
            .with_json(
                FUNDING_TIME_PATH,
                r#"{"code":"00000","msg":"success","data":{"symbol":"BTCUSDT_UMCBL","fundingTime":"1700006400000"}}"#,
            );
        let bitget = adapter(&http);

        let index = bitget.latest_index_price(btc()).await.expect_err("no index price");
        assert_eq!(index.kind(), SourceErrorKind::InvalidResponse);
        assert!(index.message().contains("indexPrice"));

        let funding = bitget.latest_funding_rate(btc()).await.expect_err("no funding rate");
        assert_eq!(funding.kind(), SourceErrorKind::InvalidResponse);
        assert!(funding.message().contains("fundingRate"));
    }

    #[tokio::test]
    async fn latest_funding_rate_combines_ticker_and_funding_time() {
        let http = StaticHttpClient::new()
            .with_json(
                TICKER_PATH,
                r#"{"code":"00000","msg":"success","requestTime":1700000000999,"data":
                    {"symbol":"BTCUSDT_UMCBL","last":"43000","indexPrice":"42995.5","fundingRate":"0.0001",
                     "timestamp":"1700000000500"}}"#,
            )
            .with_json(
                FUNDING_TIME_PATH,
                r#"{"code":"00000","msg":"success","data":{"symbol":"BTCUSDT_UMCBL","fundingTime":"1700006400000"}}"#,
            );

        let snapshot = adapter(&http).latest_funding_rate(btc()).await.expect("snapshot");

        assert_eq!(snapshot.funding_time, 1_700_000_000_500);
        assert_eq!(snapshot.rate, Decimal::new(1, 4));
        assert_eq!(snapshot.next_funding_time, Some(1_700_006_400_000));
    }

    #[tokio::test]
    async fn forbidden_status_is_rate_limited() {
        let http = StaticHttpClient::new()
            .with_response(OPEN_INTEREST_PATH, Ok(HttpResponse::new(403, "")));

        let error = adapter(&http).open_interest(btc()).await.expect_err("must fail");

        assert_eq!(error.transient_cause(), Some(TransientCause::RateLimited));
    }

    #[tokio::test]
    async fn instruments_are_not_served() {
        let http = StaticHttpClient::new();

        let error = adapter(&http).instruments().await.expect_err("unsupported");

        assert_eq!(error.kind(), SourceErrorKind::CapabilityUnsupported);
        assert_eq!(http.request_count(), 0);
    }
}
