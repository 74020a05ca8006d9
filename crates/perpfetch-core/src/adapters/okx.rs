use std::sync::Arc;

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::adapters::common::{
    de_decimal, de_millis, de_opt_decimal, de_opt_millis, decode_json, finish_klines,
    kline_from_row, parse_decimal, RestSupport,
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

const PRICE_KLINES_PATH: &str = "/api/v5/market/candles";
const INDEX_KLINES_PATH: &str = "/api/v5/market/index-candles";
const MARK_KLINES_PATH: &str = "/api/v5/market/mark-price-candles";
const PREMIUM_HISTORY_PATH: &str = "/api/v5/public/premium-history";
const FUNDING_HISTORY_PATH: &str = "/api/v5/public/funding-rate-history";
const FUNDING_LATEST_PATH: &str = "/api/v5/public/funding-rate";
const TICKERS_PATH: &str = "/api/v5/market/tickers";
const INDEX_TICKERS_PATH: &str = "/api/v5/market/index-tickers";
const MARK_PRICE_PATH: &str = "/api/v5/public/mark-price";
const OPEN_INTEREST_PATH: &str = "/api/v5/public/open-interest";
const INSTRUMENTS_PATH: &str = "/api/v5/public/instruments";

const PRICE_KLINES_MAX_LIMIT: u32 = 300;
const INDEX_KLINES_MAX_LIMIT: u32 = 100;
const MARK_KLINES_MAX_LIMIT: u32 = 100;
const FUNDING_MAX_LIMIT: u32 = 400;

const RATE_LIMIT_CODES: [&str; 3] = ["50011", "50012", "50013"];
const SERVER_CODES: [&str; 2] = ["50001", "50004"];
const UNKNOWN_INSTRUMENT_CODE: &str = "51001";

/// OKX USDT swap adapter. OKX publishes premium history only as discrete
/// points, so premium index candles are not served.
pub struct OkxAdapter {
    rest: RestSupport,
}

fn bar(interval: Interval) -> &'static str {
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

fn swap_inst_id(symbol: &Symbol) -> String {
    format!("{}-{}-SWAP", symbol.base(), symbol.quote())
}

fn index_inst_id(symbol: &Symbol) -> String {
    format!("{}-{}", symbol.base(), symbol.quote())
}

#[derive(Debug, Clone, Copy)]
enum CandleKind {
    Price,
    Index,
    Mark,
}

impl OkxAdapter {
    pub fn new(settings: ExchangeSettings, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            rest: RestSupport::new(ExchangeId::Okx, settings, http_client),
        }
    }

    async fn candles(
        &self,
        kind: CandleKind,
        window: HistoricalWindow,
        metric: Metric,
    ) -> Result<Vec<Kline>, SourceError> {
        let (path, inst_id, max_limit) = match kind {
            CandleKind::Price => (PRICE_KLINES_PATH, swap_inst_id(&window.symbol), PRICE_KLINES_MAX_LIMIT),
            CandleKind::Index => (INDEX_KLINES_PATH, index_inst_id(&window.symbol), INDEX_KLINES_MAX_LIMIT),
            CandleKind::Mark => (MARK_KLINES_PATH, swap_inst_id(&window.symbol), MARK_KLINES_MAX_LIMIT),
        };
        let limit = window.capped_limit(max_limit);

        // OKX pages backwards: `after` means older than, `before` newer than.
        let request = self
            .rest
            .request(path)
            .with_query("instId", inst_id)
            .with_query("bar", bar(window.interval))
            .with_optional_query("before", window.start_millis())
            .with_optional_query("after", window.end_millis())
            .with_query("limit", limit);

        let klines = self
            .rest
            .fetch(request, |response| {
                let rows: Vec<Vec<Value>> = decode(response, metric)?;
                rows.iter()
                    .map(|row| candle_from_row(row, kind))
                    .collect::<Result<Vec<_>, _>>()
            })
            .await?;
        Ok(finish_klines(klines, limit, window.start.is_some()))
    }

    async fn first<T: DeserializeOwned + Send>(
        &self,
        path: &str,
        query: &[(&str, String)],
        metric: Metric,
    ) -> Result<T, SourceError> {
        let mut request = self.rest.request(path);
        for (name, value) in query {
            request = request.with_query(*name, value);
        }
        self.rest
            .fetch(request, |response| {
                let entries: Vec<T> = decode(response, metric)?;
                entries.into_iter().next().ok_or_else(|| {
                    SourceError::invalid_response(format!("okx returned no data for {metric}"))
                })
            })
            .await
    }
}

fn candle_from_row(row: &[Value], kind: CandleKind) -> Result<Kline, SourceError> {
    match kind {
        CandleKind::Price => {
            let mut kline = kline_from_row(row, true)?;
            // Prefer base-currency volume over contract count when present.
            if let Some(Value::String(raw)) = row.get(6) {
                if !raw.is_empty() {
                    kline.volume = parse_decimal(raw).map_err(|error| {
                        SourceError::invalid_response(format!("malformed okx volume '{raw}'"))
                            .with_cause(error)
                    })?;
                }
            }
            Ok(kline)
        }
        CandleKind::Index | CandleKind::Mark => kline_from_row(row, false),
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: Value,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Value,
}

impl Envelope {
    fn code(&self) -> String {
        match &self.code {
            Value::String(code) => code.clone(),
            Value::Number(code) => code.to_string(),
            _ => String::from("0"),
        }
    }
}

fn decode<T: DeserializeOwned>(response: HttpResponse, metric: Metric) -> Result<T, SourceError> {
    let envelope = match decode_json::<Envelope>(&response.body, metric.as_str()) {
        Ok(envelope) => envelope,
        Err(_) if !response.is_success() => {
            return Err(SourceError::validation(format!(
                "okx rejected the request (HTTP {})",
                response.status
            )))
        }
        Err(error) => return Err(error),
    };

    let code = envelope.code();
    if code != "0" {
        return Err(classify(&code, envelope.msg));
    }
    if !response.is_success() {
        return Err(SourceError::validation(format!(
            "okx rejected the request (HTTP {})",
            response.status
        )));
    }

    serde_json::from_value(envelope.data).map_err(|error| {
        SourceError::invalid_response(format!("malformed {metric} payload: {error}")).with_cause(error)
    })
}

fn classify(code: &str, msg: String) -> SourceError {
    if RATE_LIMIT_CODES.contains(&code) {
        SourceError::rate_limited(format!("{msg} (okx code {code})"))
    } else if SERVER_CODES.contains(&code) {
        SourceError::transient(TransientCause::Server, format!("{msg} (okx code {code})"))
    } else if code == UNKNOWN_INSTRUMENT_CODE {
        SourceError::symbol_not_supported(format!("{msg} (okx code {code})"))
    } else {
        SourceError::validation(format!("{msg} (okx code {code})"))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingEntry {
    #[serde(deserialize_with = "de_decimal")]
    funding_rate: Decimal,
    #[serde(deserialize_with = "de_millis")]
    funding_time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestFundingEntry {
    #[serde(deserialize_with = "de_decimal")]
    funding_rate: Decimal,
    #[serde(deserialize_with = "de_millis")]
    funding_time: i64,
    #[serde(default, deserialize_with = "de_opt_millis")]
    ts: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    #[serde(deserialize_with = "de_decimal")]
    last: Decimal,
    #[serde(deserialize_with = "de_millis")]
    ts: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexTickerEntry {
    #[serde(deserialize_with = "de_decimal")]
    idx_px: Decimal,
    #[serde(deserialize_with = "de_millis")]
    ts: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkPriceEntry {
    #[serde(deserialize_with = "de_decimal")]
    mark_px: Decimal,
    #[serde(deserialize_with = "de_millis")]
    ts: i64,
}

#[derive(Debug, Deserialize)]
struct PremiumEntry {
    #[serde(deserialize_with = "de_decimal")]
    premium: Decimal,
    #[serde(deserialize_with = "de_millis")]
    ts: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenInterestEntry {
    /// Open interest in the base asset; `oi` counts contracts.
    #[serde(deserialize_with = "de_decimal")]
    oi_ccy: Decimal,
    #[serde(deserialize_with = "de_millis")]
    ts: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentEntry {
    inst_id: String,
    #[serde(default)]
    uly: String,
    #[serde(default)]
    settle_ccy: String,
    #[serde(deserialize_with = "de_decimal")]
    tick_sz: Decimal,
    #[serde(deserialize_with = "de_decimal")]
    lot_sz: Decimal,
    #[serde(deserialize_with = "de_decimal")]
    min_sz: Decimal,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    max_lmt_sz: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    max_mkt_sz: Option<Decimal>,
    #[serde(default)]
    state: String,
}

impl InstrumentEntry {
    fn into_instrument(self) -> Result<Instrument, SourceError> {
        let underlying = if self.uly.is_empty() {
            self.inst_id.trim_end_matches("-SWAP").to_owned()
        } else {
            self.uly
        };
        let (base, quote) = underlying
            .split_once('-')
            .map(|(base, quote)| (base.to_owned(), quote.to_owned()))
            .unwrap_or_else(|| (underlying.clone(), self.settle_ccy.clone()));

        let max_qty = self.max_lmt_sz.or(self.max_mkt_sz).ok_or_else(|| {
            SourceError::invalid_response(format!(
                "okx instrument {} has no maximum order size",
                self.inst_id
            ))
        })?;

        Ok(Instrument {
            symbol: format!("{base}{quote}"),
            base_asset: base,
            quote_asset: quote,
            tick_size: self.tick_sz,
            step_size: self.lot_sz,
            min_qty: self.min_sz,
            max_qty,
            status: self.state,
        })
    }
}

impl PerpDataSource for OkxAdapter {
    fn id(&self) -> ExchangeId {
        ExchangeId::Okx
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::full().without(Metric::PremiumIndexKlines)
    }

    fn max_limit(&self, metric: Metric) -> u32 {
        match metric {
            Metric::IndexPriceKlines => INDEX_KLINES_MAX_LIMIT,
            Metric::MarkPriceKlines => MARK_KLINES_MAX_LIMIT,
            Metric::FundingRateHistory => FUNDING_MAX_LIMIT,
            _ => PRICE_KLINES_MAX_LIMIT,
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
        let _ = window;
        Box::pin(async move {
            Err(SourceError::capability_unsupported(Metric::PremiumIndexKlines)
                .with_exchange(ExchangeId::Okx))
        })
    }

    fn funding_rate_history<'a>(
        &'a self,
        window: FundingRateWindow,
    ) -> SourceFuture<'a, Vec<FundingRatePoint>> {
        Box::pin(async move {
            let request = self
                .rest
                .request(FUNDING_HISTORY_PATH)
                .with_query("instId", swap_inst_id(&window.symbol))
                .with_optional_query("before", window.start_millis())
                .with_optional_query("after", window.end_millis())
                .with_query("limit", window.capped_limit(FUNDING_MAX_LIMIT));

            let entries: Vec<FundingEntry> = self
                .rest
                .fetch(request, |response| decode(response, Metric::FundingRateHistory))
                .await?;

            let mut points = entries
                .into_iter()
                .map(|entry| FundingRatePoint {
                    funding_time: entry.funding_time,
                    rate: entry.funding_rate,
                })
                .collect::<Vec<_>>();
            points.sort_by_key(|point| point.funding_time);
            Ok(points)
        })
    }

    fn latest_ticker<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Ticker> {
        Box::pin(async move {
            let metric = Metric::LatestTicker;
            let ticker: TickerEntry = self
                .first(
                    TICKERS_PATH,
                    &[
                        ("instType", String::from("SWAP")),
                        ("instId", swap_inst_id(&symbol)),
                    ],
                    metric,
                )
                .await?;
            let index: IndexTickerEntry = self
                .first(INDEX_TICKERS_PATH, &[("instId", index_inst_id(&symbol))], metric)
                .await?;
            let mark: MarkPriceEntry = self
                .first(
                    MARK_PRICE_PATH,
                    &[
                        ("instType", String::from("SWAP")),
                        ("instId", swap_inst_id(&symbol)),
                    ],
                    metric,
                )
                .await?;

            Ok(Ticker {
                timestamp: ticker.ts,
                last_price: ticker.last,
                mark_price: Some(mark.mark_px),
                index_price: Some(index.idx_px),
            })
        })
    }

    fn latest_mark_price<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, MarkPricePoint> {
        Box::pin(async move {
            let mark: MarkPriceEntry = self
                .first(
                    MARK_PRICE_PATH,
                    &[
                        ("instType", String::from("SWAP")),
                        ("instId", swap_inst_id(&symbol)),
                    ],
                    Metric::LatestMarkPrice,
                )
                .await?;
            Ok(MarkPricePoint {
                timestamp: mark.ts,
                value: mark.mark_px,
            })
        })
    }

    fn latest_index_price<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, IndexPricePoint> {
        Box::pin(async move {
            let index: IndexTickerEntry = self
                .first(
                    INDEX_TICKERS_PATH,
                    &[("instId", index_inst_id(&symbol))],
                    Metric::LatestIndexPrice,
                )
                .await?;
            Ok(IndexPricePoint {
                timestamp: index.ts,
                value: index.idx_px,
            })
        })
    }

    fn latest_premium_index<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, PremiumIndexPoint> {
        Box::pin(async move {
            let premium: PremiumEntry = self
                .first(
                    PREMIUM_HISTORY_PATH,
                    &[
                        ("instId", swap_inst_id(&symbol)),
                        ("limit", String::from("1")),
                    ],
                    Metric::LatestPremiumIndex,
                )
                .await?;
            Ok(PremiumIndexPoint {
                timestamp: premium.ts,
                value: premium.premium,
            })
        })
    }

    fn latest_funding_rate<'a>(
        &'a self,
        symbol: Symbol,
    ) -> SourceFuture<'a, FundingRateSnapshot> {
        Box::pin(async move {
            let entry: LatestFundingEntry = self
                .first(
                    FUNDING_LATEST_PATH,
                    &[("instId", swap_inst_id(&symbol))],
                    Metric::LatestFundingRate,
                )
                .await?;
            // `fundingTime` is the settlement the current rate applies to.
            Ok(FundingRateSnapshot {
                funding_time: entry.ts.unwrap_or(entry.funding_time),
                rate: entry.funding_rate,
                next_funding_time: Some(entry.funding_time),
            })
        })
    }

    fn open_interest<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, OpenInterest> {
        Box::pin(async move {
            let entry: OpenInterestEntry = self
                .first(
                    OPEN_INTEREST_PATH,
                    &[
                        ("instType", String::from("SWAP")),
                        ("instId", swap_inst_id(&symbol)),
                    ],
                    Metric::OpenInterest,
                )
                .await?;
            Ok(OpenInterest {
                timestamp: entry.ts,
                value: entry.oi_ccy,
            })
        })
    }

    fn instruments<'a>(&'a self) -> SourceFuture<'a, Vec<Instrument>> {
        Box::pin(async move {
            let request = self
                .rest
                .request(INSTRUMENTS_PATH)
                .with_query("instType", "SWAP");
            let entries: Vec<InstrumentEntry> = self
                .rest
                .fetch(request, |response| decode(response, Metric::Instruments))
                .await?;

            entries
                .into_iter()
                .filter(|entry| entry.settle_ccy == "USDT")
                .map(InstrumentEntry::into_instrument)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|error| error.with_exchange(ExchangeId::Okx))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::SourceErrorKind;
    use crate::http_client::StaticHttpClient;
    use crate::UtcDateTime;

    fn adapter(http: &StaticHttpClient) -> OkxAdapter {
        OkxAdapter::new(
            ExchangeSettings::default_for(ExchangeId::Okx),
            Arc::new(http.clone()),
        )
    }

    fn btc() -> Symbol {
        Symbol::usdt("BTC").expect("valid")
    }

    #[tokio::test]
    async fn candles_are_reordered_and_time_filters_inverted() {
        let http = StaticHttpClient::new().with_json(
            PRICE_KLINES_PATH,
            r#"{"code":"0","msg":"","data":[
                ["1700003600000","2","3","1","2.5","100","1.5","3750","1"],
                ["1700000000000","1","2","0.5","1.5","200","2","3000","1"]
            ]}"#,
        );
        let window = HistoricalWindow::new(btc(), Interval::OneHour)
            .with_start(UtcDateTime::from_unix_millis(1_699_990_000_000).expect("valid"))
            .with_end(UtcDateTime::from_unix_millis(1_700_010_000_000).expect("valid"))
            .with_limit(1_000);

        let klines = adapter(&http).price_klines(window).await.expect("klines");

        assert_eq!(klines[0].open_time, 1_700_000_000_000);
        assert_eq!(klines[0].volume, Decimal::from(2));
        assert_eq!(klines[1].open_time, 1_700_003_600_000);

        let request = &http.requests()[0];
        assert_eq!(request.query_value("instId"), Some("BTC-USDT-SWAP"));
        assert_eq!(request.query_value("bar"), Some("1H"));
        assert_eq!(request.query_value("before"), Some("1699990000000"));
        assert_eq!(request.query_value("after"), Some("1700010000000"));
        assert_eq!(request.query_value("limit"), Some("300"));
    }

    #[tokio::test]
    async fn index_candles_use_spot_index_id_and_zero_volume() {
        let http = StaticHttpClient::new().with_json(
            INDEX_KLINES_PATH,
            r#"{"code":"0","msg":"","data":[["1700000000000","1","2","0.5","1.5","1"]]}"#,
        );
        let window = HistoricalWindow::new(btc(), Interval::OneMinute);

        let klines = adapter(&http).index_price_klines(window).await.expect("klines");

        assert_eq!(klines.len(), 1);
        assert_eq!(klines[0].volume, Decimal::ZERO);
        assert_eq!(http.requests()[0].query_value("instId"), Some("BTC-USDT"));
        assert_eq!(http.requests()[0].query_value("limit"), Some("100"));
    }

    #[tokio::test]
    async fn premium_index_klines_are_unsupported_without_a_request() {
        let http = StaticHttpClient::new();
        let window = HistoricalWindow::new(btc(), Interval::OneMinute);

        let error = adapter(&http).premium_index_klines(window).await.expect_err("unsupported");

        assert_eq!(error.kind(), SourceErrorKind::CapabilityUnsupported);
        assert_eq!(http.request_count(), 0);
    }

    #[tokio::test]
    async fn exchange_codes_are_classified() {
        let http = StaticHttpClient::new()
            .with_json(
                OPEN_INTEREST_PATH,
                r#"{"code":"51001","msg":"Instrument ID does not exist","data":[]}"#,
            )
            .with_json(
                MARK_PRICE_PATH,
                r#"{"code":"50011","msg":"Too Many Requests","data":[]}"#,
            );
        let okx = adapter(&http);

        let unknown = okx.open_interest(btc()).await.expect_err("must fail");
        assert_eq!(unknown.kind(), SourceErrorKind::SymbolNotSupported);

        let limited = okx.latest_mark_price(btc()).await.expect_err("must fail");
        assert_eq!(limited.transient_cause(), Some(TransientCause::RateLimited));
    }

    #[tokio::test]
    async fn open_interest_is_reported_in_the_base_asset() {
        let http = StaticHttpClient::new().with_json(
            OPEN_INTEREST_PATH,
            r#"{"code":"0","msg":"","data":[{"instType":"SWAP","instId":"BTC-USDT-SWAP",
                "oi":"2500000","oiCcy":"25000","oiUsd":"1075000000","ts":"1700000000000"}]}"#,
        );

        let open_interest = adapter(&http).open_interest(btc()).await.expect("open interest");

        assert_eq!(open_interest.value, Decimal::from(25_000));
        assert_eq!(open_interest.timestamp, 1_700_000_000_000);
    }

    #[tokio::test]
    async fn latest_funding_rate_reports_settlement_time() {
        let http = StaticHttpClient::new().with_json(
            FUNDING_LATEST_PATH,
            r#"{"code":"0","msg":"","data":[{"instId":"BTC-USDT-SWAP","fundingRate":"0.0001",
                "fundingTime":"1700006400000","nextFundingTime":"1700035200000","ts":"1700000000000"}]}"#,
        );

        let snapshot = adapter(&http).latest_funding_rate(btc()).await.expect("snapshot");

        assert_eq!(snapshot.funding_time, 1_700_000_000_000);
        assert_eq!(snapshot.next_funding_time, Some(1_700_006_400_000));
        assert_eq!(snapshot.rate, Decimal::new(1, 4));
    }

    #[tokio::test]
    async fn instruments_keep_usdt_settled_swaps() {
        let http = StaticHttpClient::new().with_json(
            INSTRUMENTS_PATH,
            r#"{"code":"0","msg":"","data":[
                {"instId":"BTC-USDT-SWAP","uly":"BTC-USDT","settleCcy":"USDT","tickSz":"0.1","lotSz":"0.01",
                 "minSz":"0.01","maxLmtSz":"100000000","maxMktSz":"5000","state":"live"},
                {"instId":"BTC-USD-SWAP","uly":"BTC-USD","settleCcy":"BTC","tickSz":"0.1","lotSz":"1",
                 "minSz":"1","maxLmtSz":"1000000","state":"live"}
            ]}"#,
        );

        let instruments = adapter(&http).instruments().await.expect("instruments");

        assert_eq!(instruments.len(), 1);
        assert_eq!(instruments[0].symbol, "BTCUSDT");
        assert_eq!(instruments[0].base_asset, "BTC");
        assert_eq!(instruments[0].max_qty, Decimal::from(100_000_000));
        assert_eq!(instruments[0].status, "live");
    }

    #[tokio::test]
    async fn instruments_without_a_maximum_size_are_rejected() {
        let http = StaticHttpClient::new().with_json(
            INSTRUMENTS_PATH,
            r#"{"code":"0","msg":"","data":[
                {"instId":"ETH-USDT-SWAP","uly":"ETH-USDT","settleCcy":"USDT","tickSz":"0.01","lotSz":"0.1",
                 "minSz":"0.1","state":"live"}
            ]}"#,
        );

        let error = adapter(&http).instruments().await.expect_err("must fail");

        assert_eq!(error.kind(), SourceErrorKind::InvalidResponse);
        assert_eq!(error.exchange(), Some(ExchangeId::Okx));
    }
}
