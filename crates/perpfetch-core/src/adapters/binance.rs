use std::sync::Arc;

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::adapters::common::{
    de_decimal, de_millis, de_opt_millis, decode_json, finish_klines, klines_from_rows,
    RestSupport,
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

const PRICE_KLINES_PATH: &str = "/fapi/v1/klines";
const INDEX_KLINES_PATH: &str = "/fapi/v1/indexPriceKlines";
const MARK_KLINES_PATH: &str = "/fapi/v1/markPriceKlines";
const PREMIUM_KLINES_PATH: &str = "/fapi/v1/premiumIndexKlines";
const FUNDING_HISTORY_PATH: &str = "/fapi/v1/fundingRate";
const PREMIUM_INDEX_PATH: &str = "/fapi/v1/premiumIndex";
const TICKER_PATH: &str = "/fapi/v1/ticker/24hr";
const OPEN_INTEREST_PATH: &str = "/fapi/v1/openInterest";
const EXCHANGE_INFO_PATH: &str = "/fapi/v1/exchangeInfo";

const KLINE_MAX_LIMIT: u32 = 1_500;
const FUNDING_MAX_LIMIT: u32 = 1_000;

/// Binance USD-M futures adapter. Serves every metric.
pub struct BinanceAdapter {
    rest: RestSupport,
}

impl BinanceAdapter {
    pub fn new(settings: ExchangeSettings, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            rest: RestSupport::new(ExchangeId::Binance, settings, http_client),
        }
    }

    async fn klines(
        &self,
        path: &str,
        symbol_key: &str,
        window: HistoricalWindow,
        metric: Metric,
    ) -> Result<Vec<Kline>, SourceError> {
        let limit = window.capped_limit(KLINE_MAX_LIMIT);
        let request = self
            .rest
            .request(path)
            .with_query(symbol_key, window.symbol.pair())
            .with_query("interval", window.interval.as_str())
            .with_optional_query("startTime", window.start_millis())
            .with_optional_query("endTime", window.end_millis())
            .with_query("limit", limit);

        let interval = window.interval;
        let klines = self
            .rest
            .fetch(request, |response| {
                let rows: Vec<Vec<Value>> = decode(response, metric, Some(interval))?;
                klines_from_rows(&rows, true)
            })
            .await?;
        Ok(finish_klines(klines, limit, window.start.is_some()))
    }

    async fn premium_index(&self, symbol: &Symbol, metric: Metric) -> Result<PremiumIndexEntry, SourceError> {
        let request = self
            .rest
            .request(PREMIUM_INDEX_PATH)
            .with_query("symbol", symbol.pair());
        self.rest
            .fetch(request, |response| decode(response, metric, None))
            .await
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: i64,
    #[serde(default)]
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FundingRateEntry {
    #[serde(deserialize_with = "de_millis")]
    funding_time: i64,
    #[serde(deserialize_with = "de_decimal")]
    funding_rate: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PremiumIndexEntry {
    #[serde(deserialize_with = "de_decimal")]
    mark_price: Decimal,
    #[serde(deserialize_with = "de_decimal")]
    index_price: Decimal,
    #[serde(deserialize_with = "de_decimal")]
    last_funding_rate: Decimal,
    #[serde(default, deserialize_with = "de_opt_millis")]
    next_funding_time: Option<i64>,
    #[serde(deserialize_with = "de_millis")]
    time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    #[serde(deserialize_with = "de_decimal")]
    last_price: Decimal,
    #[serde(deserialize_with = "de_millis")]
    close_time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenInterestEntry {
    #[serde(deserialize_with = "de_decimal")]
    open_interest: Decimal,
    #[serde(deserialize_with = "de_millis")]
    time: i64,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    contract_type: String,
    status: String,
    base_asset: String,
    quote_asset: String,
    #[serde(default)]
    filters: Vec<SymbolFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "filterType")]
enum SymbolFilter {
    #[serde(rename = "PRICE_FILTER", rename_all = "camelCase")]
    Price {
        #[serde(deserialize_with = "de_decimal")]
        tick_size: Decimal,
    },
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize {
        #[serde(deserialize_with = "de_decimal")]
        step_size: Decimal,
        #[serde(deserialize_with = "de_decimal")]
        min_qty: Decimal,
        #[serde(deserialize_with = "de_decimal")]
        max_qty: Decimal,
    },
    #[serde(other)]
    Other,
}

impl SymbolInfo {
    fn into_instrument(self) -> Result<Instrument, SourceError> {
        let mut tick_size = None;
        let mut lot_size = None;
        for filter in self.filters {
            match filter {
                SymbolFilter::Price { tick_size: tick } => tick_size = Some(tick),
                SymbolFilter::LotSize {
                    step_size,
                    min_qty,
                    max_qty,
                } => lot_size = Some((step_size, min_qty, max_qty)),
                SymbolFilter::Other => {}
            }
        }

        let symbol = self.symbol;
        let missing = |filter: &str| {
            SourceError::invalid_response(format!("binance symbol {symbol} has no {filter} filter"))
        };
        let tick_size = tick_size.ok_or_else(|| missing("PRICE_FILTER"))?;
        let (step_size, min_qty, max_qty) = lot_size.ok_or_else(|| missing("LOT_SIZE"))?;

        Ok(Instrument {
            symbol,
            base_asset: self.base_asset,
            quote_asset: self.quote_asset,
            tick_size,
            step_size,
            min_qty,
            max_qty,
            status: self.status,
        })
    }
}

fn decode<T: DeserializeOwned>(
    response: HttpResponse,
    metric: Metric,
    interval: Option<Interval>,
) -> Result<T, SourceError> {
    if !response.is_success() {
        return Err(rejection(&response, metric, interval));
    }
    decode_json(&response.body, metric.as_str())
}

fn rejection(response: &HttpResponse, metric: Metric, interval: Option<Interval>) -> SourceError {
    if response.status == 451 {
        return SourceError::unavailable("binance refused service from this location (HTTP 451)");
    }

    let Ok(body) = serde_json::from_str::<ErrorBody>(&response.body) else {
        return SourceError::validation(format!(
            "binance rejected the request (HTTP {})",
            response.status
        ));
    };

    match (body.code, interval) {
        (-1121, _) => SourceError::symbol_not_supported(body.msg),
        (-1120, Some(interval)) => SourceError::interval_not_supported(interval, metric),
        (-1003, _) => SourceError::rate_limited(body.msg),
        (-1001, _) => SourceError::transient(TransientCause::Server, body.msg),
        (-1007, _) => SourceError::transient(TransientCause::Timeout, body.msg),
        (code, _) => SourceError::validation(format!("{} (binance code {code})", body.msg)),
    }
}

impl PerpDataSource for BinanceAdapter {
    fn id(&self) -> ExchangeId {
        ExchangeId::Binance
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
        Box::pin(self.klines(PRICE_KLINES_PATH, "symbol", window, Metric::PriceKlines))
    }

    fn index_price_klines<'a>(
        &'a self,
        window: HistoricalWindow,
    ) -> SourceFuture<'a, Vec<Kline>> {
        Box::pin(self.klines(INDEX_KLINES_PATH, "pair", window, Metric::IndexPriceKlines))
    }

    fn mark_price_klines<'a>(&'a self, window: HistoricalWindow) -> SourceFuture<'a, Vec<Kline>> {
        Box::pin(self.klines(MARK_KLINES_PATH, "symbol", window, Metric::MarkPriceKlines))
    }

    fn premium_index_klines<'a>(
        &'a self,
        window: HistoricalWindow,
    ) -> SourceFuture<'a, Vec<Kline>> {
        Box::pin(self.klines(PREMIUM_KLINES_PATH, "symbol", window, Metric::PremiumIndexKlines))
    }

    fn funding_rate_history<'a>(
        &'a self,
        window: FundingRateWindow,
    ) -> SourceFuture<'a, Vec<FundingRatePoint>> {
        Box::pin(async move {
            let request = self
                .rest
                .request(FUNDING_HISTORY_PATH)
                .with_query("symbol", window.symbol.pair())
                .with_optional_query("startTime", window.start_millis())
                .with_optional_query("endTime", window.end_millis())
                .with_query("limit", window.capped_limit(FUNDING_MAX_LIMIT));

            let entries: Vec<FundingRateEntry> = self
                .rest
                .fetch(request, |response| {
                    decode(response, Metric::FundingRateHistory, None)
                })
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
            let request = self.rest.request(TICKER_PATH).with_query("symbol", symbol.pair());
            let ticker: Ticker24h = self
                .rest
                .fetch(request, |response| decode(response, Metric::LatestTicker, None))
                .await?;
            let premium = self.premium_index(&symbol, Metric::LatestTicker).await?;

            Ok(Ticker {
                timestamp: premium.time.max(ticker.close_time),
                last_price: ticker.last_price,
                mark_price: Some(premium.mark_price),
                index_price: Some(premium.index_price),
            })
        })
    }

    fn latest_mark_price<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, MarkPricePoint> {
        Box::pin(async move {
            let premium = self.premium_index(&symbol, Metric::LatestMarkPrice).await?;
            Ok(MarkPricePoint {
                timestamp: premium.time,
                value: premium.mark_price,
            })
        })
    }

    fn latest_index_price<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, IndexPricePoint> {
        Box::pin(async move {
            let premium = self.premium_index(&symbol, Metric::LatestIndexPrice).await?;
            Ok(IndexPricePoint {
                timestamp: premium.time,
                value: premium.index_price,
            })
        })
    }

    fn latest_premium_index<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, PremiumIndexPoint> {
        Box::pin(async move {
            let window = HistoricalWindow::new(symbol, Interval::OneMinute).with_limit(1);
            let klines = self
                .klines(PREMIUM_KLINES_PATH, "symbol", window, Metric::LatestPremiumIndex)
                .await?;
            let latest = klines.last().ok_or_else(|| {
                SourceError::invalid_response("binance returned no premium index kline")
                    .with_exchange(ExchangeId::Binance)
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
            let premium = self.premium_index(&symbol, Metric::LatestFundingRate).await?;
            Ok(FundingRateSnapshot {
                funding_time: premium.time,
                rate: premium.last_funding_rate,
                next_funding_time: premium.next_funding_time,
            })
        })
    }

    fn open_interest<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, OpenInterest> {
        Box::pin(async move {
            let request = self
                .rest
                .request(OPEN_INTEREST_PATH)
                .with_query("symbol", symbol.pair());
            let entry: OpenInterestEntry = self
                .rest
                .fetch(request, |response| decode(response, Metric::OpenInterest, None))
                .await?;
            Ok(OpenInterest {
                timestamp: entry.time,
                value: entry.open_interest,
            })
        })
    }

    fn instruments<'a>(&'a self) -> SourceFuture<'a, Vec<Instrument>> {
        Box::pin(async move {
            let request = self.rest.request(EXCHANGE_INFO_PATH);
            let info: ExchangeInfo = self
                .rest
                .fetch(request, |response| decode(response, Metric::Instruments, None))
                .await?;

            info.symbols
                .into_iter()
                .filter(|entry| entry.contract_type == "PERPETUAL" && entry.quote_asset == "USDT")
                .map(SymbolInfo::into_instrument)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|error| error.with_exchange(ExchangeId::Binance))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::SourceErrorKind;
    use crate::http_client::StaticHttpClient;

    fn adapter(http: &StaticHttpClient) -> BinanceAdapter {
        BinanceAdapter::new(
            ExchangeSettings::default_for(ExchangeId::Binance),
            Arc::new(http.clone()),
        )
    }

    fn btc() -> Symbol {
        Symbol::usdt("BTC").expect("valid")
    }

    #[tokio::test]
    async fn price_klines_send_native_parameters() {
        let http = StaticHttpClient::new().with_json(
            PRICE_KLINES_PATH,
            r#"[[1700000060000,"2","3","1","2.5","10",1700000119999],
                [1700000000000,"1","2","0.5","1.5","20",1700000059999]]"#,
        );
        let window = HistoricalWindow::new(btc(), Interval::OneMinute).with_limit(5_000);

        let klines = adapter(&http).price_klines(window).await.expect("klines");

        assert_eq!(klines.len(), 2);
        assert_eq!(klines[0].open_time, 1_700_000_000_000);
        assert_eq!(klines[1].close, Decimal::new(25, 1));

        let request = &http.requests()[0];
        assert_eq!(request.query_value("symbol"), Some("BTCUSDT"));
        assert_eq!(request.query_value("interval"), Some("1m"));
        assert_eq!(request.query_value("limit"), Some("1500"));
    }

    #[tokio::test]
    async fn unknown_symbol_code_is_classified() {
        let http = StaticHttpClient::new().with_response(
            PRICE_KLINES_PATH,
            Ok(HttpResponse::new(400, r#"{"code":-1121,"msg":"Invalid symbol."}"#)),
        );
        let window = HistoricalWindow::new(btc(), Interval::OneHour);

        let error = adapter(&http).price_klines(window).await.expect_err("must fail");

        assert_eq!(error.kind(), SourceErrorKind::SymbolNotSupported);
        assert_eq!(error.exchange(), Some(ExchangeId::Binance));
    }

    #[tokio::test]
    async fn rate_limit_status_is_transient() {
        let http = StaticHttpClient::new()
            .with_response(OPEN_INTEREST_PATH, Ok(HttpResponse::new(429, "{}")));

        let error = adapter(&http).open_interest(btc()).await.expect_err("must fail");

        assert!(error.retryable());
        assert_eq!(error.transient_cause(), Some(TransientCause::RateLimited));
    }

    #[tokio::test]
    async fn latest_funding_rate_reads_premium_index() {
        let http = StaticHttpClient::new().with_json(
            PREMIUM_INDEX_PATH,
            r#"{"symbol":"BTCUSDT","markPrice":"43000.1","indexPrice":"42990.5",
                "lastFundingRate":"0.00010000","nextFundingTime":1700006400000,"time":1700000000123}"#,
        );

        let snapshot = adapter(&http).latest_funding_rate(btc()).await.expect("snapshot");

        assert_eq!(snapshot.rate, Decimal::new(1, 4));
        assert_eq!(snapshot.next_funding_time, Some(1_700_006_400_000));
        assert_eq!(snapshot.funding_time, 1_700_000_000_123);
    }

    #[tokio::test]
    async fn instruments_keep_usdt_perpetuals_with_filters() {
        let http = StaticHttpClient::new().with_json(
            EXCHANGE_INFO_PATH,
            r#"{"symbols":[
                {"symbol":"BTCUSDT","contractType":"PERPETUAL","status":"TRADING","baseAsset":"BTC","quoteAsset":"USDT",
                 "filters":[{"filterType":"PRICE_FILTER","tickSize":"0.10","minPrice":"556.80"},
                            {"filterType":"LOT_SIZE","stepSize":"0.001","minQty":"0.001","maxQty":"1000"},
                            {"filterType":"PERCENT_PRICE","multiplierUp":"1.05"}]},
                {"symbol":"BTCUSDT_240329","contractType":"CURRENT_QUARTER","status":"TRADING","baseAsset":"BTC","quoteAsset":"USDT","filters":[]}
            ]}"#,
        );

        let instruments = adapter(&http).instruments().await.expect("instruments");

        assert_eq!(instruments.len(), 1);
        assert_eq!(instruments[0].symbol, "BTCUSDT");
        assert_eq!(instruments[0].tick_size, Decimal::new(10, 2));
        assert_eq!(instruments[0].max_qty, Decimal::from(1_000));
        assert_eq!(instruments[0].status, "TRADING");
    }

    #[tokio::test]
    async fn perpetual_without_lot_size_filter_is_an_invalid_response() {
        let http = StaticHttpClient::new().with_json(
            EXCHANGE_INFO_PATH,
            r#"{"symbols":[
                {"symbol":"ETHUSDT","contractType":"PERPETUAL","status":"TRADING","baseAsset":"ETH","quoteAsset":"USDT",
                 "filters":[{"filterType":"PRICE_FILTER","tickSize":"0.01"}]}
            ]}"#,
        );

        let error = adapter(&http).instruments().await.expect_err("must fail");

        assert_eq!(error.kind(), SourceErrorKind::InvalidResponse);
        assert_eq!(error.exchange(), Some(ExchangeId::Binance));
        assert!(error.message().contains("LOT_SIZE"));
    }
}
