use std::sync::Arc;

use perpfetch_core::{
    BinanceAdapter, BitgetAdapter, BybitAdapter, ClientConfig, ExchangeId, ExchangeSettings,
    FundingRateWindow, HistoricalWindow, Interval, MarketDataClient, Metric, OkxAdapter,
    PerpDataSource, RetryPolicy, SourceErrorKind, SourceRegistry, StaticHttpClient, Symbol,
};
use rust_decimal::Decimal;

const T0: i64 = 1_700_000_000_000;
const MINUTE: i64 = 60_000;

struct ExchangeCase {
    id: ExchangeId,
    source: Arc<dyn PerpDataSource>,
    http: StaticHttpClient,
    unsupported: Option<Metric>,
}

fn btc() -> Symbol {
    Symbol::usdt("BTC").expect("valid symbol")
}

/// Three one-minute candles in the order and envelope each venue uses.
fn with_candles(http: StaticHttpClient, exchange: ExchangeId) -> StaticHttpClient {
    let times = [T0, T0 + MINUTE, T0 + 2 * MINUTE];
    match exchange {
        ExchangeId::Binance => {
            let rows = times
                .iter()
                .map(|t| format!(r#"[{t},"1","2","0.5","1.5","10",{}]"#, t + MINUTE - 1))
                .collect::<Vec<_>>()
                .join(",");
            http.with_json("/fapi/v1/klines", format!("[{rows}]"))
        }
        ExchangeId::Okx => {
            let rows = times
                .iter()
                .rev()
                .map(|t| format!(r#"["{t}","1","2","0.5","1.5","1000","10","15000","1"]"#))
                .collect::<Vec<_>>()
                .join(",");
            http.with_json(
                "/api/v5/market/candles",
                format!(r#"{{"code":"0","msg":"","data":[{rows}]}}"#),
            )
        }
        ExchangeId::Bybit => {
            let rows = times
                .iter()
                .rev()
                .map(|t| format!(r#"["{t}","1","2","0.5","1.5","10","15"]"#))
                .collect::<Vec<_>>()
                .join(",");
            http.with_json(
                "/v5/market/kline",
                format!(
                    r#"{{"retCode":0,"retMsg":"OK","result":{{"symbol":"BTCUSDT","category":"linear","list":[{rows}]}},"time":{T0}}}"#
                ),
            )
        }
        ExchangeId::Bitget => {
            let rows = times
                .iter()
                .map(|t| format!(r#"["{t}","1","2","0.5","1.5","10","15"]"#))
                .collect::<Vec<_>>()
                .join(",");
            http.with_json("/api/mix/v1/market/candles", format!("[{rows}]"))
        }
    }
}

fn with_ticker(http: StaticHttpClient, exchange: ExchangeId) -> StaticHttpClient {
    match exchange {
        ExchangeId::Binance => http
            .with_json(
                "/fapi/v1/ticker/24hr",
                format!(r#"{{"symbol":"BTCUSDT","lastPrice":"43000","closeTime":{T0}}}"#),
            )
            .with_json(
                "/fapi/v1/premiumIndex",
                format!(
                    r#"{{"symbol":"BTCUSDT","markPrice":"43001","indexPrice":"42999","lastFundingRate":"0.0001","nextFundingTime":{},"time":{T0}}}"#,
                    T0 + 3_600_000
                ),
            ),
        ExchangeId::Okx => http
            .with_json(
                "/api/v5/market/tickers",
                format!(r#"{{"code":"0","msg":"","data":[{{"instId":"BTC-USDT-SWAP","last":"43000","ts":"{T0}"}}]}}"#),
            )
            .with_json(
                "/api/v5/market/index-tickers",
                format!(r#"{{"code":"0","msg":"","data":[{{"instId":"BTC-USDT","idxPx":"42999","ts":"{T0}"}}]}}"#),
            )
            .with_json(
                "/api/v5/public/mark-price",
                format!(r#"{{"code":"0","msg":"","data":[{{"instId":"BTC-USDT-SWAP","markPx":"43001","ts":"{T0}"}}]}}"#),
            ),
        ExchangeId::Bybit => http.with_json(
            "/v5/market/tickers",
            format!(
                r#"{{"retCode":0,"retMsg":"OK","result":{{"category":"linear","list":[{{"symbol":"BTCUSDT","lastPrice":"43000","indexPrice":"42999","markPrice":"43001"}}]}},"time":{T0}}}"#
            ),
        ),
        ExchangeId::Bitget => http
            .with_json(
                "/api/mix/v1/market/ticker",
                format!(
                    r#"{{"code":"00000","msg":"success","requestTime":{T0},"data":{{"symbol":"BTCUSDT_UMCBL","last":"43000","indexPrice":"42999","timestamp":"{T0}"}}}}"#
                ),
            )
            .with_json(
                "/api/mix/v1/market/mark-price",
                format!(
                    r#"{{"code":"00000","msg":"success","requestTime":{T0},"data":{{"symbol":"BTCUSDT_UMCBL","markPrice":"43001","timestamp":"{T0}"}}}}"#
                ),
            ),
    }
}

fn exchange_cases() -> Vec<ExchangeCase> {
    ExchangeId::ALL
        .into_iter()
        .map(|id| {
            let http = with_ticker(with_candles(StaticHttpClient::new(), id), id);
            let settings = ExchangeSettings::default_for(id);
            let transport = Arc::new(http.clone());
            let source: Arc<dyn PerpDataSource> = match id {
                ExchangeId::Binance => Arc::new(BinanceAdapter::new(settings, transport)),
                ExchangeId::Okx => Arc::new(OkxAdapter::new(settings, transport)),
                ExchangeId::Bybit => Arc::new(BybitAdapter::new(settings, transport)),
                ExchangeId::Bitget => Arc::new(BitgetAdapter::new(settings, transport)),
            };
            let unsupported = match id {
                ExchangeId::Okx => Some(Metric::PremiumIndexKlines),
                ExchangeId::Bitget => Some(Metric::Instruments),
                ExchangeId::Binance | ExchangeId::Bybit => None,
            };
            ExchangeCase {
                id,
                source,
                http,
                unsupported,
            }
        })
        .collect()
}

#[tokio::test]
async fn sources_report_their_own_exchange_id() {
    for case in exchange_cases() {
        assert_eq!(case.source.id(), case.id, "exchange '{}': id", case.id);
    }
}

#[tokio::test]
async fn price_klines_are_ascending_and_within_limit_for_all_exchanges() {
    for case in exchange_cases() {
        let window = HistoricalWindow::new(btc(), Interval::OneMinute).with_limit(2);
        let klines = case
            .source
            .price_klines(window)
            .await
            .unwrap_or_else(|error| panic!("exchange '{}' klines failed: {error}", case.id));

        assert!(klines.len() <= 2, "exchange '{}': limit", case.id);
        assert!(
            klines.windows(2).all(|pair| pair[0].open_time < pair[1].open_time),
            "exchange '{}': ascending open times",
            case.id
        );
        for kline in &klines {
            assert!(kline.high >= kline.low, "exchange '{}': high >= low", case.id);
            assert_eq!(kline.close, Decimal::new(15, 1), "exchange '{}': close", case.id);
        }
    }
}

#[tokio::test]
async fn oversized_limits_are_capped_to_the_exchange_ceiling() {
    for case in exchange_cases() {
        let ceiling = case.source.max_limit(Metric::PriceKlines);
        let window = HistoricalWindow::new(btc(), Interval::OneMinute).with_limit(ceiling + 1_000);

        case.source
            .price_klines(window)
            .await
            .unwrap_or_else(|error| panic!("exchange '{}' klines failed: {error}", case.id));

        let requests = case.http.requests();
        let sent = requests
            .last()
            .and_then(|request| request.query_value("limit"))
            .map(str::to_owned);
        assert_eq!(sent, Some(ceiling.to_string()), "exchange '{}': sent limit", case.id);
    }
}

#[tokio::test]
async fn latest_ticker_decodes_exact_prices_for_all_exchanges() {
    for case in exchange_cases() {
        let ticker = case
            .source
            .latest_ticker(btc())
            .await
            .unwrap_or_else(|error| panic!("exchange '{}' ticker failed: {error}", case.id));

        assert_eq!(ticker.last_price, Decimal::from(43_000), "exchange '{}': last", case.id);
        assert_eq!(ticker.timestamp, T0, "exchange '{}': timestamp", case.id);
        assert_eq!(ticker.mark_price, Some(Decimal::from(43_001)), "exchange '{}': mark", case.id);
        assert_eq!(ticker.index_price, Some(Decimal::from(42_999)), "exchange '{}': index", case.id);
    }
}

#[tokio::test]
async fn unsupported_metrics_are_declared_and_refused() {
    for case in exchange_cases() {
        let capabilities = case.source.capabilities();
        for metric in Metric::ALL {
            let expected = Some(metric) != case.unsupported;
            assert_eq!(
                capabilities.supports(metric),
                expected,
                "exchange '{}': capability {metric}",
                case.id
            );
        }

        let Some(metric) = case.unsupported else {
            continue;
        };
        let before = case.http.request_count();
        let error = match metric {
            Metric::PremiumIndexKlines => case
                .source
                .premium_index_klines(HistoricalWindow::new(btc(), Interval::OneMinute))
                .await
                .map(|_| ()),
            Metric::Instruments => case.source.instruments().await.map(|_| ()),
            other => panic!("unexpected unsupported metric {other}"),
        }
        .expect_err("unsupported metric must fail");

        assert_eq!(error.kind(), SourceErrorKind::CapabilityUnsupported, "exchange '{}'", case.id);
        assert_eq!(error.exchange(), Some(case.id), "exchange '{}': error exchange", case.id);
        assert_eq!(case.http.request_count(), before, "exchange '{}': no request", case.id);
    }
}

#[tokio::test]
async fn unknown_routes_surface_exchange_tagged_errors() {
    for case in exchange_cases() {
        let error = case
            .source
            .funding_rate_history(FundingRateWindow::new(btc()))
            .await
            .expect_err("no funding history fixture is installed");

        assert!(!error.retryable(), "exchange '{}': 404 is not transient", case.id);
        assert_eq!(error.exchange(), Some(case.id), "exchange '{}': error exchange", case.id);
    }
}

#[tokio::test]
async fn client_serves_every_builtin_exchange_over_one_transport() {
    let mut http = StaticHttpClient::new();
    for exchange in ExchangeId::ALL {
        http = with_ticker(with_candles(http, exchange), exchange);
    }
    let registry = SourceRegistry::with_http_client(&ClientConfig::default(), Arc::new(http.clone()));
    let client = MarketDataClient::new(Arc::new(registry)).with_retry_policy(RetryPolicy::no_retry());
    let window = HistoricalWindow::new(btc(), Interval::OneMinute).with_limit(3);

    for exchange in ExchangeId::ALL {
        let klines = client
            .price_klines(exchange, &window)
            .await
            .unwrap_or_else(|error| panic!("exchange '{exchange}' klines failed: {error}"));
        assert_eq!(
            klines.iter().map(|kline| kline.open_time).collect::<Vec<_>>(),
            vec![T0, T0 + MINUTE, T0 + 2 * MINUTE],
            "exchange '{exchange}': open times"
        );
    }

    let before = http.request_count();
    let error = client
        .premium_index_klines(ExchangeId::Okx, &window)
        .await
        .expect_err("okx has no premium candles");
    assert_eq!(error.kind(), SourceErrorKind::CapabilityUnsupported);
    assert_eq!(error.exchange(), Some(ExchangeId::Okx));
    assert_eq!(http.request_count(), before);

    let error = client
        .price_klines(ExchangeId::Bybit, &HistoricalWindow::new(btc(), Interval::ThreeDays))
        .await
        .expect_err("bybit has no three-day candles");
    assert_eq!(error.kind(), SourceErrorKind::IntervalNotSupported);
    assert_eq!(error.attempts(), 1);
}
