//! Coordinating client: one entry point per market data operation.
//!
//! Every call runs the same pipeline:
//!
//! 1. validate the query (no adapter is called when this fails),
//! 2. resolve the source for the exchange from the registry,
//! 3. check that the source serves the metric,
//! 4. invoke the source under the retry policy and the optional deadline,
//! 5. check the result contract (klines ascending and within the limit).
//!
//! The client keeps no per-call state between calls and can be shared
//! across tasks behind an `Arc`.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::data_source::{
    FundingRateWindow, HistoricalWindow, Metric, PerpDataSource, SourceError, SourceFuture,
};
use crate::registry::SourceRegistry;
use crate::retry::{RetryDecision, RetryPolicy, RetryState};
use crate::{
    klines_strictly_ascending, ExchangeId, FundingRatePoint, FundingRateSnapshot,
    IndexPricePoint, Instrument, Kline, MarkPricePoint, OpenInterest, PremiumIndexPoint, Symbol,
    Ticker, ValidationError,
};

/// Exchange-agnostic market data entry point over a [`SourceRegistry`].
#[derive(Debug, Clone)]
pub struct MarketDataClient {
    registry: Arc<SourceRegistry>,
    retry_policy: RetryPolicy,
    call_timeout: Option<Duration>,
}

impl MarketDataClient {
    pub fn new(registry: Arc<SourceRegistry>) -> Self {
        Self {
            registry,
            retry_policy: RetryPolicy::default(),
            call_timeout: None,
        }
    }

    /// Client over the built-in adapters, configured by `config`.
    pub fn from_config(config: &ClientConfig) -> Self {
        let client = Self::new(Arc::new(SourceRegistry::with_builtin_sources(config)))
            .with_retry_policy(config.retry);
        match config.call_timeout {
            Some(timeout) => client.with_call_timeout(timeout),
            None => client,
        }
    }

    /// Client over the built-in adapters, configured from `PERPFETCH_*` variables.
    pub fn from_env() -> Result<Self, SourceError> {
        let config = ClientConfig::from_env()?;
        Ok(Self::from_config(&config))
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Upper bound for a whole call, retries and backoff included.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub async fn price_klines(
        &self,
        exchange: ExchangeId,
        window: &HistoricalWindow,
    ) -> Result<Vec<Kline>, SourceError> {
        self.klines(exchange, Metric::PriceKlines, window, |source, window| {
            source.price_klines(window)
        })
        .await
    }

    pub async fn index_price_klines(
        &self,
        exchange: ExchangeId,
        window: &HistoricalWindow,
    ) -> Result<Vec<Kline>, SourceError> {
        self.klines(exchange, Metric::IndexPriceKlines, window, |source, window| {
            source.index_price_klines(window)
        })
        .await
    }

    pub async fn mark_price_klines(
        &self,
        exchange: ExchangeId,
        window: &HistoricalWindow,
    ) -> Result<Vec<Kline>, SourceError> {
        self.klines(exchange, Metric::MarkPriceKlines, window, |source, window| {
            source.mark_price_klines(window)
        })
        .await
    }

    pub async fn premium_index_klines(
        &self,
        exchange: ExchangeId,
        window: &HistoricalWindow,
    ) -> Result<Vec<Kline>, SourceError> {
        self.klines(exchange, Metric::PremiumIndexKlines, window, |source, window| {
            source.premium_index_klines(window)
        })
        .await
    }

    pub async fn funding_rate_history(
        &self,
        exchange: ExchangeId,
        window: &FundingRateWindow,
    ) -> Result<Vec<FundingRatePoint>, SourceError> {
        let metric = Metric::FundingRateHistory;
        window
            .validate(u32::MAX)
            .map_err(|error| rejected(exchange, error))?;
        let source = self.source_for(exchange, metric)?;
        let limit = window
            .validate(source.max_limit(metric))
            .map_err(|error| rejected(exchange, error))?;

        let query = window.clone().with_limit(limit);
        self.execute(
            exchange,
            metric,
            source.as_ref(),
            |source| source.funding_rate_history(query.clone()),
            |points: &Vec<FundingRatePoint>| within_limit(points.len(), limit, metric),
        )
        .await
    }

    pub async fn latest_ticker(
        &self,
        exchange: ExchangeId,
        symbol: &Symbol,
    ) -> Result<Ticker, SourceError> {
        self.snapshot(exchange, Metric::LatestTicker, symbol, |source, symbol| {
            source.latest_ticker(symbol)
        })
        .await
    }

    pub async fn latest_mark_price(
        &self,
        exchange: ExchangeId,
        symbol: &Symbol,
    ) -> Result<MarkPricePoint, SourceError> {
        self.snapshot(exchange, Metric::LatestMarkPrice, symbol, |source, symbol| {
            source.latest_mark_price(symbol)
        })
        .await
    }

    pub async fn latest_index_price(
        &self,
        exchange: ExchangeId,
        symbol: &Symbol,
    ) -> Result<IndexPricePoint, SourceError> {
        self.snapshot(exchange, Metric::LatestIndexPrice, symbol, |source, symbol| {
            source.latest_index_price(symbol)
        })
        .await
    }

    pub async fn latest_premium_index(
        &self,
        exchange: ExchangeId,
        symbol: &Symbol,
    ) -> Result<PremiumIndexPoint, SourceError> {
        self.snapshot(exchange, Metric::LatestPremiumIndex, symbol, |source, symbol| {
            source.latest_premium_index(symbol)
        })
        .await
    }

    pub async fn latest_funding_rate(
        &self,
        exchange: ExchangeId,
        symbol: &Symbol,
    ) -> Result<FundingRateSnapshot, SourceError> {
        self.snapshot(exchange, Metric::LatestFundingRate, symbol, |source, symbol| {
            source.latest_funding_rate(symbol)
        })
        .await
    }

    pub async fn open_interest(
        &self,
        exchange: ExchangeId,
        symbol: &Symbol,
    ) -> Result<OpenInterest, SourceError> {
        self.snapshot(exchange, Metric::OpenInterest, symbol, |source, symbol| {
            source.open_interest(symbol)
        })
        .await
    }

    pub async fn instruments(&self, exchange: ExchangeId) -> Result<Vec<Instrument>, SourceError> {
        let metric = Metric::Instruments;
        let source = self.source_for(exchange, metric)?;
        self.execute(
            exchange,
            metric,
            source.as_ref(),
            |source| source.instruments(),
            |_: &Vec<Instrument>| Ok(()),
        )
        .await
    }

    async fn klines<F>(
        &self,
        exchange: ExchangeId,
        metric: Metric,
        window: &HistoricalWindow,
        fetch: F,
    ) -> Result<Vec<Kline>, SourceError>
    where
        F: for<'a> Fn(&'a dyn PerpDataSource, HistoricalWindow) -> SourceFuture<'a, Vec<Kline>>,
    {
        // Shape checks first; the limit ceiling needs the resolved source.
        window
            .validate(u32::MAX)
            .map_err(|error| rejected(exchange, error))?;
        let source = self.source_for(exchange, metric)?;
        let limit = window
            .validate(source.max_limit(metric))
            .map_err(|error| rejected(exchange, error))?;

        let query = window.clone().with_limit(limit);
        self.execute(
            exchange,
            metric,
            source.as_ref(),
            |source| fetch(source, query.clone()),
            |klines: &Vec<Kline>| {
                if !klines_strictly_ascending(klines) {
                    return Err(SourceError::invalid_response(format!(
                        "{metric} candles are not strictly ascending by open time"
                    )));
                }
                within_limit(klines.len(), limit, metric)
            },
        )
        .await
    }

    async fn snapshot<T, F>(
        &self,
        exchange: ExchangeId,
        metric: Metric,
        symbol: &Symbol,
        fetch: F,
    ) -> Result<T, SourceError>
    where
        F: for<'a> Fn(&'a dyn PerpDataSource, Symbol) -> SourceFuture<'a, T>,
    {
        let source = self.source_for(exchange, metric)?;
        self.execute(
            exchange,
            metric,
            source.as_ref(),
            |source| fetch(source, symbol.clone()),
            |_: &T| Ok(()),
        )
        .await
    }

    fn source_for(
        &self,
        exchange: ExchangeId,
        metric: Metric,
    ) -> Result<Arc<dyn PerpDataSource>, SourceError> {
        let source = self.registry.resolve(exchange)?;
        if !source.capabilities().supports(metric) {
            debug!(exchange = %exchange, metric = %metric, "metric not offered by source");
            return Err(SourceError::capability_unsupported(metric).with_exchange(exchange));
        }
        Ok(source)
    }

    /// Retry loop for one call. Only `ExchangeTransient` failures are retried;
    /// no attempt is started and no backoff is slept past the deadline.
    async fn execute<T, F, V>(
        &self,
        exchange: ExchangeId,
        metric: Metric,
        source: &dyn PerpDataSource,
        mut invoke: F,
        verify: V,
    ) -> Result<T, SourceError>
    where
        F: for<'a> FnMut(&'a dyn PerpDataSource) -> SourceFuture<'a, T>,
        V: Fn(&T) -> Result<(), SourceError>,
    {
        let policy = self.retry_policy;
        let deadline = self.call_timeout.map(|timeout| Instant::now() + timeout);
        let mut state = RetryState::new();

        loop {
            let attempt = state.begin_attempt();
            debug!(exchange = %exchange, metric = %metric, attempt, "dispatching to source");

            // Dropping the attempt future on expiry aborts the in-flight request.
            let outcome = match deadline {
                Some(deadline) => match timeout_at(deadline, invoke(source)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(exchange = %exchange, metric = %metric, attempt, "call deadline elapsed during attempt");
                        return Err(deadline_error(exchange, metric, attempt, state.last_error()));
                    }
                },
                None => invoke(source).await,
            };

            let error = match outcome.and_then(|value| verify(&value).map(|()| value)) {
                Ok(value) => return Ok(value),
                Err(error) => error.with_exchange(exchange),
            };
            let reason = error.to_string();

            match state.record_failure(error, &policy) {
                RetryDecision::RetryAfter(delay) => {
                    if let Some(deadline) = deadline {
                        if Instant::now() + delay >= deadline {
                            warn!(exchange = %exchange, metric = %metric, attempt, "backoff would pass the call deadline");
                            return Err(deadline_error(exchange, metric, attempt, state.last_error()));
                        }
                    }
                    warn!(
                        exchange = %exchange,
                        metric = %metric,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %reason,
                        "transient failure, retrying"
                    );
                    sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    let error = state
                        .into_error(&policy)
                        .unwrap_or_else(|| {
                            SourceError::invalid_response(format!("{metric} failed without an error"))
                        })
                        .with_exchange(exchange);
                    if error.is_exhausted() {
                        warn!(exchange = %exchange, metric = %metric, attempts = error.attempts(), "retries exhausted");
                    }
                    return Err(error);
                }
            }
        }
    }
}

fn rejected(exchange: ExchangeId, error: ValidationError) -> SourceError {
    SourceError::from(error).with_exchange(exchange)
}

fn within_limit(len: usize, limit: u32, metric: Metric) -> Result<(), SourceError> {
    if len > limit as usize {
        return Err(SourceError::invalid_response(format!(
            "{metric} returned {len} records for a limit of {limit}"
        )));
    }
    Ok(())
}

fn deadline_error(
    exchange: ExchangeId,
    metric: Metric,
    attempts: u32,
    last_error: Option<&SourceError>,
) -> SourceError {
    let error = SourceError::deadline_exceeded(format!(
        "{metric} did not complete before the call deadline"
    ))
    .with_exchange(exchange)
    .with_attempts(attempts);
    match last_error {
        Some(last) => error.with_cause(last.clone()),
        None => error,
    }
}
