//! Source protocol, query windows and the error taxonomy.
//!
//! This module defines the contract (`PerpDataSource`) every exchange adapter
//! implements, the query windows for history endpoints, and [`SourceError`],
//! the single error type that crosses the coordinator boundary.
//!
//! # Operations
//!
//! | Metric | Query | Response |
//! |--------|-------|----------|
//! | Price / index / mark / premium klines | [`HistoricalWindow`] | `Vec<Kline>` |
//! | Funding rate history | [`FundingRateWindow`] | `Vec<FundingRatePoint>` |
//! | Latest ticker | [`Symbol`] | [`Ticker`] |
//! | Latest mark / index / premium | [`Symbol`] | point record |
//! | Latest funding rate | [`Symbol`] | [`FundingRateSnapshot`] |
//! | Open interest | [`Symbol`] | [`OpenInterest`] |
//! | Instruments | none | `Vec<Instrument>` |
//!
//! # Example
//!
//! ```rust,ignore
//! use perpfetch_core::{HistoricalWindow, Interval, PerpDataSource, Symbol};
//!
//! async fn last_hour(source: &dyn PerpDataSource) -> Result<(), perpfetch_core::SourceError> {
//!     let window = HistoricalWindow::new(Symbol::usdt("BTC")?, Interval::OneMinute).with_limit(60);
//!     for kline in source.price_klines(window).await? {
//!         println!("{} {}", kline.open_time, kline.close);
//!     }
//!     Ok(())
//! }
//! ```

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    ExchangeId, FundingRatePoint, FundingRateSnapshot, IndexPricePoint, Instrument, Interval,
    Kline, MarkPricePoint, OpenInterest, PremiumIndexPoint, Symbol, Ticker, UtcDateTime,
    ValidationError,
};

/// Limit applied to history queries that do not specify one.
pub const DEFAULT_LIMIT: u32 = 500;

/// Market data operation, used for capability checks, limits and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    PriceKlines,
    IndexPriceKlines,
    MarkPriceKlines,
    PremiumIndexKlines,
    FundingRateHistory,
    LatestTicker,
    LatestMarkPrice,
    LatestIndexPrice,
    LatestPremiumIndex,
    LatestFundingRate,
    OpenInterest,
    Instruments,
}

impl Metric {
    pub const ALL: [Self; 12] = [
        Self::PriceKlines,
        Self::IndexPriceKlines,
        Self::MarkPriceKlines,
        Self::PremiumIndexKlines,
        Self::FundingRateHistory,
        Self::LatestTicker,
        Self::LatestMarkPrice,
        Self::LatestIndexPrice,
        Self::LatestPremiumIndex,
        Self::LatestFundingRate,
        Self::OpenInterest,
        Self::Instruments,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PriceKlines => "price_klines",
            Self::IndexPriceKlines => "index_price_klines",
            Self::MarkPriceKlines => "mark_price_klines",
            Self::PremiumIndexKlines => "premium_index_klines",
            Self::FundingRateHistory => "funding_rate_history",
            Self::LatestTicker => "latest_ticker",
            Self::LatestMarkPrice => "latest_mark_price",
            Self::LatestIndexPrice => "latest_index_price",
            Self::LatestPremiumIndex => "latest_premium_index",
            Self::LatestFundingRate => "latest_funding_rate",
            Self::OpenInterest => "open_interest",
            Self::Instruments => "instruments",
        }
    }

    /// Whether the metric takes a window and honors a limit.
    pub const fn is_history(self) -> bool {
        matches!(
            self,
            Self::PriceKlines
                | Self::IndexPriceKlines
                | Self::MarkPriceKlines
                | Self::PremiumIndexKlines
                | Self::FundingRateHistory
        )
    }

    const fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl Display for Metric {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of metrics a source serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilitySet(u16);

impl CapabilitySet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn full() -> Self {
        let mut bits = 0;
        let mut index = 0;
        while index < Metric::ALL.len() {
            bits |= Metric::ALL[index].bit();
            index += 1;
        }
        Self(bits)
    }

    pub const fn with(self, metric: Metric) -> Self {
        Self(self.0 | metric.bit())
    }

    pub const fn without(self, metric: Metric) -> Self {
        Self(self.0 & !metric.bit())
    }

    pub const fn supports(self, metric: Metric) -> bool {
        self.0 & metric.bit() != 0
    }

    pub fn supported(self) -> Vec<Metric> {
        Metric::ALL
            .into_iter()
            .filter(|metric| self.supports(*metric))
            .collect()
    }
}

/// Closed error classification surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceErrorKind {
    /// Malformed query or a request the exchange rejected as invalid.
    Validation,
    SymbolNotSupported,
    IntervalNotSupported,
    /// The exchange has no endpoint for the metric at all.
    CapabilityUnsupported,
    /// Network failure, rate limiting, 5xx or deadline. The only retryable kind.
    ExchangeTransient,
    /// Unregistered exchange or conflicting registration.
    Registry,
    /// Payload the adapter could not decode into the data model.
    InvalidResponse,
}

/// Detail for [`SourceErrorKind::ExchangeTransient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransientCause {
    Network,
    Timeout,
    RateLimited,
    Server,
    Unavailable,
    DeadlineExceeded,
}

impl TransientCause {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Server => "server",
            Self::Unavailable => "unavailable",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

type ErrorCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Structured error for every source and coordinator operation.
#[derive(Debug, Clone)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    exchange: Option<ExchangeId>,
    transient_cause: Option<TransientCause>,
    attempts: u32,
    exhausted: bool,
    cause: Option<ErrorCause>,
}

impl SourceError {
    fn new(kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            exchange: None,
            transient_cause: None,
            attempts: 0,
            exhausted: false,
            cause: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Validation, message)
    }

    pub fn symbol_not_supported(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::SymbolNotSupported, message)
    }

    pub fn interval_not_supported(interval: Interval, metric: Metric) -> Self {
        Self::new(
            SourceErrorKind::IntervalNotSupported,
            format!("interval '{interval}' is not supported for '{metric}'"),
        )
    }

    pub fn capability_unsupported(metric: Metric) -> Self {
        Self::new(
            SourceErrorKind::CapabilityUnsupported,
            format!("metric '{metric}' is not supported by this source"),
        )
    }

    pub fn transient(cause: TransientCause, message: impl Into<String>) -> Self {
        let mut error = Self::new(SourceErrorKind::ExchangeTransient, message);
        error.transient_cause = Some(cause);
        error
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::transient(TransientCause::RateLimited, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::transient(TransientCause::Unavailable, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::transient(TransientCause::DeadlineExceeded, message)
    }

    pub fn registry(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Registry, message)
    }

    pub fn not_registered(exchange: ExchangeId) -> Self {
        Self::registry(format!("no source registered for exchange '{exchange}'"))
            .with_exchange(exchange)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::InvalidResponse, message)
    }

    pub fn with_exchange(mut self, exchange: ExchangeId) -> Self {
        self.exchange = Some(exchange);
        self
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Marks a transient error as the final one of an exhausted retry budget.
    pub fn into_exhausted(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self.exhausted = true;
        self
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn exchange(&self) -> Option<ExchangeId> {
        self.exchange
    }

    pub const fn transient_cause(&self) -> Option<TransientCause> {
        self.transient_cause
    }

    /// Attempts made by the coordinator; zero when raised outside of it.
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub const fn retryable(&self) -> bool {
        matches!(self.kind, SourceErrorKind::ExchangeTransient)
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Validation => "source.validation",
            SourceErrorKind::SymbolNotSupported => "source.symbol_not_supported",
            SourceErrorKind::IntervalNotSupported => "source.interval_not_supported",
            SourceErrorKind::CapabilityUnsupported => "source.capability_unsupported",
            SourceErrorKind::ExchangeTransient if self.exhausted => "source.retries_exhausted",
            SourceErrorKind::ExchangeTransient => "source.exchange_transient",
            SourceErrorKind::Registry => "source.registry",
            SourceErrorKind::InvalidResponse => "source.invalid_response",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(exchange) = self.exchange {
            write!(f, "[{exchange}] ")?;
        }
        write!(f, "{} ({})", self.message, self.code())?;
        if self.exhausted {
            write!(f, " after {} attempt(s)", self.attempts)?;
        }
        Ok(())
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<ValidationError> for SourceError {
    fn from(error: ValidationError) -> Self {
        Self::validation(error.to_string()).with_cause(error)
    }
}

/// Candle query window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalWindow {
    pub symbol: Symbol,
    pub interval: Interval,
    pub start: Option<UtcDateTime>,
    pub end: Option<UtcDateTime>,
    pub limit: Option<u32>,
}

impl HistoricalWindow {
    pub fn new(symbol: Symbol, interval: Interval) -> Self {
        Self {
            symbol,
            interval,
            start: None,
            end: None,
            limit: None,
        }
    }

    pub fn with_start(mut self, start: UtcDateTime) -> Self {
        self.start = Some(start);
        self
    }

    pub fn with_end(mut self, end: UtcDateTime) -> Self {
        self.end = Some(end);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Checks ordering and limit against `max_limit`, returning the limit to send.
    pub fn validate(&self, max_limit: u32) -> Result<u32, ValidationError> {
        validate_window(self.start, self.end, self.limit, max_limit)
    }

    /// Requested limit (or the default) capped to `max_limit`. Adapters use this.
    pub fn capped_limit(&self, max_limit: u32) -> u32 {
        capped_limit(self.limit, max_limit)
    }

    pub fn start_millis(&self) -> Option<i64> {
        self.start.map(UtcDateTime::unix_millis)
    }

    pub fn end_millis(&self) -> Option<i64> {
        self.end.map(UtcDateTime::unix_millis)
    }
}

/// Funding history query window. Funding history has no granularity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingRateWindow {
    pub symbol: Symbol,
    pub start: Option<UtcDateTime>,
    pub end: Option<UtcDateTime>,
    pub limit: Option<u32>,
}

impl FundingRateWindow {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            start: None,
            end: None,
            limit: None,
        }
    }

    pub fn with_start(mut self, start: UtcDateTime) -> Self {
        self.start = Some(start);
        self
    }

    pub fn with_end(mut self, end: UtcDateTime) -> Self {
        self.end = Some(end);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn validate(&self, max_limit: u32) -> Result<u32, ValidationError> {
        validate_window(self.start, self.end, self.limit, max_limit)
    }

    pub fn capped_limit(&self, max_limit: u32) -> u32 {
        capped_limit(self.limit, max_limit)
    }

    pub fn start_millis(&self) -> Option<i64> {
        self.start.map(UtcDateTime::unix_millis)
    }

    pub fn end_millis(&self) -> Option<i64> {
        self.end.map(UtcDateTime::unix_millis)
    }
}

fn validate_window(
    start: Option<UtcDateTime>,
    end: Option<UtcDateTime>,
    limit: Option<u32>,
    max_limit: u32,
) -> Result<u32, ValidationError> {
    if let (Some(start), Some(end)) = (start, end) {
        if start >= end {
            return Err(ValidationError::InvertedWindow {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
    }

    let max_limit = max_limit.max(1);
    match limit {
        Some(0) => Err(ValidationError::NonPositiveLimit),
        Some(limit) if limit > max_limit => Err(ValidationError::LimitAboveMaximum {
            limit,
            max: max_limit,
        }),
        Some(limit) => Ok(limit),
        None => Ok(DEFAULT_LIMIT.min(max_limit)),
    }
}

fn capped_limit(limit: Option<u32>, max_limit: u32) -> u32 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, max_limit.max(1))
}

/// Boxed future returned by every source operation.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

/// USDT perpetual market data source contract.
///
/// Every exchange adapter implements this trait and is selected at runtime
/// through the [`SourceRegistry`](crate::SourceRegistry).
///
/// # Contract
///
/// - Failures are always a classified [`SourceError`]; no partial or empty
///   placeholder data is returned in place of an error.
/// - A metric the venue has no endpoint for fails with
///   [`SourceErrorKind::CapabilityUnsupported`] and is left out of
///   [`capabilities`](PerpDataSource::capabilities).
/// - Candle results are strictly ascending by open time, without duplicates,
///   and hold at most the capped limit. A limit above
///   [`max_limit`](PerpDataSource::max_limit) is capped, not rejected.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one instance per exchange is shared
/// by all callers.
pub trait PerpDataSource: Send + Sync {
    fn id(&self) -> ExchangeId;

    fn capabilities(&self) -> CapabilitySet;

    /// Largest limit the venue accepts for a history metric.
    fn max_limit(&self, metric: Metric) -> u32;

    fn price_klines<'a>(&'a self, window: HistoricalWindow) -> SourceFuture<'a, Vec<Kline>>;

    fn index_price_klines<'a>(&'a self, window: HistoricalWindow)
        -> SourceFuture<'a, Vec<Kline>>;

    fn mark_price_klines<'a>(&'a self, window: HistoricalWindow) -> SourceFuture<'a, Vec<Kline>>;

    fn premium_index_klines<'a>(
        &'a self,
        window: HistoricalWindow,
    ) -> SourceFuture<'a, Vec<Kline>>;

    fn funding_rate_history<'a>(
        &'a self,
        window: FundingRateWindow,
    ) -> SourceFuture<'a, Vec<FundingRatePoint>>;

    fn latest_ticker<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, Ticker>;

    fn latest_mark_price<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, MarkPricePoint>;

    fn latest_index_price<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, IndexPricePoint>;

    fn latest_premium_index<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, PremiumIndexPoint>;

    fn latest_funding_rate<'a>(&'a self, symbol: Symbol)
        -> SourceFuture<'a, FundingRateSnapshot>;

    fn open_interest<'a>(&'a self, symbol: Symbol) -> SourceFuture<'a, OpenInterest>;

    fn instruments<'a>(&'a self) -> SourceFuture<'a, Vec<Instrument>>;
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    fn window() -> HistoricalWindow {
        HistoricalWindow::new(Symbol::usdt("BTC").expect("valid"), Interval::OneMinute)
    }

    fn ts(input: &str) -> UtcDateTime {
        UtcDateTime::parse(input).expect("valid timestamp")
    }

    #[test]
    fn default_limit_is_reduced_to_the_ceiling() {
        assert_eq!(window().validate(1_500), Ok(500));
        assert_eq!(window().validate(100), Ok(100));
    }

    #[test]
    fn explicit_limit_must_be_positive_and_within_ceiling() {
        assert_eq!(window().with_limit(0).validate(100), Err(ValidationError::NonPositiveLimit));
        assert_eq!(
            window().with_limit(101).validate(100),
            Err(ValidationError::LimitAboveMaximum { limit: 101, max: 100 })
        );
        assert_eq!(window().with_limit(100).validate(100), Ok(100));
    }

    #[test]
    fn inverted_or_empty_range_is_rejected() {
        let at = ts("2024-01-01T00:00:00Z");
        let err = window().with_start(at).with_end(at).validate(100).expect_err("must fail");
        assert!(matches!(err, ValidationError::InvertedWindow { .. }));

        let ok = window()
            .with_start(at)
            .with_end(ts("2024-01-01T01:00:00Z"))
            .validate(100);
        assert_eq!(ok, Ok(100));
    }

    #[test]
    fn capped_limit_never_exceeds_ceiling() {
        assert_eq!(window().with_limit(5_000).capped_limit(300), 300);
        assert_eq!(window().capped_limit(300), 300);
        assert_eq!(window().with_limit(7).capped_limit(300), 7);
    }

    #[test]
    fn capability_set_tracks_metrics() {
        let caps = CapabilitySet::full().without(Metric::PremiumIndexKlines);
        assert!(caps.supports(Metric::PriceKlines));
        assert!(!caps.supports(Metric::PremiumIndexKlines));
        assert_eq!(caps.supported().len(), Metric::ALL.len() - 1);
        assert!(CapabilitySet::empty().with(Metric::Instruments).supports(Metric::Instruments));
    }

    #[test]
    fn validation_error_converts_with_cause_chain() {
        let error = SourceError::from(ValidationError::NonPositiveLimit);
        assert_eq!(error.kind(), SourceErrorKind::Validation);
        assert!(!error.retryable());
        assert!(error.source().is_some());
    }

    #[test]
    fn exhausted_transient_error_is_distinguishable() {
        let first = SourceError::rate_limited("slow down").with_exchange(ExchangeId::Okx);
        let exhausted = first.clone().into_exhausted(3);

        assert_eq!(first.code(), "source.exchange_transient");
        assert_eq!(exhausted.code(), "source.retries_exhausted");
        assert!(exhausted.is_exhausted());
        assert_eq!(exhausted.attempts(), 3);
        assert_eq!(exhausted.transient_cause(), Some(TransientCause::RateLimited));
        assert_eq!(
            exhausted.to_string(),
            "[okx] slow down (source.retries_exhausted) after 3 attempt(s)"
        );
    }
}
