//! # Perpfetch Core
//!
//! Exchange-agnostic market data for USDT-margined perpetual contracts.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Canonical data models** for klines, funding rates, price snapshots,
//!   open interest and instruments, with exact decimal numbers
//! - **A source protocol** ([`PerpDataSource`]) every exchange adapter implements
//! - **A registry** mapping exchange ids to lazily built, shared sources
//! - **A coordinating client** that validates queries, dispatches them and
//!   retries transient failures under an optional deadline
//! - **Built-in adapters** for Binance, OKX, Bybit and Bitget
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Exchange adapters (Binance, OKX, Bybit, Bitget) |
//! | [`circuit_breaker`] | Per-adapter circuit breaker |
//! | [`client`] | Coordinating client |
//! | [`config`] | Retry, deadline and per-exchange settings |
//! | [`data_source`] | Source protocol, query windows and error taxonomy |
//! | [`domain`] | Symbols, intervals, timestamps and records |
//! | [`error`] | Validation errors |
//! | [`exchange`] | Exchange identifiers |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`registry`] | Exchange to source registry |
//! | [`retry`] | Retry policy and state machine |
//! | [`throttling`] | Adapter-local rate limiting |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use perpfetch_core::{ClientConfig, ExchangeId, HistoricalWindow, Interval, MarketDataClient, Symbol};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = MarketDataClient::from_config(&ClientConfig::default());
//!     let window = HistoricalWindow::new(Symbol::usdt("BTC")?, Interval::OneHour).with_limit(24);
//!
//!     for kline in client.price_klines(ExchangeId::Binance, &window).await? {
//!         println!("{} close={}", kline.open_time, kline.close);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ MarketDataClient │  validate, capability check, retry, deadline
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │ SourceRegistry   │  ExchangeId -> Arc<dyn PerpDataSource>
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐     ┌──────────────────┐
//! │ Exchange adapter │────▶│ Throttle/Breaker │
//! └────────┬─────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │ HttpClient       │  reqwest or canned responses
//! └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Every operation returns [`SourceError`], classified by [`SourceErrorKind`]:
//!
//! ```rust
//! use perpfetch_core::{SourceError, SourceErrorKind};
//!
//! fn describe(error: &SourceError) -> &'static str {
//!     match error.kind() {
//!         SourceErrorKind::ExchangeTransient if error.is_exhausted() => "gave up after retries",
//!         SourceErrorKind::ExchangeTransient => "temporary exchange failure",
//!         SourceErrorKind::CapabilityUnsupported => "exchange does not offer this data",
//!         SourceErrorKind::Validation => "bad query",
//!         _ => "other failure",
//!     }
//! }
//! ```
//!
//! The library emits `tracing` events and installs no subscriber.

pub mod adapters;
pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod data_source;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod http_client;
pub mod registry;
pub mod retry;
pub mod throttling;

// Adapter implementations
pub use adapters::{builtin_factory, BinanceAdapter, BitgetAdapter, BybitAdapter, OkxAdapter};

// Circuit breaker
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

// Coordinator
pub use client::MarketDataClient;

// Configuration
pub use config::{ClientConfig, ExchangeSettings};

// Source protocol and errors
pub use data_source::{
    CapabilitySet, FundingRateWindow, HistoricalWindow, Metric, PerpDataSource, SourceError,
    SourceErrorKind, SourceFuture, TransientCause, DEFAULT_LIMIT,
};

// Domain models
pub use domain::{
    klines_strictly_ascending, normalize_klines, ContractKind, FundingRatePoint,
    FundingRateSnapshot, IndexPricePoint, Instrument, Interval, Kline, MarkPricePoint,
    OpenInterest, PremiumIndexPoint, Symbol, Ticker, UtcDateTime,
};

// Error types
pub use error::ValidationError;

// Exchange identifiers
pub use exchange::ExchangeId;

// HTTP client types
pub use http_client::{
    HttpClient, HttpError, HttpFuture, HttpRequest, HttpResponse, ReqwestHttpClient,
    StaticHttpClient,
};

// Registry
pub use registry::{SourceFactory, SourceRegistry};

// Retry logic
pub use retry::{Backoff, RetryDecision, RetryPolicy, RetryState};

// Throttling
pub use throttling::RequestThrottle;
