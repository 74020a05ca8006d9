use std::env;
use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::{Backoff, RetryPolicy};
use crate::{ExchangeId, ValidationError};

/// Per-exchange transport and backpressure settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeSettings {
    pub base_url: String,
    /// Transport timeout of a single HTTP request.
    pub request_timeout: Duration,
    /// Requests allowed per `quota_window` before the adapter waits.
    pub quota_limit: u32,
    pub quota_window: Duration,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl ExchangeSettings {
    pub fn default_for(exchange: ExchangeId) -> Self {
        let (base_url, quota_limit, quota_window) = match exchange {
            ExchangeId::Binance => ("https://fapi.binance.com", 1_200, Duration::from_secs(60)),
            ExchangeId::Okx => ("https://www.okx.com", 20, Duration::from_secs(2)),
            ExchangeId::Bybit => ("https://api.bybit.com", 120, Duration::from_secs(5)),
            ExchangeId::Bitget => ("https://api.bitget.com", 20, Duration::from_secs(1)),
        };

        Self {
            base_url: String::from(base_url),
            request_timeout: Duration::from_secs(10),
            quota_limit,
            quota_window,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }
}

/// Client-wide configuration.
///
/// # Environment Variables
///
/// | Variable | Meaning |
/// |----------|---------|
/// | `PERPFETCH_MAX_ATTEMPTS` | Total attempts per call (>= 1) |
/// | `PERPFETCH_BACKOFF_BASE_MS` | First retry delay in milliseconds |
/// | `PERPFETCH_CALL_TIMEOUT_MS` | Deadline for a whole call, all attempts included |
/// | `PERPFETCH_<EXCHANGE>_BASE_URL` | REST base URL override, e.g. `PERPFETCH_OKX_BASE_URL` |
/// | `PERPFETCH_<EXCHANGE>_TIMEOUT_MS` | Per-request transport timeout |
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub retry: RetryPolicy,
    pub call_timeout: Option<Duration>,
    binance: ExchangeSettings,
    okx: ExchangeSettings,
    bybit: ExchangeSettings,
    bitget: ExchangeSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            call_timeout: None,
            binance: ExchangeSettings::default_for(ExchangeId::Binance),
            okx: ExchangeSettings::default_for(ExchangeId::Okx),
            bybit: ExchangeSettings::default_for(ExchangeId::Bybit),
            bitget: ExchangeSettings::default_for(ExchangeId::Bitget),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup, starting from defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(attempts) = parse_var::<u32, _>(&lookup, "PERPFETCH_MAX_ATTEMPTS")? {
            if attempts == 0 {
                return Err(invalid("PERPFETCH_MAX_ATTEMPTS", "0"));
            }
            config.retry.max_attempts = attempts;
        }

        if let Some(base_ms) = parse_var::<u64, _>(&lookup, "PERPFETCH_BACKOFF_BASE_MS")? {
            config.retry.backoff = match config.retry.backoff {
                Backoff::Exponential {
                    factor, max, jitter, ..
                } => Backoff::Exponential {
                    base: Duration::from_millis(base_ms),
                    factor,
                    max,
                    jitter,
                },
                Backoff::Fixed { .. } => Backoff::Fixed {
                    delay: Duration::from_millis(base_ms),
                },
            };
        }

        if let Some(timeout_ms) = parse_var::<u64, _>(&lookup, "PERPFETCH_CALL_TIMEOUT_MS")? {
            config.call_timeout = (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms));
        }

        for exchange in ExchangeId::ALL {
            let prefix = exchange.env_prefix();
            let settings = config.exchange_mut(exchange);

            let url_key = format!("PERPFETCH_{prefix}_BASE_URL");
            if let Some(url) = lookup(&url_key) {
                let url = url.trim();
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(invalid(&url_key, url));
                }
                *settings = settings.clone().with_base_url(url);
            }

            let timeout_key = format!("PERPFETCH_{prefix}_TIMEOUT_MS");
            if let Some(timeout_ms) = parse_var::<u64, _>(&lookup, &timeout_key)? {
                if timeout_ms == 0 {
                    return Err(invalid(&timeout_key, "0"));
                }
                settings.request_timeout = Duration::from_millis(timeout_ms);
            }
        }

        Ok(config)
    }

    pub fn exchange(&self, exchange: ExchangeId) -> &ExchangeSettings {
        match exchange {
            ExchangeId::Binance => &self.binance,
            ExchangeId::Okx => &self.okx,
            ExchangeId::Bybit => &self.bybit,
            ExchangeId::Bitget => &self.bitget,
        }
    }

    pub fn exchange_mut(&mut self, exchange: ExchangeId) -> &mut ExchangeSettings {
        match exchange {
            ExchangeId::Binance => &mut self.binance,
            ExchangeId::Okx => &mut self.okx,
            ExchangeId::Bybit => &mut self.bybit,
            ExchangeId::Bitget => &mut self.bitget,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ValidationError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| invalid(key, &raw)),
    }
}

fn invalid(key: &str, value: &str) -> ValidationError {
    ValidationError::InvalidConfig {
        key: key.to_owned(),
        value: value.to_owned(),
    }
}
