use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use rust_decimal::Decimal;
use serde::de::{DeserializeOwned, Error as DeError};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use crate::circuit_breaker::CircuitBreaker;
use crate::config::ExchangeSettings;
use crate::data_source::{SourceError, TransientCause};
use crate::http_client::{HttpClient, HttpError, HttpRequest, HttpResponse};
use crate::throttling::RequestThrottle;
use crate::{normalize_klines, ExchangeId, Kline};

/// Transport, throttle and breaker shared by every call of one adapter.
pub(crate) struct RestSupport {
    exchange: ExchangeId,
    settings: ExchangeSettings,
    http_client: Arc<dyn HttpClient>,
    throttle: RequestThrottle,
    circuit_breaker: CircuitBreaker,
}

impl RestSupport {
    pub(crate) fn new(
        exchange: ExchangeId,
        settings: ExchangeSettings,
        http_client: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            exchange,
            throttle: RequestThrottle::new(settings.quota_window, settings.quota_limit),
            circuit_breaker: CircuitBreaker::new(exchange, settings.circuit_breaker),
            settings,
            http_client,
        }
    }

    pub(crate) fn request(&self, path: &str) -> HttpRequest {
        HttpRequest::get(self.settings.base_url.as_str(), path)
            .with_timeout(self.settings.request_timeout)
    }

    /// Sends `request` and hands every non-transient response to `decode`.
    ///
    /// HTTP 418/429 and 5xx never reach `decode`. Outcomes, including
    /// exchange codes classified by `decode`, are fed to the circuit breaker.
    pub(crate) async fn fetch<T, F>(&self, request: HttpRequest, decode: F) -> Result<T, SourceError>
    where
        F: FnOnce(HttpResponse) -> Result<T, SourceError>,
    {
        self.circuit_breaker.check()?;
        self.throttle.acquire().await;

        let path = request.path.clone();
        let started = Instant::now();
        debug!(exchange = %self.exchange, path = %path, "sending exchange request");

        let result = match self.http_client.execute(request).await {
            Ok(response) => match transient_status(&response) {
                Some(error) => Err(error),
                None => decode(response),
            },
            Err(error) => Err(transport_error(error)),
        };

        self.circuit_breaker.observe(&result);
        debug!(
            exchange = %self.exchange,
            path = %path,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "exchange request finished"
        );
        result.map_err(|error| error.with_exchange(self.exchange))
    }
}

fn transient_status(response: &HttpResponse) -> Option<SourceError> {
    match response.status {
        418 | 429 => Some(SourceError::rate_limited(format!(
            "exchange rate limited the request (HTTP {})",
            response.status
        ))),
        status if status >= 500 => Some(SourceError::transient(
            TransientCause::Server,
            format!("exchange unavailable (HTTP {status})"),
        )),
        _ => None,
    }
}

fn transport_error(error: HttpError) -> SourceError {
    let cause = if error.is_timeout() {
        TransientCause::Timeout
    } else {
        TransientCause::Network
    };
    SourceError::transient(cause, format!("transport error: {}", error.message())).with_cause(error)
}

/// Decodes a JSON body; anything undecodable is an `InvalidResponse`.
pub(crate) fn decode_json<T: DeserializeOwned>(body: &str, what: &str) -> Result<T, SourceError> {
    serde_json::from_str(body).map_err(|error| {
        SourceError::invalid_response(format!("malformed {what} payload: {error}")).with_cause(error)
    })
}

pub(crate) fn parse_decimal(raw: &str) -> Result<Decimal, rust_decimal::Error> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Decimal::ZERO);
    }
    Decimal::from_str(trimmed).or_else(|_| Decimal::from_scientific(trimmed))
}

fn value_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(raw) => parse_decimal(raw).ok(),
        Value::Number(number) => parse_decimal(&number.to_string()).ok(),
        Value::Null => Some(Decimal::ZERO),
        _ => None,
    }
}

fn value_millis(value: &Value) -> Option<i64> {
    match value {
        Value::String(raw) => raw.trim().parse().ok(),
        Value::Number(number) => number.as_i64(),
        _ => None,
    }
}

/// Builds a candle from a positional row `[time, open, high, low, close, volume?, ..]`.
/// Rows without a volume column (index and mark candles) get zero volume.
pub(crate) fn kline_from_row(row: &[Value], has_volume: bool) -> Result<Kline, SourceError> {
    let malformed = || SourceError::invalid_response(format!("malformed kline row: {row:?}"));
    let minimum = if has_volume { 6 } else { 5 };
    if row.len() < minimum {
        return Err(malformed());
    }

    let open_time = value_millis(&row[0]).ok_or_else(malformed)?;
    let price = |index: usize| value_decimal(&row[index]).ok_or_else(malformed);
    let volume = if has_volume { price(5)? } else { Decimal::ZERO };

    Ok(Kline::new(
        open_time,
        price(1)?,
        price(2)?,
        price(3)?,
        price(4)?,
        volume,
    ))
}

pub(crate) fn klines_from_rows(rows: &[Vec<Value>], has_volume: bool) -> Result<Vec<Kline>, SourceError> {
    rows.iter()
        .map(|row| kline_from_row(row, has_volume))
        .collect()
}

/// Ascending, de-duplicated and at most `limit` long. When the venue sends
/// more than asked the newest candles win unless the window is anchored at
/// its start.
pub(crate) fn finish_klines(klines: Vec<Kline>, limit: u32, anchored_at_start: bool) -> Vec<Kline> {
    let mut klines = normalize_klines(klines);
    let limit = limit as usize;
    if klines.len() > limit {
        if anchored_at_start {
            klines.truncate(limit);
        } else {
            let excess = klines.len() - limit;
            klines.drain(..excess);
        }
    }
    klines
}

pub(crate) fn now_millis() -> i64 {
    crate::UtcDateTime::now().unix_millis()
}

/// Decimal field that may arrive as a JSON string or number; empty means zero.
pub(crate) fn de_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_decimal(&value).ok_or_else(|| D::Error::custom(format!("invalid decimal value {value}")))
}

pub(crate) fn de_opt_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) if raw.trim().is_empty() => Ok(None),
        Some(value) => value_decimal(&value)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid decimal value {value}"))),
    }
}

/// Millisecond timestamp that may arrive as a JSON string or number.
pub(crate) fn de_millis<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_millis(&value).ok_or_else(|| D::Error::custom(format!("invalid timestamp {value}")))
}

pub(crate) fn de_opt_millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) if raw.trim().is_empty() || raw.trim() == "0" => Ok(None),
        Some(Value::Number(number)) if number.as_i64() == Some(0) => Ok(None),
        Some(value) => value_millis(&value)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid timestamp {value}"))),
    }
}
