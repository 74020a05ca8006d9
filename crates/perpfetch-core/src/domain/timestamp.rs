use std::fmt::{Display, Formatter};

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

use crate::ValidationError;

const NANOS_PER_MILLI: i128 = 1_000_000;

/// UTC instant at millisecond precision, the resolution every exchange
/// uses for window bounds. Sub-millisecond input is truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UtcDateTime(OffsetDateTime);

impl UtcDateTime {
    pub fn now() -> Self {
        Self(truncate_to_millis(OffsetDateTime::now_utc()))
    }

    /// Accepts RFC3339 with a `Z` suffix, or a bare unix millisecond count.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if !trimmed.is_empty() && trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
            let millis = trimmed
                .parse::<i64>()
                .map_err(|_| ValidationError::TimestampNotUtc {
                    value: input.to_owned(),
                })?;
            return Self::from_unix_millis(millis);
        }

        OffsetDateTime::parse(trimmed, &Rfc3339)
            .ok()
            .and_then(|parsed| Self::from_offset_datetime(parsed).ok())
            .ok_or_else(|| ValidationError::TimestampNotUtc {
                value: input.to_owned(),
            })
    }

    pub fn from_offset_datetime(value: OffsetDateTime) -> Result<Self, ValidationError> {
        if value.offset() != UtcOffset::UTC {
            return Err(ValidationError::TimestampNotUtc {
                value: value.to_string(),
            });
        }
        Ok(Self(truncate_to_millis(value)))
    }

    pub fn from_unix_millis(millis: i64) -> Result<Self, ValidationError> {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * NANOS_PER_MILLI)
            .map(Self)
            .map_err(|_| ValidationError::TimestampOutOfRange { value: millis })
    }

    pub fn unix_millis(self) -> i64 {
        i64::try_from(self.0.unix_timestamp_nanos() / NANOS_PER_MILLI).unwrap_or(i64::MAX)
    }

    pub fn into_inner(self) -> OffsetDateTime {
        self.0
    }

    pub fn format_rfc3339(self) -> String {
        self.0
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.unix_millis().to_string())
    }
}

fn truncate_to_millis(value: OffsetDateTime) -> OffsetDateTime {
    let millis = value.millisecond();
    value
        .replace_millisecond(millis)
        .unwrap_or(value)
}

impl Display for UtcDateTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format_rfc3339())
    }
}

impl Serialize for UtcDateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.format_rfc3339())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Text(String),
}

impl<'de> Deserialize<'de> for UtcDateTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match RawTimestamp::deserialize(deserializer)? {
            RawTimestamp::Millis(millis) => Self::from_unix_millis(millis),
            RawTimestamp::Text(text) => Self::parse(&text),
        }
        .map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_and_millis_forms_agree() {
        let text = UtcDateTime::parse("2024-01-01T00:00:00Z").expect("rfc3339");
        let millis = UtcDateTime::parse("1704067200000").expect("millis");

        assert_eq!(text, millis);
        assert_eq!(text.unix_millis(), 1_704_067_200_000);
        assert_eq!(millis.format_rfc3339(), "2024-01-01T00:00:00Z");
    }

    #[test]
    fn offsets_other_than_utc_are_rejected() {
        let err = UtcDateTime::parse("2024-01-01T01:00:00+01:00").expect_err("must fail");
        assert!(matches!(err, ValidationError::TimestampNotUtc { .. }));
    }

    #[test]
    fn sub_millisecond_precision_is_dropped() {
        let ts = UtcDateTime::parse("2024-01-01T00:00:00.123456789Z").expect("parses");
        assert_eq!(ts.unix_millis(), 1_704_067_200_123);
        assert_eq!(ts.into_inner().nanosecond(), 123_000_000);
    }

    #[test]
    fn deserializes_from_string_or_integer() {
        let from_int: UtcDateTime = serde_json::from_str("1700000123456").expect("integer");
        let from_str: UtcDateTime =
            serde_json::from_str("\"2023-11-14T22:15:23.456Z\"").expect("string");
        assert_eq!(from_int, from_str);
    }
}
