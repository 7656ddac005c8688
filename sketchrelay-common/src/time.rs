//! Utilities to deal with timestamps and durations.

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// A unix timestamp in milliseconds elapsed since 1970-01-01 00:00 UTC.
///
/// Every sample collected within one scrape cycle carries the same timestamp, assigned when the
/// cycle starts.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UnixTimestamp(i64);

impl UnixTimestamp {
    /// Creates a unix timestamp from the given number of milliseconds.
    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Creates a unix timestamp from the given system time.
    ///
    /// Times before the epoch are clamped to zero.
    pub fn from_system(time: SystemTime) -> Self {
        let millis = time
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();

        Self(i64::try_from(millis).unwrap_or(i64::MAX))
    }

    /// Returns the current timestamp.
    #[inline]
    pub fn now() -> Self {
        Self::from_system(SystemTime::now())
    }

    /// Returns the number of milliseconds since the UNIX epoch start.
    pub fn as_millis(self) -> i64 {
        self.0
    }
}

impl fmt::Debug for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnixTimestamp({})", self.as_millis())
    }
}

impl fmt::Display for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_millis().fmt(f)
    }
}

impl Serialize for UnixTimestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i64(self.as_millis())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let millis = i64::deserialize(deserializer)?;
        Ok(Self::from_millis(millis))
    }
}

/// An error returned from [`parse_duration`].
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseDurationError {
    /// The input was empty.
    #[error("empty duration")]
    Empty,
    /// The numeric part could not be parsed.
    #[error("invalid number in duration {0:?}")]
    InvalidNumber(String),
    /// The unit suffix is not one of `ms`, `s`, `m`, `h`.
    #[error("unknown unit in duration {0:?}")]
    UnknownUnit(String),
}

/// Parses a duration string such as `500ms`, `10s`, `1.5m` or `1h`.
///
/// A plain number without a unit is interpreted as seconds. Negative and non-finite values are
/// rejected.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use sketchrelay_common::parse_duration;
///
/// assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
/// assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
/// assert!(parse_duration("ten seconds").is_err());
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, ParseDurationError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ParseDurationError::Empty);
    }

    let split = s
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);

    let to_secs: fn(f64) -> f64 = match unit {
        "ms" => |v| v / 1000.0,
        "" | "s" => |v| v,
        "m" => |v| v * 60.0,
        "h" => |v| v * 3600.0,
        _ => return Err(ParseDurationError::UnknownUnit(s.to_owned())),
    };

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| ParseDurationError::InvalidNumber(s.to_owned()))?;

    Duration::try_from_secs_f64(to_secs(value))
        .map_err(|_| ParseDurationError::InvalidNumber(s.to_owned()))
}
