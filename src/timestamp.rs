//! The `timestamp` primitive: a signed count of milliseconds since the Unix
//! epoch, clamped to the range representable by every supported host.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// An instant in time with millisecond precision.
///
/// Construction clamps to `[Timestamp::MIN, Timestamp::MAX]`, so every value
/// of this type is valid; out-of-range arithmetic saturates instead of
/// erroring. With serde, a timestamp is its millisecond count.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(from = "i64", into = "i64")]
pub struct Timestamp {
    unix_millis: i64,
}

impl Timestamp {
    /// The earliest representable instant.
    pub const MIN: Timestamp = Timestamp {
        unix_millis: -8_640_000_000_000_000,
    };

    /// The latest representable instant.
    pub const MAX: Timestamp = Timestamp {
        unix_millis: 8_640_000_000_000_000,
    };

    /// 1970-01-01T00:00:00Z, the default value.
    pub const UNIX_EPOCH: Timestamp = Timestamp { unix_millis: 0 };

    /// Builds a timestamp from a millisecond count, clamping to the
    /// representable range.
    pub fn from_unix_millis(unix_millis: i64) -> Timestamp {
        Timestamp {
            unix_millis: unix_millis.clamp(Self::MIN.unix_millis, Self::MAX.unix_millis),
        }
    }

    /// The current time, to millisecond precision.
    pub fn now() -> Timestamp {
        Timestamp::from_unix_millis(Utc::now().timestamp_millis())
    }

    /// Milliseconds since the Unix epoch.
    pub fn unix_millis(self) -> i64 {
        self.unix_millis
    }

    /// Converts to a [`chrono`] datetime. Returns `None` for the handful of
    /// extreme values outside chrono's supported year range.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.unix_millis).single()
    }

    /// The ISO-8601 UTC rendering used by readable JSON, e.g.
    /// `2023-08-25T21:30:34.586Z`. Values beyond chrono's year range render
    /// as their raw millisecond count.
    pub(crate) fn formatted(self) -> String {
        match self.to_datetime() {
            Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            None => self.unix_millis.to_string(),
        }
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Timestamp {
        Timestamp::from_unix_millis(dt.timestamp_millis())
    }
}

impl From<i64> for Timestamp {
    fn from(unix_millis: i64) -> Timestamp {
        Timestamp::from_unix_millis(unix_millis)
    }
}

impl From<Timestamp> for i64 {
    fn from(ts: Timestamp) -> i64 {
        ts.unix_millis
    }
}

impl core::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.formatted())
    }
}
