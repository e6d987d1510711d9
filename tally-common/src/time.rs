//! Utilities to deal with wall clock time.

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Returns the milliseconds elapsed since the UNIX epoch.
pub fn now_millis() -> u64 {
    millis_from_system(SystemTime::now())
}

/// Converts a system time into milliseconds since the UNIX epoch.
///
/// Times before the epoch are clamped to `0`.
pub fn millis_from_system(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A unix timestamp (full seconds elapsed since 1970-01-01 00:00 UTC).
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(transparent)]
pub struct UnixTimestamp(u64);

impl UnixTimestamp {
    /// Creates a unix timestamp from the given number of seconds.
    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Creates a unix timestamp from milliseconds, rounding to the nearest second.
    ///
    /// ```
    /// use tally_common::UnixTimestamp;
    ///
    /// assert_eq!(UnixTimestamp::from_millis(1_499).as_secs(), 1);
    /// assert_eq!(UnixTimestamp::from_millis(1_500).as_secs(), 2);
    /// ```
    pub fn from_millis(millis: u64) -> Self {
        Self((millis + 500) / 1000)
    }

    /// Creates a unix timestamp from the given system time.
    pub fn from_system(time: SystemTime) -> Self {
        Self::from_millis(millis_from_system(time))
    }

    /// Returns the current timestamp.
    #[inline]
    pub fn now() -> Self {
        Self::from_system(SystemTime::now())
    }

    /// Returns the number of seconds since the UNIX epoch start.
    pub fn as_secs(self) -> u64 {
        self.0
    }

    /// Returns the number of whole seconds between `earlier` and this timestamp.
    ///
    /// Returns `0` if `earlier` is after this timestamp.
    pub fn secs_since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Debug for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnixTimestamp({})", self.as_secs())
    }
}

impl fmt::Display for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_secs().fmt(f)
    }
}

impl std::ops::Sub for UnixTimestamp {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Self::Output {
        Duration::from_secs(self.secs_since(rhs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_millis_rounds_half_up() {
        assert_eq!(UnixTimestamp::from_millis(0).as_secs(), 0);
        assert_eq!(UnixTimestamp::from_millis(999).as_secs(), 1);
        assert_eq!(UnixTimestamp::from_millis(10_499).as_secs(), 10);
        assert_eq!(UnixTimestamp::from_millis(10_500).as_secs(), 11);
    }

    #[test]
    fn test_secs_since_saturates() {
        let early = UnixTimestamp::from_secs(10);
        let late = UnixTimestamp::from_secs(25);
        assert_eq!(late.secs_since(early), 15);
        assert_eq!(early.secs_since(late), 0);
        assert_eq!(late - early, Duration::from_secs(15));
    }

    #[test]
    fn test_serde_transparent() {
        let ts = UnixTimestamp::from_secs(4711);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "4711");
        let parsed: UnixTimestamp = serde_json::from_str("4711").unwrap();
        assert_eq!(parsed, ts);
    }
}
