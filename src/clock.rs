//! Clock abstraction so timestamps in records, snapshots and logs are testable.

use chrono::{DateTime, Utc};

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    /// Get the current UTC time.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Milliseconds since the Unix epoch, used to key log entries.
    fn now_millis(&self) -> i64 {
        self.now_utc().timestamp_millis()
    }

    /// Filesystem-safe timestamp used to name backup snapshots.
    ///
    /// Example: `2025-01-15T12-00-00-000Z`
    fn stamp(&self) -> String {
        self.now_utc().format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string()
    }
}

/// System clock using actual wall time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a fixed instant, advanced by hand.
#[cfg(any(test, feature = "test-seams"))]
#[derive(Debug)]
pub struct MockClock {
    now: std::sync::RwLock<DateTime<Utc>>,
}

#[cfg(any(test, feature = "test-seams"))]
impl MockClock {
    /// Create a mock clock frozen at the given time.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::RwLock::new(now),
        }
    }

    /// Create a mock clock from an RFC 3339 string.
    pub fn from_rfc3339(s: &str) -> Result<Self, chrono::ParseError> {
        let now = DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc);
        Ok(Self::new(now))
    }

    /// Advance the clock by a duration.
    ///
    /// Takes `&self` so a clock shared behind an `Arc` can still be moved
    /// forward between operations.
    pub fn advance(&self, duration: chrono::Duration) {
        if let Ok(mut guard) = self.now.write() {
            *guard += duration;
        }
    }
}

#[cfg(any(test, feature = "test-seams"))]
impl Clock for MockClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.now.read().map(|g| *g).unwrap_or_else(|p| *p.into_inner())
    }
}
