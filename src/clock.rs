use chrono::{DateTime, Duration, Utc};

/// Offset of the civil calendar that keys every daily record (UTC+8).
pub const UTC_OFFSET_HOURS: i64 = 8;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Source of "today" for the luck service.
pub trait Clock: Send + Sync {
    /// Current civil date as `YYYY-MM-DD`.
    fn today(&self) -> String;
}

/// Wall clock shifted into UTC+8, regardless of the host timezone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> String {
        civil_date(Utc::now())
    }
}

/// Always reports the same date. Used by tests and replays.
#[derive(Debug, Clone)]
pub struct FixedClock(pub String);

impl FixedClock {
    pub fn new(date: impl Into<String>) -> Self {
        FixedClock(date.into())
    }
}

impl Clock for FixedClock {
    fn today(&self) -> String {
        self.0.clone()
    }
}

pub fn civil_date(now: DateTime<Utc>) -> String {
    (now + Duration::hours(UTC_OFFSET_HOURS))
        .format(DATE_FORMAT)
        .to_string()
}
