use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

/// Time zone the portal renders its month labels in.
pub const PORTAL_TZ: Tz = chrono_tz::Europe::Paris;

/// Abstraction over "current time" so planning is deterministic in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Calendar date on the portal side (Europe/Paris).
    fn today(&self) -> NaiveDate {
        self.now().with_timezone(&PORTAL_TZ).date_naive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
pub struct FixedClock {
    now: DateTime<Utc>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}
