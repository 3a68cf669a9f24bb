//! Clock used for indexing time windows.

use chrono::{DateTime, Days, Local, NaiveDate, TimeZone, Utc};

/// Milliseconds per day.
pub const DAY_IN_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// Source of the current time.
pub trait DateProvider: Send + Sync {
    /// Current time in milliseconds since the epoch.
    fn now(&self) -> i64;

    /// Start of the day `days` days from today, in milliseconds since the epoch.
    fn start_of_day_shifted_by(&self, days: i64) -> i64;
}

/// The system clock in the local time zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDateProvider;

impl DateProvider for SystemDateProvider {
    fn now(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn start_of_day_shifted_by(&self, days: i64) -> i64 {
        start_of_day_shifted_by(Local::now().date_naive(), days, &Local)
            .unwrap_or_else(|| self.now())
    }
}

/// A clock frozen at one instant, in UTC.
#[derive(Debug, Clone, Copy)]
pub struct FixedDateProvider {
    now: i64,
}

impl FixedDateProvider {
    /// Clock frozen at `now` milliseconds since the epoch.
    #[must_use]
    pub const fn new(now: i64) -> Self {
        Self { now }
    }
}

impl DateProvider for FixedDateProvider {
    fn now(&self) -> i64 {
        self.now
    }

    fn start_of_day_shifted_by(&self, days: i64) -> i64 {
        DateTime::from_timestamp_millis(self.now)
            .and_then(|now| start_of_day_shifted_by(now.date_naive(), days, &Utc))
            .unwrap_or(self.now)
    }
}

fn start_of_day_shifted_by<Tz: TimeZone>(today: NaiveDate, days: i64, tz: &Tz) -> Option<i64> {
    let shift = Days::new(days.unsigned_abs());
    let day = if days >= 0 {
        today.checked_add_days(shift)?
    } else {
        today.checked_sub_days(shift)?
    };
    let midnight = day.and_hms_opt(0, 0, 0)?;
    tz.from_local_datetime(&midnight)
        .earliest()
        .map(|start| start.timestamp_millis())
}
