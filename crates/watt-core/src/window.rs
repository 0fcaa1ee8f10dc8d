//! Window alignment for rollup resolutions and local calendar days

use chrono::{Days, FixedOffset, NaiveDate, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::{tables, Timestamp};

#[derive(Debug, thiserror::Error)]
pub enum WindowError {
    #[error("Local day {0} has no valid start")]
    NoDayStart(NaiveDate),

    #[error("Day arithmetic out of range from {0}")]
    DayOutOfRange(NaiveDate),

    #[error("Timestamp out of range: {0}")]
    OutOfRange(Timestamp),

    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),
}

/// Rollup resolutions, finest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "1m")]
    Minute,
    #[serde(rename = "15m")]
    QuarterHour,
    #[serde(rename = "1h")]
    Hour,
}

impl Resolution {
    /// Build order: each level consumes the one before it
    pub const ALL: [Resolution; 3] = [Resolution::Minute, Resolution::QuarterHour, Resolution::Hour];

    /// Window length in seconds
    pub fn seconds(&self) -> i64 {
        match self {
            Resolution::Minute => 60,
            Resolution::QuarterHour => 15 * 60,
            Resolution::Hour => 60 * 60,
        }
    }

    /// Level this one is rolled up from; `None` means raw samples
    pub fn source(&self) -> Option<Resolution> {
        match self {
            Resolution::Minute => None,
            Resolution::QuarterHour => Some(Resolution::Minute),
            Resolution::Hour => Some(Resolution::QuarterHour),
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Resolution::Minute => tables::ROLLUP_1M,
            Resolution::QuarterHour => tables::ROLLUP_15M,
            Resolution::Hour => tables::ROLLUP_1H,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Resolution::Minute => "1m",
            Resolution::QuarterHour => "15m",
            Resolution::Hour => "1h",
        }
    }

    /// Start of the window containing `ts`
    pub fn floor(&self, ts: Timestamp) -> Timestamp {
        ts.div_euclid(self.seconds()) * self.seconds()
    }

    pub fn is_aligned(&self, ts: Timestamp) -> bool {
        ts.rem_euclid(self.seconds()) == 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Timezone that local calendar days are reckoned in.
///
/// Parses either a fixed offset ("+01:00") or an IANA name ("Europe/Berlin").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteTimezone {
    Fixed(FixedOffset),
    Named(Tz),
}

impl SiteTimezone {
    pub fn utc() -> Self {
        SiteTimezone::Named(Tz::UTC)
    }

    pub fn day_bounds(&self, day: NaiveDate) -> Result<(Timestamp, Timestamp), WindowError> {
        match self {
            SiteTimezone::Fixed(offset) => local_day_bounds(day, offset),
            SiteTimezone::Named(tz) => local_day_bounds(day, tz),
        }
    }

    pub fn day_of(&self, ts: Timestamp) -> Result<NaiveDate, WindowError> {
        match self {
            SiteTimezone::Fixed(offset) => local_day_of(ts, offset),
            SiteTimezone::Named(tz) => local_day_of(ts, tz),
        }
    }
}

impl Default for SiteTimezone {
    fn default() -> Self {
        Self::utc()
    }
}

impl FromStr for SiteTimezone {
    type Err = WindowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WindowError::InvalidTimezone(s.to_string());
        let trimmed = s.trim();
        if trimmed == "Z" {
            return Ok(Self::utc());
        }
        if trimmed.starts_with(['+', '-']) {
            return trimmed
                .parse::<FixedOffset>()
                .map(SiteTimezone::Fixed)
                .map_err(|_| invalid());
        }
        trimmed
            .parse::<Tz>()
            .map(SiteTimezone::Named)
            .map_err(|_| invalid())
    }
}

impl fmt::Display for SiteTimezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteTimezone::Fixed(offset) => write!(f, "{}", offset),
            SiteTimezone::Named(tz) => f.write_str(tz.name()),
        }
    }
}

/// UTC bounds `[start, end)` of a local calendar day.
///
/// DST days come out 23 or 25 hours long.
pub fn local_day_bounds<Z: TimeZone>(
    day: NaiveDate,
    tz: &Z,
) -> Result<(Timestamp, Timestamp), WindowError> {
    let start = day_start(day, tz)?;
    let next = day.succ_opt().ok_or(WindowError::DayOutOfRange(day))?;
    let end = day_start(next, tz)?;
    Ok((start, end))
}

/// Earliest instant of `day`. An ambiguous midnight resolves to its first
/// occurrence; a midnight inside a DST gap moves to the first valid hour.
fn day_start<Z: TimeZone>(day: NaiveDate, tz: &Z) -> Result<Timestamp, WindowError> {
    (0..24)
        .filter_map(|hour| day.and_hms_opt(hour, 0, 0))
        .find_map(|local| tz.from_local_datetime(&local).earliest())
        .map(|dt| dt.timestamp())
        .ok_or(WindowError::NoDayStart(day))
}

/// Local calendar day that `ts` falls on
pub fn local_day_of<Z: TimeZone>(ts: Timestamp, tz: &Z) -> Result<NaiveDate, WindowError> {
    tz.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.date_naive())
        .ok_or(WindowError::OutOfRange(ts))
}

/// `day` minus `days`, failing instead of panicking past the calendar range
pub fn days_before(day: NaiveDate, days: u64) -> Result<NaiveDate, WindowError> {
    day.checked_sub_days(Days::new(days))
        .ok_or(WindowError::DayOutOfRange(day))
}
