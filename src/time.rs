//! Time source: current wall-clock time in a given zone.
//!
//! "Now" comes from an injected [`Clock`] so the update cycle can be driven
//! deterministically in tests.

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use std::fmt;
use std::str::FromStr;

use crate::error::{ClockError, Result};

/// Source of the current instant
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock of the host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a single instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Resolve an IANA zone identifier such as `Europe/London`
pub fn parse_zone(id: &str) -> Result<Tz> {
    id.trim()
        .parse::<Tz>()
        .map_err(|_| ClockError::UnknownTimeZone(id.to_string()))
}

/// Render an instant in the civil calendar of `zone`
pub fn zone_time(instant: DateTime<Utc>, zone: Tz) -> DateTime<Tz> {
    instant.with_timezone(&zone)
}

/// Current time in `zone` according to the system clock
pub fn now_in(zone: Tz) -> DateTime<Tz> {
    zone_time(SystemClock.now(), zone)
}

/// Hour and minute at which the reminder fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetTime {
    hour: u32,
    minute: u32,
}

impl TargetTime {
    pub fn new(hour: u32, minute: u32) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(ClockError::InvalidTargetTime(format!("{}:{:02}", hour, minute)));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    /// True when the wall-clock hour and minute of `time` equal the target
    pub fn matches<T: Timelike>(&self, time: &T) -> bool {
        time.hour() == self.hour && time.minute() == self.minute
    }
}

impl FromStr for TargetTime {
    type Err = ClockError;

    /// Accepts `HH:MM` and `HH:MM:SS`; seconds are validated and dropped
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ClockError::InvalidTargetTime(s.to_string());

        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(invalid());
        }

        let mut fields = [0u32; 3];
        for (slot, part) in fields.iter_mut().zip(&parts) {
            if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            *slot = part.parse().map_err(|_| invalid())?;
        }

        if fields[2] > 59 {
            return Err(invalid());
        }
        Self::new(fields[0], fields[1]).map_err(|_| invalid())
    }
}

impl fmt::Display for TargetTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}", self.hour, self.minute)
    }
}



/// Kani formal verification proofs
#[cfg(kani)]
mod kani_proofs {
    use super::*;

    #[kani::proof]
    fn target_time_new_enforces_range() {
        let hour: u32 = kani::any();
        let minute: u32 = kani::any();
        let result = TargetTime::new(hour, minute);
        kani::assert(
            result.is_ok() == (hour < 24 && minute < 60),
            "target accepted iff hour and minute are in range",
        );
    }
}
