//! Time sources and duration parsing
//!
//! Reservation deadlines are computed from a [`Clock`] rather than calling
//! `Utc::now()` directly, so tests can drive time explicitly.
//!
//! - [`RuntimeClock`]: wall time anchored to tokio's timer. When the runtime
//!   clock is paused (`start_paused`, `tokio::time::advance`), this clock moves
//!   with it, keeping deadlines and timer wake-ups on the same time line.
//! - [`SystemClock`]: plain `Utc::now()`.
//! - [`ManualClock`]: only moves when told to.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

use crate::error::{Error, Result};

/// Source of the current time
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock time measured through `tokio::time::Instant`
#[derive(Debug, Clone, Copy)]
pub struct RuntimeClock {
    origin: DateTime<Utc>,
    start: tokio::time::Instant,
}

impl RuntimeClock {
    pub fn new() -> Self {
        Self {
            origin: Utc::now(),
            start: tokio::time::Instant::now(),
        }
    }
}

impl Default for RuntimeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for RuntimeClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Duration::from_std(self.start.elapsed()).unwrap_or(Duration::MAX);
        self.origin
            .checked_add_signed(elapsed)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Clock that only advances when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward by `by`
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// Duration Parsing
// =============================================================================

/// Parse a duration string like "5s", "250ms", "2m", "1h"
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();

    if s.is_empty() {
        return Err(Error::InvalidArgument("Duration cannot be empty".to_string()));
    }

    // Find where the number ends and unit begins
    let (num_str, unit) = if let Some(pos) = s.find(|c: char| !c.is_ascii_digit()) {
        (&s[..pos], &s[pos..])
    } else {
        // Assume seconds if no unit
        (s, "s")
    };

    let num: i64 = num_str.parse().map_err(|_| {
        Error::InvalidArgument(format!("Invalid duration number: {}", num_str))
    })?;

    let duration = match unit.trim().to_lowercase().as_str() {
        "ms" | "millis" | "milliseconds" => Duration::try_milliseconds(num),
        "s" | "sec" | "second" | "seconds" => Duration::try_seconds(num),
        "m" | "min" | "minute" | "minutes" => Duration::try_minutes(num),
        "h" | "hr" | "hour" | "hours" => Duration::try_hours(num),
        _ => {
            return Err(Error::InvalidArgument(format!(
                "Invalid duration unit '{}'. Expected: ms, s, m, h",
                unit
            )));
        }
    };

    duration.ok_or_else(|| Error::InvalidArgument(format!("Duration out of range: {}", s)))
}

/// Parse a duration string into a std duration for timers
pub fn parse_std_duration(s: &str) -> Result<std::time::Duration> {
    parse_duration(s)?
        .to_std()
        .map_err(|_| Error::InvalidArgument(format!("Duration out of range: {}", s)))
}
