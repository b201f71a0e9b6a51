//! Reference time for the status engine.
//!
//! The whole deployment runs in one fixed timezone; event boundaries are
//! persisted as naive local datetimes with no offset. The clock is the
//! single place that normalisation happens.

use chrono::{FixedOffset, NaiveDateTime, Utc};

/// Supplies the current instant, normalised to the deployment timezone.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Wall clock shifted to a fixed offset from UTC.
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    /// `offset_minutes` is the deployment's offset east of UTC
    /// (e.g. 330 for +05:30).
    pub fn new(offset_minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(offset_minutes * 60).map(|offset| Self { offset })
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.offset).naive_local()
    }
}

/// Clock pinned to a settable instant, for tests.
#[cfg(test)]
pub struct FixedClock(std::sync::Mutex<NaiveDateTime>);

#[cfg(test)]
impl FixedClock {
    pub fn at(instant: NaiveDateTime) -> Self {
        Self(std::sync::Mutex::new(instant))
    }

    pub fn set(&self, instant: NaiveDateTime) {
        *self.0.lock().unwrap() = instant;
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.0.lock().unwrap()
    }
}
