//! Wall-clock capability.
//!
//! Cache freshness and reminder matching both read time through [`Clock`] so
//! that tests can drive them with a [`ManualClock`].

use std::sync::Mutex;

use chrono::{DateTime, FixedOffset, Local, TimeDelta};

use crate::cache::lock::mutex_lock;

const SOURCE: &str = "infra::clock";

pub trait Clock: Send + Sync {
    /// Current local wall-clock time, with the host's UTC offset.
    fn now(&self) -> DateTime<FixedOffset>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<FixedOffset>>,
}

impl ManualClock {
    pub fn new(start: DateTime<FixedOffset>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, value: DateTime<FixedOffset>) {
        *mutex_lock(&self.now, SOURCE, "set") = value;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = mutex_lock(&self.now, SOURCE, "advance");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<FixedOffset> {
        *mutex_lock(&self.now, SOURCE, "now")
    }
}
