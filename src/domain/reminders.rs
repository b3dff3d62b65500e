//! Meal reminder configuration and the at-most-once fire log.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike, Weekday};
use nutrisync_api_types::ReminderSettings;
use tracing::warn;

use super::error::DomainError;

const DEFAULT_BREAKFAST: ClockTime = ClockTime::new_unchecked(8, 0);
const DEFAULT_LUNCH: ClockTime = ClockTime::new_unchecked(13, 0);
const DEFAULT_DINNER: ClockTime = ClockTime::new_unchecked(19, 0);
const DEFAULT_SNACK: ClockTime = ClockTime::new_unchecked(15, 0);

/// Wall-clock time truncated to the minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime {
    hour: u8,
    minute: u8,
}

impl ClockTime {
    const fn new_unchecked(hour: u8, minute: u8) -> Self {
        Self { hour, minute }
    }

    pub fn new(hour: u8, minute: u8) -> Result<Self, DomainError> {
        if hour > 23 || minute > 59 {
            return Err(DomainError::invalid_clock_time(format!(
                "{hour:02}:{minute:02}"
            )));
        }
        Ok(Self { hour, minute })
    }

    /// Truncate a time of day to its minute. Seconds are discarded.
    pub fn from_time(time: NaiveTime) -> Self {
        // hour() < 24 and minute() < 60, both fit in u8
        Self {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
        }
    }

    pub fn hour(self) -> u8 {
        self.hour
    }

    pub fn minute(self) -> u8 {
        self.minute
    }
}

impl FromStr for ClockTime {
    type Err = DomainError;

    /// Accepts `HH:MM` and the server's `HH:MM:SS` form.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
            .map(Self::from_time)
            .map_err(|_| DomainError::invalid_clock_time(value))
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Days of the week on which reminders may fire. Index 0 is Monday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActiveDays(u8);

impl ActiveDays {
    pub const ALL: Self = Self(0b0111_1111);
    pub const NONE: Self = Self(0);
    pub const WEEKDAYS: Self = Self(0b0001_1111);

    pub fn from_indexes<I: IntoIterator<Item = u8>>(indexes: I) -> Result<Self, DomainError> {
        let mut bits = 0u8;
        for index in indexes {
            if index > 6 {
                return Err(DomainError::invalid_active_day(index.to_string()));
            }
            bits |= 1 << index;
        }
        Ok(Self(bits))
    }

    pub fn contains_index(self, index: u8) -> bool {
        index <= 6 && self.0 & (1 << index) != 0
    }

    pub fn contains(self, weekday: Weekday) -> bool {
        // num_days_from_monday() is always < 7
        self.contains_index(weekday.num_days_from_monday() as u8)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Parse a server-supplied list, dropping tokens that are not a day
    /// index instead of rejecting the whole list.
    pub fn from_list_lossy(value: &str) -> Self {
        let mut bits = 0u8;
        for part in value.split(',').map(str::trim).filter(|part| !part.is_empty()) {
            match part.parse::<u8>() {
                Ok(index) if index <= 6 => bits |= 1 << index,
                _ => warn!(token = part, list = value, "ignoring invalid active day"),
            }
        }
        Self(bits)
    }
}

impl FromStr for ActiveDays {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let indexes = value
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<u8>()
                    .map_err(|_| DomainError::invalid_active_day(part))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_indexes(indexes)
    }
}

/// One configured reminder, e.g. "Breakfast" at 08:00.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderEvent {
    pub name: String,
    pub time: ClockTime,
}

impl ReminderEvent {
    pub fn new(name: impl Into<String>, time: ClockTime) -> Self {
        Self {
            name: name.into(),
            time,
        }
    }

    /// Dedup key: event name plus configured time. Moving an event to another
    /// time yields a fresh key, so a rescheduled reminder may fire again that day.
    pub fn key(&self) -> EventKey {
        EventKey(format!("{}_{}", self.name, self.time))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey(String);

impl EventKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-owned reminder configuration, read-only on the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderConfig {
    pub enabled: bool,
    pub events: Vec<ReminderEvent>,
    pub active_days: ActiveDays,
    pub sound_enabled: bool,
    pub permission_granted: bool,
}

impl ReminderConfig {
    /// Events whose configured time equals `now`.
    pub fn due_at(&self, now: ClockTime) -> impl Iterator<Item = &ReminderEvent> {
        self.events.iter().filter(move |event| event.time == now)
    }
}

impl TryFrom<&ReminderSettings> for ReminderConfig {
    type Error = DomainError;

    fn try_from(settings: &ReminderSettings) -> Result<Self, Self::Error> {
        let meal = |name: &str, raw: Option<&String>, fallback: ClockTime| {
            let time = match raw.map(|value| value.trim()).filter(|value| !value.is_empty()) {
                Some(value) => value.parse()?,
                None => fallback,
            };
            Ok::<_, DomainError>(ReminderEvent::new(name, time))
        };

        Ok(Self {
            enabled: settings.reminders_enabled,
            events: vec![
                meal("Breakfast", settings.breakfast_time.as_ref(), DEFAULT_BREAKFAST)?,
                meal("Lunch", settings.lunch_time.as_ref(), DEFAULT_LUNCH)?,
                meal("Dinner", settings.dinner_time.as_ref(), DEFAULT_DINNER)?,
                meal("Snack", settings.snack_time.as_ref(), DEFAULT_SNACK)?,
            ],
            active_days: ActiveDays::from_list_lossy(&settings.active_days),
            sound_enabled: settings.sound_enabled,
            permission_granted: settings.browser_notifications,
        })
    }
}

/// Record of a dispatched reminder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireRecord {
    pub event_key: EventKey,
    pub fired_on: NaiveDate,
}

/// In-memory fire log. Holds at most one record per event key, so a key can
/// fire at most once per calendar date.
#[derive(Debug, Default)]
pub struct FireLog {
    last_fired: HashMap<EventKey, NaiveDate>,
}

impl FireLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_fired(&self, key: &EventKey, date: NaiveDate) -> bool {
        self.last_fired.get(key) == Some(&date)
    }

    /// Record a fire. Returns `None` when the key already fired on `date`.
    pub fn record(&mut self, key: EventKey, date: NaiveDate) -> Option<FireRecord> {
        if self.has_fired(&key, date) {
            return None;
        }
        self.last_fired.insert(key.clone(), date);
        Some(FireRecord {
            event_key: key,
            fired_on: date,
        })
    }

    /// Drop records from days before `today`.
    pub fn prune_before(&mut self, today: NaiveDate) {
        self.last_fired.retain(|_, fired_on| *fired_on >= today);
    }

    pub fn len(&self) -> usize {
        self.last_fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_fired.is_empty()
    }
}
