//! Signal catalogue.
//!
//! Signals are named change notifications. Each name may carry an optional
//! payload whose shape is versioned per name, independently of the others.
//! A subscriber that does not recognise the payload (missing, other version,
//! wrong shape) gets [`Payload::Refetch`] and must reload from the server.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use nutrisync_api_types::{FastingSession, FastingSettings, WaterIntake, WaterSettings};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Monotonic epoch for ordering signals within this process.
pub type Epoch = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalName {
    DiaryUpdated,
    WaterUpdated,
    WaterSettingsUpdated,
    FastingUpdated,
    FastingSettingsUpdated,
    WeightUpdated,
    ReminderSettingsUpdated,
    ThemeChanged,
}

impl SignalName {
    pub const ALL: [SignalName; 8] = [
        SignalName::DiaryUpdated,
        SignalName::WaterUpdated,
        SignalName::WaterSettingsUpdated,
        SignalName::FastingUpdated,
        SignalName::FastingSettingsUpdated,
        SignalName::WeightUpdated,
        SignalName::ReminderSettingsUpdated,
        SignalName::ThemeChanged,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SignalName::DiaryUpdated => "diaryUpdated",
            SignalName::WaterUpdated => "waterUpdated",
            SignalName::WaterSettingsUpdated => "waterSettingsUpdated",
            SignalName::FastingUpdated => "fastingUpdated",
            SignalName::FastingSettingsUpdated => "fastingSettingsUpdated",
            SignalName::WeightUpdated => "weightUpdated",
            SignalName::ReminderSettingsUpdated => "reminderSettingsUpdated",
            SignalName::ThemeChanged => "themeChanged",
        }
    }
}

impl fmt::Display for SignalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown signal `{0}`")]
pub struct UnknownSignal(pub String);

impl FromStr for SignalName {
    type Err = UnknownSignal;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        SignalName::ALL
            .into_iter()
            .find(|name| name.as_str() == value)
            .ok_or_else(|| UnknownSignal(value.to_string()))
    }
}

/// Versioned payload attached to a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detail {
    pub version: u32,
    pub body: Value,
}

/// A payload shape bound to one signal name and version.
pub trait SignalPayload: Serialize + DeserializeOwned {
    const NAME: SignalName;
    const VERSION: u32;
}

/// Result of reading a signal's payload as a given shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload<P> {
    Known(P),
    /// Payload missing or not understood: reload from the source of truth.
    Refetch,
}

impl<P> Payload<P> {
    pub fn known(self) -> Option<P> {
        match self {
            Payload::Known(payload) => Some(payload),
            Payload::Refetch => None,
        }
    }
}

/// A delivered change signal.
#[derive(Debug, Clone)]
pub struct Signal {
    pub id: Uuid,
    pub epoch: Epoch,
    pub name: SignalName,
    pub detail: Option<Detail>,
    pub emitted_at: DateTime<Utc>,
}

impl Signal {
    pub(crate) fn new(name: SignalName, detail: Option<Detail>, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            name,
            detail,
            emitted_at: Utc::now(),
        }
    }

    /// Decode the payload as `P`. Anything but an exact name/version/shape
    /// match yields [`Payload::Refetch`].
    pub fn decode<P: SignalPayload>(&self) -> Payload<P> {
        if self.name != P::NAME {
            return Payload::Refetch;
        }
        match &self.detail {
            Some(detail) if detail.version == P::VERSION => {
                serde_json::from_value(detail.body.clone())
                    .map(Payload::Known)
                    .unwrap_or(Payload::Refetch)
            }
            _ => Payload::Refetch,
        }
    }
}

/// Encode a payload for its signal. `None` if it does not serialize to JSON.
pub fn detail_for<P: SignalPayload>(payload: &P) -> Option<Detail> {
    serde_json::to_value(payload).ok().map(|body| Detail {
        version: P::VERSION,
        body,
    })
}

/// A diary write touched this date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiaryChange {
    pub date: NaiveDate,
}

impl SignalPayload for DiaryChange {
    const NAME: SignalName = SignalName::DiaryUpdated;
    const VERSION: u32 = 1;
}

/// Fasting state after a start or end; `None` when no session is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastingChange {
    pub active: Option<FastingSession>,
}

impl SignalPayload for FastingChange {
    const NAME: SignalName = SignalName::FastingUpdated;
    const VERSION: u32 = 1;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemePreference {
    pub preference: String,
}

impl SignalPayload for ThemePreference {
    const NAME: SignalName = SignalName::ThemeChanged;
    const VERSION: u32 = 1;
}

impl SignalPayload for WaterIntake {
    const NAME: SignalName = SignalName::WaterUpdated;
    const VERSION: u32 = 1;
}

impl SignalPayload for WaterSettings {
    const NAME: SignalName = SignalName::WaterSettingsUpdated;
    const VERSION: u32 = 1;
}

impl SignalPayload for FastingSettings {
    const NAME: SignalName = SignalName::FastingSettingsUpdated;
    const VERSION: u32 = 1;
}
