//! Request and response shapes for the nutrition tracker REST API.
//!
//! These types mirror the JSON the server emits. Fields the server may omit are
//! `Option` or carry a serde default so that older or partial payloads still decode.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// `/api/meal-reminders/my_settings/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderSettings {
    #[serde(default = "default_true")]
    pub reminders_enabled: bool,
    /// `HH:MM` or `HH:MM:SS`; `None` falls back to the meal's default time.
    #[serde(default)]
    pub breakfast_time: Option<String>,
    #[serde(default)]
    pub lunch_time: Option<String>,
    #[serde(default)]
    pub dinner_time: Option<String>,
    #[serde(default)]
    pub snack_time: Option<String>,
    /// Comma separated day indexes, 0 = Monday.
    #[serde(default = "default_active_days")]
    pub active_days: String,
    #[serde(default = "default_true")]
    pub browser_notifications: bool,
    #[serde(default)]
    pub sound_enabled: bool,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            reminders_enabled: true,
            breakfast_time: Some("08:00".to_string()),
            lunch_time: Some("13:00".to_string()),
            dinner_time: Some("19:00".to_string()),
            snack_time: Some("15:00".to_string()),
            active_days: default_active_days(),
            browser_notifications: true,
            sound_enabled: false,
        }
    }
}

/// `/api/water/today/?date=YYYY-MM-DD`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaterIntake {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    pub amount_ml: i64,
}

/// Body for both the additive POST and the absolute PUT on the water resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaterIntakeWrite {
    pub amount_ml: i64,
}

/// `/api/water-settings/my_settings/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaterSettings {
    pub daily_goal_ml: i64,
    #[serde(default = "default_water_unit")]
    pub unit: String,
    #[serde(default = "default_true")]
    pub widget_enabled: bool,
}

/// A fasting session as returned by `/api/fasting/start/` and `/api/fasting/active/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastingSession {
    pub id: u64,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

/// `/api/fasting-settings/my_settings/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastingSettings {
    pub protocol: String,
    #[serde(default)]
    pub custom_fasting_hours: Option<u32>,
    #[serde(default = "default_true")]
    pub widget_enabled: bool,
}

/// Body sent to `/api/meals/` when creating or editing a diary entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealWrite {
    pub food_id: u64,
    pub meal_type: String,
    pub quantity: f64,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A diary entry as returned by `/api/meals/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealEntry {
    pub id: u64,
    pub meal_type: String,
    pub quantity: f64,
    pub date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NutritionTotals {
    #[serde(default)]
    pub calories: f64,
    #[serde(default)]
    pub protein: f64,
    #[serde(default)]
    pub carbs: f64,
    #[serde(default)]
    pub fat: f64,
}

/// `/api/daily-summary/?date=YYYY-MM-DD`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub totals: NutritionTotals,
    #[serde(default)]
    pub goals: Option<NutritionTotals>,
    #[serde(default)]
    pub meals: Vec<MealEntry>,
}

/// Error body the server attaches to 4xx/5xx responses, when it attaches one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ApiErrorBody {
    /// First human-readable message the server supplied.
    pub fn text(&self) -> Option<&str> {
        self.error
            .as_deref()
            .or(self.detail.as_deref())
            .or(self.message.as_deref())
    }
}

fn default_true() -> bool {
    true
}

fn default_active_days() -> String {
    "0,1,2,3,4,5,6".to_string()
}

fn default_water_unit() -> String {
    "fl_oz".to_string()
}
