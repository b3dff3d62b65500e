//! Food diary writes and the diary view loader.

use async_trait::async_trait;
use chrono::NaiveDate;
use nutrisync_api_types::{MealEntry, MealWrite};
use tracing::debug;

use crate::events::{DiaryChange, EventBus};

use super::client::ApiClient;
use super::error::ApiError;
use super::refresh::ViewLoader;

pub const MEALS_PATH: &str = "/api/meals/";

/// Diary mutations. Each one announces `DiaryUpdated` once the write has
/// completed, whether it succeeded or not.
#[derive(Clone)]
pub struct DiaryService {
    client: ApiClient,
    bus: EventBus,
}

impl DiaryService {
    pub fn new(client: ApiClient, bus: EventBus) -> Self {
        Self { client, bus }
    }

    pub async fn meals_on(&self, date: NaiveDate) -> Result<Vec<MealEntry>, ApiError> {
        let date = date.to_string();
        self.client.get(MEALS_PATH, &[("date", date.as_str())]).await
    }

    pub async fn add_meal(&self, meal: &MealWrite) -> Result<MealEntry, ApiError> {
        let result = self.client.post(MEALS_PATH, meal).await;
        self.announce(meal.date);
        result
    }

    pub async fn update_meal(&self, id: u64, meal: &MealWrite) -> Result<MealEntry, ApiError> {
        let result = self.client.put(&meal_path(id), meal).await;
        self.announce(meal.date);
        result
    }

    pub async fn delete_meal(&self, id: u64, date: NaiveDate) -> Result<(), ApiError> {
        let result = self.client.delete(&meal_path(id)).await;
        self.announce(date);
        result
    }

    fn announce(&self, date: NaiveDate) {
        let delivered = self.bus.publish_payload(&DiaryChange { date });
        debug!(%date, delivered, "diary change announced");
    }
}

fn meal_path(id: u64) -> String {
    format!("{MEALS_PATH}{id}/")
}

/// Meals for one day, as the diary view shows them.
pub struct DiaryLoader {
    client: ApiClient,
    date: NaiveDate,
}

impl DiaryLoader {
    pub fn new(client: ApiClient, date: NaiveDate) -> Self {
        Self { client, date }
    }
}

#[async_trait]
impl ViewLoader for DiaryLoader {
    type State = Vec<MealEntry>;

    async fn load(&self) -> Result<Vec<MealEntry>, ApiError> {
        let date = self.date.to_string();
        self.client.get(MEALS_PATH, &[("date", date.as_str())]).await
    }
}
