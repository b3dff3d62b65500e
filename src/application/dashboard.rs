//! Dashboard view: the daily summary, kept fresh by a refresh coordinator.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use nutrisync_api_types::DailySummary;

use crate::events::{EventBus, SignalName};

use super::client::ApiClient;
use super::error::ApiError;
use super::refresh::{InFlightFetches, RefreshCoordinator, ViewLoader};

pub const DAILY_SUMMARY_PATH: &str = "/api/daily-summary/";

/// Signals after which the dashboard totals may be out of date.
pub const DASHBOARD_SIGNALS: [SignalName; 4] = [
    SignalName::DiaryUpdated,
    SignalName::WaterUpdated,
    SignalName::FastingUpdated,
    SignalName::WeightUpdated,
];

pub struct DashboardLoader {
    client: ApiClient,
    date: NaiveDate,
}

impl DashboardLoader {
    pub fn new(client: ApiClient, date: NaiveDate) -> Self {
        Self { client, date }
    }
}

#[async_trait]
impl ViewLoader for DashboardLoader {
    type State = DailySummary;

    async fn load(&self) -> Result<DailySummary, ApiError> {
        let date = self.date.to_string();
        self.client
            .get(DAILY_SUMMARY_PATH, &[("date", date.as_str())])
            .await
    }
}

/// Dashboard coordinator already listening for the relevant signals.
pub fn dashboard(
    client: ApiClient,
    bus: &EventBus,
    date: NaiveDate,
    in_flight: InFlightFetches,
    focus_debounce: Duration,
) -> RefreshCoordinator<DashboardLoader> {
    let coordinator = RefreshCoordinator::new(
        format!("dashboard:{date}"),
        DashboardLoader::new(client, date),
        in_flight,
        focus_debounce,
    );
    coordinator.listen(bus, &DASHBOARD_SIGNALS);
    coordinator
}
