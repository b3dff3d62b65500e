//! Water intake widget.
//!
//! Adding posts a delta and the server answers with the new daily total;
//! removing puts the clamped absolute amount. Both go through the optimistic
//! controller, so rapid taps are serialized and a failed write snaps back.

use std::sync::Arc;

use chrono::NaiveDate;
use futures::FutureExt;
use nutrisync_api_types::{WaterIntake, WaterIntakeWrite};
use tracing::info;

use crate::events::{EventBus, SignalName, detail_for};

use super::client::ApiClient;
use super::error::ApiError;
use super::optimistic::{OptimisticController, Outcome, Reader};

pub const GLASS_ML: i64 = 250;
pub const WATER_TODAY_PATH: &str = "/api/water/today/";

pub struct WaterTracker {
    client: ApiClient,
    date: NaiveDate,
    controller: OptimisticController<i64>,
}

impl WaterTracker {
    pub fn new(client: ApiClient, bus: EventBus, date: NaiveDate) -> Self {
        let reader = intake_reader(client.clone(), date);
        let controller = OptimisticController::new(
            format!("water:{date}"),
            0,
            client.invalidator().clone(),
            bus,
            SignalName::WaterUpdated,
            reader,
        )
        .with_detail(|amount| {
            detail_for(&WaterIntake {
                id: None,
                date: None,
                amount_ml: *amount,
            })
        });
        Self {
            client,
            date,
            controller,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn controller(&self) -> &OptimisticController<i64> {
        &self.controller
    }

    pub fn amount_ml(&self) -> i64 {
        self.controller.displayed()
    }

    /// Full glasses currently shown.
    pub fn glasses(&self) -> i64 {
        self.amount_ml() / GLASS_ML
    }

    /// Read today's intake, creating an empty entry if the server has none.
    pub async fn load(&self) -> Result<i64, ApiError> {
        self.controller.resync().await
    }

    pub async fn add(&self, ml: u32) -> Outcome<i64> {
        let delta = i64::from(ml);
        let client = self.client.clone();
        let path = self.write_path();
        self.controller
            .apply(
                |current| current + delta,
                move |_| async move {
                    let intake: WaterIntake = client
                        .post(&path, &WaterIntakeWrite { amount_ml: delta })
                        .await?;
                    Ok(intake.amount_ml)
                },
            )
            .await
    }

    /// Never goes below zero.
    pub async fn remove(&self, ml: u32) -> Outcome<i64> {
        let delta = i64::from(ml);
        let client = self.client.clone();
        let path = self.write_path();
        self.controller
            .apply(
                |current| (current - delta).max(0),
                move |target| async move {
                    let intake: WaterIntake = client
                        .put(&path, &WaterIntakeWrite { amount_ml: target })
                        .await?;
                    Ok(intake.amount_ml)
                },
            )
            .await
    }

    /// Tap on glass `index` (0-based): a filled glass empties it and every
    /// glass after it, an empty one fills up to and including it.
    pub async fn click_glass(&self, index: u32) -> Option<Outcome<i64>> {
        let index = i64::from(index);
        let current = self.amount_ml();
        let target = if index < current / GLASS_ML {
            index * GLASS_ML
        } else {
            (index + 1) * GLASS_ML
        };

        info!(date = %self.date, index, current, target, "water glass clicked");
        match target.cmp(&current) {
            std::cmp::Ordering::Greater => Some(self.add(clamp_u32(target - current)).await),
            std::cmp::Ordering::Less => Some(self.remove(clamp_u32(current - target)).await),
            std::cmp::Ordering::Equal => None,
        }
    }

    fn write_path(&self) -> String {
        format!("{WATER_TODAY_PATH}?date={}", self.date)
    }
}

fn clamp_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn intake_reader(client: ApiClient, date: NaiveDate) -> Reader<i64> {
    Arc::new(move || {
        let client = client.clone();
        async move {
            let date = date.to_string();
            match client
                .get::<WaterIntake>(WATER_TODAY_PATH, &[("date", date.as_str())])
                .await
            {
                Ok(intake) => Ok(intake.amount_ml),
                Err(err) if err.is_not_found() => {
                    let path = format!("{WATER_TODAY_PATH}?date={date}");
                    let created: WaterIntake = client
                        .post(&path, &WaterIntakeWrite { amount_ml: 0 })
                        .await?;
                    Ok(created.amount_ml)
                }
                Err(err) => Err(err),
            }
        }
        .boxed()
    })
}
