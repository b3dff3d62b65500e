//! Fasting timer widget.

use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use nutrisync_api_types::FastingSession;
use serde_json::{Value, json};

use crate::events::{EventBus, FastingChange, SignalName, detail_for};

use super::client::ApiClient;
use super::error::ApiError;
use super::optimistic::{OptimisticController, Outcome, Reader};

pub const FASTING_START_PATH: &str = "/api/fasting/start/";
pub const FASTING_ACTIVE_PATH: &str = "/api/fasting/active/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FastingState {
    Idle,
    Active(FastingSession),
}

impl FastingState {
    pub fn session(&self) -> Option<&FastingSession> {
        match self {
            FastingState::Idle => None,
            FastingState::Active(session) => Some(session),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, FastingState::Active(_))
    }
}

pub struct FastingTracker {
    client: ApiClient,
    controller: OptimisticController<FastingState>,
}

impl FastingTracker {
    pub fn new(client: ApiClient, bus: EventBus) -> Self {
        let controller = OptimisticController::new(
            "fasting",
            FastingState::Idle,
            client.invalidator().clone(),
            bus,
            SignalName::FastingUpdated,
            active_reader(client.clone()),
        )
        .with_detail(|state| {
            detail_for(&FastingChange {
                active: state.session().cloned(),
            })
        });
        Self { client, controller }
    }

    pub fn controller(&self) -> &OptimisticController<FastingState> {
        &self.controller
    }

    pub fn state(&self) -> FastingState {
        self.controller.displayed()
    }

    pub async fn load(&self) -> Result<FastingState, ApiError> {
        self.controller.resync().await
    }

    /// Start a fast. `None` when one is already running.
    pub async fn start(&self) -> Option<Outcome<FastingState>> {
        if self.state().is_active() {
            return None;
        }
        let client = self.client.clone();
        let outcome = self
            .controller
            .apply(
                |current| match current {
                    FastingState::Active(session) => FastingState::Active(session.clone()),
                    FastingState::Idle => FastingState::Active(FastingSession {
                        id: 0,
                        start_time: Utc::now(),
                        end_time: None,
                    }),
                },
                move |_| async move {
                    let session: FastingSession =
                        client.post(FASTING_START_PATH, &json!({})).await?;
                    Ok(FastingState::Active(session))
                },
            )
            .await;
        Some(outcome)
    }

    /// End the running fast. `None` when nothing is running.
    pub async fn end(&self) -> Option<Outcome<FastingState>> {
        let session = self.state().session().cloned()?;
        let client = self.client.clone();
        let outcome = self
            .controller
            .apply(
                |_| FastingState::Idle,
                move |_| async move {
                    let path = format!("/api/fasting/{}/end/", session.id);
                    client.write_value(reqwest::Method::POST, &path, Some(json!({}))).await?;
                    Ok(FastingState::Idle)
                },
            )
            .await;
        Some(outcome)
    }
}

fn active_reader(client: ApiClient) -> Reader<FastingState> {
    Arc::new(move || {
        let client = client.clone();
        async move {
            match client.get_value(FASTING_ACTIVE_PATH, &[]).await {
                Ok(body) => parse_active(body),
                Err(err) if err.is_not_found() => Ok(FastingState::Idle),
                Err(err) => Err(err),
            }
        }
        .boxed()
    })
}

/// The server answers `{ "message": ... }` when no fast is running.
fn parse_active(body: Value) -> Result<FastingState, ApiError> {
    if body.get("id").is_none() {
        return Ok(FastingState::Idle);
    }
    serde_json::from_value(body)
        .map(FastingState::Active)
        .map_err(|err| ApiError::decode(err.to_string()))
}
