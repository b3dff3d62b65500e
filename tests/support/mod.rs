#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use nutrisync::application::client::ApiClient;
use nutrisync::application::reminders::{ReminderScheduler, TickOutcome};
use nutrisync::cache::{CacheConfig, ResponseCache};
use nutrisync::infra::audio::{AudioError, SoundCue, SoundPlayer};
use nutrisync::infra::clock::ManualClock;
use nutrisync::infra::notify::{Notification, Notifier, NotifyError, Permission};
use nutrisync::infra::transport::{ApiRequest, ApiResponse, Transport, TransportError};
use reqwest::{Method, StatusCode};
use serde_json::Value;

pub const TIMEOUT: Duration = Duration::from_secs(10);

type Route = (Method, String);

#[derive(Default)]
struct Script {
    queued: HashMap<Route, VecDeque<Result<ApiResponse, TransportError>>>,
    sticky: HashMap<Route, Result<ApiResponse, TransportError>>,
    calls: Vec<ApiRequest>,
}

/// In-memory API: answers by method and path, records every request.
#[derive(Clone, Default)]
pub struct ScriptedApi {
    script: Arc<Mutex<Script>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, method: Method, path: &str, body: Value) {
        self.set(method, path, Ok(ApiResponse::ok(body)));
    }

    pub fn reject(&self, method: Method, path: &str, status: StatusCode, body: Value) {
        self.set(method, path, Ok(ApiResponse::new(status, body)));
    }

    pub fn fail(&self, method: Method, path: &str) {
        self.set(
            method,
            path,
            Err(TransportError::Connection("connection reset".into())),
        );
    }

    pub fn respond_once(&self, method: Method, path: &str, body: Value) {
        self.lock()
            .queued
            .entry((method, path.to_string()))
            .or_default()
            .push_back(Ok(ApiResponse::ok(body)));
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.lock().calls.clone()
    }

    pub fn count(&self, method: &Method, path: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| &call.method == method && call.path == path)
            .count()
    }

    fn set(&self, method: Method, path: &str, reply: Result<ApiResponse, TransportError>) {
        self.lock().sticky.insert((method, path.to_string()), reply);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().expect("script lock")
    }
}

#[async_trait]
impl Transport for ScriptedApi {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut script = self.lock();
        script.calls.push(request.clone());
        let route = (request.method.clone(), request.path.clone());
        if let Some(reply) = script.queued.get_mut(&route).and_then(VecDeque::pop_front) {
            return reply;
        }
        script
            .sticky
            .get(&route)
            .cloned()
            .unwrap_or_else(|| Ok(ApiResponse::new(StatusCode::NOT_FOUND, Value::Null)))
    }
}

pub fn at(timestamp: &str) -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339(timestamp).expect("valid timestamp")
}

/// Client with the default 60 s cache driven by a manual clock.
pub fn client(api: &ScriptedApi, start: &str) -> (ApiClient, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(at(start)));
    let cache = Arc::new(ResponseCache::new(CacheConfig::default(), clock.clone()));
    (ApiClient::new(Arc::new(api.clone()), cache, TIMEOUT), clock)
}

#[derive(Default)]
pub struct RecordingNotifier {
    shown: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn tags(&self) -> Vec<String> {
        self.shown
            .lock()
            .expect("shown")
            .iter()
            .map(|notification| notification.tag.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn permission(&self) -> Permission {
        Permission::Granted
    }

    fn request_permission(&self) -> Permission {
        Permission::Granted
    }

    fn show(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.shown.lock().expect("shown").push(notification.clone());
        Ok(())
    }
}

pub struct Muted;

impl SoundPlayer for Muted {
    fn play(&self, _cue: SoundCue) -> Result<(), AudioError> {
        Err(AudioError::Unavailable)
    }
}

/// Start `scheduler` and wait for the evaluation it runs on start.
pub async fn start_settled(scheduler: &Arc<ReminderScheduler>) -> TickOutcome {
    let mut ticks = scheduler.watch_background();
    assert!(scheduler.start());
    ticks.changed().await.expect("ticker running");
    ticks.borrow_and_update().clone().expect("first outcome")
}
