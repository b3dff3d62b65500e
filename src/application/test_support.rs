//! Scripted transport and wiring helpers for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use reqwest::{Method, StatusCode};
use serde_json::Value;

use crate::cache::{CacheConfig, ResponseCache};
use crate::infra::clock::ManualClock;
use crate::infra::transport::{ApiRequest, ApiResponse, Transport, TransportError};

use super::client::{ApiClient, DEFAULT_TIMEOUT};

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Respond(ApiResponse),
    Fail(TransportError),
    Delayed(Duration, Box<Reply>),
}

impl Reply {
    pub(crate) fn json(body: Value) -> Self {
        Reply::Respond(ApiResponse::ok(body))
    }

    pub(crate) fn status(status: StatusCode, body: Value) -> Self {
        Reply::Respond(ApiResponse::new(status, body))
    }

    pub(crate) fn delayed(delay: Duration, reply: Reply) -> Self {
        Reply::Delayed(delay, Box::new(reply))
    }
}

type Route = (Method, String);

#[derive(Default)]
struct Script {
    queued: HashMap<Route, VecDeque<Reply>>,
    sticky: HashMap<Route, Reply>,
    calls: Vec<ApiRequest>,
}

/// Transport answering from a script keyed by method and path (query ignored).
/// One-shot replies queued with [`FakeTransport::enqueue`] win over the sticky
/// reply set with [`FakeTransport::on`]; unscripted routes answer 404.
#[derive(Clone, Default)]
pub(crate) struct FakeTransport {
    script: Arc<Mutex<Script>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on(&self, method: Method, path: &str, reply: Reply) {
        self.lock().sticky.insert((method, path.to_string()), reply);
    }

    pub(crate) fn enqueue(&self, method: Method, path: &str, reply: Reply) {
        self.lock()
            .queued
            .entry((method, path.to_string()))
            .or_default()
            .push_back(reply);
    }

    pub(crate) fn calls(&self) -> Vec<ApiRequest> {
        self.lock().calls.clone()
    }

    pub(crate) fn count(&self, method: &Method, path: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| &call.method == method && call.path == path)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().expect("script lock")
    }

    fn next_reply(&self, request: &ApiRequest) -> Reply {
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
            .unwrap_or_else(|| Reply::status(StatusCode::NOT_FOUND, Value::Null))
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut reply = self.next_reply(&request);
        loop {
            match reply {
                Reply::Respond(response) => return Ok(response),
                Reply::Fail(error) => return Err(error),
                Reply::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }
}

pub(crate) fn monday_morning() -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339("2024-01-01T07:59:00+00:00").expect("valid timestamp")
}

/// Client over `transport` with default cache settings and a manual clock.
pub(crate) fn client_with(transport: &FakeTransport) -> (ApiClient, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(monday_morning()));
    let cache = Arc::new(ResponseCache::new(CacheConfig::default(), clock.clone()));
    let client = ApiClient::new(Arc::new(transport.clone()), cache, DEFAULT_TIMEOUT);
    (client, clock)
}
