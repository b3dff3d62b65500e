//! API client.
//!
//! Every GET reads through the [`ResponseCache`]; every write passes through
//! the [`MutationInvalidator`] once it completes, whatever the outcome. Each
//! call carries the same fixed timeout.

use std::sync::Arc;
use std::time::Duration;

use metrics::histogram;
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::{Instant, timeout};
use tracing::debug;

use crate::cache::{MutationInvalidator, PutOutcome, RequestSignature, ResponseCache};
use crate::infra::transport::{ApiRequest, Transport};

use super::error::ApiError;

const METRIC_REQUEST_MS: &str = "nutrisync_request_ms";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    cache: Arc<ResponseCache>,
    invalidator: MutationInvalidator,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, cache: Arc<ResponseCache>, timeout: Duration) -> Self {
        let invalidator = MutationInvalidator::new(Arc::clone(&cache));
        Self {
            transport,
            cache,
            invalidator,
            timeout,
        }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn invalidator(&self) -> &MutationInvalidator {
        &self.invalidator
    }

    /// GET through the cache. Volatile paths always go to the network; a
    /// failed call stores nothing.
    pub async fn get_value(&self, path: &str, params: &[(&str, &str)]) -> Result<Value, ApiError> {
        let signature = RequestSignature::new(path, params.iter().copied());

        if !self.cache.is_cacheable(&signature) {
            debug!(key = %signature, "volatile read, bypassing cache");
            return self.dispatch(Method::GET, &signature, None).await;
        }

        if let Some(payload) = self.cache.get(&signature) {
            debug!(key = %signature, "served from cache");
            return Ok(payload);
        }

        let ticket = self.cache.issue_ticket();
        let payload = self.dispatch(Method::GET, &signature, None).await?;
        if self.cache.put(signature.clone(), payload.clone(), ticket) != PutOutcome::Stored {
            debug!(key = %signature, "response not cached, a newer read or a write overtook it");
        }
        Ok(payload)
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let payload = self.get_value(path, params).await?;
        decode(payload)
    }

    /// POST/PUT/PATCH/DELETE. The cache is cleared once the call completes,
    /// success or failure alike.
    pub async fn write_value(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        if !crate::cache::is_write(&method) {
            return Err(ApiError::InvalidRequest(format!(
                "{method} is not a write method"
            )));
        }
        let signature = RequestSignature::from_path(path);
        let result = self.dispatch(method.clone(), &signature, body).await;
        self.invalidator
            .observe(&method, signature.path(), result.is_ok());
        result
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = encode(body)?;
        decode(self.write_value(Method::POST, path, Some(body)).await?)
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = encode(body)?;
        decode(self.write_value(Method::PUT, path, Some(body)).await?)
    }

    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = encode(body)?;
        decode(self.write_value(Method::PATCH, path, Some(body)).await?)
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.write_value(Method::DELETE, path, None).await.map(|_| ())
    }

    async fn dispatch(
        &self,
        method: Method,
        signature: &RequestSignature,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let request = ApiRequest {
            method: method.clone(),
            path: signature.path().to_string(),
            query: signature.params().to_vec(),
            body,
        };

        let started = Instant::now();
        let outcome = timeout(self.timeout, self.transport.send(request)).await;
        histogram!(METRIC_REQUEST_MS, "method" => method.as_str().to_owned())
            .record(started.elapsed().as_secs_f64() * 1000.0);

        let response = match outcome {
            Ok(response) => response?,
            Err(_) => {
                debug!(method = %method, key = %signature, "request timed out");
                return Err(ApiError::Timeout);
            }
        };

        if response.is_success() {
            Ok(response.body)
        } else {
            debug!(method = %method, key = %signature, status = %response.status, "request rejected");
            Err(ApiError::rejected(response.status, response.body))
        }
    }
}

fn encode<B: Serialize + ?Sized>(body: &B) -> Result<Value, ApiError> {
    serde_json::to_value(body).map_err(|err| ApiError::InvalidRequest(err.to_string()))
}

fn decode<T: DeserializeOwned>(payload: Value) -> Result<T, ApiError> {
    serde_json::from_value(payload).map_err(|err| ApiError::decode(err.to_string()))
}
