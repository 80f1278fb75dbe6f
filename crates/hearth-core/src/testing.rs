//! In-memory backend for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::api::{bearer, ApiError, Backend, Credentials, TokenResponse};
use crate::auth::{MemoryStore, SecureStore, StoreError};

/// `MemoryStore` whose deletes suspend before taking effect, so other tasks
/// run while tokens are still stored.
#[derive(Clone)]
pub struct SlowDeleteStore {
    pub inner: MemoryStore,
    pub delay: Duration,
}

impl SlowDeleteStore {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(delay_ms),
        }
    }
}

#[async_trait]
impl SecureStore for SlowDeleteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.delete(key).await
    }
}

#[derive(Debug, Clone)]
pub enum MockReply {
    /// 2xx with this JSON body
    Json(serde_json::Value),
    /// Non-2xx with this status and raw body
    Status(u16, String),
    /// Failure before any response arrived
    Broken(String),
}

impl MockReply {
    fn into_result(self) -> Result<serde_json::Value, ApiError> {
        match self {
            MockReply::Json(value) => Ok(value),
            MockReply::Status(status, body) => Err(ApiError::from_status(status, &body)),
            MockReply::Broken(reason) => Err(ApiError::InvalidResponse(reason)),
        }
    }
}

#[derive(Default)]
struct MockState {
    login: Option<MockReply>,
    signup: Option<MockReply>,
    gets: HashMap<String, MockReply>,
    get_calls: Vec<(String, Option<String>)>,
    default_token: Option<String>,
    delay_ms: u64,
}

#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply_login(&self, reply: MockReply) {
        self.state.lock().unwrap().login = Some(reply);
    }

    pub fn reply_signup(&self, reply: MockReply) {
        self.state.lock().unwrap().signup = Some(reply);
    }

    pub fn reply_get(&self, endpoint: &str, reply: MockReply) {
        self.state.lock().unwrap().gets.insert(endpoint.to_string(), reply);
    }

    /// Delay every request by `ms` milliseconds.
    pub fn set_delay_ms(&self, ms: u64) {
        self.state.lock().unwrap().delay_ms = ms;
    }

    /// Number of GET requests sent to `endpoint`.
    pub fn get_count(&self, endpoint: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .get_calls
            .iter()
            .filter(|(e, _)| e == endpoint)
            .count()
    }

    /// `Authorization` header the last GET to `endpoint` carried.
    pub fn last_authorization(&self, endpoint: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .get_calls
            .iter()
            .rev()
            .find(|(e, _)| e == endpoint)
            .and_then(|(_, auth)| auth.clone())
    }

    pub fn default_header(&self) -> Option<String> {
        self.state.lock().unwrap().default_token.as_deref().map(bearer)
    }

    async fn pause(&self) {
        let delay = self.state.lock().unwrap().delay_ms;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn login(&self, _credentials: &Credentials) -> Result<TokenResponse, ApiError> {
        self.pause().await;
        let reply = self.state.lock().unwrap().login.clone();
        let value = reply
            .unwrap_or_else(|| MockReply::Status(500, "no login reply".into()))
            .into_result()?;
        serde_json::from_value(value).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    async fn signup(&self, _credentials: &Credentials) -> Result<(), ApiError> {
        self.pause().await;
        let reply = self.state.lock().unwrap().signup.clone();
        reply
            .unwrap_or_else(|| MockReply::Status(500, "no signup reply".into()))
            .into_result()
            .map(|_| ())
    }

    async fn get_json(
        &self,
        endpoint: &str,
        token: Option<&str>,
    ) -> Result<serde_json::Value, ApiError> {
        let reply = {
            let mut state = self.state.lock().unwrap();
            let authorization = token
                .map(bearer)
                .or_else(|| state.default_token.as_deref().map(bearer));
            state.get_calls.push((endpoint.to_string(), authorization));
            state.gets.get(endpoint).cloned()
        };
        self.pause().await;
        reply
            .unwrap_or_else(|| MockReply::Status(404, String::new()))
            .into_result()
    }

    async fn set_default_token(&self, token: Option<&str>) {
        self.state.lock().unwrap().default_token = token.map(str::to_string);
    }

    async fn default_authorization(&self) -> Option<String> {
        self.default_header()
    }
}
