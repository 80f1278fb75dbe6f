//! HTTP client for the hearth backend.
//!
//! This module provides the `ApiClient` struct, a thin reqwest wrapper with a
//! shared default `Authorization` header and per-request overrides.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Response};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{bearer, Backend, Credentials, TokenResponse};
use super::ApiError;
use crate::config::Config;

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "/auth/login";
const SIGNUP_PATH: &str = "/auth/signup";

/// API client for the hearth backend.
/// Clone is cheap - reqwest::Client uses Arc internally and the default
/// header is shared, so every clone sees the same authorization state.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    default_token: Arc<RwLock<Option<String>>>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_token: Arc::new(RwLock::new(None)),
        })
    }

    /// Create a client from application configuration
    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        Self::new(&config.api_base_url(), config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }

    /// Build request headers: the per-request token wins over the default.
    async fn auth_headers(&self, override_token: Option<&str>) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        let token = match override_token {
            Some(token) => Some(token.to_string()),
            None => self.default_token.read().await.clone(),
        };
        if let Some(token) = token {
            let value = header::HeaderValue::from_str(&bearer(&token))
                .map_err(|e| ApiError::InvalidResponse(format!("Invalid bearer token: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status.as_u16(), &body))
        }
    }

    async fn post_json(&self, path: &str, credentials: &Credentials) -> Result<Response, ApiError> {
        let url = self.url(path);
        debug!(url = %url, email = %credentials.email, "POST");
        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers(None).await?)
            .json(credentials)
            .send()
            .await?;
        Self::check_response(response).await
    }
}

#[async_trait]
impl Backend for ApiClient {
    async fn login(&self, credentials: &Credentials) -> Result<TokenResponse, ApiError> {
        let response = self.post_json(LOGIN_PATH, credentials).await?;
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse login response: {}", e)))
    }

    async fn signup(&self, credentials: &Credentials) -> Result<(), ApiError> {
        self.post_json(SIGNUP_PATH, credentials).await?;
        Ok(())
    }

    async fn get_json(
        &self,
        endpoint: &str,
        bearer: Option<&str>,
    ) -> Result<serde_json::Value, ApiError> {
        let url = self.url(endpoint);
        debug!(url = %url, explicit_token = bearer.is_some(), "GET");
        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers(bearer).await?)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", endpoint, e))
        })
    }

    async fn set_default_token(&self, token: Option<&str>) {
        *self.default_token.write().await = token.map(str::to_string);
    }

    async fn default_authorization(&self) -> Option<String> {
        self.default_token.read().await.as_deref().map(bearer)
    }
}
