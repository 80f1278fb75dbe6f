//! The seam between the session core and the remote API.
//!
//! `SessionManager`, `Resource` and `ProfileLoader` only talk to the network
//! through [`Backend`], so tests can substitute an in-memory backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ApiError;

/// Login/signup request body.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: &str, password: &str) -> Self {
        Self {
            email: email.to_string(),
            password: password.to_string(),
        }
    }
}

// Passwords must never reach the logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Body returned by `POST /auth/login`.
///
/// Both tokens are optional on the wire; the session manager decides what a
/// response missing one of them means.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// Operations the core needs from the HTTP client.
#[async_trait]
pub trait Backend: Send + Sync {
    /// `POST /auth/login {email, password}`
    async fn login(&self, credentials: &Credentials) -> Result<TokenResponse, ApiError>;

    /// `POST /auth/signup {email, password}`; any 2xx is success.
    async fn signup(&self, credentials: &Credentials) -> Result<(), ApiError>;

    /// `GET <endpoint>`. A `bearer` token overrides the default header for
    /// this request only.
    async fn get_json(
        &self,
        endpoint: &str,
        bearer: Option<&str>,
    ) -> Result<serde_json::Value, ApiError>;

    /// Set (`Some`) or remove (`None`) the default bearer token sent with
    /// every request.
    async fn set_default_token(&self, token: Option<&str>);

    /// Current value of the default `Authorization` header.
    async fn default_authorization(&self) -> Option<String>;
}

/// Format a token as an `Authorization` header value.
pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}
