//! Identity of the signed-in user, derived from access token claims.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Refresh is advisable this long before the token's `exp`.
const TOKEN_REFRESH_BUFFER_MINUTES: i64 = 5;

/// Where a [`User`]'s identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub enum IdentitySource {
    /// Decoded from the access token's claims.
    TokenClaims,
    /// The token carried no readable claims; the fields are whatever the
    /// client knew locally and have not been verified.
    Unverified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub source: IdentitySource,
    pub expires_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|exp| Utc::now() > exp).unwrap_or(false)
    }

    /// Check if the access token will expire soon and should be refreshed
    pub fn needs_refresh(&self) -> bool {
        self.expires_at
            .map(|exp| Utc::now() > exp - Duration::minutes(TOKEN_REFRESH_BUFFER_MINUTES))
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<serde_json::Value>,
    email: Option<String>,
    exp: Option<i64>,
}

/// Decode the payload segment of a JWT. Signatures are not checked: the
/// backend is the authority, this only recovers who the token names.
fn decode_claims(token: &str) -> Option<Claims> {
    let mut parts = token.split('.');
    let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn subject(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Build the session identity for `access_token`.
///
/// `known_email` is the address the user typed at login, if any. It is only
/// used when the token does not name an email itself.
pub fn identity_from_token(access_token: &str, known_email: Option<&str>) -> User {
    let claims = decode_claims(access_token);
    let expires_at = claims
        .as_ref()
        .and_then(|c| c.exp)
        .and_then(|exp| Utc.timestamp_opt(exp, 0).single());

    let id = claims.as_ref().and_then(|c| c.sub.as_ref()).and_then(subject);

    match id {
        Some(id) => {
            let email = claims
                .and_then(|c| c.email)
                .or_else(|| known_email.map(str::to_string))
                .unwrap_or_default();
            User {
                id,
                email,
                source: IdentitySource::TokenClaims,
                expires_at,
            }
        }
        None => {
            warn!("Access token has no readable subject claim; identity is unverified");
            User {
                id: String::new(),
                email: known_email.unwrap_or_default().to_string(),
                source: IdentitySource::Unverified,
                expires_at,
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn make_jwt(payload: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{}.{}.signature", header, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_from_claims() {
        let token = make_jwt(&json!({"sub": "u-42", "email": "ada@example.com", "exp": 4102444800i64}));
        let user = identity_from_token(&token, Some("typed@example.com"));
        assert_eq!(user.id, "u-42");
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.source, IdentitySource::TokenClaims);
        assert!(!user.is_expired());
        assert!(!user.needs_refresh());
    }

    #[test]
    fn test_numeric_subject_and_email_fallback() {
        let token = make_jwt(&json!({"sub": 7}));
        let user = identity_from_token(&token, Some("typed@example.com"));
        assert_eq!(user.id, "7");
        assert_eq!(user.email, "typed@example.com");
        assert_eq!(user.expires_at, None);
    }

    #[test]
    fn test_opaque_token_is_unverified() {
        let user = identity_from_token("not-a-jwt", Some("typed@example.com"));
        assert_eq!(user.source, IdentitySource::Unverified);
        assert_eq!(user.email, "typed@example.com");
        assert!(user.id.is_empty());

        let user = identity_from_token("a.b.c.d", None);
        assert_eq!(user.source, IdentitySource::Unverified);
        assert!(user.email.is_empty());
    }

    #[test]
    fn test_expired_token() {
        let token = make_jwt(&json!({"sub": "u", "exp": 1_000_000i64}));
        let user = identity_from_token(&token, None);
        assert!(user.is_expired());
        assert!(user.needs_refresh());
    }
}
