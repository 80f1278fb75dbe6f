//! User records and the signed-in user's profile.
//!
//! The backend has no "current user" endpoint yet, so the profile is taken
//! from the first record of `GET /users`. That is a stopgap: it is only
//! correct while the list endpoint returns the caller first, and it is
//! logged as such on every load.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::api::Backend;
use crate::auth::{SecureStore, SessionSnapshot};
use crate::error::SessionError;
use crate::fetch::{read_access_token, FetchState, Generations};

/// Endpoint listing user records
pub const USERS_ENDPOINT: &str = "/users";

const PROFILE_LOAD_FAILED: &str = "Failed to load profile.";
const PROFILE_TOKEN_MISSING: &str = "Authentication token missing.";

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

/// A user as returned by `GET /users`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub enabled: Option<bool>,
    pub username: Option<String>,
}

/// Split a full name into first name and the rest.
///
/// Runs of whitespace count as one separator. The last name is every part
/// after the first, joined with single spaces.
pub fn split_full_name(full_name: Option<&str>) -> (Option<String>, Option<String>) {
    let parts: Vec<&str> = full_name.unwrap_or_default().split_whitespace().collect();
    match parts.split_first() {
        Some((first, rest)) => {
            let last = (!rest.is_empty()).then(|| rest.join(" "));
            (Some(first.to_string()), last)
        }
        None => (None, None),
    }
}

impl From<UserRecord> for UserProfile {
    fn from(record: UserRecord) -> Self {
        let (first_name, last_name) = split_full_name(record.full_name.as_deref());
        Self {
            id: record.id,
            email: record.email,
            full_name: record.full_name,
            first_name,
            last_name,
            created_at: record.created_at,
            updated_at: record.updated_at,
            enabled: record.enabled,
            username: record.username,
        }
    }
}

impl UserProfile {
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first.clone(),
            _ => self.email.clone(),
        }
    }
}

/// Pick the profile out of a `/users` response body.
fn profile_from_users(body: serde_json::Value) -> Result<UserProfile, SessionError> {
    let first = match body {
        serde_json::Value::Array(mut users) if !users.is_empty() => users.swap_remove(0),
        _ => return Err(SessionError::ProfileDataEmpty),
    };
    let record: UserRecord = serde_json::from_value(first).map_err(|e| {
        warn!(error = %e, "First /users record is not a user");
        SessionError::ProfileDataEmpty
    })?;
    Ok(record.into())
}

/// Loads the signed-in user's profile.
///
/// Unlike a [`Resource`](crate::fetch::Resource), a signed-out session is
/// not an error here: the profile is simply empty.
pub struct ProfileLoader {
    backend: Arc<dyn Backend>,
    store: Arc<dyn SecureStore>,
    session: watch::Receiver<SessionSnapshot>,
    state: Mutex<FetchState<UserProfile>>,
    generations: Generations,
}

impl ProfileLoader {
    pub fn new(
        backend: Arc<dyn Backend>,
        store: Arc<dyn SecureStore>,
        session: watch::Receiver<SessionSnapshot>,
    ) -> Self {
        Self {
            backend,
            store,
            session,
            state: Mutex::new(FetchState::default()),
            generations: Generations::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FetchState<UserProfile>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> FetchState<UserProfile> {
        self.lock().clone()
    }

    fn update(&self, generation: u64, f: impl FnOnce(&mut FetchState<UserProfile>)) {
        let mut state = self.lock();
        if self.generations.is_current(generation) {
            f(&mut state);
        }
    }

    pub async fn load(&self) {
        let Some(generation) = self.generations.next() else {
            return;
        };

        let authenticated = self.session.borrow().is_authenticated();
        if !authenticated {
            self.update(generation, FetchState::clear);
            return;
        }

        self.update(generation, FetchState::start);

        let Some(token) = read_access_token(self.store.as_ref()).await else {
            error!("Session is authenticated but no access token is stored");
            self.update(generation, |s| s.fail(PROFILE_TOKEN_MISSING.to_string()));
            return;
        };

        warn!("Using the first /users record as the current user's profile");
        let outcome = match self.backend.get_json(USERS_ENDPOINT, Some(&token)).await {
            Ok(body) => profile_from_users(body).map_err(|e| e.to_string()),
            Err(e) => {
                warn!(error = %e, "Failed to fetch user profile");
                Err(e.server_message().unwrap_or_else(|| PROFILE_LOAD_FAILED.to_string()))
            }
        };

        match outcome {
            Ok(profile) => {
                debug!(user_id = %profile.id, "Profile loaded");
                self.update(generation, |s| s.succeed(profile));
            }
            Err(message) => self.update(generation, |s| s.fail(message)),
        }
    }

    /// Manual reload.
    pub async fn refetch(&self) {
        self.load().await;
    }

    /// Load now and again on every authentication change.
    pub async fn follow_session(&self) {
        let mut session = self.session.clone();
        let mut seen = session.borrow_and_update().is_authenticated();
        self.load().await;

        while session.changed().await.is_ok() {
            if self.generations.is_retired() {
                break;
            }
            let authenticated = session.borrow_and_update().is_authenticated();
            if authenticated != seen {
                seen = authenticated;
                self.load().await;
            }
        }
    }

    pub fn retire(&self) {
        self.generations.retire();
    }
}
