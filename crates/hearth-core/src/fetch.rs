//! Generic fetch-state machine for a single endpoint.
//!
//! A [`Resource`] owns the loading/error/data state for one endpoint and one
//! gating flag. It re-runs automatically when the authentication state
//! changes and on every manual [`refetch`](Resource::refetch).
//!
//! Each run takes a fresh generation number. Results from a run that has
//! been superseded by a newer run, or whose resource was retired, are
//! dropped instead of being written to the state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::api::{ApiError, Backend};
use crate::auth::{SecureStore, SessionSnapshot, ACCESS_TOKEN_KEY};
use crate::error::SessionError;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct FetchState<T> {
    pub data: Option<T>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl<T> Default for FetchState<T> {
    fn default() -> Self {
        Self {
            data: None,
            is_loading: true,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Idle,
    Loading,
    Success,
    Error,
}

impl<T> FetchState<T> {
    pub fn phase(&self) -> FetchPhase {
        if self.is_loading {
            FetchPhase::Loading
        } else if self.error.is_some() {
            FetchPhase::Error
        } else if self.data.is_some() {
            FetchPhase::Success
        } else {
            FetchPhase::Idle
        }
    }

    pub(crate) fn start(&mut self) {
        self.is_loading = true;
        self.error = None;
    }

    pub(crate) fn succeed(&mut self, data: T) {
        self.data = Some(data);
        self.error = None;
        self.is_loading = false;
    }

    pub(crate) fn fail(&mut self, message: String) {
        self.data = None;
        self.error = Some(message);
        self.is_loading = false;
    }

    pub(crate) fn clear(&mut self) {
        self.data = None;
        self.error = None;
        self.is_loading = false;
    }
}

/// Best human-readable message for a failed request: the server's own
/// `message`, then the transport error, then a generic line naming the
/// endpoint.
pub(crate) fn failure_message(error: &ApiError, endpoint: &str) -> String {
    let message = error.display_message();
    if message.trim().is_empty() {
        generic_failure(endpoint)
    } else {
        message
    }
}

fn generic_failure(endpoint: &str) -> String {
    format!("Failed to fetch from {}.", endpoint)
}

/// Read the access token straight from secure storage. A failed read counts
/// as no token.
pub(crate) async fn read_access_token(store: &dyn SecureStore) -> Option<String> {
    match store.get(ACCESS_TOKEN_KEY).await {
        Ok(token) => token.filter(|t| !t.is_empty()),
        Err(e) => {
            warn!(error = %e, "Could not read access token");
            None
        }
    }
}

/// Shared bookkeeping for anything that runs generation-checked fetches.
pub(crate) struct Generations {
    current: AtomicU64,
    retired: AtomicBool,
}

impl Generations {
    pub(crate) fn new() -> Self {
        Self {
            current: AtomicU64::new(0),
            retired: AtomicBool::new(false),
        }
    }

    /// Start a new run, superseding any run in flight.
    pub(crate) fn next(&self) -> Option<u64> {
        if self.is_retired() {
            return None;
        }
        Some(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        !self.is_retired() && self.current.load(Ordering::SeqCst) == generation
    }

    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
        self.current.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }
}

pub struct Resource<T = serde_json::Value> {
    endpoint: String,
    require_auth: bool,
    backend: Arc<dyn Backend>,
    store: Arc<dyn SecureStore>,
    session: watch::Receiver<SessionSnapshot>,
    state: Mutex<FetchState<T>>,
    trigger: AtomicU64,
    generations: Generations,
    seen_auth: Mutex<Option<bool>>,
}

impl<T> Resource<T>
where
    T: DeserializeOwned + Clone + Send + Sync,
{
    pub fn new(
        endpoint: &str,
        require_auth: bool,
        backend: Arc<dyn Backend>,
        store: Arc<dyn SecureStore>,
        session: watch::Receiver<SessionSnapshot>,
    ) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            require_auth,
            backend,
            store,
            session,
            state: Mutex::new(FetchState::default()),
            trigger: AtomicU64::new(0),
            generations: Generations::new(),
            seen_auth: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn require_auth(&self) -> bool {
        self.require_auth
    }

    fn lock(&self) -> MutexGuard<'_, FetchState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> FetchState<T> {
        self.lock().clone()
    }

    /// How many manual refetches have been requested.
    pub fn trigger_count(&self) -> u64 {
        self.trigger.load(Ordering::SeqCst)
    }

    /// Apply `f` to the state if `generation` is still the latest run.
    fn update(&self, generation: u64, f: impl FnOnce(&mut FetchState<T>)) -> bool {
        let mut state = self.lock();
        if !self.generations.is_current(generation) {
            debug!(endpoint = %self.endpoint, generation, "Discarding stale fetch result");
            return false;
        }
        f(&mut state);
        true
    }

    /// Run the request once.
    pub async fn fetch(&self) {
        let Some(generation) = self.generations.next() else {
            return;
        };

        let authenticated = self.session.borrow().is_authenticated();
        if self.require_auth && !authenticated {
            self.update(generation, |s| s.fail(SessionError::NotAuthenticated.to_string()));
            return;
        }

        self.update(generation, FetchState::start);

        let token = read_access_token(self.store.as_ref()).await;
        if self.require_auth && token.is_none() {
            self.update(generation, |s| s.fail(SessionError::TokenMissing.to_string()));
            return;
        }

        let outcome = match self.backend.get_json(&self.endpoint, token.as_deref()).await {
            Ok(body) => serde_json::from_value::<T>(body).map_err(|e| {
                warn!(endpoint = %self.endpoint, error = %e, "Unexpected response shape");
                generic_failure(&self.endpoint)
            }),
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "Error fetching");
                Err(failure_message(&e, &self.endpoint))
            }
        };

        match outcome {
            Ok(data) => {
                if self.update(generation, |s| s.succeed(data)) {
                    debug!(endpoint = %self.endpoint, "Fetched");
                }
            }
            Err(message) => {
                self.update(generation, |s| s.fail(message));
            }
        }
    }

    /// Manual refetch: always issues exactly one run, whatever the gating
    /// flag says.
    pub async fn refetch(&self) {
        self.trigger.fetch_add(1, Ordering::SeqCst);
        self.fetch().await;
    }

    /// Automatic run (mount or authentication change). Resources that do
    /// not require auth only run automatically until the first manual
    /// refetch.
    pub async fn run_auto(&self) -> bool {
        let authenticated = self.session.borrow().is_authenticated();
        *self.seen_auth.lock().unwrap_or_else(|e| e.into_inner()) = Some(authenticated);

        if self.require_auth || self.trigger_count() == 0 {
            self.fetch().await;
            true
        } else {
            false
        }
    }

    /// Re-run if the authentication state differs from the last automatic
    /// run. Returns whether a run happened.
    pub async fn on_session_change(&self) -> bool {
        let authenticated = self.session.borrow().is_authenticated();
        let seen = *self.seen_auth.lock().unwrap_or_else(|e| e.into_inner());
        if seen == Some(authenticated) {
            return false;
        }
        self.run_auto().await
    }

    /// Run once now, then again on every authentication change, until the
    /// session manager goes away or the resource is retired.
    pub async fn follow_session(&self) {
        let mut session = self.session.clone();
        session.borrow_and_update();
        self.run_auto().await;

        while session.changed().await.is_ok() {
            if self.generations.is_retired() {
                break;
            }
            self.on_session_change().await;
        }
    }

    /// Stop this resource. In-flight results are dropped and later calls do
    /// nothing.
    pub fn retire(&self) {
        self.generations.retire();
    }
}
