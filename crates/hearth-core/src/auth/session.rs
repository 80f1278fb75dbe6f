//! The session manager: the single owner of "who is logged in".
//!
//! `SessionManager` is the only component that writes the credential pair
//! or the session state. Everyone else reads a [`SessionSnapshot`], either
//! on demand or by subscribing to changes.
//!
//! Bootstrap, login, signup and logout are serialized: each one takes the
//! operation lock, so concurrent calls run one after another in the order
//! they were made and the last one to run decides the final state.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use super::credentials::{self, CredentialPair, SecureStore};
use super::identity::{identity_from_token, User};
use crate::api::{Backend, Credentials};
use crate::error::{Result, SessionError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub is_loading_auth: bool,
}

impl SessionSnapshot {
    /// Derived from `user`; never stored on its own.
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            user: None,
            is_loading_auth: true,
        }
    }
}

/// Clears `is_loading_auth` when dropped, so every exit path of an
/// operation (including cancellation) ends the loading phase.
struct LoadingGuard<'a> {
    state: &'a watch::Sender<SessionSnapshot>,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.state.send_if_modified(|s| {
            let changed = s.is_loading_auth;
            s.is_loading_auth = false;
            changed
        });
    }
}

pub struct SessionManager {
    backend: Arc<dyn Backend>,
    store: Arc<dyn SecureStore>,
    state: watch::Sender<SessionSnapshot>,
    op_lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(backend: Arc<dyn Backend>, store: Arc<dyn SecureStore>) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        Self {
            backend,
            store,
            state,
            op_lock: Mutex::new(()),
        }
    }

    /// Current session state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn is_loading_auth(&self) -> bool {
        self.state.borrow().is_loading_auth
    }

    /// Receive every change of `user` or `is_loading_auth`.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    fn begin_loading(&self) -> LoadingGuard<'_> {
        self.state.send_if_modified(|s| {
            let changed = !s.is_loading_auth;
            s.is_loading_auth = true;
            changed
        });
        LoadingGuard { state: &self.state }
    }

    fn set_user(&self, user: Option<User>) {
        self.state.send_if_modified(|s| {
            if s.user == user {
                return false;
            }
            s.user = user;
            true
        });
    }

    /// Drop all authentication state: stored tokens, default header, then
    /// the in-memory user. Subscribers only see the logged-out state once no
    /// token is left to send. Storage failures are logged and otherwise
    /// ignored.
    async fn reset_unauthenticated(&self) {
        if let Err(e) = credentials::clear_pair(self.store.as_ref()).await {
            warn!(error = %e, "Failed to remove stored tokens");
        }
        self.backend.set_default_token(None).await;
        self.set_user(None);
    }

    // ===== Operations =====

    /// Rehydrate the session from stored tokens. Runs once at startup.
    ///
    /// A storage read failure is treated as corruption: the stored tokens are
    /// wiped and the session starts unauthenticated.
    pub async fn bootstrap(&self) -> SessionSnapshot {
        let _op = self.op_lock.lock().await;
        {
            let _loading = self.begin_loading();

            match credentials::load_tokens(self.store.as_ref()).await {
                Ok(tokens) => match tokens.access_token.filter(|t| !t.is_empty()) {
                    Some(access_token) => {
                        let user = identity_from_token(&access_token, None);
                        if user.is_expired() {
                            debug!("Stored access token is past its expiry");
                        }
                        self.backend.set_default_token(Some(&access_token)).await;
                        info!(user_id = %user.id, "Session restored from stored tokens");
                        self.set_user(Some(user));
                    }
                    None => {
                        debug!("No stored access token");
                        self.set_user(None);
                    }
                },
                Err(e) => {
                    error!(error = %e, "Error loading stored tokens; clearing them");
                    self.reset_unauthenticated().await;
                }
            }
        }
        self.snapshot()
    }

    /// Log in against the backend. Returns whether the session is now
    /// authenticated; every failure leaves it unauthenticated with no stored
    /// tokens.
    pub async fn login(&self, email: &str, password: &str) -> bool {
        let _op = self.op_lock.lock().await;
        let _loading = self.begin_loading();

        match self.try_login(email, password).await {
            Ok(()) => {
                info!(email = %email, "Login succeeded");
                true
            }
            Err(e) => {
                warn!(email = %email, error = %e, "Login failed");
                self.reset_unauthenticated().await;
                false
            }
        }
    }

    async fn try_login(&self, email: &str, password: &str) -> Result<()> {
        let response = self.backend.login(&Credentials::new(email, password)).await?;

        let non_empty = |t: Option<String>| t.filter(|t| !t.is_empty());
        let pair = match (non_empty(response.access_token), non_empty(response.refresh_token)) {
            (Some(access_token), Some(refresh_token)) => CredentialPair {
                access_token,
                refresh_token,
            },
            _ => return Err(SessionError::AuthResponseMalformed),
        };

        credentials::store_pair(self.store.as_ref(), &pair).await?;
        self.backend.set_default_token(Some(&pair.access_token)).await;
        self.set_user(Some(identity_from_token(&pair.access_token, Some(email))));
        Ok(())
    }

    /// Register a new account. A successful signup does not log the user
    /// in; call [`login`](Self::login) afterwards.
    pub async fn signup(&self, email: &str, password: &str) -> bool {
        let _op = self.op_lock.lock().await;
        let _loading = self.begin_loading();

        match self.backend.signup(&Credentials::new(email, password)).await {
            Ok(()) => {
                info!(email = %email, "Signup successful, please log in");
                true
            }
            Err(e) => {
                warn!(email = %email, error = %e, "Signup failed");
                false
            }
        }
    }

    /// Log out. Always leaves the session unauthenticated, even if removing
    /// the stored tokens fails. Safe to call when already logged out.
    pub async fn logout(&self) {
        let _op = self.op_lock.lock().await;
        let _loading = self.begin_loading();

        self.reset_unauthenticated().await;
        info!("Logged out");
    }
}
