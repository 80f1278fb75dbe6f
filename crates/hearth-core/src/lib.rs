//! Hearth core library.
//!
//! Session and data-access core for the hearth mobile client: secure token
//! storage, the backend API client, the session manager, generic endpoint
//! fetching and the user profile.
//!
//! Typical wiring:
//!
//! ```no_run
//! use std::sync::Arc;
//! use hearth_core::{ApiClient, Config, KeyringStore, Resource, SessionManager};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let api = Arc::new(ApiClient::from_config(&config)?);
//! let store = Arc::new(KeyringStore::new(&config.keyring_service()));
//! let session = SessionManager::new(api.clone(), store.clone());
//! session.bootstrap().await;
//!
//! let users: Resource = Resource::new("/users", true, api, store, session.subscribe());
//! users.fetch().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod fetch;
pub mod profile;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiClient, ApiError, Backend};
pub use auth::{
    KeyringStore, MemoryStore, Redirect, RedirectWatcher, SecureStore, SessionManager,
    SessionSnapshot, User,
};
pub use config::Config;
pub use error::SessionError;
pub use fetch::{FetchPhase, FetchState, Resource};
pub use profile::{ProfileLoader, UserProfile, UserRecord};
