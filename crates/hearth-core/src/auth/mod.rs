//! Authentication module for managing the user session and stored tokens.
//!
//! This module provides:
//! - `SessionManager`: login, signup, logout and startup rehydration
//! - `SecureStore`: the encrypted key/value store holding the token pair,
//!   with an OS keychain (`KeyringStore`) and an in-memory (`MemoryStore`)
//!   implementation
//! - `User`: the signed-in identity, decoded from the access token
//! - Redirect policy deciding between the login screen and the app

pub mod credentials;
pub mod identity;
pub mod redirect;
pub mod session;

pub use credentials::{
    CredentialPair, FailureMode, KeyringStore, MemoryStore, SecureStore, StoreError,
    ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY,
};
pub use identity::{IdentitySource, User};
pub use redirect::{redirect_for, route_segments, Redirect, RedirectWatcher};
pub use session::{SessionManager, SessionSnapshot};
