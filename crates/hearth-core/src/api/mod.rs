//! REST API client module for the hearth backend.
//!
//! This module provides the `ApiClient` for talking to the backend and the
//! `Backend` trait the rest of the core is written against.
//!
//! Authenticated requests carry a JWT bearer token obtained from
//! `POST /auth/login`. Refreshing that token on a 401 is the backend
//! collaborator's concern and is not done here.

pub mod backend;
pub mod client;
pub mod error;

pub use backend::{bearer, Backend, Credentials, TokenResponse};
pub use client::ApiClient;
pub use error::ApiError;
