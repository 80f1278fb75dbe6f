use thiserror::Error;

use crate::api::ApiError;
use crate::auth::StoreError;

/// Everything that can go wrong inside a session or fetch operation.
///
/// None of these cross the public boundary of `SessionManager`,
/// `Resource` or `ProfileLoader`: they become a `bool`, a cleared session,
/// or an `error` string.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    NetworkFailure(#[from] ApiError),

    #[error("Login response missing tokens from backend.")]
    AuthResponseMalformed,

    #[error("Not authenticated to fetch data.")]
    NotAuthenticated,

    #[error("No authentication token found for protected endpoint.")]
    TokenMissing,

    #[error(transparent)]
    CredentialStoreFailure(#[from] StoreError),

    #[error("No user data found or invalid response format from /users.")]
    ProfileDataEmpty,
}

pub type Result<T> = std::result::Result<T, SessionError>;
