use thiserror::Error;

use crate::api::ApiError;

/// Failures surfaced to callers of the session lifecycle operations.
///
/// None of these are fatal to the process. Cloneable so that every caller
/// coalesced onto one refresh observes the same outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Unable to reach the server: {0}")]
    NetworkFailure(String),

    #[error("No refresh credential available")]
    NoRefreshCredential,

    #[error("Session refresh rejected: {0}")]
    RefreshRejected(String),

    #[error("Credential storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Unexpected response from server: {0}")]
    MalformedResponse(String),

    #[error("Operation superseded by a later session change")]
    Superseded,
}

impl AuthError {
    /// Classify a failed login or registration
    pub(crate) fn from_sign_in(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized => AuthError::InvalidCredentials("Invalid username or password".to_string()),
            ApiError::Rejected(msg) | ApiError::AccessDenied(msg) => AuthError::InvalidCredentials(msg),
            ApiError::InvalidResponse(msg) => AuthError::MalformedResponse(msg),
            other => AuthError::NetworkFailure(other.to_string()),
        }
    }

    /// Classify a failed refresh
    pub(crate) fn from_refresh(err: ApiError) -> Self {
        if err.is_transport() {
            AuthError::NetworkFailure(err.to_string())
        } else {
            AuthError::RefreshRejected(err.to_string())
        }
    }
}

/// Failures of a [`SessionStore`](super::SessionStore) backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt session file: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::StorageUnavailable(err.to_string())
    }
}
