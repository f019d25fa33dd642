use thiserror::Error;

use super::{jwt::TokenError, repo::StoreError, repo_types::UniqueField};

/// Failures of the auth gateway. Store and token errors are folded into these
/// before they reach the HTTP layer.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Username already taken")]
    DuplicateUsername,
    #[error("Email already registered")]
    DuplicateEmail,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    ExpiredToken,
    #[error("User not found")]
    UserNotFound,
    #[error("{0}")]
    Validation(String),
    #[error("Internal server error")]
    Internal(anyhow::Error),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(UniqueField::Username) => AuthError::DuplicateUsername,
            StoreError::Conflict(UniqueField::Email) => AuthError::DuplicateEmail,
            other => AuthError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AuthError::ExpiredToken,
            TokenError::Malformed => AuthError::InvalidToken,
        }
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        AuthError::Internal(err)
    }
}
