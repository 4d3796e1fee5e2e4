//! Error types for the LMS API client

use thiserror::Error;

use crate::store::TokenError;

/// Machine code carried by the auth-expired error.
pub const AUTH_EXPIRED_CODE: &str = "auth_expired";

/// Message shown when the session cannot be recovered without logging in again.
pub const AUTH_EXPIRED_MESSAGE: &str = "Your session has expired. Please log in again.";

/// Main error type for the request pipeline
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// The server answered with a non-2xx status
    #[error("{message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Optional machine-readable code from the error body
        code: Option<String>,
        /// Human-readable message
        message: String,
    },

    /// The request never produced an HTTP response (DNS, refused, timeout, offline)
    #[error("{0}")]
    Network(String),

    /// A successful response carried a body that could not be decoded
    #[error("Invalid response body: {0}")]
    Decode(String),

    /// The token store could not persist a change
    #[error("Token storage error: {0}")]
    Storage(String),

    /// Invalid configuration (base URL, endpoint paths)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for pipeline operations
pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    /// Create an API error
    pub fn api(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            code,
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// The error raised once a session can no longer be refreshed
    #[must_use]
    pub fn auth_expired() -> Self {
        Self::Api {
            status: 401,
            code: Some(AUTH_EXPIRED_CODE.to_string()),
            message: AUTH_EXPIRED_MESSAGE.to_string(),
        }
    }

    /// Whether this is the terminal auth-expired error
    #[must_use]
    pub fn is_auth_expired(&self) -> bool {
        matches!(
            self,
            Self::Api { status: 401, code: Some(code), .. } if code == AUTH_EXPIRED_CODE
        )
    }

    /// HTTP status, if the server answered
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Machine-readable code, if the server supplied one
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Whether the request failed before any HTTP response arrived
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Message suitable for a toast or inline error.
    ///
    /// Local failures (decode, storage, config) collapse to a generic line so
    /// raw payloads never reach the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Api { message, .. } | Self::Network(message) => message.clone(),
            Self::Decode(_) | Self::Storage(_) | Self::InvalidConfig(_) => {
                "An unexpected error occurred. Please try again.".to_string()
            }
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        Self::Storage(err.to_string())
    }
}
