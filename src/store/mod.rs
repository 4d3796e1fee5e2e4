//! Token storage for the request pipeline
//!
//! The pipeline reads the access token before every authenticated request and
//! writes both tokens after login and refresh. The cached user and active role
//! live next to the tokens and are cleared together with them.
//!
//! Two stores ship with the crate:
//!
//! - [`MemoryTokenStore`] keeps the session for the lifetime of the process
//! - [`FileTokenStore`] persists it as JSON in the platform config directory
//!
//! Implement [`TokenStore`] to back the session with anything else (a keyring,
//! a browser's local storage behind FFI, ...).

mod file;
mod memory;

pub use file::FileTokenStore;
pub use memory::MemoryTokenStore;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during token storage operations
#[derive(Debug, Error)]
pub enum TokenError {
    /// I/O error during storage operations
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The store's lock was poisoned by a panicking writer
    #[error("Token store lock poisoned")]
    Poisoned,
}

/// Everything the client persists between requests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    /// Short-lived bearer token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Long-lived token used only to mint new access tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Cached user profile as returned by the login endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<serde_json::Value>,

    /// Role the user is currently acting as (student, admin, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_role: Option<String>,
}

/// Durable storage for the session tokens.
///
/// Reads never fail: an unreadable store reports the value as absent.
/// Writes either fully apply or return an error.
pub trait TokenStore: Send + Sync {
    /// Current access token, if any
    fn access_token(&self) -> Option<String>;

    /// Replace the access token
    ///
    /// # Errors
    /// Returns an error if the store cannot be written.
    fn set_access_token(&self, token: &str) -> Result<(), TokenError>;

    /// Current refresh token, if any
    fn refresh_token(&self) -> Option<String>;

    /// Replace the refresh token
    ///
    /// # Errors
    /// Returns an error if the store cannot be written.
    fn set_refresh_token(&self, token: &str) -> Result<(), TokenError>;

    /// Cached user profile
    fn user(&self) -> Option<serde_json::Value>;

    /// Replace the cached user profile
    ///
    /// # Errors
    /// Returns an error if the store cannot be written.
    fn set_user(&self, user: serde_json::Value) -> Result<(), TokenError>;

    /// Active role identifier
    fn active_role(&self) -> Option<String>;

    /// Replace the active role identifier
    ///
    /// # Errors
    /// Returns an error if the store cannot be written.
    fn set_active_role(&self, role: &str) -> Result<(), TokenError>;

    /// Remove both tokens, the cached user and the active role
    ///
    /// # Errors
    /// Returns an error if the store cannot be written.
    fn clear_tokens(&self) -> Result<(), TokenError>;
}
