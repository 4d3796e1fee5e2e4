//! In-process token store

use std::sync::Mutex;

use super::{StoredSession, TokenError, TokenStore};

/// Token store that lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    session: Mutex<StoredSession>,
}

impl MemoryTokenStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with a token pair
    pub fn with_tokens(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            session: Mutex::new(StoredSession {
                access_token: Some(access_token.into()),
                refresh_token: Some(refresh_token.into()),
                ..Default::default()
            }),
        }
    }

    /// Snapshot of everything stored
    #[must_use]
    pub fn snapshot(&self) -> StoredSession {
        self.read(|s| s.clone()).unwrap_or_default()
    }

    fn read<R>(&self, f: impl FnOnce(&StoredSession) -> R) -> Option<R> {
        match self.session.lock() {
            Ok(guard) => Some(f(&guard)),
            Err(_) => {
                tracing::warn!("Memory token store lock poisoned");
                None
            }
        }
    }

    fn write(&self, f: impl FnOnce(&mut StoredSession)) -> Result<(), TokenError> {
        let mut guard = self.session.lock().map_err(|_| TokenError::Poisoned)?;
        f(&mut guard);
        Ok(())
    }
}

impl TokenStore for MemoryTokenStore {
    fn access_token(&self) -> Option<String> {
        self.read(|s| s.access_token.clone()).flatten()
    }

    fn set_access_token(&self, token: &str) -> Result<(), TokenError> {
        self.write(|s| s.access_token = Some(token.to_string()))
    }

    fn refresh_token(&self) -> Option<String> {
        self.read(|s| s.refresh_token.clone()).flatten()
    }

    fn set_refresh_token(&self, token: &str) -> Result<(), TokenError> {
        self.write(|s| s.refresh_token = Some(token.to_string()))
    }

    fn user(&self) -> Option<serde_json::Value> {
        self.read(|s| s.user.clone()).flatten()
    }

    fn set_user(&self, user: serde_json::Value) -> Result<(), TokenError> {
        self.write(|s| s.user = Some(user))
    }

    fn active_role(&self) -> Option<String> {
        self.read(|s| s.active_role.clone()).flatten()
    }

    fn set_active_role(&self, role: &str) -> Result<(), TokenError> {
        self.write(|s| s.active_role = Some(role.to_string()))
    }

    fn clear_tokens(&self) -> Result<(), TokenError> {
        self.write(|s| *s = StoredSession::default())
    }
}
