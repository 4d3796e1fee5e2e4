//! JSON file token store

use std::path::PathBuf;
use std::sync::Mutex;

use super::{StoredSession, TokenError, TokenStore};

/// Token store persisted as a JSON file.
///
/// Every write goes to a sibling temp file first and is renamed into place,
/// so a crash mid-write leaves the previous session intact.
#[derive(Debug)]
pub struct FileTokenStore {
    storage_path: PathBuf,
    // serializes read-modify-write cycles from concurrent tasks
    write_lock: Mutex<()>,
}

impl Default for FileTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTokenStore {
    /// Create a store at the default path (platform-specific config directory)
    #[must_use]
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lms-api-client");

        Self::with_path(config_dir.join("session.json"))
    }

    /// Create a store at a custom path
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            storage_path: path,
            write_lock: Mutex::new(()),
        }
    }

    /// Get the storage path
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        &self.storage_path
    }

    /// Load the whole session.
    ///
    /// A missing file is an empty session.
    ///
    /// # Errors
    ///
    /// Returns I/O and JSON errors if the file exists but cannot be read.
    pub fn load(&self) -> Result<StoredSession, TokenError> {
        if !self.storage_path.exists() {
            return Ok(StoredSession::default());
        }

        let content = std::fs::read_to_string(&self.storage_path)?;
        let session: StoredSession = serde_json::from_str(&content)?;

        Ok(session)
    }

    fn load_lossy(&self) -> StoredSession {
        match self.load() {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(
                    path = %self.storage_path.display(),
                    "Could not read token store: {e}"
                );
                StoredSession::default()
            }
        }
    }

    fn save(&self, session: &StoredSession) -> Result<(), TokenError> {
        if let Some(parent) = self.storage_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(session)?;
        let tmp_path = self.storage_path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)?;

        // Owner-only permissions on Unix
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&tmp_path, perms)?;
        }

        std::fs::rename(&tmp_path, &self.storage_path)?;

        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut StoredSession)) -> Result<(), TokenError> {
        let _guard = self.write_lock.lock().map_err(|_| TokenError::Poisoned)?;
        let mut session = self.load()?;
        f(&mut session);
        self.save(&session)
    }
}

impl TokenStore for FileTokenStore {
    fn access_token(&self) -> Option<String> {
        self.load_lossy().access_token
    }

    fn set_access_token(&self, token: &str) -> Result<(), TokenError> {
        self.update(|s| s.access_token = Some(token.to_string()))
    }

    fn refresh_token(&self) -> Option<String> {
        self.load_lossy().refresh_token
    }

    fn set_refresh_token(&self, token: &str) -> Result<(), TokenError> {
        self.update(|s| s.refresh_token = Some(token.to_string()))
    }

    fn user(&self) -> Option<serde_json::Value> {
        self.load_lossy().user
    }

    fn set_user(&self, user: serde_json::Value) -> Result<(), TokenError> {
        self.update(|s| s.user = Some(user))
    }

    fn active_role(&self) -> Option<String> {
        self.load_lossy().active_role
    }

    fn set_active_role(&self, role: &str) -> Result<(), TokenError> {
        self.update(|s| s.active_role = Some(role.to_string()))
    }

    fn clear_tokens(&self) -> Result<(), TokenError> {
        let _guard = self.write_lock.lock().map_err(|_| TokenError::Poisoned)?;
        if self.storage_path.exists() {
            std::fs::remove_file(&self.storage_path)?;
        }
        Ok(())
    }
}
