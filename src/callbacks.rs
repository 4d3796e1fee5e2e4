//! Callback traits the pipeline calls into.
//!
//! The pipeline never navigates anywhere itself. When a session cannot be
//! refreshed it calls the injected [`SessionExpiredHandler`], which a desktop
//! app might use to show its login screen and a CLI to print a hint.
//!
//! # Example: using a closure
//!
//! ```no_run
//! use lms_api_client::{ApiClient, ClientConfig};
//!
//! # fn example() -> lms_api_client::ApiResult<()> {
//! let client = ApiClient::builder()
//!     .config(ClientConfig::builder().base_url("https://lms.example.com/api").build())
//!     .on_session_expired(|login_route: &str| {
//!         println!("Session expired, go to {login_route}");
//!     })
//!     .build()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Example: implementing the trait
//!
//! ```
//! use lms_api_client::callbacks::SessionExpiredHandler;
//! use std::sync::atomic::{AtomicBool, Ordering};
//!
//! #[derive(Default)]
//! struct Router {
//!     show_login: AtomicBool,
//! }
//!
//! impl SessionExpiredHandler for Router {
//!     fn on_session_expired(&self, _login_route: &str) {
//!         self.show_login.store(true, Ordering::SeqCst);
//!     }
//! }
//! ```

use std::sync::Arc;

/// Port invoked once per failed refresh, after tokens have been cleared.
pub trait SessionExpiredHandler: Send + Sync {
    /// Send the user to `login_route`
    fn on_session_expired(&self, login_route: &str);
}

impl<F> SessionExpiredHandler for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_session_expired(&self, login_route: &str) {
        self(login_route);
    }
}

/// Shareable handler
pub type SharedSessionExpiredHandler = Arc<dyn SessionExpiredHandler>;

/// Default handler: logs and does nothing else
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSessionExpired;

impl SessionExpiredHandler for LogSessionExpired {
    fn on_session_expired(&self, login_route: &str) {
        tracing::warn!(login_route, "Session expired; re-authentication required");
    }
}
