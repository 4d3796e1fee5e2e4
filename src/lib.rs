//! # LMS API client
//!
//! Authenticated JSON REST client for the LMS backend (dashboards, quizzes,
//! tasks, spot checks, users and departments). Async/await, typed errors,
//! tokio-based.
//!
//! ## Quick Start
//!
//! ```no_run
//! use lms_api_client::{ApiClient, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ApiClient::new(ClientConfig::from_env()?)?;
//!
//!     client
//!         .login(&serde_json::json!({"username": "ada", "password": "hunter2"}))
//!         .await?;
//!
//!     let quiz: serde_json::Value = client.get("/quizzes/42/").await?;
//!     println!("{quiz}");
//!     Ok(())
//! }
//! ```
//!
//! ## Request pipeline
//!
//! Every request goes through the same steps:
//!
//! 1. `Content-Type: application/json` is set, and the stored access token is
//!    attached as `Authorization: Bearer <token>` unless the request opts out
//!    with [`RequestDescriptor::skip_auth`]
//! 2. `204 No Content` resolves to `None` without parsing
//! 3. A `401` on an authenticated request hands over to the
//!    [`RefreshCoordinator`]: one refresh exchange runs no matter how many
//!    requests were rejected at the same time, then each request is retried
//!    exactly once with the new token
//! 4. If the refresh fails, tokens are cleared, the
//!    [`SessionExpiredHandler`](callbacks::SessionExpiredHandler) is called with
//!    the login route, and the request fails with the auth-expired error
//! 5. Every other failure is classified into [`ApiError`]
//!
//! ## Architecture
//!
//! - [`client`]: [`ApiClient`], login/logout and typed convenience methods
//! - [`transport`]: one HTTP call per attempt, JSON in and out
//! - [`refresh`]: single-flight token refresh
//! - [`classify`]: status and transport failures to [`ApiError`]
//! - [`store`]: token persistence ([`MemoryTokenStore`], [`FileTokenStore`])
//! - [`retry`]: caller-side [`RetryPolicy`]
//! - [`config`]: [`ClientConfig`]
//! - [`callbacks`]: the session-expired port
//! - [`error`]: error types
//!
//! ## Logging
//!
//! This crate uses [`tracing`](https://crates.io/crates/tracing) for structured logging.
//! Tracing events are always emitted but are zero-cost when no subscriber is attached.
//! To see logs, attach a tracing subscriber in your application:
//!
//! ```rust,ignore
//! tracing_subscriber::fmt::init();
//! ```
//!
//! ## Error Handling
//!
//! All fallible operations return [`ApiResult<T>`]:
//!
//! ```no_run
//! # use lms_api_client::{ApiClient, ApiError};
//! # async fn example(client: ApiClient) {
//! match client.get::<serde_json::Value>("/departments/").await {
//!     Ok(departments) => { /* ... */ }
//!     Err(e) if e.is_auth_expired() => {
//!         // the session-expired handler already ran
//!     }
//!     Err(e) => eprintln!("{}", e.user_message()),
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod callbacks;
pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod refresh;
pub mod request;
pub mod retry;
pub mod store;
pub mod transport;

// Re-export commonly used types
pub use callbacks::{LogSessionExpired, SessionExpiredHandler};
pub use client::{ApiClient, ApiClientBuilder, LoginResponse};
pub use config::ClientConfig;
pub use error::{ApiError, ApiResult};
pub use refresh::{RefreshCoordinator, RefreshFailure};
pub use request::RequestDescriptor;
pub use retry::RetryPolicy;
pub use store::{FileTokenStore, MemoryTokenStore, StoredSession, TokenError, TokenStore};

/// Version of the client
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
