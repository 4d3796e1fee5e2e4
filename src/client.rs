//! `ApiClient`: the authenticated request pipeline
//!
//! ```text
//! caller ──▶ execute ──▶ HttpTransport::send ──▶ 2xx / 204 / 4xx / 5xx ──▶ caller
//!                              │
//!                              │ 401 and !skip_auth
//!                              ▼
//!                     RefreshCoordinator (single flight)
//!                       │ ok                 │ err
//!                       ▼                    ▼
//!              retry once with new     tokens cleared, session-expired
//!              token (401 again ──▶    handler called, auth-expired error
//!              auth-expired error)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use lms_api_client::{ApiClient, ClientConfig, FileTokenStore};
//! use serde::Deserialize;
//! use std::sync::Arc;
//!
//! #[derive(Deserialize)]
//! struct Quiz {
//!     id: u64,
//!     title: String,
//! }
//!
//! # async fn example() -> lms_api_client::ApiResult<()> {
//! let client = ApiClient::builder()
//!     .config(ClientConfig::builder().base_url("https://lms.example.com/api").build())
//!     .store(Arc::new(FileTokenStore::new()))
//!     .build()?;
//!
//! client
//!     .login(&serde_json::json!({"username": "ada", "password": "hunter2"}))
//!     .await?;
//!
//! let quiz: Quiz = client.get("/quizzes/42/").await?;
//! println!("{}: {}", quiz.id, quiz.title);
//!
//! client.delete("/tasks/7/").await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use reqwest::StatusCode;
use reqwest::header::HeaderValue;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};

use crate::callbacks::{LogSessionExpired, SessionExpiredHandler, SharedSessionExpiredHandler};
use crate::config::ClientConfig;
use crate::error::{ApiError, ApiResult};
use crate::refresh::RefreshCoordinator;
use crate::request::RequestDescriptor;
use crate::store::{MemoryTokenStore, TokenStore};
use crate::transport::HttpTransport;

/// Login endpoint response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    /// New access token
    #[serde(alias = "access")]
    pub access_token: String,

    /// New refresh token
    #[serde(default, alias = "refresh", skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Profile of the user who logged in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<serde_json::Value>,
}

/// Builder for [`ApiClient`]
#[derive(Default)]
pub struct ApiClientBuilder {
    config: Option<ClientConfig>,
    store: Option<Arc<dyn TokenStore>>,
    on_session_expired: Option<SharedSessionExpiredHandler>,
    http_client: Option<reqwest::Client>,
}

impl ApiClientBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the client configuration (required)
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the token store (default: [`MemoryTokenStore`])
    #[must_use]
    pub fn store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the handler called when the session cannot be refreshed
    /// (default: [`LogSessionExpired`])
    #[must_use]
    pub fn on_session_expired(mut self, handler: impl SessionExpiredHandler + 'static) -> Self {
        self.on_session_expired = Some(Arc::new(handler));
        self
    }

    /// Use a pre-configured `reqwest::Client` (proxies, TLS, timeouts)
    #[must_use]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Build the client
    ///
    /// # Errors
    ///
    /// Returns `ApiError::InvalidConfig` if no configuration was given, the
    /// base URL is invalid, or the user agent is not a valid header value.
    pub fn build(self) -> ApiResult<ApiClient> {
        let config = self
            .config
            .ok_or_else(|| ApiError::invalid_config("ApiClient requires a ClientConfig"))?;
        let base_url = config.parsed_base_url()?;

        let user_agent = config
            .user_agent
            .as_deref()
            .map(HeaderValue::from_str)
            .transpose()
            .map_err(|e| ApiError::invalid_config(format!("invalid user agent: {e}")))?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryTokenStore::new()));
        let on_expired = self
            .on_session_expired
            .unwrap_or_else(|| Arc::new(LogSessionExpired));

        let transport = HttpTransport::new(
            self.http_client.unwrap_or_default(),
            base_url,
            user_agent,
        );
        let refresh = RefreshCoordinator::new(
            transport.clone(),
            Arc::clone(&store),
            config.refresh_path.clone(),
            config.login_route.clone(),
            on_expired,
        );

        Ok(ApiClient {
            inner: Arc::new(ClientInner {
                config,
                transport,
                store,
                refresh,
            }),
        })
    }
}

/// Authenticated JSON REST client.
///
/// Cheap to clone; clones share the token store and the refresh coordinator.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    transport: HttpTransport,
    store: Arc<dyn TokenStore>,
    refresh: RefreshCoordinator,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.transport.base_url().as_str())
            .field("refresh", &self.inner.refresh)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a builder
    #[must_use]
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::new()
    }

    /// Create a client with an in-memory token store
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: ClientConfig) -> ApiResult<Self> {
        Self::builder().config(config).build()
    }

    /// Client configuration
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Token store backing this client
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.inner.store
    }

    /// Refresh coordinator shared by all clones of this client
    #[must_use]
    pub fn refresh_coordinator(&self) -> &RefreshCoordinator {
        &self.inner.refresh
    }

    /// Run a request through the pipeline.
    ///
    /// Returns `None` for `204 No Content`. A 401 on an authenticated request
    /// triggers one shared refresh and exactly one retry.
    ///
    /// # Errors
    ///
    /// - `ApiError::Api` for non-2xx responses
    /// - the auth-expired `ApiError::Api` when the session cannot be refreshed
    ///   or the retry is rejected again
    /// - `ApiError::Network` when no response arrives
    /// - `ApiError::Decode` when a 2xx body does not parse as `T`
    pub async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestDescriptor,
    ) -> ApiResult<Option<T>> {
        let token = if request.skip_auth {
            None
        } else {
            self.inner.store.access_token()
        };

        let response = self.inner.transport.send(&request, token.as_deref()).await?;

        if request.skip_auth || response.status() != StatusCode::UNAUTHORIZED {
            return HttpTransport::read_json(response).await;
        }
        drop(response);

        tracing::debug!(method = %request.method, path = %request.path, "Access token rejected");

        if self
            .inner
            .refresh
            .refresh_rejected(token.as_deref())
            .await
            .is_err()
        {
            return Err(ApiError::auth_expired());
        }

        let token = self.inner.store.access_token();
        let retry = self.inner.transport.send(&request, token.as_deref()).await?;

        if retry.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(
                method = %request.method,
                path = %request.path,
                "Request rejected again after token refresh"
            );
            return Err(ApiError::auth_expired());
        }

        HttpTransport::read_json(retry).await
    }

    /// `GET` a JSON resource
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        require_body(self.execute(RequestDescriptor::get(path)).await?)
    }

    /// `POST` a JSON body
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn post<B, T>(&self, path: &str, body: &B) -> ApiResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        require_body(self.execute(RequestDescriptor::post(path).json(body)?).await?)
    }

    /// `PUT` a JSON body
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn put<B, T>(&self, path: &str, body: &B) -> ApiResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        require_body(self.execute(RequestDescriptor::put(path).json(body)?).await?)
    }

    /// `PATCH` a JSON body
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn patch<B, T>(&self, path: &str, body: &B) -> ApiResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        require_body(self.execute(RequestDescriptor::patch(path).json(body)?).await?)
    }

    /// `DELETE` a resource, ignoring any response body
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn delete(&self, path: &str) -> ApiResult<()> {
        self.execute::<IgnoredAny>(RequestDescriptor::delete(path))
            .await
            .map(|_| ())
    }

    /// Exchange credentials for a token pair and cache the user.
    ///
    /// The login call itself is sent without a bearer token, and a 401 from it
    /// is an ordinary "authentication failed" error.
    ///
    /// # Errors
    ///
    /// Returns the classified error of the login call, or `ApiError::Storage`
    /// if the tokens cannot be persisted.
    pub async fn login<C: Serialize + ?Sized>(&self, credentials: &C) -> ApiResult<LoginResponse> {
        let request = RequestDescriptor::post(self.inner.config.login_path.as_str())
            .json(credentials)?
            .skip_auth();
        let login: LoginResponse = require_body(self.execute(request).await?)?;

        let store = &self.inner.store;
        store.clear_tokens()?;
        store.set_access_token(&login.access_token)?;
        if let Some(refresh_token) = &login.refresh_token {
            store.set_refresh_token(refresh_token)?;
        }
        if let Some(user) = &login.user {
            store.set_user(user.clone())?;
        }

        tracing::debug!("Logged in");
        Ok(login)
    }

    /// Forget the session: tokens, cached user and active role
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Storage` if the store cannot be cleared.
    pub fn logout(&self) -> ApiResult<()> {
        self.inner.store.clear_tokens()?;
        tracing::debug!("Logged out");
        Ok(())
    }

    /// Whether an access token is stored
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.store.access_token().is_some()
    }

    /// Cached user profile from the last login
    #[must_use]
    pub fn current_user(&self) -> Option<serde_json::Value> {
        self.inner.store.user()
    }

    /// Role the user is acting as
    #[must_use]
    pub fn active_role(&self) -> Option<String> {
        self.inner.store.active_role()
    }

    /// Switch the active role
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Storage` if the store cannot be written.
    pub fn set_active_role(&self, role: &str) -> ApiResult<()> {
        self.inner.store.set_active_role(role)?;
        Ok(())
    }
}

/// Map a no-content result onto `T`, which works for `()`, `Option<_>` and
/// `serde_json::Value`.
fn require_body<T: DeserializeOwned>(body: Option<T>) -> ApiResult<T> {
    match body {
        Some(value) => Ok(value),
        None => serde_json::from_value(serde_json::Value::Null)
            .map_err(|_| ApiError::decode("expected a response body, got 204 No Content")),
    }
}
