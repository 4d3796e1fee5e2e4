//! Client configuration

use reqwest::Url;
use typed_builder::TypedBuilder;

use crate::error::{ApiError, ApiResult};

/// Default refresh endpoint, relative to the base URL
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh/";
/// Default login endpoint, relative to the base URL
pub const DEFAULT_LOGIN_PATH: &str = "/auth/login/";
/// Default application route to navigate to when the session expires
pub const DEFAULT_LOGIN_ROUTE: &str = "/login";

/// Environment variable holding the API base URL
pub const ENV_API_URL: &str = "LMS_API_URL";
/// Environment variable overriding the refresh endpoint
pub const ENV_REFRESH_PATH: &str = "LMS_REFRESH_PATH";
/// Environment variable overriding the login endpoint
pub const ENV_LOGIN_PATH: &str = "LMS_LOGIN_PATH";
/// Environment variable overriding the login route
pub const ENV_LOGIN_ROUTE: &str = "LMS_LOGIN_ROUTE";

/// Configuration for [`ApiClient`](crate::ApiClient)
///
/// # Example
///
/// ```
/// use lms_api_client::ClientConfig;
///
/// let config = ClientConfig::builder()
///     .base_url("https://lms.example.com/api")
///     .refresh_path("/token/refresh/")
///     .build();
/// assert_eq!(config.login_route, "/login");
/// ```
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct ClientConfig {
    /// Base URL every relative request path is joined onto
    pub base_url: String,

    /// Refresh endpoint path (or absolute URL)
    #[builder(default = DEFAULT_REFRESH_PATH.to_string())]
    pub refresh_path: String,

    /// Login endpoint path (or absolute URL)
    #[builder(default = DEFAULT_LOGIN_PATH.to_string())]
    pub login_path: String,

    /// Route handed to the session-expired handler
    #[builder(default = DEFAULT_LOGIN_ROUTE.to_string())]
    pub login_route: String,

    /// Optional `User-Agent` header
    #[builder(default, setter(strip_option))]
    pub user_agent: Option<String>,
}

impl ClientConfig {
    /// Build a configuration from `LMS_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::InvalidConfig` if `LMS_API_URL` is not set.
    pub fn from_env() -> ApiResult<Self> {
        let base_url = std::env::var(ENV_API_URL)
            .map_err(|_| ApiError::invalid_config(format!("{ENV_API_URL} is not set")))?;

        let env_or = |key: &str, default: &str| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Ok(Self {
            base_url,
            refresh_path: env_or(ENV_REFRESH_PATH, DEFAULT_REFRESH_PATH),
            login_path: env_or(ENV_LOGIN_PATH, DEFAULT_LOGIN_PATH),
            login_route: env_or(ENV_LOGIN_ROUTE, DEFAULT_LOGIN_ROUTE),
            user_agent: None,
        })
    }

    /// Parse and normalize the base URL so relative paths append to it.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::InvalidConfig` if the URL does not parse or cannot
    /// serve as a base.
    pub fn parsed_base_url(&self) -> ApiResult<Url> {
        let mut raw = self.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let url = Url::parse(&raw)
            .map_err(|e| ApiError::invalid_config(format!("invalid base URL {raw:?}: {e}")))?;
        if url.cannot_be_a_base() {
            return Err(ApiError::invalid_config(format!(
                "base URL {raw:?} cannot be a base"
            )));
        }
        Ok(url)
    }
}

/// Resolve a request path against the base URL.
///
/// Absolute `http(s)` URLs are used as-is; anything else is appended to the
/// base URL's path (a leading `/` does not discard the base path).
pub(crate) fn resolve_url(base: &Url, path: &str) -> ApiResult<Url> {
    if path.starts_with("http://") || path.starts_with("https://") {
        return Url::parse(path)
            .map_err(|e| ApiError::invalid_config(format!("invalid URL {path:?}: {e}")));
    }
    base.join(path.trim_start_matches('/'))
        .map_err(|e| ApiError::invalid_config(format!("invalid path {path:?}: {e}")))
}
