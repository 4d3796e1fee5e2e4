//! HTTP transport for the request pipeline
//!
//! [`HttpTransport`] performs exactly one network call per [`send`](HttpTransport::send)
//! and turns the response into a parsed body or a classified error with
//! [`read_json`](HttpTransport::read_json). It knows nothing about refresh;
//! the 401 interception lives in [`ApiClient`](crate::ApiClient).

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderValue, USER_AGENT};
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;

use crate::classify::{classify_response, classify_transport};
use crate::config::resolve_url;
use crate::error::{ApiError, ApiResult};
use crate::request::RequestDescriptor;

const APPLICATION_JSON: &str = "application/json";

/// Thin wrapper over a `reqwest::Client` bound to a base URL
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: Url,
    user_agent: Option<HeaderValue>,
}

impl HttpTransport {
    /// Create a transport
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: Url, user_agent: Option<HeaderValue>) -> Self {
        Self {
            http,
            base_url,
            user_agent,
        }
    }

    /// Base URL relative paths are joined onto
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Issue one request.
    ///
    /// `access_token` is attached as the only `Authorization` header unless the
    /// descriptor skips auth, in which case none is sent. Any status comes
    /// back as `Ok`; only transport failures are errors.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Network` if no response arrives, or
    /// `ApiError::InvalidConfig` if the path cannot be resolved or the token
    /// is not a valid header value.
    pub async fn send(
        &self,
        request: &RequestDescriptor,
        access_token: Option<&str>,
    ) -> ApiResult<Response> {
        let url = resolve_url(&self.base_url, &request.path)?;

        let mut headers = request.headers.clone();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        if !headers.contains_key(ACCEPT) {
            headers.insert(ACCEPT, HeaderValue::from_static(APPLICATION_JSON));
        }
        if let Some(agent) = &self.user_agent {
            headers.insert(USER_AGENT, agent.clone());
        }

        // the pipeline owns Authorization; a caller-supplied value never goes out
        headers.remove(AUTHORIZATION);
        match access_token {
            Some(token) if !request.skip_auth => {
                tracing::trace!("Attaching bearer token");
                headers.insert(AUTHORIZATION, bearer_value(token)?);
            }
            _ => tracing::trace!(skip_auth = request.skip_auth, "Sending without bearer token"),
        }

        let mut builder = self
            .http
            .request(request.method.clone(), url.clone())
            .headers(headers);

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| classify_transport(&e))?;

        tracing::debug!(
            method = %request.method,
            url = %url,
            status = response.status().as_u16(),
            "Request completed"
        );

        Ok(response)
    }

    /// Turn a response into its parsed JSON body.
    ///
    /// `204 No Content` yields `None` without touching the body. Non-2xx
    /// statuses are classified from the body text.
    ///
    /// # Errors
    ///
    /// Returns the classified `ApiError::Api` for non-2xx statuses and
    /// `ApiError::Decode` if a 2xx body is not valid JSON for `T`.
    pub async fn read_json<T: DeserializeOwned>(response: Response) -> ApiResult<Option<T>> {
        let status = response.status();

        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        if !status.is_success() {
            // an unreadable error body still gets the status default message
            let body = response.text().await.unwrap_or_default();
            return Err(classify_response(status.as_u16(), &body));
        }

        let bytes = response.bytes().await.map_err(|e| classify_transport(&e))?;
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| ApiError::decode(format!("{status}: {e}")))
    }
}

fn bearer_value(token: &str) -> ApiResult<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| ApiError::invalid_config(format!("access token is not a valid header: {e}")))?;
    value.set_sensitive(true);
    Ok(value)
}
