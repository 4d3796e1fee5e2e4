//! Request descriptors

use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;

use crate::error::{ApiError, ApiResult};

/// Everything needed to issue (and replay) one request
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// HTTP method
    pub method: Method,
    /// Path relative to the base URL, or an absolute URL
    pub path: String,
    /// Extra headers sent on top of the standard ones (`Authorization` is
    /// always replaced by the pipeline)
    pub headers: HeaderMap,
    /// JSON body
    pub body: Option<serde_json::Value>,
    /// Send without a bearer token and never refresh on 401
    pub skip_auth: bool,
}

impl RequestDescriptor {
    /// Create a descriptor for any method
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            skip_auth: false,
        }
    }

    /// `GET` request
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// `POST` request
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// `PUT` request
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// `PATCH` request
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    /// `DELETE` request
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach an already-built JSON body
    #[must_use]
    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize and attach a JSON body
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Decode` if the value cannot be represented as JSON.
    pub fn json<B: Serialize + ?Sized>(self, body: &B) -> ApiResult<Self> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::decode(format!("could not serialize request body: {e}")))?;
        Ok(self.body(value))
    }

    /// Add a header. `Authorization` set here is dropped when sending.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Do not attach the access token, and classify a 401 normally
    #[must_use]
    pub fn skip_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }
}
