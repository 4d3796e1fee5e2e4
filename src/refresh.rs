//! Single-flight access token refresh
//!
//! The coordinator is either idle or refreshing. The first caller to see a 401
//! starts the refresh exchange; everyone who arrives while it is in flight
//! awaits the same [`PendingRefresh`] and observes the same outcome. The
//! in-flight slot is claimed under a plain mutex before the first `.await`, so
//! two tasks can never both see "idle" and each start an exchange. A 401 that
//! arrives after the exchange for its token already failed gets that failure
//! back instead of expiring the session a second time.
//!
//! ```text
//!            401 on authenticated request
//!   Idle ─────────────────────────────────▶ Refreshing
//!    ▲                                          │
//!    │   ok: store new tokens                   │ POST refresh endpoint
//!    │   err: clear tokens, session expired     │ (auth skipped)
//!    └──────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Deserialize;
use thiserror::Error;

use crate::callbacks::SharedSessionExpiredHandler;
use crate::error::ApiError;
use crate::request::RequestDescriptor;
use crate::store::TokenStore;
use crate::transport::HttpTransport;

/// Why a refresh did not produce a new access token
#[derive(Debug, Clone, Error)]
pub enum RefreshFailure {
    /// No refresh token was stored; no request was made
    #[error("No refresh token available")]
    MissingRefreshToken,

    /// The exchange failed (non-2xx, network, bad body, or storing the result)
    #[error("Refresh exchange failed: {0}")]
    Exchange(#[from] ApiError),
}

/// Result every waiter of a refresh observes
pub type RefreshOutcome = Result<(), RefreshFailure>;

/// Handle to the refresh currently in flight
pub type PendingRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Refresh endpoint response
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(alias = "access")]
    access_token: String,
    #[serde(default, alias = "refresh")]
    refresh_token: Option<String>,
}

/// Owns the refresh-in-progress marker for one client session
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    transport: HttpTransport,
    store: Arc<dyn TokenStore>,
    refresh_path: String,
    login_route: String,
    on_expired: SharedSessionExpiredHandler,
    pending: Mutex<Option<PendingRefresh>>,
    last_failure: Mutex<Option<FailedRefresh>>,
    exchanges: AtomicU64,
}

/// The most recent refresh that ended the session
struct FailedRefresh {
    /// Access token that was stored when the refresh started
    started_with: Option<String>,
    failure: RefreshFailure,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refresh_path", &self.inner.refresh_path)
            .field("in_flight", &self.is_refreshing())
            .field("exchanges", &self.exchange_count())
            .finish_non_exhaustive()
    }
}

impl RefreshCoordinator {
    /// Create a coordinator
    pub fn new(
        transport: HttpTransport,
        store: Arc<dyn TokenStore>,
        refresh_path: impl Into<String>,
        login_route: impl Into<String>,
        on_expired: SharedSessionExpiredHandler,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                refresh_path: refresh_path.into(),
                login_route: login_route.into(),
                on_expired,
                pending: Mutex::new(None),
                last_failure: Mutex::new(None),
                exchanges: AtomicU64::new(0),
            }),
        }
    }

    /// Join the refresh in flight, or start one.
    #[must_use]
    pub fn ensure_fresh_token(&self) -> PendingRefresh {
        self.acquire(None)
    }

    /// Like [`ensure_fresh_token`](Self::ensure_fresh_token), for a request that
    /// was rejected while carrying `rejected_token`.
    ///
    /// If the stored token has changed since that request went out, a refresh
    /// (or login) already landed and the returned future resolves immediately.
    /// If a refresh started for that same token already failed, the returned
    /// future resolves to that failure without expiring the session again.
    #[must_use]
    pub fn refresh_rejected(&self, rejected_token: Option<&str>) -> PendingRefresh {
        self.acquire(Some(rejected_token))
    }

    /// Whether a refresh is currently in flight
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.inner.pending_slot().is_some()
    }

    /// Number of refresh exchanges that reached the network
    #[must_use]
    pub fn exchange_count(&self) -> u64 {
        self.inner.exchanges.load(Ordering::Relaxed)
    }

    fn acquire(&self, rejected_token: Option<Option<&str>>) -> PendingRefresh {
        let mut slot = self.inner.pending_slot();

        if let Some(pending) = slot.as_ref() {
            tracing::debug!("Joining in-flight token refresh");
            return pending.clone();
        }

        let current = self.inner.store.access_token();
        if let Some(rejected) = rejected_token {
            if current.is_some() && current.as_deref() != rejected {
                tracing::debug!("Access token already rotated; skipping refresh");
                return futures::future::ready(Ok(())).boxed().shared();
            }
            let expired = current
                .is_none()
                .then(|| self.inner.failure_for(rejected))
                .flatten();
            if let Some(failure) = expired {
                tracing::debug!("Session already expired for this token; skipping refresh");
                return futures::future::ready(Err(failure)).boxed().shared();
            }
        }

        tracing::debug!("Starting token refresh");
        let inner = Arc::clone(&self.inner);
        let pending = async move {
            let outcome = inner.exchange().await;
            match &outcome {
                Ok(()) => *inner.last_failure_slot() = None,
                Err(failure) => {
                    *inner.last_failure_slot() = Some(FailedRefresh {
                        started_with: current,
                        failure: failure.clone(),
                    });
                    inner.expire(failure);
                }
            }
            // back to idle; the next 401 starts a new refresh
            inner.pending_slot().take();
            outcome
        }
        .boxed()
        .shared();

        *slot = Some(pending.clone());
        pending
    }
}

impl Inner {
    fn pending_slot(&self) -> std::sync::MutexGuard<'_, Option<PendingRefresh>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn last_failure_slot(&self) -> std::sync::MutexGuard<'_, Option<FailedRefresh>> {
        self.last_failure.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn failure_for(&self, rejected_token: Option<&str>) -> Option<RefreshFailure> {
        let last = self.last_failure_slot();
        let failed = last.as_ref()?;
        (rejected_token.is_some() && failed.started_with.as_deref() == rejected_token)
            .then(|| failed.failure.clone())
    }

    async fn exchange(&self) -> RefreshOutcome {
        let refresh_token = self
            .store
            .refresh_token()
            .ok_or(RefreshFailure::MissingRefreshToken)?;

        self.exchanges.fetch_add(1, Ordering::Relaxed);

        let request = RequestDescriptor::post(self.refresh_path.as_str())
            .body(serde_json::json!({ "refresh_token": refresh_token }))
            .skip_auth();

        let response = self.transport.send(&request, None).await?;
        let tokens = HttpTransport::read_json::<RefreshResponse>(response)
            .await?
            .ok_or_else(|| ApiError::decode("refresh endpoint returned no content"))?;

        self.store.set_access_token(&tokens.access_token).map_err(ApiError::from)?;
        if let Some(rotated) = &tokens.refresh_token {
            self.store.set_refresh_token(rotated).map_err(ApiError::from)?;
        }

        tracing::debug!(rotated = tokens.refresh_token.is_some(), "Token refresh succeeded");
        Ok(())
    }

    fn expire(&self, failure: &RefreshFailure) {
        tracing::warn!("Token refresh failed: {failure}");
        if let Err(e) = self.store.clear_tokens() {
            tracing::warn!("Could not clear tokens after failed refresh: {e}");
        }
        self.on_expired.on_session_expired(&self.login_route);
    }
}
