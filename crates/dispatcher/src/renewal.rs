//! Single-flight credential renewal
//!
//! When a request fails with 401 the dispatcher asks the coordinator for
//! admission:
//!
//! - `Idle`: the caller starts the renewal. State flips to `Renewing` under
//!   the lock *before* anything is awaited, then the renewal runs in its own
//!   task so cancelling the caller cannot strand the queue.
//! - `Renewing`: the caller is queued as a waiter. No second renewal is issued.
//!
//! When the renewal settles, the whole queue is drained under the same lock
//! that flips the state back to `Idle`. Every waiter receives the same result:
//! the new access token, or the renewal error.
//!
//! The lock is a plain `std::sync::Mutex` held only for the check-and-set,
//! never across an await.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::Secret;
use reqwest::Method;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::Deserialize;
use session_store::{CredentialPair, CredentialVault};
use tokio::sync::{RwLock, oneshot};
use tracing::{debug, info, warn};

use crate::body::{parse_body, unwrap_envelope};
use crate::client::resolve_url;
use crate::config::DispatcherConfig;
use crate::error::NormalizedError;
use crate::transport::{Transport, TransportRequest};

/// New access token, or why renewal failed.
pub type RenewalResult = Result<Secret<String>, NormalizedError>;

type Waiter = oneshot::Sender<RenewalResult>;

enum RenewalState {
    Idle,
    Renewing { waiters: Vec<Waiter> },
}

/// Outcome of asking to renew.
pub enum Admission {
    /// A renewal succeeded after the request was sent. Retry with the stored
    /// credential instead of renewing again.
    Retry,
    /// Wait for the in-flight renewal (possibly just started by this caller).
    Wait(oneshot::Receiver<RenewalResult>),
}

#[derive(Clone)]
pub struct RenewalCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<RenewalState>,
    /// Bumped on every successful renewal.
    generation: AtomicU64,
}

impl Default for RenewalCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RenewalCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RenewalState::Idle),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Number of successful renewals so far. Requests record this when sent.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    pub fn is_renewing(&self) -> bool {
        matches!(*self.lock(), RenewalState::Renewing { .. })
    }

    /// Join the in-flight renewal or start one with `renew`.
    ///
    /// `sent_generation` is the generation observed when the failing request
    /// was transmitted. `renew` is only called when this caller becomes the
    /// leader; its future runs on a spawned task.
    pub fn admit<F, Fut>(&self, sent_generation: u64, renew: F) -> Admission
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RenewalResult> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.lock();
            match &mut *state {
                RenewalState::Renewing { waiters } => {
                    waiters.push(tx);
                    debug!(waiters = waiters.len(), "joined in-flight renewal");
                    return Admission::Wait(rx);
                }
                RenewalState::Idle if self.generation() != sent_generation => {
                    return Admission::Retry;
                }
                RenewalState::Idle => {
                    *state = RenewalState::Renewing { waiters: vec![tx] };
                }
            }
        }

        info!("starting credential renewal");
        let task = renew();
        let settlement = Settlement {
            coordinator: self.clone(),
            result: None,
        };
        tokio::spawn(async move {
            let result = task.await;
            settlement.finish(result);
        });
        Admission::Wait(rx)
    }

    /// Release every waiter with `result` and return to `Idle`.
    fn settle(&self, result: RenewalResult) {
        let waiters = {
            let mut state = self.lock();
            if result.is_ok() {
                self.inner.generation.fetch_add(1, Ordering::AcqRel);
            }
            match std::mem::replace(&mut *state, RenewalState::Idle) {
                RenewalState::Renewing { waiters } => waiters,
                RenewalState::Idle => Vec::new(),
            }
        };

        debug!(
            waiters = waiters.len(),
            success = result.is_ok(),
            "renewal settled"
        );
        crate::metrics::record_renewal(result.is_ok(), waiters.len());

        for waiter in waiters {
            // A dropped receiver means the caller was cancelled.
            let _ = waiter.send(result.clone());
        }
    }

    fn lock(&self) -> MutexGuard<'_, RenewalState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Settles the queue when the renewal task ends, including when it is
/// aborted or panics before producing a result.
struct Settlement {
    coordinator: RenewalCoordinator,
    result: Option<RenewalResult>,
}

impl Settlement {
    fn finish(mut self, result: RenewalResult) {
        self.result = Some(result);
    }
}

impl Drop for Settlement {
    fn drop(&mut self) {
        let result = self.result.take().unwrap_or_else(|| {
            Err(NormalizedError::renewal_failed(
                "credential renewal was aborted before completing",
            ))
        });
        self.coordinator.settle(result);
    }
}

/// Body of a successful renewal response.
#[derive(Debug, Deserialize)]
struct RenewalResponse {
    #[serde(rename = "accessToken", alias = "access_token")]
    access_token: String,
    #[serde(default, rename = "refreshToken", alias = "refresh_token")]
    refresh_token: Option<String>,
}

/// Perform one renewal and apply it to the credential store.
///
/// Success stores the new pair; failure clears the session. This call never
/// goes through the dispatcher pipeline, so it cannot recurse into renewal
/// and never produces a notification.
pub async fn renew(
    transport: Arc<dyn Transport>,
    vault: CredentialVault,
    config: Arc<RwLock<DispatcherConfig>>,
) -> RenewalResult {
    let mut teardown = ClearOnAbort(Some(vault.clone()));
    let outcome = request_new_pair(transport.as_ref(), &vault, &config).await;
    teardown.disarm();

    match outcome {
        Ok(pair) => {
            if let Err(e) = vault.store(&pair).await {
                warn!(error = %e, "failed to persist renewed credentials");
            }
            info!("credential renewal succeeded");
            Ok(pair.access)
        }
        Err(e) => {
            warn!(code = e.code(), error = %e.message(), "credential renewal failed, clearing session");
            vault.clear().await;
            Err(e)
        }
    }
}

/// Clears the session if a renewal is dropped or unwinds before it finished.
///
/// `Drop` cannot await, so the clear runs on a task of the current runtime.
struct ClearOnAbort(Option<CredentialVault>);

impl ClearOnAbort {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for ClearOnAbort {
    fn drop(&mut self) {
        let Some(vault) = self.0.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("credential renewal aborted, clearing session");
                handle.spawn(async move { vault.clear().await });
            }
            Err(_) => warn!("credential renewal aborted outside a runtime, session left in place"),
        }
    }
}

async fn request_new_pair(
    transport: &dyn Transport,
    vault: &CredentialVault,
    config: &RwLock<DispatcherConfig>,
) -> Result<CredentialPair, NormalizedError> {
    let current = vault
        .read()
        .await
        .ok_or_else(|| NormalizedError::renewal_failed("no renewal token available"))?;

    let (url, timeout) = {
        let config = config.read().await;
        let url = resolve_url(&config.base_url, &config.renewal_path, &[])
            .map_err(|e| NormalizedError::renewal_failed(e.message()))?;
        (url, config.timeout())
    };

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    let request = TransportRequest {
        method: Method::POST,
        url,
        headers,
        body: Some(serde_json::json!({ "refreshToken": current.refresh.expose() })),
        timeout,
    };

    let response = transport
        .execute(&request)
        .await
        .map_err(|e| NormalizedError::renewal_failed(format!("renewal request failed: {e}")))?;

    let body = parse_body(&response.body);
    if !(200..300).contains(&response.status) {
        return Err(NormalizedError::renewal_failed(format!(
            "renewal endpoint returned {}",
            response.status
        ))
        .with_details(body));
    }

    let renewed: RenewalResponse = serde_json::from_value(unwrap_envelope(body))
        .map_err(|e| NormalizedError::renewal_failed(format!("invalid renewal response: {e}")))?;
    let access = Secret::new(renewed.access_token);
    if access.is_blank() {
        return Err(NormalizedError::renewal_failed(
            "renewal response carried an empty access token",
        ));
    }

    // Without a new renewal token the old one stays valid.
    let refresh = match renewed.refresh_token.map(Secret::new) {
        Some(token) if !token.is_blank() => token,
        _ => current.refresh.clone(),
    };

    Ok(CredentialPair { access, refresh })
}
