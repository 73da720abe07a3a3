//! Authenticated request pipeline
//!
//! `Dispatcher` is the one object every business service sends requests
//! through. Per request it:
//!
//! 1. re-reads the access token from the credential vault and attaches it
//! 2. hands the request to the `Transport` with the configured timeout
//! 3. on 401, asks the `RenewalCoordinator` for a fresh token and replays the
//!    request exactly once
//! 4. normalizes the final outcome and reports it to the `NotificationSink`
//!
//! Construct one per application (composition root) and share it by `Arc`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::Secret;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use session_store::{CredentialPair, CredentialVault, KeyValueStore};
use tokio::sync::RwLock;
use tracing::{Instrument, debug, info, info_span};
use uuid::Uuid;

use crate::body::{parse_body, unwrap_envelope};
use crate::config::DispatcherConfig;
use crate::error::{self, ErrorKind, NormalizedError, UNAUTHORIZED};
use crate::notify::{Notification, NotificationSink};
use crate::renewal::{self, Admission, RenewalCoordinator};
use crate::transport::{Transport, TransportRequest, TransportResponse};

/// Shown after a successful mutation when the server supplies no message.
pub const DEFAULT_SUCCESS_MESSAGE: &str = "Operation completed successfully";

/// Per-request overrides.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Replaces the configured default timeout
    pub timeout: Option<Duration>,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    /// Skip the success/error notification for this request
    pub silent: bool,
}

impl RequestOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

/// One caller request, alive until it reaches a `RequestOutcome`.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub id: Uuid,
    pub method: Method,
    /// Absolute URL, or a path joined to the base URL at send time
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Option<Duration>,
    pub silent: bool,
    /// Set once the request has been replayed after a renewal. A retried
    /// request is never queued for renewal again.
    pub retried: bool,
}

impl PendingRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            timeout: None,
            silent: false,
            retried: false,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Apply caller options. Header names and values are validated when the
    /// request is transmitted.
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.headers.extend(options.headers);
        self.query = options.query;
        self.timeout = options.timeout.or(self.timeout);
        self.silent = options.silent;
        self
    }

    fn is_mutation(&self) -> bool {
        matches!(
            self.method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }
}

/// Final result of a dispatched request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Success { status: u16, body: Value },
    Failure(NormalizedError),
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RequestOutcome::Success { .. })
    }

    /// Body with the `data` envelope removed, or the error.
    pub fn into_result(self) -> Result<Value, NormalizedError> {
        match self {
            RequestOutcome::Success { body, .. } => Ok(unwrap_envelope(body)),
            RequestOutcome::Failure(err) => Err(err),
        }
    }
}

pub struct Dispatcher {
    config: Arc<RwLock<DispatcherConfig>>,
    transport: Arc<dyn Transport>,
    vault: CredentialVault,
    notifier: Arc<dyn NotificationSink>,
    renewal: RenewalCoordinator,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        info!(base_url = %config.base_url, timeout_ms = config.timeout_ms, "dispatcher initialized");
        Self {
            config: Arc::new(RwLock::new(config)),
            transport,
            vault: CredentialVault::new(store),
            notifier,
            renewal: RenewalCoordinator::new(),
        }
    }

    /// Snapshot of the current configuration.
    pub async fn config(&self) -> DispatcherConfig {
        self.config.read().await.clone()
    }

    /// Takes effect on the next dispatched request.
    pub async fn set_base_url(&self, base_url: impl Into<String>) {
        let base_url = base_url.into();
        info!(base_url = %base_url, "base URL changed");
        self.config.write().await.base_url = base_url;
    }

    pub async fn set_verbose(&self, verbose: bool) {
        self.config.write().await.verbose = verbose;
    }

    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }

    /// Whether a renewal is in flight right now.
    pub fn is_renewing(&self) -> bool {
        self.renewal.is_renewing()
    }

    pub async fn login(&self, pair: &CredentialPair) -> session_store::Result<()> {
        self.vault.store(pair).await
    }

    /// Drop the session: both tokens and cached user data.
    pub async fn logout(&self) {
        self.vault.clear().await;
        info!("session cleared by logout");
    }

    pub async fn is_authenticated(&self) -> bool {
        self.vault.read().await.is_some()
    }

    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, NormalizedError> {
        self.call(Method::GET, url, None).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, url: &str) -> Result<T, NormalizedError> {
        self.call(Method::DELETE, url, None).await
    }

    pub async fn post<B, T>(&self, url: &str, body: &B) -> Result<T, NormalizedError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.call(Method::POST, url, Some(to_json(body)?)).await
    }

    pub async fn put<B, T>(&self, url: &str, body: &B) -> Result<T, NormalizedError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.call(Method::PUT, url, Some(to_json(body)?)).await
    }

    pub async fn patch<B, T>(&self, url: &str, body: &B) -> Result<T, NormalizedError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.call(Method::PATCH, url, Some(to_json(body)?)).await
    }

    /// Untyped entry point with per-request options.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value, NormalizedError> {
        let mut request = PendingRequest::new(method, url).with_options(options);
        if let Some(body) = body {
            request = request.with_body(body);
        }
        self.send(request).await.into_result()
    }

    /// Dispatch one request to its final outcome.
    ///
    /// Never drops a request: every call returns exactly one outcome, whether
    /// it succeeded, failed, or waited on a renewal.
    pub async fn send(&self, mut request: PendingRequest) -> RequestOutcome {
        let span = info_span!(
            "dispatch",
            request_id = %request.id,
            method = %request.method,
            url = %request.url
        );
        async move {
            let outcome = self.dispatch(&mut request).await;
            crate::metrics::record_request(&request.method, &outcome);
            self.announce(&request, &outcome);
            outcome
        }
        .instrument(span)
        .await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
    ) -> Result<T, NormalizedError> {
        let value = self
            .request(method, url, body, RequestOptions::default())
            .await?;
        serde_json::from_value(value).map_err(|e| {
            NormalizedError::decode(format!("unexpected response shape from {url}: {e}"))
        })
    }

    async fn dispatch(&self, request: &mut PendingRequest) -> RequestOutcome {
        // Token first, generation second: a renewal landing in between costs
        // at most one redundant renewal, never a replay with the same token.
        let token = self.vault.read().await.map(|pair| pair.access);
        let generation = self.renewal.generation();

        let expired = match self.transmit(request, token.as_ref()).await {
            Ok(response) if response.status == UNAUTHORIZED && !request.retried => response,
            other => return conclude(other),
        };
        debug!(
            body_len = expired.body.len(),
            "authentication expired, awaiting renewal"
        );
        request.retried = true;

        let renew = {
            let transport = self.transport.clone();
            let vault = self.vault.clone();
            let config = self.config.clone();
            move || renewal::renew(transport, vault, config)
        };

        let token = match self.renewal.admit(generation, renew) {
            Admission::Retry => match self.vault.read().await {
                Some(pair) => {
                    debug!("credentials renewed since request was sent, replaying");
                    Some(pair.access)
                }
                // Session ended in between; never replay without credentials.
                None => {
                    return RequestOutcome::Failure(NormalizedError::renewal_failed(
                        "session ended before the request could be replayed",
                    ));
                }
            },
            Admission::Wait(rx) => match rx.await {
                Ok(Ok(token)) => Some(token),
                Ok(Err(err)) => return RequestOutcome::Failure(err),
                Err(_) => {
                    return RequestOutcome::Failure(NormalizedError::renewal_failed(
                        "credential renewal ended without a result",
                    ));
                }
            },
        };

        conclude(self.transmit(request, token.as_ref()).await)
    }

    async fn transmit(
        &self,
        request: &PendingRequest,
        token: Option<&Secret<String>>,
    ) -> Result<TransportResponse, NormalizedError> {
        let (url, timeout, verbose) = {
            let config = self.config.read().await;
            (
                resolve_url(&config.base_url, &request.url, &request.query)?,
                request.timeout.unwrap_or_else(|| config.timeout()),
                config.verbose,
            )
        };

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let header = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                NormalizedError::request_setup(format!("invalid header name {name:?}: {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                NormalizedError::request_setup(format!("invalid value for header {name}: {e}"))
            })?;
            headers.insert(header, value);
        }
        headers
            .entry(ACCEPT)
            .or_insert(HeaderValue::from_static("application/json"));
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
                .map_err(|e| {
                    NormalizedError::request_setup(format!("access token is not a valid header: {e}"))
                })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let outbound = TransportRequest {
            method: request.method.clone(),
            url,
            headers,
            body: request.body.clone(),
            timeout,
        };

        let started = Instant::now();
        let result = self.transport.execute(&outbound).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let status = result.as_ref().map(|r| r.status).ok();
        if verbose {
            let response = result
                .as_ref()
                .map(|r| String::from_utf8_lossy(&r.body).into_owned())
                .ok();
            info!(
                url = %outbound.url,
                authenticated = token.is_some(),
                retried = request.retried,
                body = ?outbound.body,
                status,
                response = response.as_deref(),
                elapsed_ms,
                "request completed"
            );
        } else {
            debug!(status, elapsed_ms, retried = request.retried, "request completed");
        }

        result.map_err(|e| error::from_transport(&e, timeout))
    }

    /// Push the final outcome to the notification sink.
    fn announce(&self, request: &PendingRequest, outcome: &RequestOutcome) {
        if request.silent {
            return;
        }
        match outcome {
            RequestOutcome::Success { body, .. } if request.is_mutation() => {
                let message = error::server_message(body)
                    .unwrap_or_else(|| DEFAULT_SUCCESS_MESSAGE.to_string());
                self.notifier.notify(Notification::success(message));
            }
            RequestOutcome::Success { .. } => {}
            // Expired sessions are either renewed silently or end in a
            // renewal failure, which is reported on its own.
            RequestOutcome::Failure(err) if err.kind() == ErrorKind::AuthExpired => {}
            RequestOutcome::Failure(err) => {
                self.notifier.notify(Notification::error(err.message()));
            }
        }
    }
}

/// Join `target` to `base` unless it is already absolute, then append `query`.
pub fn resolve_url(
    base: &str,
    target: &str,
    query: &[(String, String)],
) -> Result<Url, NormalizedError> {
    let joined = if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            target.trim_start_matches('/')
        )
    };
    let mut url = Url::parse(&joined)
        .map_err(|e| NormalizedError::request_setup(format!("invalid URL {joined:?}: {e}")))?;
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query.iter());
    }
    Ok(url)
}

fn conclude(raw: Result<TransportResponse, NormalizedError>) -> RequestOutcome {
    match raw {
        Ok(response) => {
            let body = parse_body(&response.body);
            if (200..300).contains(&response.status) {
                RequestOutcome::Success {
                    status: response.status,
                    body,
                }
            } else {
                RequestOutcome::Failure(error::from_response(response.status, &body))
            }
        }
        Err(err) => RequestOutcome::Failure(err),
    }
}

fn to_json<B: Serialize + ?Sized>(body: &B) -> Result<Value, NormalizedError> {
    serde_json::to_value(body)
        .map_err(|e| NormalizedError::request_setup(format!("request body is not serializable: {e}")))
}
