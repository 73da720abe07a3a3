//! Single network call abstraction
//!
//! `Transport` performs exactly one HTTP exchange and knows nothing about
//! credentials, renewal or notifications. Returns a boxed future so the
//! dispatcher can hold it as `Arc<dyn Transport>` and tests can script it.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Method, Url};
use serde_json::Value;

/// Fully resolved outbound request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    pub timeout: Duration,
}

/// Any response the server produced, regardless of status.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// The exchange produced no response.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request setup failed: {0}")]
    Setup(String),
}

pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + Send + 'a>>;

pub trait Transport: Send + Sync {
    fn execute<'a>(&'a self, request: &'a TransportRequest) -> TransportFuture<'a>;
}

/// Production transport over a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Build with a default client.
    pub fn build() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Setup(format!("building HTTP client: {e}")))?;
        Ok(Self::new(client))
    }
}

impl Transport for ReqwestTransport {
    fn execute<'a>(&'a self, request: &'a TransportRequest) -> TransportFuture<'a> {
        Box::pin(async move {
            let mut builder = self
                .client
                .request(request.method.clone(), request.url.clone())
                .headers(request.headers.clone())
                .timeout(request.timeout);
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await.map_err(classify)?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(classify)?;

            Ok(TransportResponse {
                status,
                headers,
                body,
            })
        })
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_builder() {
        TransportError::Setup(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}
