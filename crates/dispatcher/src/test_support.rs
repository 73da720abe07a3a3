//! Scripted collaborators shared by the dispatcher unit tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::Value;
use session_store::{CredentialPair, CredentialVault, MemoryStore};

use crate::client::Dispatcher;
use crate::config::DispatcherConfig;
use crate::notify::{Notification, NotificationSink};
use crate::transport::{
    Transport, TransportError, TransportFuture, TransportRequest, TransportResponse,
};

pub const BASE_URL: &str = "https://api.example.com/v1";
/// Path the renewal call arrives on with the default config.
pub const RENEWAL_PATH: &str = "/v1/auth/refresh";

type Handler =
    dyn Fn(&TransportRequest) -> Result<TransportResponse, TransportError> + Send + Sync;

/// In-memory `Transport` answering from a closure and recording every call.
pub struct ScriptedTransport {
    handler: Box<Handler>,
    delays: Vec<(String, Duration)>,
    calls: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&TransportRequest) -> Result<TransportResponse, TransportError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            handler: Box::new(handler),
            delays: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Hold responses for `path` for `delay` before answering.
    pub fn with_delay(mut self, path: &str, delay: Duration) -> Self {
        self.delays.push((path.to_string(), delay));
        self
    }

    pub fn calls(&self) -> Vec<TransportRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.url.path() == path)
            .count()
    }
}

impl Transport for ScriptedTransport {
    fn execute<'a>(&'a self, request: &'a TransportRequest) -> TransportFuture<'a> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(request.clone());
            let delay = self
                .delays
                .iter()
                .find(|(path, _)| path == request.url.path())
                .map(|(_, delay)| *delay);
            match delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => tokio::task::yield_now().await,
            }
            (self.handler)(request)
        })
    }
}

pub fn json_response(status: u16, body: Value) -> Result<TransportResponse, TransportError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let body = if body.is_null() {
        Bytes::new()
    } else {
        Bytes::from(body.to_string())
    };
    Ok(TransportResponse {
        status,
        headers,
        body,
    })
}

/// Token carried in the `Authorization: Bearer` header, if any.
pub fn bearer(request: &TransportRequest) -> Option<&str> {
    request
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[derive(Default)]
pub struct RecordingSink {
    received: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn notifications(&self) -> Vec<Notification> {
        self.received.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: Notification) {
        self.received.lock().unwrap().push(notification);
    }
}

pub async fn seeded_store(access: &str, refresh: &str) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    CredentialVault::new(store.clone())
        .store(&CredentialPair::new(access, refresh))
        .await
        .unwrap();
    store
}

pub fn dispatcher(
    transport: Arc<ScriptedTransport>,
    store: Arc<MemoryStore>,
    sink: Arc<RecordingSink>,
) -> Dispatcher {
    Dispatcher::new(DispatcherConfig::new(BASE_URL), transport, store, sink)
}
