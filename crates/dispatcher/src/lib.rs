//! Authenticated HTTP request dispatcher
//!
//! Every business call goes through one `Dispatcher`, which attaches the
//! stored access token, normalizes failures and transparently renews expired
//! sessions. Concurrent expiries share a single renewal call.
//!
//! Request lifecycle:
//! 1. Caller invokes `get`/`post`/... → `PendingRequest` with a fresh id
//! 2. Token read from the credential vault, request handed to the `Transport`
//! 3. 401 → `RenewalCoordinator` admits the caller: lead a renewal, queue
//!    behind the in-flight one, or replay at once if a renewal already landed
//! 4. Renewal succeeds → replay once with the new token (`retried = true`)
//! 5. Renewal fails → session cleared, every queued caller gets `RENEWAL_FAILED`
//! 6. Final outcome counted, announced to the `NotificationSink`, returned

pub mod body;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod renewal;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use client::{
    DEFAULT_SUCCESS_MESSAGE, Dispatcher, PendingRequest, RequestOptions, RequestOutcome,
};
pub use config::DispatcherConfig;
pub use error::{ErrorKind, NormalizedError};
pub use notify::{Notification, NotificationKind, NotificationSink, TracingSink};
pub use renewal::RenewalCoordinator;
pub use transport::{ReqwestTransport, Transport, TransportError, TransportRequest, TransportResponse};
