//! Dispatcher metrics
//!
//! - `dispatcher_requests_total` (counter): labels `method`, `outcome`
//! - `dispatcher_renewals_total` (counter): label `result`
//! - `dispatcher_renewal_waiters` (histogram): callers released per renewal

use reqwest::Method;

use crate::client::RequestOutcome;

/// Record the final outcome of one dispatched request.
pub fn record_request(method: &Method, outcome: &RequestOutcome) {
    let outcome = match outcome {
        RequestOutcome::Success { .. } => "success".to_string(),
        RequestOutcome::Failure(err) => err.code().to_string(),
    };
    metrics::counter!("dispatcher_requests_total", "method" => method.to_string(), "outcome" => outcome)
        .increment(1);
}

/// Record a settled renewal and how many callers it released.
pub fn record_renewal(success: bool, waiters: usize) {
    let result = if success { "success" } else { "failure" };
    metrics::counter!("dispatcher_renewals_total", "result" => result).increment(1);
    metrics::histogram!("dispatcher_renewal_waiters").record(waiters as f64);
}
