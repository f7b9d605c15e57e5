// Admission control for outbound requests: a global rate limit shared by
// every search and fetch, plus a per-attempt timeout.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::SourceError;

/// Cheap to clone; clones share one limiter.
#[derive(Clone)]
pub struct RequestGate {
    limiter: Arc<DefaultDirectRateLimiter>,
    timeout: Duration,
}

impl std::fmt::Debug for RequestGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGate")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RequestGate {
    /// Allow `requests_per_second` requests (bursting up to the same amount)
    /// and cut every attempt off after `timeout`.
    pub fn new(requests_per_second: u32, timeout: Duration) -> Self {
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rate))),
            timeout,
        }
    }

    /// Wait for a rate-limit token, then run `request` under the timeout.
    pub async fn call<T, Fut>(&self, request: Fut) -> Result<T, SourceError>
    where
        Fut: Future<Output = Result<T, SourceError>>,
    {
        self.limiter.until_ready().await;
        tokio::time::timeout(self.timeout, request)
            .await
            .unwrap_or(Err(SourceError::Timeout(self.timeout)))
    }
}
