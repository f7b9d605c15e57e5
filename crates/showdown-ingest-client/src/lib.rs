//! Access to the remote replay service
//!
//! - [`ReplaySource`]: the search/fetch seam, implemented over HTTP by
//!   [`ShowdownClient`]
//! - [`RequestGate`]: one rate limiter shared by all requests, plus a
//!   per-attempt timeout
//! - [`RetryPolicy`]: bounded exponential backoff
//! - [`RateLimitedFetcher`]: at most `P` concurrent fetches, outcomes
//!   delivered in completion order
//! - [`SearchWorker`]: retried search of one window, paired with the
//!   cursor's next step

mod error;
mod fetcher;
mod gate;
mod http;
mod retry;
mod search;
mod source;

pub use error::SourceError;
pub use fetcher::{FetchOutcome, FetchWorker, RateLimitedFetcher, Submission};
pub use gate::RequestGate;
pub use http::ShowdownClient;
pub use retry::{with_retry_outcome, RetryOutcome, RetryPolicy};
pub use search::{SearchCompletion, SearchPage, SearchWorker};
pub use source::ReplaySource;
