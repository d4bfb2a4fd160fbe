//! Per-request query context.
//!
//! Every store call made while admitting a post runs through a
//! [`QueryContext`]. The context carries the request deadline, a
//! cancellation token tied to the client connection, and the clock used to
//! decide whether bans have expired.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{Result, WardenError};

/// Deadline, cancellation and clock for one request.
#[derive(Debug, Clone)]
pub struct QueryContext {
    deadline: Instant,
    timeout: Duration,
    cancel: CancellationToken,
    now: DateTime<Utc>,
}

impl QueryContext {
    /// Create a context whose deadline is `timeout` from now.
    pub fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            timeout,
            cancel: CancellationToken::new(),
            now: Utc::now(),
        }
    }

    /// Create a context from a timeout in milliseconds.
    pub fn with_timeout_ms(timeout_ms: u64) -> Self {
        Self::new(Duration::from_millis(timeout_ms))
    }

    /// Replace the evaluation clock.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Tie the context to an existing cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The instant at which ban expiry is evaluated.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// A handle that cancels every query still running under this context.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the request has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run a store operation under the deadline and cancellation token.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(WardenError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(WardenError::Cancelled),
            res = tokio::time::timeout_at(self.deadline, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(WardenError::Timeout(self.timeout.as_millis() as u64)),
            },
        }
    }
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
