//! Cancellation with an optional deadline.
//!
//! Every long-running control plane operation takes a `Deadline`. It bundles a
//! [`CancellationToken`] with an optional instant so that callers can tell an
//! explicit cancel apart from a timeout ([`Expiry`]).

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a deadline fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// The token was cancelled explicitly.
    Cancelled,
    /// The deadline instant passed.
    TimedOut,
}

impl std::fmt::Display for Expiry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expiry::Cancelled => f.write_str("operation cancelled"),
            Expiry::TimedOut => f.write_str("deadline exceeded"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Deadline {
    token: CancellationToken,
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline that only fires on explicit cancellation.
    pub fn never() -> Self {
        Self {
            token: CancellationToken::new(),
            at: None,
        }
    }

    /// A fresh deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            at: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Non-blocking check. `None` while the operation may continue.
    pub fn expiry(&self) -> Option<Expiry> {
        if self.token.is_cancelled() {
            return Some(Expiry::Cancelled);
        }
        match self.at {
            Some(at) if Instant::now() >= at => Some(Expiry::TimedOut),
            _ => None,
        }
    }

    /// Resolves once the deadline fires.
    pub async fn expired(&self) -> Expiry {
        if let Some(expiry) = self.expiry() {
            return expiry;
        }
        match self.at {
            Some(at) => tokio::select! {
                _ = self.token.cancelled() => Expiry::Cancelled,
                _ = tokio::time::sleep_until(at) => Expiry::TimedOut,
            },
            None => {
                self.token.cancelled().await;
                Expiry::Cancelled
            }
        }
    }

    /// Drive `fut` to completion unless the deadline fires first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Expiry> {
        if let Some(expiry) = self.expiry() {
            return Err(expiry);
        }
        tokio::select! {
            out = fut => Ok(out),
            expiry = self.expired() => Err(expiry),
        }
    }

    /// Sleep for `period`, returning early with the expiry if the deadline fires.
    pub async fn sleep(&self, period: Duration) -> Result<(), Expiry> {
        self.run(tokio::time::sleep(period)).await
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::never()
    }
}
