// src/context.rs

use crate::error::ResolutionError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Per-call context handed to every accessor and strategy.
///
/// Carries an optional deadline. Cancellation is dropping the future; the
/// deadline is enforced by strategies that perform I/O through [`Context::run`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Context {
    deadline: Option<Instant>,
}

impl Context {
    /// A context without a deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    /// Derives a context whose deadline is the earlier of this one's and
    /// `timeout` from now.
    pub fn child(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(current) if current < candidate => current,
            _ => candidate,
        };
        Self::with_deadline(deadline)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Drives `fut` to completion, failing with
    /// [`ResolutionError::DeadlineExceeded`] once the deadline passes.
    /// An already expired context never polls `fut`.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, ResolutionError>
    where
        F: Future<Output = Result<T, ResolutionError>>,
    {
        if self.is_expired() {
            return Err(ResolutionError::DeadlineExceeded);
        }
        match self.deadline {
            None => fut.await,
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| ResolutionError::DeadlineExceeded)?,
        }
    }
}
