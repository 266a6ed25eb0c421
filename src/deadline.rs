//! Per-operation deadlines.
//!
//! Every externally-facing operation carries a [`Deadline`]; suspension
//! points (extractor, embedder, LLM calls) check it before issuing I/O and
//! bound their awaits with the remaining time. On expiry the operation
//! stops issuing further I/O, releases whatever it holds, and surfaces
//! [`Error::DeadlineExceeded`]; compensating cleanup keeps persistent state
//! consistent.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// A wall-clock budget for one operation.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline `duration` from now.
    pub fn after(duration: Duration) -> Self {
        Self {
            at: Some(Instant::now() + duration),
        }
    }

    /// No deadline; awaits run unbounded.
    pub fn none() -> Self {
        Self { at: None }
    }

    pub fn expired(&self) -> bool {
        matches!(self.at, Some(at) if Instant::now() >= at)
    }

    /// Time left, or `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Fail fast before starting a suspension point.
    pub fn check(&self) -> Result<()> {
        if self.expired() {
            Err(Error::DeadlineExceeded)
        } else {
            Ok(())
        }
    }

    /// Bound `fut` by the remaining budget.
    pub async fn bound<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.remaining() {
            None => fut.await,
            Some(rem) if rem.is_zero() => Err(Error::DeadlineExceeded),
            Some(rem) => match tokio::time::timeout(rem, fut).await {
                Ok(result) => result,
                Err(_) => Err(Error::DeadlineExceeded),
            },
        }
    }
}
