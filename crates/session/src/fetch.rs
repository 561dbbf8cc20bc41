//! Bounded parallel fetch with per-field fallback.
//!
//! Several independent lookups run concurrently under one shared deadline.
//! Each field settles on its own: a failure or a missed deadline replaces
//! that field's value with its fallback without affecting the others, so
//! the caller always ends up with a complete result.
//!
//! ```ignore
//! let fetch = BoundedFetch::within(Duration::from_secs(5));
//! let (a, b) = tokio::join!(
//!     fetch.settle("a", load_a(), 0),
//!     fetch.settle("b", load_b(), false),
//! );
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// How a field got its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldOutcome {
    Resolved,
    Failed(String),
    TimedOut,
}

/// Final value of one field plus how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settled<T> {
    pub value: T,
    pub outcome: FieldOutcome,
}

impl<T> Settled<T> {
    pub fn is_resolved(&self) -> bool {
        matches!(self.outcome, FieldOutcome::Resolved)
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

/// Shared deadline for a group of lookups.
#[derive(Debug, Clone, Copy)]
pub struct BoundedFetch {
    deadline: Instant,
}

impl BoundedFetch {
    /// Start the clock now; every field must settle within `budget`.
    pub fn within(budget: Duration) -> Self {
        Self {
            deadline: Instant::now() + budget,
        }
    }

    /// Drive `lookup` until the shared deadline, substituting `fallback` on
    /// error or timeout.
    pub async fn settle<T, E, F>(&self, field: &'static str, lookup: F, fallback: T) -> Settled<T>
    where
        F: Future<Output = Result<T, E>>,
        E: core::fmt::Display,
    {
        match tokio::time::timeout_at(self.deadline, lookup).await {
            Ok(Ok(value)) => Settled {
                value,
                outcome: FieldOutcome::Resolved,
            },
            Ok(Err(err)) => {
                tracing::debug!(field, error = %err, "lookup failed; using fallback");
                Settled {
                    value: fallback,
                    outcome: FieldOutcome::Failed(err.to_string()),
                }
            }
            Err(_) => {
                tracing::debug!(field, "lookup missed deadline; using fallback");
                Settled {
                    value: fallback,
                    outcome: FieldOutcome::TimedOut,
                }
            }
        }
    }
}
