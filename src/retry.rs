//! Exponential backoff with jitter around remote writes.
//!
//! Only errors whose [`Retryable`] verdict is true are retried; anything
//! else is handed straight back to the caller. Once retries are exhausted
//! the last error is returned unchanged.

use crate::error::Retryable;
use futures::stream::{self, StreamExt};
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, instrument, warn};

pub const DEFAULT_BATCH_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound (exclusive) of the random jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            max_jitter: Duration::from_millis(1_000),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (0-based):
    /// `min(initial_delay * 2^attempt + jitter, max_delay)`.
    pub fn backoff(&self, attempt: u32, jitter: Duration) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .saturating_mul(factor)
            .saturating_add(jitter)
            .min(self.max_delay)
    }

    fn sample_jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..max_ms))
    }

    /// Decide what happens after a failed attempt: `Some(delay)` to retry,
    /// `None` to give up.
    fn next_delay<E: Retryable + fmt::Display>(&self, attempt: u32, err: &E) -> Option<Duration> {
        if !err.is_retryable() {
            debug!(attempt = attempt + 1, %err, "non-retryable failure");
            return None;
        }
        if attempt >= self.max_retries {
            error!(attempts = attempt + 1, %err, "retries exhausted");
            return None;
        }
        let delay = self.backoff(attempt, self.sample_jitter());
        warn!(
            attempt = attempt + 1,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            %err,
            "retryable failure; backing off"
        );
        Some(delay)
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("operation cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(E),
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's retries run out.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    let mut attempt = 0_u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => match policy.next_delay(attempt, &err) {
                Some(delay) => tokio::time::sleep(delay).await,
                None => return Err(err),
            },
        }
        attempt += 1;
    }
}

/// Like [`with_retry`], but stops as soon as `cancel` reads `true`: checked
/// before every attempt and raced against every backoff sleep.
pub async fn with_retry_until<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &mut watch::Receiver<bool>,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    let mut attempt = 0_u32;
    loop {
        if *cancel.borrow() {
            return Err(RetryError::Cancelled);
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let Some(delay) = policy.next_delay(attempt, &err) else {
                    return Err(RetryError::Failed(err));
                };
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancelled(cancel) => {
                        debug!(attempt = attempt + 1, "retry cancelled during backoff");
                        return Err(RetryError::Cancelled);
                    }
                }
            }
        }
        attempt += 1;
    }
}

/// Resolves once the flag turns `true`. A dropped sender never cancels.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[derive(Debug)]
pub struct FailedItem<T, E> {
    pub item: T,
    pub error: E,
}

/// Partition of a batch write.
#[derive(Debug)]
pub struct BatchOutcome<T, E> {
    pub successful: Vec<T>,
    pub failed: Vec<FailedItem<T, E>>,
}

impl<T, E> Default for BatchOutcome<T, E> {
    fn default() -> Self {
        Self {
            successful: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<T, E> BatchOutcome<T, E> {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Try one bulk write; if it fails, write items one by one (each under
/// [`with_retry`]) with at most `concurrency` in flight. Never fails as a
/// whole: per-item failures are reported in [`BatchOutcome::failed`].
#[instrument(skip_all, fields(items = items.len(), concurrency = concurrency))]
pub async fn batch_with_fallback<T, E, B, BFut, S, SFut>(
    items: Vec<T>,
    concurrency: usize,
    policy: &RetryPolicy,
    bulk: B,
    single: S,
) -> BatchOutcome<T, E>
where
    T: Clone,
    B: FnOnce(Vec<T>) -> BFut,
    BFut: Future<Output = Result<(), E>>,
    S: Fn(T) -> SFut,
    SFut: Future<Output = Result<(), E>>,
    E: Retryable + fmt::Display,
{
    if items.is_empty() {
        return BatchOutcome::default();
    }

    match bulk(items.clone()).await {
        Ok(()) => {
            return BatchOutcome {
                successful: items,
                failed: Vec::new(),
            }
        }
        Err(err) => warn!(%err, "bulk write failed; falling back to per-item writes"),
    }

    let single = &single;
    let mut writes = stream::iter(items)
        .map(|item| async move {
            let result = with_retry(policy, || single(item.clone())).await;
            (item, result)
        })
        .buffered(concurrency.max(1));

    // Results are appended here, by this task only, one per finished write.
    let mut outcome = BatchOutcome::default();
    while let Some((item, result)) = writes.next().await {
        match result {
            Ok(()) => outcome.successful.push(item),
            Err(error) => outcome.failed.push(FailedItem { item, error }),
        }
    }
    if !outcome.is_complete() {
        warn!(
            successful = outcome.successful.len(),
            failed = outcome.failed.len(),
            "batch finished with failures"
        );
    }
    outcome
}
