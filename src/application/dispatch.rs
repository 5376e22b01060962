//! Bounded concurrent dispatch of a round's collaborator calls.
//!
//! Every job runs in its own task behind a shared semaphore, with a per-call
//! timeout and the bounded retry policy. The whole set is bounded by the
//! round deadline: when it passes, calls still in flight are aborted and
//! reported as [`CollaboratorError::Cancelled`]. A failing or panicking job
//! never affects its siblings.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, warn};

use crate::domain::errors::CollaboratorError;
use crate::domain::models::{DispatchConfig, RetryConfig};
use crate::infrastructure::retry::RetryPolicy;

/// A re-invocable collaborator call.
pub type CallFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, CollaboratorError>> + Send + Sync>;

/// One unit of dispatchable work, identified by a caller-chosen key.
pub struct Job<T> {
    pub key: usize,
    call: CallFn<T>,
}

impl<T> Job<T> {
    pub fn new<F>(key: usize, call: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<T, CollaboratorError>> + Send + Sync + 'static,
    {
        Self {
            key,
            call: Arc::new(call),
        }
    }
}

/// Outcome of one job.
#[derive(Debug)]
pub struct JobOutcome<T> {
    pub key: usize,
    pub result: Result<T, CollaboratorError>,
    pub attempts: u32,
}

/// Outcomes of a dispatch, ordered by key.
#[derive(Debug)]
pub struct DispatchReport<T> {
    pub outcomes: Vec<JobOutcome<T>>,
    /// Jobs abandoned at the round deadline.
    pub abandoned: usize,
}

impl<T> DispatchReport<T> {
    pub const fn timed_out(&self) -> bool {
        self.abandoned > 0
    }
}

/// Runs jobs with bounded parallelism, per-call timeouts and retries.
#[derive(Debug, Clone)]
pub struct UnitDispatcher {
    max_concurrency: usize,
    unit_timeout: Duration,
    round_timeout: Duration,
    retry: RetryPolicy,
}

impl UnitDispatcher {
    pub fn new(
        max_concurrency: usize,
        unit_timeout: Duration,
        round_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            unit_timeout,
            round_timeout,
            retry,
        }
    }

    pub fn from_config(dispatch: &DispatchConfig, retry: &RetryConfig) -> Self {
        Self::new(
            dispatch.max_concurrency,
            Duration::from_millis(dispatch.unit_timeout_ms),
            Duration::from_millis(dispatch.round_timeout_ms),
            RetryPolicy::from_config(retry),
        )
    }

    pub const fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Deadline for a round starting now.
    pub fn round_deadline(&self) -> Instant {
        Instant::now() + self.round_timeout
    }

    /// Run `jobs` concurrently and wait for all of them or the deadline.
    pub async fn run_all<T: Send + 'static>(
        &self,
        jobs: Vec<Job<T>>,
        deadline: Instant,
    ) -> DispatchReport<T> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut pending: BTreeSet<usize> = jobs.iter().map(|j| j.key).collect();
        let mut set = JoinSet::new();

        for job in jobs {
            let semaphore = Arc::clone(&semaphore);
            let retry = self.retry.clone();
            let unit_timeout = self.unit_timeout;
            let call = job.call;
            let key = job.key;

            set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return JobOutcome {
                        key,
                        result: Err(CollaboratorError::Cancelled),
                        attempts: 0,
                    };
                };
                let attempted = retry
                    .execute(|| {
                        let fut = call();
                        async move {
                            timeout(unit_timeout, fut)
                                .await
                                .unwrap_or(Err(CollaboratorError::Timeout(unit_timeout)))
                        }
                    })
                    .await;
                JobOutcome {
                    key,
                    result: attempted.result,
                    attempts: attempted.attempts,
                }
            });
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        let mut deadline_hit = false;
        loop {
            match timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok(outcome))) => {
                    pending.remove(&outcome.key);
                    outcomes.push(outcome);
                }
                Ok(Some(Err(join_err))) => {
                    warn!(error = %join_err, "dispatched call aborted");
                }
                Ok(None) => break,
                Err(_) => {
                    deadline_hit = true;
                    set.abort_all();
                    break;
                }
            }
        }

        let abandoned = if deadline_hit { pending.len() } else { 0 };
        if abandoned > 0 {
            warn!(abandoned, "round deadline passed with calls in flight");
        }
        for key in pending {
            let error = if deadline_hit {
                CollaboratorError::Cancelled
            } else {
                CollaboratorError::Permanent("collaborator task aborted".to_string())
            };
            outcomes.push(JobOutcome {
                key,
                result: Err(error),
                attempts: 1,
            });
        }
        outcomes.sort_by_key(|o| o.key);
        debug!(jobs = outcomes.len(), abandoned, "dispatch complete");

        DispatchReport {
            outcomes,
            abandoned,
        }
    }

    /// Run a single call (used for sequenced steps such as critique).
    pub async fn run_one<T: Send + 'static>(&self, job: Job<T>, deadline: Instant) -> JobOutcome<T> {
        let key = job.key;
        let mut report = self.run_all(vec![job], deadline).await;
        report.outcomes.pop().unwrap_or(JobOutcome {
            key,
            result: Err(CollaboratorError::Cancelled),
            attempts: 0,
        })
    }
}
