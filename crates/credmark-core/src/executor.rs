//! Fixed-size worker pool that fans a unit of work out over a batch of inputs.

use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{ConfigurationError, TaskError};
use crate::rate_limiter::{RateLimit, RateLimiter};

/// One input paired with what became of it.
pub type Outcome<I, T, E> = (I, Result<T, TaskError<E>>);

/// Worker pool size and the request budget shared by all workers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExecutorConfig {
    pub max_workers: usize,
    pub rate_limit: RateLimit,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            rate_limit: RateLimit::per_second(5.0),
        }
    }
}

impl ExecutorConfig {
    pub const fn new(max_workers: usize, rate_limit: RateLimit) -> Self {
        Self {
            max_workers,
            rate_limit,
        }
    }

    pub fn validate(&self, name: &str) -> Result<(), ConfigurationError> {
        if self.max_workers == 0 {
            return Err(ConfigurationError::ZeroWorkers {
                name: name.to_owned(),
            });
        }
        self.rate_limit.validate(name)
    }
}

/// Runs a per-item async function over a batch with bounded concurrency.
///
/// Every [`execute`](Self::execute) call gets a fresh token bucket shared by
/// all of its workers, so the aggregate call rate is bounded rather than the
/// per-worker rate.
#[derive(Debug, Clone)]
pub struct ConcurrentExecutor {
    name: String,
    config: ExecutorConfig,
}

impl ConcurrentExecutor {
    pub fn new(
        name: impl Into<String>,
        config: ExecutorConfig,
    ) -> Result<Self, ConfigurationError> {
        let name = name.into();
        config.validate(&name)?;
        Ok(Self { name, config })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn config(&self) -> ExecutorConfig {
        self.config
    }

    /// Applies `work` to every item and returns one outcome per item, in
    /// completion order.
    ///
    /// Each dispatch first waits for a rate-limit token. A failing or
    /// panicking item is reported in its own outcome and never disturbs its
    /// siblings; a panic while cloning the item or waiting for its token is
    /// captured the same way.
    pub async fn execute<I, T, E, F, Fut>(&self, items: Vec<I>, work: F) -> Vec<Outcome<I, T, E>>
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }

        let limiter = Arc::new(RateLimiter::from_validated(
            self.name.clone(),
            self.config.rate_limit,
        ));
        let queue = Arc::new(Mutex::new(items.into_iter().collect::<VecDeque<_>>()));
        let work = Arc::new(work);
        let (sender, mut receiver) = mpsc::unbounded_channel::<Outcome<I, T, E>>();

        let workers = self.config.max_workers.min(total);
        debug!(executor = %self.name, items = total, workers, "dispatching batch");

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let limiter = Arc::clone(&limiter);
            let work = Arc::clone(&work);
            let sender = sender.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    let next = queue
                        .lock()
                        .expect("executor queue lock is not poisoned")
                        .pop_front();
                    let Some(item) = next else {
                        break;
                    };

                    let limiter = &*limiter;
                    let work = &*work;
                    let result = match panic::catch_unwind(AssertUnwindSafe(|| item.clone())) {
                        Ok(input) => {
                            AssertUnwindSafe(async move {
                                limiter.acquire(true).await;
                                work(input).await
                            })
                            .catch_unwind()
                            .await
                        }
                        Err(panic) => Err(panic),
                    };

                    let outcome = match result {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(error)) => Err(TaskError::Failed(error)),
                        Err(panic) => {
                            let message = panic_message(panic.as_ref());
                            warn!(worker, %message, "work function panicked");
                            Err(TaskError::Panicked(message))
                        }
                    };

                    if sender.send((item, outcome)).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(sender);

        let mut outcomes = Vec::with_capacity(total);
        while let Some(outcome) = receiver.recv().await {
            outcomes.push(outcome);
        }
        for handle in handles {
            if let Err(error) = handle.await {
                warn!(executor = %self.name, %error, "worker task ended abnormally");
            }
        }

        // Items no surviving worker picked up still get an outcome.
        let stranded: Vec<I> = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for item in stranded {
            outcomes.push((
                item,
                Err(TaskError::Panicked(String::from(
                    "worker pool stopped before the item was dispatched",
                ))),
            ));
        }
        if outcomes.len() != total {
            error!(
                executor = %self.name,
                items = total,
                outcomes = outcomes.len(),
                "items lost by a worker that ended abnormally"
            );
        }

        let failed = outcomes.iter().filter(|(_, result)| result.is_err()).count();
        info!(
            executor = %self.name,
            items = total,
            succeeded = outcomes.len() - failed,
            failed,
            "batch complete"
        );
        outcomes
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("non-string panic payload")
    }
}
