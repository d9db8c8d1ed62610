use futures_util::future::BoxFuture;
use futures_util::stream::{self, StreamExt};
use futures_util::FutureExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::gateway::GatewayError;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("batch cancelled before all tasks finished")]
pub(crate) struct Cancelled;

/// One unit of remote work, keyed by the series URL it touches. The future is
/// not polled until the runner schedules it.
pub(crate) struct Task<'a, T> {
    key: String,
    op: BoxFuture<'a, Result<T, GatewayError>>,
}

impl<'a, T> Task<'a, T> {
    pub(crate) fn new<F>(key: impl Into<String>, op: F) -> Self
    where
        F: Future<Output = Result<T, GatewayError>> + Send + 'a,
    {
        Self {
            key: key.into(),
            op: op.boxed(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct TaskOutcome<T> {
    pub(crate) key: String,
    pub(crate) result: Result<T, GatewayError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TaskFailure {
    pub(crate) key: String,
    pub(crate) error: GatewayError,
}

/// Outcomes of a finished batch split by success.
#[derive(Debug)]
pub(crate) struct BatchReport<T> {
    pub(crate) succeeded: Vec<(String, T)>,
    pub(crate) failed: Vec<TaskFailure>,
}

impl<T> BatchReport<T> {
    pub(crate) fn from_outcomes(outcomes: Vec<TaskOutcome<T>>) -> Self {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for outcome in outcomes {
            match outcome.result {
                Ok(value) => succeeded.push((outcome.key, value)),
                Err(error) => failed.push(TaskFailure {
                    key: outcome.key,
                    error,
                }),
            }
        }
        failed.sort_by(|a, b| a.key.cmp(&b.key));
        Self { succeeded, failed }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TaskRunner {
    concurrency: usize,
    cancel: CancellationToken,
}

impl TaskRunner {
    pub(crate) fn new(concurrency: usize, cancel: CancellationToken) -> Self {
        Self {
            concurrency: concurrency.max(1),
            cancel,
        }
    }

    /// Polls every task with at most `concurrency` in flight and waits for all
    /// of them. A failing task never stops its siblings. Cancelling the token
    /// drops whatever is still running and discards every outcome.
    pub(crate) async fn run<T>(
        &self,
        tasks: Vec<Task<'_, T>>,
    ) -> Result<BatchReport<T>, Cancelled> {
        if self.cancel.is_cancelled() {
            return Err(Cancelled);
        }
        if tasks.is_empty() {
            return Ok(BatchReport::from_outcomes(Vec::new()));
        }

        let total = tasks.len();
        let batch = stream::iter(tasks)
            .map(|task| async move {
                let result = task.op.await;
                if let Err(err) = &result {
                    tracing::warn!(key = %task.key, error = %err, "task failed");
                }
                TaskOutcome {
                    key: task.key,
                    result,
                }
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>();

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::warn!(total, "batch cancelled");
                Err(Cancelled)
            }
            outcomes = batch => Ok(BatchReport::from_outcomes(outcomes)),
        }
    }
}
