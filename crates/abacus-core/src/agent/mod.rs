//! Agent worker fleet: pulls dispatched operations from the orchestrator,
//! simulates the configured execution time, computes the scalar result,
//! and reports back.
//!
//! The transport is abstracted behind [`TaskSource`] so the worker loop is
//! independent of how tasks arrive; [`http::HttpTaskSource`] is the
//! polling implementation.

pub mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::expr::{self, Op};

/// Transport failures between an agent and the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("orchestrator request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected response status {0}")]
    UnexpectedStatus(u16),
}

/// One operation as received by an agent.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTask {
    pub id: Uuid,
    pub arg1: String,
    pub arg2: String,
    pub op: Op,
    pub operation_time_ms: u64,
}

/// What an evaluator sends back for a step.
///
/// The error arm exists because some steps cannot produce a number
/// (division by zero); the orchestrator fails the whole expression on
/// receipt.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Value(f64),
    Error(String),
}

/// Capability the worker loop depends on: fetch the next ready operation
/// and submit an outcome. Implemented by the HTTP poller and by in-memory
/// fakes in tests.
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Fetch the next dispatched operation. `None` means nothing is ready
    /// and the caller should back off before asking again.
    async fn next_task(&self) -> Result<Option<RemoteTask>, TransportError>;

    /// Report the outcome of a step.
    async fn submit(&self, id: Uuid, outcome: TaskOutcome) -> Result<(), TransportError>;
}

/// Run `computing_power` evaluator loops until cancellation.
///
/// Each evaluator that hits a transport error terminates alone; the rest
/// keep polling. Returns once every evaluator has exited.
pub async fn run_workers(
    source: Arc<dyn TaskSource>,
    computing_power: usize,
    polling_interval: Duration,
    cancel: CancellationToken,
) {
    let mut workers = JoinSet::new();

    for worker in 0..computing_power {
        let source = Arc::clone(&source);
        let cancel = cancel.clone();
        workers.spawn(async move {
            match evaluator_loop(source.as_ref(), polling_interval, &cancel).await {
                Ok(()) => tracing::debug!(worker, "evaluator stopped"),
                Err(err) => tracing::error!(worker, error = %err, "evaluator terminated"),
            }
        });
    }

    while workers.join_next().await.is_some() {}
}

/// A single evaluator: poll, simulate, compute, report, repeat.
///
/// Cancellation is checked at every suspension point; a pending poll or
/// submit is abandoned when the token fires.
async fn evaluator_loop(
    source: &dyn TaskSource,
    polling_interval: Duration,
    cancel: &CancellationToken,
) -> Result<(), TransportError> {
    loop {
        let polled = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            polled = source.next_task() => polled?,
        };

        let Some(task) = polled else {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(polling_interval) => continue,
            }
        };

        // Simulated execution time for this operator.
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            () = tokio::time::sleep(Duration::from_millis(task.operation_time_ms)) => {}
        }

        let outcome = compute(&task);
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            sent = source.submit(task.id, outcome) => sent?,
        }
    }
}

/// Parse both operands and apply the operator.
pub fn compute(task: &RemoteTask) -> TaskOutcome {
    let result = expr::parse_literal(&task.arg1).and_then(|lhs| {
        let rhs = expr::parse_literal(&task.arg2)?;
        task.op.apply(lhs, rhs)
    });

    match result {
        Ok(value) => TaskOutcome::Value(value),
        Err(err) => TaskOutcome::Error(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(arg1: &str, arg2: &str, op: Op) -> RemoteTask {
        RemoteTask {
            id: Uuid::new_v4(),
            arg1: arg1.to_owned(),
            arg2: arg2.to_owned(),
            op,
            operation_time_ms: 0,
        }
    }

    #[test]
    fn compute_applies_operator() {
        assert_eq!(compute(&task("3", "5", Op::Add)), TaskOutcome::Value(8.0));
        assert_eq!(compute(&task("10", "4", Op::Div)), TaskOutcome::Value(2.5));
    }

    #[test]
    fn compute_reports_division_by_zero() {
        match compute(&task("1", "0", Op::Div)) {
            TaskOutcome::Error(reason) => assert!(reason.contains("division by zero")),
            other => panic!("expected error outcome, got {other:?}"),
        }
    }

    #[test]
    fn compute_reports_bad_operand() {
        assert!(matches!(
            compute(&task("three", "5", Op::Add)),
            TaskOutcome::Error(_)
        ));
    }
}
