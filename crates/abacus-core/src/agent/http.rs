//! Request/response polling transport for the agent worker.
//!
//! `GET /internal/task` yields the next dispatched operation or 404 when
//! none is ready; `POST /internal/task` reports an outcome. The wire task
//! carries the delay hint as `operation_time` so agents stay
//! configuration-free.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{RemoteTask, TaskOutcome, TaskSource, TransportError};
use crate::expr::Op;

/// HTTP polling client for the orchestrator's internal task surface.
pub struct HttpTaskSource {
    client: reqwest::Client,
    task_url: String,
}

impl HttpTaskSource {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            task_url: format!("{}/internal/task", base_url.trim_end_matches('/')),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TaskEnvelope {
    task: WireTask,
}

#[derive(Debug, Deserialize)]
struct WireTask {
    id: Uuid,
    arg1: String,
    arg2: String,
    operation: Op,
    operation_time: u64,
}

impl From<WireTask> for RemoteTask {
    fn from(wire: WireTask) -> Self {
        Self {
            id: wire.id,
            arg1: wire.arg1,
            arg2: wire.arg2,
            op: wire.operation,
            operation_time_ms: wire.operation_time,
        }
    }
}

#[derive(Debug, Serialize)]
struct OutcomeBody {
    id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[async_trait]
impl TaskSource for HttpTaskSource {
    async fn next_task(&self) -> Result<Option<RemoteTask>, TransportError> {
        let response = self.client.get(&self.task_url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::OK => {
                let envelope: TaskEnvelope = response.json().await?;
                Ok(Some(envelope.task.into()))
            }
            status => Err(TransportError::UnexpectedStatus(status.as_u16())),
        }
    }

    async fn submit(&self, id: Uuid, outcome: TaskOutcome) -> Result<(), TransportError> {
        let body = match outcome {
            TaskOutcome::Value(value) => OutcomeBody {
                id,
                result: Some(value),
                error: None,
            },
            TaskOutcome::Error(reason) => OutcomeBody {
                id,
                result: None,
                error: Some(reason),
            },
        };

        let response = self.client.post(&self.task_url).json(&body).send().await?;
        if response.status() != StatusCode::OK {
            return Err(TransportError::UnexpectedStatus(response.status().as_u16()));
        }
        Ok(())
    }
}
