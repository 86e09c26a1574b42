use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Status of a stored expression.
///
/// Persisted as a small integer. `Processing` is deliberately absent: an
/// expression being reduced is in-memory state of the scheduler, not a
/// durable fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i32)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionStatus {
    Accepted = 0,
    Done = 1,
    Failed = 2,
}

impl fmt::Display for ExpressionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Accepted => "accepted",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for ExpressionStatus {
    type Err = ExpressionStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accepted" => Ok(Self::Accepted),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(ExpressionStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ExpressionStatus`] string.
#[derive(Debug, Clone)]
pub struct ExpressionStatusParseError(pub String);

impl fmt::Display for ExpressionStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid expression status: {:?}", self.0)
    }
}

impl std::error::Error for ExpressionStatusParseError {}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// A registered user.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub login: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// A persisted expression.
///
/// `tokens` is the validated infix token sequence in original order,
/// kept for audit and for re-deriving the RPN on recovery. `result` is
/// only meaningful when `status` is `Done`.
#[derive(Debug, Clone, FromRow)]
pub struct ExpressionRow {
    pub id: Uuid,
    pub owner: String,
    pub status: ExpressionStatus,
    pub tokens: Json<Vec<String>>,
    pub result: Option<f64>,
    pub created_at: DateTime<Utc>,
}
