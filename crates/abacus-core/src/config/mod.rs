//! Environment-driven configuration for the orchestrator and agents.
//!
//! Variable names match the deployment contract: `TIME_*_MS` simulated
//! per-operator execution times, `COMPUTING_POWER` evaluator count,
//! `ORCHESTRATOR_HOST`/`ORCHESTRATOR_PORT` bind address, `POLLING_INTERVAL`
//! agent back-off in milliseconds, `JWT_SECRET_KEY` token signing secret.
//! Malformed numeric values are errors rather than silent defaults.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::expr::Op;

const DEFAULT_OPERATION_MS: u64 = 100;
const DEFAULT_COMPUTING_POWER: usize = 4;
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_POLLING_INTERVAL_MS: u64 = 100;

/// Simulated execution time per operator, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorDelays {
    pub addition_ms: u64,
    pub subtraction_ms: u64,
    pub multiplication_ms: u64,
    pub division_ms: u64,
}

impl OperatorDelays {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            addition_ms: parse_var("TIME_ADDITION_MS", DEFAULT_OPERATION_MS)?,
            subtraction_ms: parse_var("TIME_SUBTRACTION_MS", DEFAULT_OPERATION_MS)?,
            multiplication_ms: parse_var("TIME_MULTIPLICATIONS_MS", DEFAULT_OPERATION_MS)?,
            division_ms: parse_var("TIME_DIVISIONS_MS", DEFAULT_OPERATION_MS)?,
        })
    }

    /// The delay hint attached to a dispatched step.
    pub fn for_op(&self, op: Op) -> u64 {
        match op {
            Op::Add => self.addition_ms,
            Op::Sub => self.subtraction_ms,
            Op::Mul => self.multiplication_ms,
            Op::Div => self.division_ms,
        }
    }
}

impl Default for OperatorDelays {
    fn default() -> Self {
        Self {
            addition_ms: DEFAULT_OPERATION_MS,
            subtraction_ms: DEFAULT_OPERATION_MS,
            multiplication_ms: DEFAULT_OPERATION_MS,
            division_ms: DEFAULT_OPERATION_MS,
        }
    }
}

/// Settings for `abacus serve`.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub delays: OperatorDelays,
}

impl OrchestratorConfig {
    pub fn from_env() -> Result<Self> {
        let jwt_secret = match env::var("JWT_SECRET_KEY") {
            Ok(secret) if !secret.is_empty() => secret,
            _ => bail!("JWT_SECRET_KEY must be set"),
        };

        Ok(Self {
            host: env::var("ORCHESTRATOR_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_owned()),
            port: parse_var("ORCHESTRATOR_PORT", DEFAULT_PORT)?,
            jwt_secret,
            delays: OperatorDelays::from_env()?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Settings for `abacus agent`.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Base URL of the orchestrator, e.g. `http://127.0.0.1:8080`.
    pub orchestrator_url: String,
    /// Number of concurrent evaluators.
    pub computing_power: usize,
    /// Back-off between empty polls.
    pub polling_interval: Duration,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let host = env::var("ORCHESTRATOR_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_owned());
        let port: u16 = parse_var("ORCHESTRATOR_PORT", DEFAULT_PORT)?;
        // Agents connect out; an unspecified bind address means localhost.
        let host = if host == "0.0.0.0" {
            "127.0.0.1".to_owned()
        } else {
            host
        };

        Ok(Self {
            orchestrator_url: format!("http://{host}:{port}"),
            computing_power: parse_var("COMPUTING_POWER", DEFAULT_COMPUTING_POWER)?,
            polling_interval: Duration::from_millis(parse_var(
                "POLLING_INTERVAL",
                DEFAULT_POLLING_INTERVAL_MS,
            )?),
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    parse_value(name, env::var(name).ok(), default)
}

fn parse_value<T>(name: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{name} has invalid value {raw:?}")),
        None => Ok(default),
    }
}
