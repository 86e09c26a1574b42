//! Orchestrator core: the FIFO task queue and the partial-evaluation
//! engine that rewrites each expression's RPN in place as subresults
//! arrive.
//!
//! A `Task` is the in-memory working copy of one persisted expression. Its
//! RPN shrinks by one operator per completed step until a single literal
//! remains, at which point the expression is marked done and the task is
//! dropped from the queue. `blocked` enforces at most one in-flight step
//! per task: it is set when a step is dispatched and cleared when the
//! subresult (or a step error) comes back.
//!
//! All queue mutation happens under one async mutex. The only awaited call
//! under the lock is the terminal store write, which keeps dequeueing a
//! finished task atomic with persisting its result.

use sqlx::SqlitePool;
use tokio::sync::Mutex;
use uuid::Uuid;

use abacus_db::models::ExpressionRow;
use abacus_db::queries::expressions::{self as expr_db, NewExpression};

use crate::config::OperatorDelays;
use crate::expr::{self, ExprError, Op, Token};

/// Errors surfaced by queue operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("no task found for expression {0}")]
    TaskNotFound(Uuid),

    #[error("task for expression {0} has no reducible step")]
    InvalidState(Uuid),

    #[error(transparent)]
    Expr(#[from] ExprError),

    #[error("storage failure: {0}")]
    Store(anyhow::Error),
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        Self::Store(err)
    }
}

/// One dispatched binary operation, ready for an agent.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchedTask {
    pub id: Uuid,
    pub arg1: String,
    pub arg2: String,
    pub op: Op,
    /// Simulated execution time hint, so agents need no configuration.
    pub operation_time_ms: u64,
}

/// In-memory working copy of an expression under reduction.
struct Task {
    expression_id: Uuid,
    rpn: Vec<Token>,
    blocked: bool,
}

/// The leftmost reducible `(operand, operand, operator)` triple.
struct Step {
    a: usize,
    b: usize,
    k: usize,
    op: Op,
}

/// Scan an RPN sequence for the leftmost evaluable triple.
///
/// Walks left to right keeping a stack of literal indices; the first
/// operator closes the triple. This is the same triple a single-pass
/// evaluator would reduce next, so repeatedly dispatching it makes
/// progress. In well-formed RPN every token before the first operator is
/// a literal, which makes the triple contiguous: `a = k - 2`, `b = k - 1`.
fn next_step(rpn: &[Token]) -> Option<Step> {
    let mut stack = Vec::new();

    for (i, token) in rpn.iter().enumerate() {
        match token {
            Token::Number(_) => stack.push(i),
            Token::Op(op) => {
                let b = stack.pop()?;
                let a = stack.pop()?;
                return Some(Step { a, b, k: i, op: *op });
            }
            _ => return None,
        }
    }

    None
}

/// The orchestrator's task queue.
///
/// Owns every in-flight expression; all collaborators (HTTP handlers,
/// stream readers) go through `&self` methods. Constructed in `main` and
/// shared behind an `Arc`.
pub struct Scheduler {
    pool: SqlitePool,
    delays: OperatorDelays,
    queue: Mutex<Vec<Task>>,
}

impl Scheduler {
    /// Build a scheduler, reloading every unfinished expression from the
    /// store.
    ///
    /// Recovery re-derives each task's RPN from the persisted infix
    /// tokens; partial progress from before a restart is discarded, which
    /// is sound because steps are idempotent in effect.
    pub async fn new(pool: SqlitePool, delays: OperatorDelays) -> anyhow::Result<Self> {
        let scheduler = Self {
            pool,
            delays,
            queue: Mutex::new(Vec::new()),
        };
        scheduler.recover().await?;
        Ok(scheduler)
    }

    async fn recover(&self) -> anyhow::Result<()> {
        let pending = expr_db::load_pending(&self.pool).await?;
        let mut recovered = 0usize;

        for row in pending {
            let tokens = expr::from_strings(&row.tokens.0)
                .map_err(|err| anyhow::anyhow!("stored tokens for {}: {err}", row.id))?;
            let rpn = expr::to_rpn(&tokens);

            if let [Token::Number(literal)] = rpn.as_slice() {
                // Nothing to dispatch; finish it here.
                let value = expr::parse_literal(literal)
                    .map_err(|err| anyhow::anyhow!("stored literal for {}: {err}", row.id))?;
                expr_db::mark_done(&self.pool, row.id, value).await?;
                continue;
            }

            let mut queue = self.queue.lock().await;
            queue.push(Task {
                expression_id: row.id,
                rpn,
                blocked: false,
            });
            recovered += 1;
        }

        if recovered > 0 {
            tracing::info!(count = recovered, "recovered pending expressions");
        }
        Ok(())
    }

    /// Persist a new expression and enqueue its task. Returns the new id.
    ///
    /// Expressions whose RPN is already a single literal (e.g. `"42"`)
    /// have no dispatchable step and are marked done immediately.
    pub async fn add_expression(
        &self,
        owner: &str,
        tokens: Vec<Token>,
    ) -> Result<Uuid, SchedulerError> {
        let id = Uuid::new_v4();
        expr_db::insert_expression(
            &self.pool,
            &NewExpression {
                id,
                owner,
                tokens: expr::to_strings(&tokens),
            },
        )
        .await?;

        let rpn = expr::to_rpn(&tokens);
        if let [Token::Number(literal)] = rpn.as_slice() {
            let value = expr::parse_literal(literal)?;
            expr_db::mark_done(&self.pool, id, value).await?;
            tracing::info!(%id, owner, value, "expression done without dispatch");
            return Ok(id);
        }

        let mut queue = self.queue.lock().await;
        queue.push(Task {
            expression_id: id,
            rpn,
            blocked: false,
        });
        tracing::info!(%id, owner, "expression accepted");
        Ok(id)
    }

    /// List an owner's expressions straight from the store.
    pub async fn list_expressions(&self, owner: &str) -> anyhow::Result<Vec<ExpressionRow>> {
        expr_db::list_by_owner(&self.pool, owner).await
    }

    /// Fetch one expression straight from the store.
    pub async fn get_expression(&self, id: Uuid) -> anyhow::Result<Option<ExpressionRow>> {
        expr_db::get_expression(&self.pool, id).await
    }

    /// Dispatch the next ready step, if any.
    ///
    /// Picks the earliest unblocked task in insertion order and marks it
    /// blocked until its subresult arrives. Blocked tasks keep their queue
    /// position; later tasks may be serviced in the meantime, which is how
    /// parallelism across expressions happens.
    pub async fn next_task(&self) -> Option<DispatchedTask> {
        let mut queue = self.queue.lock().await;
        let task = queue.iter_mut().find(|t| !t.blocked)?;
        let step = next_step(&task.rpn)?;
        task.blocked = true;

        let dispatched = DispatchedTask {
            id: task.expression_id,
            arg1: task.rpn[step.a].to_string(),
            arg2: task.rpn[step.b].to_string(),
            op: step.op,
            operation_time_ms: self.delays.for_op(step.op),
        };
        tracing::debug!(id = %dispatched.id, op = %dispatched.op, "step dispatched");
        Some(dispatched)
    }

    /// Apply a subresult to the task it was dispatched from.
    ///
    /// Recomputes the same leftmost triple the dispatch saw (`blocked`
    /// guarantees no second dispatch happened in between), splices the
    /// triple down to one literal, and unblocks the task. When one literal
    /// remains the task is dequeued and the expression persisted as done,
    /// both under the queue lock.
    pub async fn complete_task(&self, id: Uuid, result: f64) -> Result<(), SchedulerError> {
        let mut queue = self.queue.lock().await;
        let index = queue
            .iter()
            .position(|t| t.expression_id == id)
            .ok_or(SchedulerError::TaskNotFound(id))?;

        let task = &mut queue[index];
        let step = next_step(&task.rpn).ok_or(SchedulerError::InvalidState(id))?;

        let literal = Token::Number(result.to_string());
        let _ = task.rpn.splice(step.a..=step.k, [literal]);
        task.blocked = false;

        if task.rpn.len() == 1 {
            let value = expr::parse_literal(&task.rpn[0].to_string())?;
            queue.remove(index);
            expr_db::mark_done(&self.pool, id, value).await?;
            tracing::info!(%id, value, "expression done");
        }

        Ok(())
    }

    /// Handle a step error (e.g. division by zero) reported by an agent.
    ///
    /// The expression cannot make progress, so its task is dropped and the
    /// failure persisted.
    pub async fn fail_task(&self, id: Uuid, reason: &str) -> Result<(), SchedulerError> {
        let mut queue = self.queue.lock().await;
        let index = queue
            .iter()
            .position(|t| t.expression_id == id)
            .ok_or(SchedulerError::TaskNotFound(id))?;

        queue.remove(index);
        expr_db::mark_failed(&self.pool, id).await?;
        tracing::warn!(%id, reason, "expression failed");
        Ok(())
    }

    /// Number of expressions currently queued (blocked or not).
    pub async fn queue_depth(&self) -> usize {
        self.queue.lock().await.len()
    }
}
