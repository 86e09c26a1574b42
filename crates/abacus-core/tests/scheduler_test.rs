//! Tests for the orchestrator scheduler: dispatch discipline, partial RPN
//! rewrites, recovery, and the failure path.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use uuid::Uuid;

use abacus_core::config::OperatorDelays;
use abacus_core::expr::{self, Op};
use abacus_core::scheduler::{Scheduler, SchedulerError};
use abacus_db::models::ExpressionStatus;
use abacus_db::queries::expressions as expr_db;
use abacus_test_utils::create_test_pool;
use sqlx::SqlitePool;

async fn scheduler(pool: &SqlitePool) -> Scheduler {
    Scheduler::new(pool.clone(), OperatorDelays::default())
        .await
        .expect("scheduler construction should succeed")
}

async fn add(s: &Scheduler, owner: &str, input: &str) -> Uuid {
    let tokens = expr::tokenize(input).expect("test expression should be valid");
    s.add_expression(owner, tokens).await.unwrap()
}

/// Play a perfect single agent: dispatch, compute locally, report, until
/// the queue drains. Returns the number of reduced steps.
async fn drive(s: &Scheduler) -> usize {
    let mut steps = 0;
    while let Some(task) = s.next_task().await {
        steps += 1;
        let lhs: f64 = task.arg1.parse().unwrap();
        let rhs: f64 = task.arg2.parse().unwrap();
        let value = task.op.apply(lhs, rhs).unwrap();
        s.complete_task(task.id, value).await.unwrap();
    }
    steps
}

#[tokio::test]
async fn drives_expression_to_done() {
    let pool = create_test_pool().await;
    let s = scheduler(&pool).await;

    let id = add(&s, "alice", "3+5").await;
    let steps = drive(&s).await;

    assert_eq!(steps, 1);
    let row = expr_db::get_expression(&pool, id).await.unwrap().unwrap();
    assert_eq!(row.status, ExpressionStatus::Done);
    assert_eq!(row.result, Some(8.0));
    assert_eq!(s.queue_depth().await, 0);
}

#[tokio::test]
async fn grid_matches_local_reference() {
    let pool = create_test_pool().await;
    let s = scheduler(&pool).await;

    let grid = [
        ("3+5", 1),
        ("10-2*3", 2),
        ("(1+2)*(3+4)", 3),
        ("10/2+3", 2),
        ("3+(2*(4-1))", 3),
        ("8-3-2", 2),
    ];

    for (input, n_ops) in grid {
        let id = add(&s, "alice", input).await;
        let steps = drive(&s).await;
        assert_eq!(steps, n_ops, "reduction count for {input:?}");

        let row = expr_db::get_expression(&pool, id).await.unwrap().unwrap();
        assert_eq!(row.status, ExpressionStatus::Done, "status for {input:?}");
        assert_eq!(
            row.result,
            Some(expr::evaluate(input).unwrap()),
            "value for {input:?}"
        );
    }
}

#[tokio::test]
async fn at_most_one_step_in_flight_per_task() {
    let pool = create_test_pool().await;
    let s = scheduler(&pool).await;

    let id = add(&s, "alice", "1+2+3").await;

    let first = s.next_task().await.expect("a step should be ready");
    assert_eq!(first.id, id);
    // The only task is now blocked; nothing else to dispatch.
    assert!(s.next_task().await.is_none());

    s.complete_task(id, 3.0).await.unwrap();
    let second = s.next_task().await.expect("unblocked after the subresult");
    assert_eq!(second.id, id);
    assert_eq!((second.arg1.as_str(), second.arg2.as_str()), ("3", "3"));
}

#[tokio::test]
async fn blocked_task_keeps_fifo_position() {
    let pool = create_test_pool().await;
    let s = scheduler(&pool).await;

    let first = add(&s, "alice", "1+2+3").await;
    let second = add(&s, "alice", "4+5").await;

    // Earliest task goes out first.
    let step_a = s.next_task().await.unwrap();
    assert_eq!(step_a.id, first);

    // While it is blocked, the later expression is serviced.
    let step_b = s.next_task().await.unwrap();
    assert_eq!(step_b.id, second);

    // Once unblocked, the earlier expression is preferred again.
    s.complete_task(second, 9.0).await.unwrap();
    s.complete_task(first, 3.0).await.unwrap();
    let next = s.next_task().await.unwrap();
    assert_eq!(next.id, first);
}

#[tokio::test]
async fn reduces_leftmost_triple_and_preserves_siblings() {
    let pool = create_test_pool().await;
    let s = scheduler(&pool).await;

    // RPN: 1 2 + 3 4 + *
    let id = add(&s, "alice", "(1+2)*(3+4)").await;

    let step = s.next_task().await.unwrap();
    assert_eq!((step.arg1.as_str(), step.arg2.as_str(), step.op), ("1", "2", Op::Add));
    s.complete_task(id, 3.0).await.unwrap();

    // RPN is now 3 3 4 + *; the sibling subtree reduces next.
    let step = s.next_task().await.unwrap();
    assert_eq!((step.arg1.as_str(), step.arg2.as_str(), step.op), ("3", "4", Op::Add));
    s.complete_task(id, 7.0).await.unwrap();

    let step = s.next_task().await.unwrap();
    assert_eq!((step.arg1.as_str(), step.arg2.as_str(), step.op), ("3", "7", Op::Mul));
    s.complete_task(id, 21.0).await.unwrap();

    let row = expr_db::get_expression(&pool, id).await.unwrap().unwrap();
    assert_eq!(row.result, Some(21.0));
}

#[tokio::test]
async fn single_literal_is_done_without_dispatch() {
    let pool = create_test_pool().await;
    let s = scheduler(&pool).await;

    let id = add(&s, "alice", "42").await;

    assert_eq!(s.queue_depth().await, 0);
    assert!(s.next_task().await.is_none());
    let row = expr_db::get_expression(&pool, id).await.unwrap().unwrap();
    assert_eq!(row.status, ExpressionStatus::Done);
    assert_eq!(row.result, Some(42.0));
}

#[tokio::test]
async fn parenthesized_literal_is_done_without_dispatch() {
    let pool = create_test_pool().await;
    let s = scheduler(&pool).await;

    let id = add(&s, "alice", "((7))").await;
    let row = expr_db::get_expression(&pool, id).await.unwrap().unwrap();
    assert_eq!(row.status, ExpressionStatus::Done);
    assert_eq!(row.result, Some(7.0));
}

#[tokio::test]
async fn unknown_task_is_rejected() {
    let pool = create_test_pool().await;
    let s = scheduler(&pool).await;

    let err = s.complete_task(Uuid::new_v4(), 1.0).await.unwrap_err();
    assert!(matches!(err, SchedulerError::TaskNotFound(_)));

    let err = s.fail_task(Uuid::new_v4(), "whatever").await.unwrap_err();
    assert!(matches!(err, SchedulerError::TaskNotFound(_)));
}

#[tokio::test]
async fn failed_step_fails_the_expression() {
    let pool = create_test_pool().await;
    let s = scheduler(&pool).await;

    let id = add(&s, "alice", "1/0").await;

    let step = s.next_task().await.unwrap();
    assert_eq!((step.arg1.as_str(), step.arg2.as_str(), step.op), ("1", "0", Op::Div));

    s.fail_task(id, "division by zero").await.unwrap();

    let row = expr_db::get_expression(&pool, id).await.unwrap().unwrap();
    assert_eq!(row.status, ExpressionStatus::Failed);
    assert_eq!(row.result, None);
    assert!(s.next_task().await.is_none());
    assert!(matches!(
        s.complete_task(id, 0.0).await.unwrap_err(),
        SchedulerError::TaskNotFound(_)
    ));
}

#[tokio::test]
async fn restart_recovers_pending_and_preserves_done() {
    let pool = create_test_pool().await;

    let finished;
    let unfinished;
    {
        let s = scheduler(&pool).await;
        finished = add(&s, "alice", "3+5").await;
        unfinished = add(&s, "alice", "10-2*3").await;

        // Finish the first expression and leave the second mid-flight.
        let step = s.next_task().await.unwrap();
        assert_eq!(step.id, finished);
        s.complete_task(finished, 8.0).await.unwrap();
        let _in_flight = s.next_task().await.unwrap();
    }

    // "Restart": a fresh scheduler over the same store.
    let s = scheduler(&pool).await;
    assert_eq!(s.queue_depth().await, 1);

    // In-flight progress was discarded; work restarts from the original
    // expression and still converges.
    drive(&s).await;

    let row = expr_db::get_expression(&pool, finished).await.unwrap().unwrap();
    assert_eq!(row.result, Some(8.0));
    let row = expr_db::get_expression(&pool, unfinished).await.unwrap().unwrap();
    assert_eq!(row.status, ExpressionStatus::Done);
    assert_eq!(row.result, Some(4.0));
}

#[tokio::test]
async fn dispatch_carries_the_operator_delay_hint() {
    let pool = create_test_pool().await;
    let delays = OperatorDelays {
        addition_ms: 10,
        subtraction_ms: 20,
        multiplication_ms: 30,
        division_ms: 40,
    };
    let s = Scheduler::new(pool.clone(), delays).await.unwrap();

    add(&s, "alice", "3*5").await;
    let step = s.next_task().await.unwrap();
    assert_eq!(step.op, Op::Mul);
    assert_eq!(step.operation_time_ms, 30);
}

#[tokio::test]
async fn concurrent_workers_complete_everything() {
    let pool = create_test_pool().await;
    let s = Arc::new(scheduler(&pool).await);

    let inputs = [
        "3+5",
        "10-2*3",
        "(1+2)*(3+4)",
        "10/2+3",
        "3+(2*(4-1))",
        "1+2+3+4+5",
        "100/5/2",
        "(8-3)*(2+2)",
    ];
    let mut ids = Vec::new();
    for input in inputs {
        ids.push((add(&s, "alice", input).await, input));
    }

    let mut workers = tokio::task::JoinSet::new();
    for _ in 0..4 {
        let s = Arc::clone(&s);
        workers.spawn(async move {
            loop {
                match s.next_task().await {
                    Some(task) => {
                        let lhs: f64 = task.arg1.parse().unwrap();
                        let rhs: f64 = task.arg2.parse().unwrap();
                        let value = task.op.apply(lhs, rhs).unwrap();
                        s.complete_task(task.id, value).await.unwrap();
                    }
                    None => {
                        if s.queue_depth().await == 0 {
                            break;
                        }
                        tokio::task::yield_now().await;
                    }
                }
            }
        });
    }

    timeout(Duration::from_secs(30), async {
        while workers.join_next().await.is_some() {}
    })
    .await
    .expect("workers should drain the queue");

    for (id, input) in ids {
        let row = expr_db::get_expression(&pool, id).await.unwrap().unwrap();
        assert_eq!(row.status, ExpressionStatus::Done, "status for {input:?}");
        assert_eq!(
            row.result,
            Some(expr::evaluate(input).unwrap()),
            "value for {input:?}"
        );
    }
}
