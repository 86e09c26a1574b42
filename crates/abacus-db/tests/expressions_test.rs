//! Tests for the `expressions` query module.

use uuid::Uuid;

use abacus_db::models::ExpressionStatus;
use abacus_db::queries::expressions::{self, NewExpression};
use abacus_test_utils::{create_file_pool, create_test_pool};

fn tokens(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| (*s).to_owned()).collect()
}

#[tokio::test]
async fn insert_and_fetch() {
    let pool = create_test_pool().await;

    let id = Uuid::new_v4();
    expressions::insert_expression(
        &pool,
        &NewExpression {
            id,
            owner: "alice",
            tokens: tokens(&["3", "+", "5"]),
        },
    )
    .await
    .unwrap();

    let row = expressions::get_expression(&pool, id)
        .await
        .unwrap()
        .expect("row should exist");
    assert_eq!(row.id, id);
    assert_eq!(row.owner, "alice");
    assert_eq!(row.status, ExpressionStatus::Accepted);
    assert_eq!(row.tokens.0, tokens(&["3", "+", "5"]));
    assert_eq!(row.result, None);
}

#[tokio::test]
async fn fetch_missing_returns_none() {
    let pool = create_test_pool().await;

    let row = expressions::get_expression(&pool, Uuid::new_v4())
        .await
        .unwrap();
    assert!(row.is_none());
}

#[tokio::test]
async fn list_by_owner_is_scoped_and_ordered() {
    let pool = create_test_pool().await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        let id = Uuid::new_v4();
        expressions::insert_expression(
            &pool,
            &NewExpression {
                id,
                owner: "alice",
                tokens: tokens(&["1", "+", "2"]),
            },
        )
        .await
        .unwrap();
        ids.push(id);
    }
    expressions::insert_expression(
        &pool,
        &NewExpression {
            id: Uuid::new_v4(),
            owner: "bob",
            tokens: tokens(&["7"]),
        },
    )
    .await
    .unwrap();

    let rows = expressions::list_by_owner(&pool, "alice").await.unwrap();
    assert_eq!(rows.len(), 3);
    let listed: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    assert_eq!(listed, ids);
}

#[tokio::test]
async fn pending_excludes_terminal_rows() {
    let pool = create_test_pool().await;

    let accepted = Uuid::new_v4();
    let done = Uuid::new_v4();
    let failed = Uuid::new_v4();
    for id in [accepted, done, failed] {
        expressions::insert_expression(
            &pool,
            &NewExpression {
                id,
                owner: "alice",
                tokens: tokens(&["1", "+", "2"]),
            },
        )
        .await
        .unwrap();
    }

    expressions::mark_done(&pool, done, 3.0).await.unwrap();
    expressions::mark_failed(&pool, failed).await.unwrap();

    let pending = expressions::load_pending(&pool).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, accepted);
}

#[tokio::test]
async fn mark_done_stores_result() {
    let pool = create_test_pool().await;

    let id = Uuid::new_v4();
    expressions::insert_expression(
        &pool,
        &NewExpression {
            id,
            owner: "alice",
            tokens: tokens(&["10", "/", "4"]),
        },
    )
    .await
    .unwrap();

    expressions::mark_done(&pool, id, 2.5).await.unwrap();

    let row = expressions::get_expression(&pool, id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, ExpressionStatus::Done);
    assert_eq!(row.result, Some(2.5));
}

#[tokio::test]
async fn mark_done_on_missing_row_errors() {
    let pool = create_test_pool().await;

    let err = expressions::mark_done(&pool, Uuid::new_v4(), 1.0).await;
    assert!(err.is_err());
}

#[tokio::test]
async fn done_rows_survive_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("calc.db");

    let id = Uuid::new_v4();
    {
        let pool = create_file_pool(&path).await;
        expressions::insert_expression(
            &pool,
            &NewExpression {
                id,
                owner: "alice",
                tokens: tokens(&["3", "+", "5"]),
            },
        )
        .await
        .unwrap();
        expressions::mark_done(&pool, id, 8.0).await.unwrap();
        pool.close().await;
    }

    let pool = create_file_pool(&path).await;
    let row = expressions::get_expression(&pool, id)
        .await
        .unwrap()
        .expect("row should survive reopen");
    assert_eq!(row.status, ExpressionStatus::Done);
    assert_eq!(row.result, Some(8.0));
    assert!(expressions::load_pending(&pool).await.unwrap().is_empty());
}
