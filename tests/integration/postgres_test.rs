//! PostgreSQL integration tests.
//!
//! Skipped unless DATABASE_URL points at a reachable server.

use db_shape::config::ConnectionConfig;
use db_shape::db::{Command, ConnectionScope, PostgresScope, Value};
use db_shape::error::ShapeError;
use db_shape::query::{fetch_raw, stored_procedure_exists, ColumnarResult, QueryExecutor};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;

/// Helper to get test database URL from environment.
fn get_test_database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

/// Helper to create a test scope.
fn get_test_scope() -> Option<PostgresScope<'static>> {
    let url = get_test_database_url()?;
    let config = ConnectionConfig::from_connection_string(&url).ok()?;
    PostgresScope::connect(&config).ok()
}

#[derive(Debug, Default, PartialEq)]
struct Total {
    total: i64,
}

db_shape::record!(Total { total });

/// Scenario: Calling a set-returning function as a stored procedure
/// Given a function created inside a caller-owned transaction
/// When it is probed and then called with two parameters
/// Then the probe finds exactly one match
/// And the call returns the computed row
#[tokio::test]
async fn test_procedure_call_in_transaction() {
    let Some(mut scope) = get_test_scope() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let mut tx = scope.pool().begin().await.unwrap();
    {
        let mut attached = scope.attach(&mut *tx);
        fetch_raw(
            &mut attached,
            Command::text(
                "CREATE FUNCTION shape_sum_probe(a int8, b int8) \
                 RETURNS TABLE(total int8) AS $$ SELECT a + b $$ LANGUAGE sql",
            ),
        )
        .await
        .unwrap();

        assert!(stored_procedure_exists(&mut attached, "shape_sum_probe").await);

        let command = Command::procedure("shape_sum_probe").bind(40i64).bind(2i64);
        let total: Total = QueryExecutor::new(&mut attached, command)
            .fetch()
            .single()
            .await
            .unwrap();
        assert_eq!(total, Total { total: 42 });
    }
    tx.rollback().await.unwrap();

    assert!(!stored_procedure_exists(&mut scope, "shape_sum_probe").await);
    scope.close().await.unwrap();
}

#[tokio::test]
async fn test_columnar_over_generated_rows() {
    let Some(mut scope) = get_test_scope() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result: ColumnarResult = QueryExecutor::new(
        &mut scope,
        Command::text("SELECT n AS id, NULLIF(n % 2, 0)::int4 AS odd FROM generate_series(1, 4) n"),
    )
    .fetch()
    .single()
    .await
    .unwrap();

    assert_eq!(result.get("id").unwrap(), ["1", "2", "3", "4"]);
    assert_eq!(result.get("odd").unwrap(), ["1", "", "1", ""]);

    scope.close().await.unwrap();
}

#[tokio::test]
async fn test_missing_procedure() {
    let Some(mut scope) = get_test_scope() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    assert!(!stored_procedure_exists(&mut scope, "sp_NoSuchProc").await);
    scope.close().await.unwrap();
}

/// Scenario: Invoking a procedure rather than a function
/// Given a PROCEDURE with an INOUT parameter
/// When it is probed and then called as a stored procedure
/// Then the probe finds it
/// And the call runs through CALL and returns the output row
#[tokio::test]
async fn test_procedure_invoked_with_call() {
    let Some(mut scope) = get_test_scope() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let mut tx = scope.pool().begin().await.unwrap();
    {
        let mut attached = scope.attach(&mut *tx);
        fetch_raw(
            &mut attached,
            Command::text(
                "CREATE PROCEDURE shape_double_probe(INOUT n int8) \
                 LANGUAGE plpgsql AS $$ BEGIN n := n * 2; END $$",
            ),
        )
        .await
        .unwrap();

        assert!(stored_procedure_exists(&mut attached, "shape_double_probe").await);

        let doubled: i64 = QueryExecutor::new(
            &mut attached,
            Command::procedure("shape_double_probe").bind(21i64),
        )
        .fetch()
        .single()
        .await
        .unwrap();
        assert_eq!(doubled, 42);
    }
    tx.rollback().await.unwrap();
    scope.close().await.unwrap();
}

#[tokio::test]
async fn test_numeric_keeps_exact_value() {
    let Some(mut scope) = get_test_scope() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let sql = "SELECT 19.99::numeric AS price";
    let price: String = QueryExecutor::new(&mut scope, Command::text(sql))
        .fetch()
        .single()
        .await
        .unwrap();
    assert_eq!(price, "19.99");

    let exact: Decimal = QueryExecutor::new(&mut scope, Command::text(sql))
        .fetch()
        .single()
        .await
        .unwrap();
    assert_eq!(exact, Decimal::new(1999, 2));

    let columns: ColumnarResult = QueryExecutor::new(&mut scope, Command::text(sql))
        .fetch()
        .single()
        .await
        .unwrap();
    assert_eq!(columns.get("price").unwrap(), ["19.99"]);

    let bound: Value = QueryExecutor::new(
        &mut scope,
        Command::text("SELECT $1::numeric + 1 AS n").bind(Decimal::new(15, 1)),
    )
    .fetch()
    .single()
    .await
    .unwrap();
    assert_eq!(bound, Value::Decimal(Decimal::new(25, 1)));

    scope.close().await.unwrap();
}

#[tokio::test]
async fn test_json_and_time_as_text() {
    let Some(mut scope) = get_test_scope() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let columns: ColumnarResult = QueryExecutor::new(
        &mut scope,
        Command::text(r#"SELECT '{"a":1}'::jsonb AS doc, '08:30:00'::time AS at"#),
    )
    .fetch()
    .single()
    .await
    .unwrap();
    assert_eq!(columns.get("doc").unwrap(), [r#"{"a":1}"#]);
    assert_eq!(columns.get("at").unwrap(), ["08:30:00"]);

    scope.close().await.unwrap();
}

#[tokio::test]
async fn test_unmapped_type_is_query_error() {
    let Some(mut scope) = get_test_scope() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = QueryExecutor::new(
        &mut scope,
        Command::text("SELECT interval '1 day' AS span"),
    )
    .fetch::<String>()
    .single()
    .await;

    let error = result.unwrap_err();
    assert!(matches!(error, ShapeError::Query(_)));
    assert!(error.to_string().contains("span"));

    scope.close().await.unwrap();
}
