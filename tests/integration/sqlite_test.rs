//! End-to-end query shaping against in-memory SQLite.

use chrono::NaiveDate;
use db_shape::config::ConnectionConfig;
use db_shape::db::{Command, SqliteScope, Value};
use db_shape::error::ShapeError;
use db_shape::export::{to_csv, ExportConfig};
use db_shape::query::{
    fetch_raw, stored_procedure_exists, ColumnMetadata, ColumnTitle, ColumnarResult, QueryExecutor,
};
use futures::StreamExt;
use pretty_assertions::assert_eq;

#[derive(Debug, Default, PartialEq)]
struct Customer {
    id: i64,
    name: Option<String>,
}

db_shape::record!(Customer { id, name });

#[derive(Debug, Default, PartialEq)]
struct Signup {
    email: String,
    joined: NaiveDate,
    active: bool,
}

db_shape::record!(Signup {
    email,
    joined => "joined_on",
    active,
});

fn memory_scope() -> SqliteScope<'static> {
    let mut config = ConnectionConfig::from_connection_string("sqlite::memory:").unwrap();
    config.max_connections = 1;
    SqliteScope::connect(&config).unwrap()
}

async fn exec(scope: &mut SqliteScope<'_>, sql: &str) {
    fetch_raw(scope, Command::text(sql)).await.unwrap();
}

async fn customers_scope() -> SqliteScope<'static> {
    let mut scope = memory_scope();
    exec(&mut scope, "CREATE TABLE customers (Id INTEGER, Name TEXT)").await;
    exec(&mut scope, "INSERT INTO customers VALUES (1, 'a'), (2, NULL)").await;
    scope
}

/// Scenario: Record projection with a NULL column
/// Given rows [{Id:1, Name:"a"}, {Id:2, Name:NULL}]
/// When they are projected into a record type
/// Then columns bind case-insensitively and NULL becomes None
/// And no trailing default element is appended
#[tokio::test]
async fn test_record_projection() {
    let mut scope = customers_scope().await;

    let customers: Vec<Customer> =
        QueryExecutor::new(&mut scope, Command::text("SELECT Id, Name FROM customers ORDER BY Id"))
            .fetch()
            .to_list()
            .await
            .unwrap();

    assert_eq!(
        customers,
        vec![
            Customer {
                id: 1,
                name: Some("a".to_string()),
            },
            Customer { id: 2, name: None },
        ]
    );
}

/// Scenario: Columnar projection exported as CSV
/// Given rows [{A:"1", B:"2"}, {A:"3", B:NULL}]
/// When they are accumulated and exported with "," as separator
/// Then the lines are ["A,B", "1,2", "3,"]
#[tokio::test]
async fn test_columnar_to_csv() {
    let mut scope = memory_scope();
    exec(&mut scope, "CREATE TABLE t (A TEXT, B TEXT)").await;
    exec(&mut scope, "INSERT INTO t VALUES ('1', '2'), ('3', NULL)").await;

    let result: ColumnarResult =
        QueryExecutor::new(&mut scope, Command::text("SELECT A, B FROM t ORDER BY A"))
            .fetch()
            .single()
            .await
            .unwrap();

    assert_eq!(to_csv(&result, &ExportConfig::default()), vec!["A,B", "1,2", "3,"]);
}

#[tokio::test]
async fn test_columnar_with_renamed_headers() {
    let mut scope = customers_scope().await;
    let metadata = ColumnMetadata::new(vec![ColumnTitle::new("Name", "Customer name")]);

    let result: ColumnarResult =
        QueryExecutor::new(&mut scope, Command::text("SELECT Id, Name FROM customers ORDER BY Id"))
            .with_column_metadata(metadata)
            .fetch()
            .single()
            .await
            .unwrap();

    assert_eq!(result.titles().collect::<Vec<_>>(), vec!["Id", "Customer name"]);
    assert_eq!(result.get("Customer name").unwrap(), ["a", ""]);
}

#[tokio::test]
async fn test_scalar_with_params() {
    let mut scope = customers_scope().await;
    let command = Command::text("SELECT Name FROM customers WHERE Id = ?").bind(1i64);

    let name: Option<String> = QueryExecutor::new(&mut scope, command)
        .fetch()
        .single()
        .await
        .unwrap();
    assert_eq!(name, Some("a".to_string()));

    let missing = QueryExecutor::new(
        &mut scope,
        Command::text("SELECT Name FROM customers WHERE Id = ?").bind(99i64),
    )
    .fetch::<String>()
    .single_or_default()
    .await
    .unwrap();
    assert_eq!(missing, None);
}

#[tokio::test]
async fn test_single_on_many_rows_fails() {
    let mut scope = customers_scope().await;
    let result = QueryExecutor::new(&mut scope, Command::text("SELECT Id FROM customers"))
        .fetch::<i64>()
        .single()
        .await;
    assert!(matches!(result, Err(ShapeError::MultipleResults)));
}

#[tokio::test]
async fn test_text_columns_coerce_into_typed_fields() {
    let mut scope = memory_scope();
    exec(
        &mut scope,
        "CREATE TABLE signups (email TEXT, joined_on TEXT, active BOOLEAN)",
    )
    .await;
    exec(
        &mut scope,
        "INSERT INTO signups VALUES ('ada@example.com', '2024-01-31', 1)",
    )
    .await;

    let signup: Signup = QueryExecutor::new(&mut scope, Command::text("SELECT * FROM signups"))
        .fetch()
        .single()
        .await
        .unwrap();

    assert_eq!(
        signup,
        Signup {
            email: "ada@example.com".to_string(),
            joined: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            active: true,
        }
    );
}

/// Scenario: Query inside a caller-owned transaction
/// Given a transaction begun by the caller
/// When commands run through a scope attached to it
/// Then they see the transaction's writes
/// And a rollback by the caller discards them
#[tokio::test]
async fn test_attached_transaction() {
    let mut scope = customers_scope().await;

    let mut tx = scope.pool().begin().await.unwrap();
    {
        let mut attached = scope.attach(&mut *tx);
        assert!(attached.in_transaction());
        exec(&mut attached, "INSERT INTO customers VALUES (3, 'c')").await;

        let inside = QueryExecutor::new(&mut attached, Command::text("SELECT Id FROM customers"))
            .fetch::<i64>()
            .count()
            .await
            .unwrap();
        assert_eq!(inside, 3);
    }
    tx.rollback().await.unwrap();

    let outside = QueryExecutor::new(&mut scope, Command::text("SELECT Id FROM customers"))
        .fetch::<i64>()
        .count()
        .await
        .unwrap();
    assert_eq!(outside, 2);
}

#[tokio::test]
async fn test_rows_arrive_lazily() {
    let mut scope = customers_scope().await;
    let mut executor =
        QueryExecutor::new(&mut scope, Command::text("SELECT Id FROM customers ORDER BY Id"));

    let mut rows = executor.fetch::<i64>();
    assert_eq!(rows.next().await.unwrap().unwrap(), 1);
    assert_eq!(rows.next().await.unwrap().unwrap(), 2);
    assert!(rows.next().await.is_none());
    drop(rows);

    // the same executor re-runs the query
    assert_eq!(executor.fetch::<i64>().count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_paginate() {
    let mut scope = memory_scope();
    exec(&mut scope, "CREATE TABLE n (v INTEGER)").await;
    exec(&mut scope, "INSERT INTO n VALUES (1), (2), (3), (4), (5)").await;

    let page = QueryExecutor::new(&mut scope, Command::text("SELECT v FROM n ORDER BY v"))
        .fetch::<i64>()
        .paginate(Some(2), Some(2))
        .await
        .unwrap();

    assert_eq!(page.items, vec![3, 4]);
    assert_eq!(page.total, 5);
    assert_eq!(page.total_pages, 3);
}

#[tokio::test]
async fn test_stored_procedure_exists_is_false() {
    let mut scope = memory_scope();
    assert!(!stored_procedure_exists(&mut scope, "sp_NoSuchProc").await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_reducers() {
    let mut scope = customers_scope().await;

    let count = QueryExecutor::new(&mut scope, Command::text("SELECT Id FROM customers"))
        .fetch::<i64>()
        .count_blocking()
        .unwrap();
    assert_eq!(count, 2);

    let first = QueryExecutor::new(&mut scope, Command::text("SELECT Id FROM customers ORDER BY Id"))
        .fetch::<Value>()
        .first_blocking()
        .unwrap();
    assert_eq!(first, Value::Int(1));
}
