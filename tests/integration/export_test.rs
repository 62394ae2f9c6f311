//! Export of columnar results built from scripted rows.

use db_shape::db::{Command, MockResponse, MockScope, RawRow, Value};
use db_shape::export::{to_csv, to_json_report, write_csv, CsvQuoting, ExportConfig};
use db_shape::query::{ColumnMetadata, ColumnarResult, QueryExecutor};
use pretty_assertions::assert_eq;
use serde_json::json;

const SQL: &str = "SELECT * FROM report";

async fn columnar(rows: Vec<RawRow>, metadata: ColumnMetadata) -> ColumnarResult {
    let mut scope = MockScope::new().on(SQL, MockResponse::rows(rows));
    QueryExecutor::new(&mut scope, Command::text(SQL))
        .with_column_metadata(metadata)
        .fetch()
        .single()
        .await
        .unwrap()
}

/// Scenario: A column missing from a later row
/// Given rows [{A:"1", B:"2"}, {A:"3"}]
/// When accumulated
/// Then B has one value and CSV pads it with an empty cell
/// And the JSON report rejects the short column
#[tokio::test]
async fn test_ragged_rows() {
    let rows = vec![
        RawRow::new().with("A", "1").with("B", "2"),
        RawRow::new().with("A", "3"),
    ];
    let result = columnar(rows, ColumnMetadata::default()).await;

    assert_eq!(result.get("B").unwrap().len(), 1);
    assert_eq!(
        to_csv(&result, &ExportConfig::default()),
        vec!["A,B", "1,2", "3,"]
    );
    assert!(to_json_report(&result, None).is_err());
}

#[tokio::test]
async fn test_json_report_uses_renamed_titles() {
    let rows = vec![
        RawRow::new().with("cust", "Ada").with("total", 10i64),
        RawRow::new().with("cust", "Grace").with("total", Value::Null),
    ];
    let metadata =
        ColumnMetadata::from_json(r#"[{"id": "cust", "title": "Customer"}]"#).unwrap();
    let result = columnar(rows, metadata).await;

    let records = to_json_report(&result, None).unwrap();
    let as_json: Vec<serde_json::Value> = records.into_iter().map(serde_json::Value::Object).collect();
    assert_eq!(
        as_json,
        vec![
            json!({"Customer": "Ada", "total": "10"}),
            json!({"Customer": "Grace", "total": ""}),
        ]
    );
}

#[tokio::test]
async fn test_csv_quoting_styles() {
    let rows = vec![RawRow::new().with("note", "said \"hi\", left")];
    let result = columnar(rows, ColumnMetadata::default()).await;

    let legacy = to_csv(&result, &ExportConfig::default());
    assert_eq!(legacy[1], "\"said \"'hi\"', left\"");

    let rfc = to_csv(
        &result,
        &ExportConfig::default().with_quoting(CsvQuoting::Rfc4180),
    );
    assert_eq!(rfc[1], "\"said \"\"hi\"\", left\"");
}

#[tokio::test]
async fn test_write_csv_to_file() {
    let rows = vec![
        RawRow::new().with("id", 1i64).with("name", "a"),
        RawRow::new().with("id", 2i64).with("name", "b"),
    ];
    let result = columnar(rows, ColumnMetadata::default()).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.csv");
    let mut file = std::fs::File::create(&path).unwrap();
    let config = ExportConfig::default()
        .with_separator('\t')
        .with_columns(vec!["name".to_string(), "id".to_string()]);
    write_csv(&mut file, &result, &config).unwrap();

    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "name\tid\na\t1\nb\t2\n"
    );
}
