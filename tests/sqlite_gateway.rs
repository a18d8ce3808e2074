//! End-to-end gateway scenarios against in-memory SQLite.

use std::time::Duration;

use sqlgate::{params, CallerId, Registry, TransactionSpec, Value};

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

async fn registry_with(name: &str) -> (Registry, sqlgate::Connection) {
    init_tracing();
    let registry = Registry::new();
    let conn = registry
        .connect("sqlite::memory:", name, None)
        .await
        .expect("in-memory sqlite should always connect");
    (registry, conn)
}

#[tokio::test]
async fn create_insert_select_round_trip() {
    let (_registry, conn) = registry_with("rt").await;
    let caller = CallerId::new(1);

    let result = conn
        .query(caller, "CREATE TABLE t(x INTEGER)", params![])
        .await;
    assert!(!result.is_error(), "create failed: {:?}", result.error());

    conn.query(caller, "INSERT INTO t VALUES (?)", params![42])
        .await;

    let result = conn.query(caller, "SELECT x FROM t", params![]).await;
    let rows = result.rows().expect("select should succeed");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("x").unwrap().as_i64(), Some(42));
}

#[tokio::test]
async fn bound_parameters_and_null_decode() {
    let (_registry, conn) = registry_with("binds").await;
    let caller = CallerId::new(2);

    conn.query(
        caller,
        "CREATE TABLE people(name TEXT, age INTEGER, score REAL, photo BLOB)",
        params![],
    )
    .await;
    conn.query(
        caller,
        "INSERT INTO people VALUES (?, ?, ?, ?)",
        params!["ana", 34, 9.5, Value::Null],
    )
    .await;

    let result = conn
        .query(caller, "SELECT * FROM people WHERE name = ?", params!["ana"])
        .await;
    let rows = result.rows().expect("select should succeed");
    let row = &rows[0];
    assert_eq!(row.get("name").unwrap().as_str(), Some("ana"));
    assert_eq!(row.get("age").unwrap().as_i64(), Some(34));
    assert_eq!(row.get("score").unwrap().as_f64(), Some(9.5));
    assert!(row.get("photo").unwrap().is_null());
}

#[tokio::test]
async fn backend_error_comes_back_as_data() {
    let (_registry, conn) = registry_with("err").await;
    let caller = CallerId::new(3);

    let result = conn
        .query(caller, "SELECT * FROM no_such_table", params![])
        .await;
    let err = result.error().expect("query against a missing table");
    assert_eq!(err.kind, sqlgate::ErrorKind::Backend);
    assert!(err.message.contains("no_such_table"), "got: {}", err.message);
}

#[tokio::test]
async fn execute_then_query_observes_prior_writes() {
    let (_registry, conn) = registry_with("order").await;
    let caller = CallerId::new(4);

    conn.query(caller, "CREATE TABLE seq(n INTEGER)", params![])
        .await;
    // Fire-and-forget writes are queued ahead of the awaited read on the
    // same serial worker, so the read must observe them.
    for n in 0..5 {
        conn.execute("INSERT INTO seq VALUES (?)", params![n]);
    }
    let result = conn
        .query(caller, "SELECT COUNT(*) AS c FROM seq", params![])
        .await;
    let rows = result.rows().expect("count should succeed");
    assert_eq!(rows[0].get("c").unwrap().as_i64(), Some(5));
}

#[tokio::test]
async fn expression_columns_decode_from_value_types() {
    let (_registry, conn) = registry_with("expr").await;
    let caller = CallerId::new(20);

    conn.query(caller, "CREATE TABLE t(x INTEGER)", params![])
        .await;
    conn.query(caller, "INSERT INTO t VALUES (1), (2), (3)", params![])
        .await;

    // Expression columns carry no declared type; the decoder must read the
    // value-level type instead of emitting NULL for real data.
    let result = conn
        .query(caller, "SELECT COUNT(*) AS c, SUM(x) * 1.0 AS s FROM t", params![])
        .await;
    let rows = result.rows().expect("aggregate select should succeed");
    assert_eq!(rows[0].get("c").unwrap().as_i64(), Some(3));
    assert_eq!(rows[0].get("s").unwrap().as_f64(), Some(6.0));
}

#[tokio::test]
async fn undeclared_decltype_decodes_by_value_type() {
    let (_registry, conn) = registry_with("decl").await;
    let caller = CallerId::new(21);

    conn.query(caller, "CREATE TABLE prices(price DECIMAL(5,2))", params![])
        .await;
    conn.query(caller, "INSERT INTO prices VALUES (9.5)", params![])
        .await;

    let result = conn.query(caller, "SELECT price FROM prices", params![]).await;
    let rows = result.rows().expect("select should succeed");
    let price = rows[0].get("price").unwrap();
    assert!(!price.is_null(), "real data must never decode as NULL");
    assert_eq!(price.as_f64(), Some(9.5));
}

#[tokio::test]
async fn transaction_commits_atomically() {
    let (_registry, conn) = registry_with("txn").await;
    let caller = CallerId::new(5);

    conn.query(caller, "CREATE TABLE acct(id INTEGER, bal INTEGER)", params![])
        .await;
    conn.query(caller, "INSERT INTO acct VALUES (1, 100), (2, 0)", params![])
        .await;

    let mut spec = TransactionSpec::new();
    spec.push("UPDATE acct SET bal = bal - 30 WHERE id = 1", params![])
        .unwrap()
        .push("UPDATE acct SET bal = bal + 30 WHERE id = 2", params![])
        .unwrap();
    conn.transaction(caller, spec).await.expect("commit");

    let result = conn
        .query(caller, "SELECT bal FROM acct ORDER BY id", params![])
        .await;
    let rows = result.rows().unwrap();
    assert_eq!(rows[0].get("bal").unwrap().as_i64(), Some(70));
    assert_eq!(rows[1].get("bal").unwrap().as_i64(), Some(30));
}

#[tokio::test]
async fn transaction_runs_semicolon_batches_unprepared() {
    let (_registry, conn) = registry_with("batch").await;
    let caller = CallerId::new(22);

    conn.query(caller, "CREATE TABLE t(x INTEGER)", params![])
        .await;

    let mut spec = TransactionSpec::new();
    spec.push("INSERT INTO t VALUES (1); INSERT INTO t VALUES (2);", params![])
        .unwrap();
    conn.transaction(caller, spec).await.expect("commit");

    let result = conn.query(caller, "SELECT COUNT(*) AS c FROM t", params![]).await;
    let rows = result.rows().unwrap();
    assert_eq!(rows[0].get("c").unwrap().as_i64(), Some(2));
}

#[tokio::test]
async fn failed_transaction_rolls_back_earlier_statements() {
    let (_registry, conn) = registry_with("rollback").await;
    let caller = CallerId::new(6);

    conn.query(caller, "CREATE TABLE t(x INTEGER)", params![])
        .await;

    let mut spec = TransactionSpec::new();
    spec.push("INSERT INTO t VALUES (1)", params![])
        .unwrap()
        .push("INSERT INTO missing_table VALUES (1)", params![])
        .unwrap();
    let err = conn
        .transaction(caller, spec)
        .await
        .expect_err("second statement should fail the batch");
    assert_eq!(err.kind, sqlgate::ErrorKind::Backend);

    let result = conn.query(caller, "SELECT COUNT(*) AS c FROM t", params![]).await;
    let rows = result.rows().unwrap();
    assert_eq!(
        rows[0].get("c").unwrap().as_i64(),
        Some(0),
        "first insert must have been rolled back"
    );
}

#[tokio::test]
async fn empty_transaction_is_rejected() {
    let (_registry, conn) = registry_with("empty").await;
    let err = conn
        .transaction(CallerId::new(7), TransactionSpec::new())
        .await
        .expect_err("empty batch");
    assert_eq!(err.kind, sqlgate::ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn datetime_columns_decode_as_timestamps() {
    let (_registry, conn) = registry_with("dates").await;
    let caller = CallerId::new(8);

    conn.query(caller, "CREATE TABLE ev(at DATETIME, day DATE)", params![])
        .await;
    conn.query(
        caller,
        "INSERT INTO ev VALUES ('2026-08-29 12:30:00', '2026-08-29')",
        params![],
    )
    .await;

    let result = conn.query(caller, "SELECT at, day FROM ev", params![]).await;
    let rows = result.rows().expect("select should succeed");
    match rows[0].get("at") {
        Some(Value::Timestamp(ts)) => {
            assert_eq!(ts.to_string(), "2026-08-29 12:30:00")
        }
        other => panic!("expected a timestamp, got {other:?}"),
    }
    match rows[0].get("day") {
        Some(Value::Date(d)) => assert_eq!(d.to_string(), "2026-08-29"),
        other => panic!("expected a date, got {other:?}"),
    }
}

#[tokio::test]
async fn find_returns_a_working_second_handle() {
    let (registry, conn) = registry_with("shared").await;
    let caller = CallerId::new(9);

    conn.query(caller, "CREATE TABLE t(x INTEGER)", params![])
        .await;

    let other = registry.find("shared").expect("connection is registered");
    other.execute("INSERT INTO t VALUES (1)", params![]);
    let result = other.query(caller, "SELECT COUNT(*) AS c FROM t", params![]).await;
    assert_eq!(result.rows().unwrap()[0].get("c").unwrap().as_i64(), Some(1));
}

#[tokio::test]
async fn stats_drop_to_zero_after_completion() {
    let (registry, conn) = registry_with("stats").await;
    let caller = CallerId::new(10);

    conn.query(caller, "SELECT 1 AS one", params![]).await;
    assert_eq!(registry.stats().get("stats"), Some(&0));
}

#[tokio::test]
async fn close_drains_and_removes_the_entry() {
    let (registry, conn) = registry_with("closing").await;
    let caller = CallerId::new(11);

    conn.query(caller, "CREATE TABLE t(x INTEGER)", params![])
        .await;
    conn.execute("INSERT INTO t VALUES (1)", params![]);
    conn.close().await;

    // Queued work finishes, then the entry disappears.
    for _ in 0..200 {
        if registry.find("closing").is_err() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("closed connection was never removed from the registry");
}

#[tokio::test]
async fn bad_url_is_a_connect_error() {
    let registry = Registry::new();
    let err = registry
        .connect("gopher://nope", "bad", None)
        .await
        .expect_err("unrecognized scheme");
    assert!(matches!(err, sqlgate::ConnectError::BadUrl));
}
