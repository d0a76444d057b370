//! End-to-end tests against real SQLite sessions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use super::*;
use crate::config::Config;
use crate::connection::{Connection, ConnectionRef};
use crate::error::{Error, ErrorCode};
use crate::pool::Pool;
use crate::query::Query;

static NEXT_DB: AtomicUsize = AtomicUsize::new(0);

/// A shared in-memory database, unique per call, visible to every
/// connection of the test.
fn shared_memory() -> Config {
    let n = NEXT_DB.fetch_add(1, Ordering::Relaxed);
    Config::new().database(&format!("file:dbpool_test_{n}?mode=memory&cache=shared"))
}

fn connect(config: &Config) -> ConnectionRef {
    let conn = Arc::new(Connection::new(&SqliteDriver::new()).unwrap());
    conn.connect(config, true).unwrap();
    conn
}

fn memory() -> ConnectionRef {
    connect(&Config::new().database(":memory:"))
}

fn run(conn: &ConnectionRef, sql: &str) {
    let mut q = Query::new(Arc::clone(conn));
    q.push(sql);
    q.execute_only().unwrap();
}

#[test]
fn test_select_scalar() {
    let mut q = Query::new(memory());
    q.push("SELECT 1");
    q.execute().unwrap();

    let row = q.fetch_row().unwrap().unwrap();
    assert_eq!(i64::try_from(row.int(0).unwrap()).unwrap(), 1);
    assert!(q.fetch_row().unwrap().is_none());
}

#[test]
fn test_driver_name() {
    let conn = memory();
    assert_eq!(conn.driver_name(), "sqlite");
    assert!(conn.is_connected());
}

#[test]
fn test_column_names_and_values() {
    let conn = memory();
    run(
        &conn,
        "CREATE TABLE charsets (maxlen INTEGER, name TEXT, ratio REAL, note TEXT);
         INSERT INTO charsets VALUES (1, 'latin1', 0.5, NULL);
         INSERT INTO charsets VALUES (4, 'utf8mb4', 2.0, 'default')",
    );

    let mut q = Query::new(conn);
    q.push("SELECT maxlen, name, ratio, note FROM charsets ORDER BY maxlen");
    let result = q.execute().unwrap();
    assert_eq!(result.num_fields(), 4);
    assert_eq!(result.column_names(), vec!["maxlen", "name", "ratio", "note"]);

    let row = q.fetch_row().unwrap().unwrap();
    let maxlen: i32 = row.int(0).unwrap().try_into().unwrap();
    assert_eq!(maxlen, 1);
    assert_eq!(row.get(1).unwrap(), Some("latin1"));
    assert_eq!(row.get(2).unwrap(), Some("0.5"));
    assert!(row.is_null(3).unwrap());

    let row = q.fetch_row().unwrap().unwrap();
    assert_eq!(row.get(1).unwrap(), Some("utf8mb4"));
    assert_eq!(row.get(3).unwrap(), Some("default"));

    assert!(q.fetch_row().unwrap().is_none());
}

#[test]
fn test_multi_statement_results() {
    let mut q = Query::new(memory());
    q.push("SELECT 1; CREATE TABLE t (a); SELECT 3");
    q.execute().unwrap();

    let row = q.fetch_row().unwrap().unwrap();
    assert_eq!(row.get(0).unwrap(), Some("1"));

    // the CREATE TABLE status is skipped
    assert!(q.next_result().unwrap());
    let row = q.fetch_row().unwrap().unwrap();
    assert_eq!(row.get(0).unwrap(), Some("3"));

    assert!(!q.next_result().unwrap());
    assert!(q.result().is_none());
}

#[test]
fn test_execute_only_without_result_set() {
    let conn = memory();
    let mut q = Query::new(Arc::clone(&conn));
    q.push("CREATE TABLE t (a INTEGER)");
    q.execute_only().unwrap();
    assert!(q.result().is_none());

    q.push("INSERT INTO t VALUES (7); SELECT a FROM t");
    q.execute_only().unwrap();
    let row = q.fetch_row().unwrap().unwrap();
    assert_eq!(row.get(0).unwrap(), Some("7"));
}

#[test]
fn test_escape_round_trip() {
    let conn = memory();
    run(&conn, "CREATE TABLE notes (body TEXT)");

    let value = "it's a \\ 'quoted' test";
    let mut q = Query::new(Arc::clone(&conn));
    let escaped = q.escape(value);
    assert_eq!(escaped, "'it''s a \\ ''quoted'' test'");
    q.push("INSERT INTO notes VALUES (").push(escaped).push(")");
    q.execute_only().unwrap();

    q.push("SELECT body FROM notes");
    q.execute().unwrap();
    let row = q.fetch_row().unwrap().unwrap();
    assert_eq!(row.get(0).unwrap(), Some(value));
}

#[test]
fn test_escape_round_trip_with_nul() {
    let conn = memory();
    run(&conn, "CREATE TABLE notes (body TEXT)");

    let value = "a\0b'c\0";
    let mut q = Query::new(Arc::clone(&conn));
    let escaped = q.escape(value);
    assert_eq!(escaped, "'a' || char(0) || 'b''c' || char(0) || ''");
    q.push("INSERT INTO notes VALUES (").push(escaped).push(")");
    q.execute_only().unwrap();

    q.push("SELECT body, length(CAST(body AS BLOB)) FROM notes");
    q.execute().unwrap();
    let row = q.fetch_row().unwrap().unwrap();
    assert_eq!(row.get(0).unwrap(), Some(value));
    assert_eq!(i64::try_from(row.int(1).unwrap()).unwrap(), 6);
}

#[test]
fn test_escape_or_null() {
    let conn = memory();
    run(&conn, "CREATE TABLE notes (body TEXT)");

    let mut q = Query::new(conn);
    let empty = q.escape_or_null("");
    q.push("INSERT INTO notes VALUES (").push(empty).push(")");
    q.execute_only().unwrap();

    q.push("SELECT body FROM notes");
    q.execute().unwrap();
    assert!(q.fetch_row().unwrap().unwrap().is_null(0).unwrap());
}

#[test]
fn test_second_use_result_is_out_of_sync() {
    let conn = memory();
    conn.real_query("SELECT 1").unwrap();

    let first = conn.use_result().unwrap();
    assert!(first.is_some());

    let err = conn.use_result().unwrap_err();
    assert!(matches!(err, Error::Server { command: "use_result", .. }));
    assert_eq!(err.code(), Some(ErrorCode::COMMANDS_OUT_OF_SYNC));
    assert_eq!(conn.errno(), ErrorCode::COMMANDS_OUT_OF_SYNC);
}

#[test]
fn test_unknown_database() {
    let conn = Connection::new(&SqliteDriver::new()).unwrap();
    let err = conn
        .connect(&Config::new().database("/nonexistent-dir/x.db"), true)
        .unwrap_err();

    assert!(err.is_unknown_database());
    assert_eq!(err.code(), Some(ErrorCode::BAD_DB));
    assert!(!conn.is_connected());
}

#[test]
fn test_connect_without_database_selects_nothing() {
    let conn = Arc::new(Connection::new(&SqliteDriver::new()).unwrap());
    conn.connect(&Config::new().database("/nonexistent-dir/x.db"), false)
        .unwrap();
    run(&conn, "SELECT 1");
}

#[test]
fn test_duplicate_key_exhausts_retries() {
    let conn = memory();
    run(&conn, "CREATE TABLE t (id INTEGER PRIMARY KEY); INSERT INTO t VALUES (1)");

    let mut q = Query::new(conn);
    q.push("INSERT INTO t VALUES (1)");
    let err = q.execute_only().unwrap_err();

    assert_eq!(err.code(), Some(ErrorCode::DUP_ENTRY));
    assert!(err.is_retryable());
}

#[test]
fn test_not_null_violation() {
    let conn = memory();
    run(&conn, "CREATE TABLE t (name TEXT NOT NULL)");

    let mut q = Query::new(conn);
    q.push("INSERT INTO t VALUES (NULL)");
    let err = q.execute_only().unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::BAD_NULL));
}

#[test]
fn test_syntax_error_is_fatal() {
    let mut q = Query::new(memory());
    q.push("SELEC 1");
    let err = q.execute().unwrap_err();

    assert!(matches!(err, Error::Server { command: "real_query", .. }));
    assert!(!err.is_retryable());
}

#[test]
fn test_empty_command() {
    let mut q = Query::new(memory());
    q.push("  ;  ");
    let err = q.execute_only().unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::EMPTY_QUERY));
}

#[test]
fn test_failure_later_in_batch() {
    let mut q = Query::new(memory());
    q.push("SELECT 1; SELECT * FROM missing_table");
    q.execute().unwrap();
    assert_eq!(q.fetch_row().unwrap().unwrap().get(0).unwrap(), Some("1"));

    let err = q.next_result().unwrap_err();
    assert!(matches!(err, Error::Server { command: "next_result", .. }));
}

#[test]
fn test_pool_shares_database() {
    let pool = Pool::new(&SqliteDriver::new(), 2).unwrap();
    pool.connect(&shared_memory(), true).unwrap();

    let writer = pool.get();
    run(writer.connection().unwrap(), "CREATE TABLE t (a); INSERT INTO t VALUES ('x')");

    let mut q = Query::from_pool(&pool);
    assert_ne!(q.connection().id(), writer.connection().unwrap().id());
    q.push("SELECT a FROM t");
    q.execute().unwrap();
    assert_eq!(q.fetch_row().unwrap().unwrap().get(0).unwrap(), Some("x"));
}

#[test]
fn test_pool_under_concurrency() {
    const SIZE: usize = 2;
    let pool = Pool::new(&SqliteDriver::new(), SIZE).unwrap();
    pool.connect(&Config::new(), false).unwrap();

    let holders = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let pool = pool.clone();
            let holders = Arc::clone(&holders);
            let peak = Arc::clone(&peak);
            thread::spawn(move || {
                crate::thread::init_thread(&SqliteDriver::new()).unwrap();
                for _ in 0..20 {
                    let mut q = Query::from_pool(&pool);
                    let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);

                    q.push("SELECT 1");
                    q.execute_only().unwrap();
                    assert_eq!(q.fetch_row().unwrap().unwrap().get(0).unwrap(), Some("1"));

                    holders.fetch_sub(1, Ordering::SeqCst);
                }
                crate::thread::end_thread(&SqliteDriver::new());
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let peak = peak.load(Ordering::SeqCst);
    assert!((1..=SIZE).contains(&peak), "{peak} connections held at once");
    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.available, SIZE);
}
