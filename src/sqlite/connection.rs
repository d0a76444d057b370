//! SQLite session implementation.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use rusqlite::{Batch, Connection, OpenFlags, Statement};

use super::error::server_error;
use super::types::{to_text, SqliteRows, TextRow};
use crate::config::Config;
use crate::driver::{Driver, RawResult, ServerError, ServerResult, Session};
use crate::error::ErrorCode;

/// Driver backed by the bundled SQLite library.
///
/// The configured `database` is the database file (or a `file:` URI, or
/// `:memory:`). Host, port and credentials are ignored. Connecting with
/// `use_database = false` opens a private in-memory database.
#[derive(Debug, Clone)]
pub struct SqliteDriver {
    create_if_missing: bool,
    busy_timeout: Duration,
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self {
            create_if_missing: false,
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

impl SqliteDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the database file on connect instead of failing with an
    /// unknown-database error.
    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    /// How long SQLite waits on a locked database before reporting it.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

impl Driver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn new_session(&self) -> Box<dyn Session> {
        Box::new(SqliteSession {
            driver: self.clone(),
            conn: None,
            current: None,
            pending: VecDeque::new(),
            field_count: 0,
            last_error: None,
        })
    }
}

/// Outcome of one statement of a submitted batch.
enum Outcome {
    Rows(SqliteRows),
    Status,
    Failed(ServerError),
}

/// A SQLite connection.
///
/// Batches run to completion on `real_query`; results are then handed out
/// one statement at a time.
pub struct SqliteSession {
    driver: SqliteDriver,
    conn: Option<Connection>,
    current: Option<Outcome>,
    pending: VecDeque<Outcome>,
    field_count: u32,
    last_error: Option<ServerError>,
}

impl SqliteSession {
    fn record<T>(&mut self, result: ServerResult<T>) -> ServerResult<T> {
        self.last_error = result.as_ref().err().cloned();
        result
    }

    fn open(&mut self, config: &Config, use_database: bool) -> ServerResult<()> {
        let path = if use_database && !config.database.is_empty() {
            config.database.as_str()
        } else {
            ":memory:"
        };

        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let in_memory = path == ":memory:" || path.contains("mode=memory");
        if self.driver.create_if_missing || in_memory {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        let conn = Connection::open_with_flags(path, flags).map_err(server_error)?;
        conn.busy_timeout(self.driver.busy_timeout)
            .map_err(server_error)?;

        self.conn = Some(conn);
        Ok(())
    }

    fn submit(&mut self, sql: &str) -> ServerResult<()> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| ServerError::new(ErrorCode::SERVER_GONE, "not connected"))?;

        let mut outcomes = run_batch(conn, sql);
        self.current = None;
        self.pending.clear();
        self.field_count = 0;

        match outcomes.pop_front() {
            None => Err(ServerError::new(ErrorCode::EMPTY_QUERY, "Query was empty")),
            Some(Outcome::Failed(e)) => Err(e),
            Some(first) => {
                self.set_current(first);
                self.pending = outcomes;
                Ok(())
            }
        }
    }

    fn take_result(&mut self) -> ServerResult<Option<Box<dyn RawResult>>> {
        match self.current.take() {
            Some(Outcome::Rows(rows)) => Ok(Some(Box::new(rows))),
            // the rows of this statement were already handed out
            None if self.field_count > 0 => Err(ServerError::new(
                ErrorCode::COMMANDS_OUT_OF_SYNC,
                "Commands out of sync; you can't run this command now",
            )),
            other => {
                self.current = other;
                Ok(None)
            }
        }
    }

    fn set_current(&mut self, outcome: Outcome) {
        self.field_count = match &outcome {
            Outcome::Rows(rows) => rows.num_fields() as u32,
            _ => 0,
        };
        self.current = Some(outcome);
    }

    fn advance(&mut self) -> ServerResult<bool> {
        // A failed statement stays queued: the batch stopped there, so every
        // later attempt must see the same failure.
        if let Some(Outcome::Failed(e)) = self.pending.front() {
            return Err(e.clone());
        }
        match self.pending.pop_front() {
            None => Ok(false),
            Some(outcome) => {
                self.set_current(outcome);
                Ok(true)
            }
        }
    }
}

/// Run every statement of `sql`, stopping at the first failure.
fn run_batch(conn: &Connection, sql: &str) -> VecDeque<Outcome> {
    let mut outcomes = VecDeque::new();
    let mut batch = Batch::new(conn, sql);

    loop {
        let outcome = match batch.next() {
            Ok(Some(mut stmt)) => run_statement(&mut stmt),
            Ok(None) => break,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(outcome) => outcomes.push_back(outcome),
            Err(e) => {
                outcomes.push_back(Outcome::Failed(server_error(e)));
                break;
            }
        }
    }
    outcomes
}

fn run_statement(stmt: &mut Statement<'_>) -> rusqlite::Result<Outcome> {
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    if columns.is_empty() {
        stmt.execute([])?;
        return Ok(Outcome::Status);
    }

    let width = columns.len();
    let mut buffered = VecDeque::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut fields = TextRow::with_capacity(width);
        for i in 0..width {
            fields.push(to_text(row.get_ref(i)?));
        }
        buffered.push_back(fields);
    }

    Ok(Outcome::Rows(SqliteRows::new(columns, buffered)))
}

impl Session for SqliteSession {
    fn connect(&mut self, config: &Config, use_database: bool) -> ServerResult<()> {
        let result = self.open(config, use_database);
        self.record(result)
    }

    fn real_query(&mut self, sql: &str) -> ServerResult<()> {
        let result = self.submit(sql);
        self.record(result)
    }

    fn use_result(&mut self) -> ServerResult<Option<Box<dyn RawResult>>> {
        let result = self.take_result();
        self.record(result)
    }

    fn field_count(&self) -> u32 {
        self.field_count
    }

    fn more_results(&self) -> bool {
        !self.pending.is_empty()
    }

    fn next_result(&mut self) -> ServerResult<bool> {
        let result = self.advance();
        self.record(result)
    }

    fn errno(&self) -> ErrorCode {
        self.last_error
            .as_ref()
            .map(|e| e.code)
            .unwrap_or(ErrorCode::NONE)
    }

    fn error(&self) -> String {
        self.last_error
            .as_ref()
            .map(|e| e.message.clone())
            .unwrap_or_default()
    }

    /// SQL-standard escaping: single quotes are doubled.
    ///
    /// SQLite's tokenizer stops at a NUL byte, so NUL closes the literal
    /// and is spliced back in with `char(0)`: `a\0b` becomes
    /// `a' || char(0) || 'b` between the caller's quotes.
    fn escape(&self, to: &mut BytesMut, from: &[u8]) -> usize {
        let start = to.len();
        for &b in from {
            match b {
                b'\'' => to.put_slice(b"''"),
                0 => to.put_slice(b"' || char(0) || '"),
                _ => to.put_u8(b),
            }
        }
        to.len() - start
    }
}
