//! Scripted in-process driver for tests.
//!
//! [`MockDriver`] answers commands from a script instead of a server,
//! injects error codes into chosen primitives and counts every attempt, so
//! retry bounds and result-set protocol rules can be checked without a
//! database.
//!
//! ```rust,ignore
//! let driver = MockDriver::new()
//!     .with_response("SELECT 1", vec![MockStatement::scalar("1")])
//!     .fail(MockOp::Query, ErrorCode::LOCK_DEADLOCK, Some(2));
//! let pool = Pool::new(&driver, 2)?;
//! ```
//!
//! Escaping follows the backslash rules of MySQL's client library;
//! [`unescape`] reverses it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;

use crate::config::Config;
use crate::driver::{Driver, RawResult, ServerError, ServerResult, Session};
use crate::error::ErrorCode;

/// Session primitives that can fail on request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Connect,
    Query,
    UseResult,
    NextResult,
    FetchRow,
}

/// Outcome of one statement of a scripted command.
#[derive(Debug, Clone, PartialEq)]
pub enum MockStatement {
    /// A result set.
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<Option<String>>>,
    },
    /// A statement without a result set (UPDATE, DDL, ...).
    Status,
    /// A failing statement.
    Error(ErrorCode),
}

impl MockStatement {
    pub fn rows(columns: &[&str], rows: Vec<Vec<Option<&str>>>) -> Self {
        MockStatement::Rows {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(|f| f.map(str::to_string)).collect())
                .collect(),
        }
    }

    /// A one-column, one-row result set.
    pub fn scalar(value: &str) -> Self {
        Self::rows(&["1"], vec![vec![Some(value)]])
    }

    pub fn status() -> Self {
        MockStatement::Status
    }

    pub fn error(code: ErrorCode) -> Self {
        MockStatement::Error(code)
    }
}

struct Failure {
    code: ErrorCode,
    /// `None` fails forever
    remaining: Option<usize>,
}

struct Script {
    first: Vec<MockStatement>,
    later: Option<(usize, Vec<MockStatement>)>,
    submissions: usize,
}

impl Script {
    fn next(&mut self) -> Vec<MockStatement> {
        self.submissions += 1;
        match &self.later {
            Some((after, stmts)) if self.submissions > *after => stmts.clone(),
            _ => self.first.clone(),
        }
    }
}

#[derive(Default)]
struct MockState {
    thread_unsafe: bool,
    thread_init_fails: bool,
    registered: usize,
    failures: HashMap<MockOp, Failure>,
    attempts: HashMap<MockOp, usize>,
    scripts: HashMap<String, Script>,
    escape_calls: usize,
    last_query: Option<String>,
    live_results: usize,
}

impl MockState {
    fn attempt(&mut self, op: MockOp) -> ServerResult<()> {
        *self.attempts.entry(op).or_default() += 1;

        let Some(failure) = self.failures.get_mut(&op) else {
            return Ok(());
        };
        match &mut failure.remaining {
            Some(0) => Ok(()),
            Some(n) => {
                *n -= 1;
                Err(injected(failure.code))
            }
            None => Err(injected(failure.code)),
        }
    }

    fn response(&mut self, sql: &str) -> Vec<MockStatement> {
        match self.scripts.get_mut(sql) {
            Some(script) => script.next(),
            None => vec![MockStatement::Status],
        }
    }
}

fn out_of_sync() -> ServerError {
    ServerError::new(
        ErrorCode::COMMANDS_OUT_OF_SYNC,
        "Commands out of sync; you can't run this command now",
    )
}

fn injected(code: ErrorCode) -> ServerError {
    ServerError::new(code, format!("injected error {code}"))
}

/// A driver whose sessions follow a script.
///
/// Clones share scripts and counters.
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the library as unusable from several threads.
    pub fn not_thread_safe(self) -> Self {
        self.state.lock().thread_unsafe = true;
        self
    }

    /// Make every thread registration fail.
    pub fn fail_thread_init(self) -> Self {
        self.state.lock().thread_init_fails = true;
        self
    }

    /// Fail `op` with `code`, `times` times or forever when `None`.
    pub fn fail(self, op: MockOp, code: ErrorCode, times: Option<usize>) -> Self {
        self.state.lock().failures.insert(
            op,
            Failure {
                code,
                remaining: times,
            },
        );
        self
    }

    /// Answer `sql` with `statements`, one per statement of the command.
    pub fn with_response(self, sql: &str, statements: Vec<MockStatement>) -> Self {
        self.state.lock().scripts.insert(
            sql.to_string(),
            Script {
                first: statements,
                later: None,
                submissions: 0,
            },
        );
        self
    }

    /// Once `sql` has been submitted `after` times, answer it with
    /// `statements` instead.
    pub fn then_response(self, sql: &str, statements: Vec<MockStatement>, after: usize) -> Self {
        {
            let mut state = self.state.lock();
            let script = state.scripts.entry(sql.to_string()).or_insert_with(|| Script {
                first: vec![MockStatement::Status],
                later: None,
                submissions: 0,
            });
            script.later = Some((after, statements));
        }
        self
    }

    /// Calls made to `op` so far, failed ones included.
    pub fn attempts(&self, op: MockOp) -> usize {
        self.state.lock().attempts.get(&op).copied().unwrap_or(0)
    }

    pub fn registered_threads(&self) -> usize {
        self.state.lock().registered
    }

    pub fn escape_calls(&self) -> usize {
        self.state.lock().escape_calls
    }

    /// Text of the most recent submission.
    pub fn last_query(&self) -> Option<String> {
        self.state.lock().last_query.clone()
    }

    /// Result sets handed out and not yet dropped, across all sessions.
    pub fn live_results(&self) -> usize {
        self.state.lock().live_results
    }
}

impl Driver for MockDriver {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn is_thread_safe(&self) -> bool {
        !self.state.lock().thread_unsafe
    }

    fn new_session(&self) -> Box<dyn Session> {
        Box::new(MockSession {
            state: Arc::clone(&self.state),
            connected: false,
            current: None,
            pending: VecDeque::new(),
            live: Arc::new(AtomicUsize::new(0)),
            handed_out: false,
            last_error: None,
        })
    }

    fn thread_init(&self) -> bool {
        let mut state = self.state.lock();
        if state.thread_init_fails {
            return false;
        }
        state.registered += 1;
        true
    }

    fn thread_end(&self) {
        let mut state = self.state.lock();
        state.registered = state.registered.saturating_sub(1);
    }
}

struct MockSession {
    state: Arc<Mutex<MockState>>,
    connected: bool,
    current: Option<MockStatement>,
    pending: VecDeque<MockStatement>,
    /// Result sets of this session still alive
    live: Arc<AtomicUsize>,
    /// The current statement's result set was taken by `use_result`
    handed_out: bool,
    last_error: Option<ServerError>,
}

impl MockSession {
    fn record<T>(&mut self, result: ServerResult<T>) -> ServerResult<T> {
        self.last_error = result.as_ref().err().cloned();
        result
    }

    fn check_in_sync(&self) -> ServerResult<()> {
        if self.live.load(Ordering::SeqCst) > 0 {
            return Err(out_of_sync());
        }
        Ok(())
    }

    fn submit(&mut self, sql: &str) -> ServerResult<()> {
        self.check_in_sync()?;
        if !self.connected {
            return Err(ServerError::new(ErrorCode::SERVER_GONE, "server has gone away"));
        }

        let mut statements: VecDeque<_> = {
            let mut state = self.state.lock();
            state.attempt(MockOp::Query)?;
            state.last_query = Some(sql.to_string());
            state.response(sql).into()
        };

        match statements.pop_front() {
            None => Err(ServerError::new(ErrorCode::EMPTY_QUERY, "Query was empty")),
            Some(MockStatement::Error(code)) => {
                Err(ServerError::new(code, format!("statement failed ({code})")))
            }
            Some(first) => {
                self.current = Some(first);
                self.handed_out = false;
                self.pending = statements;
                Ok(())
            }
        }
    }

    fn take_result(&mut self) -> ServerResult<Option<Box<dyn RawResult>>> {
        self.state.lock().attempt(MockOp::UseResult)?;

        match self.current.take() {
            Some(MockStatement::Rows { columns, rows }) => {
                self.handed_out = true;
                self.live.fetch_add(1, Ordering::SeqCst);
                self.state.lock().live_results += 1;
                Ok(Some(Box::new(MockResult {
                    columns,
                    rows: rows.into(),
                    current: Vec::new(),
                    state: Arc::clone(&self.state),
                    live: Arc::clone(&self.live),
                })))
            }
            None if self.handed_out => Err(out_of_sync()),
            other => {
                self.current = other;
                Ok(None)
            }
        }
    }

    fn advance(&mut self) -> ServerResult<bool> {
        self.check_in_sync()?;
        if self.pending.is_empty() {
            return Ok(false);
        }
        self.state.lock().attempt(MockOp::NextResult)?;

        match self.pending.pop_front() {
            None => Ok(false),
            Some(MockStatement::Error(code)) => {
                self.pending.clear();
                Err(ServerError::new(code, format!("statement failed ({code})")))
            }
            Some(statement) => {
                self.current = Some(statement);
                self.handed_out = false;
                Ok(true)
            }
        }
    }
}

impl Session for MockSession {
    fn connect(&mut self, _config: &Config, _use_database: bool) -> ServerResult<()> {
        let result = self.state.lock().attempt(MockOp::Connect);
        self.connected = result.is_ok();
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
        match &self.current {
            Some(MockStatement::Rows { columns, .. }) => columns.len() as u32,
            _ => 0,
        }
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

    fn escape(&self, to: &mut BytesMut, from: &[u8]) -> usize {
        self.state.lock().escape_calls += 1;

        let start = to.len();
        for &b in from {
            match b {
                0 => to.put_slice(b"\\0"),
                b'\n' => to.put_slice(b"\\n"),
                b'\r' => to.put_slice(b"\\r"),
                b'\\' => to.put_slice(b"\\\\"),
                b'\'' => to.put_slice(b"\\'"),
                b'"' => to.put_slice(b"\\\""),
                0x1a => to.put_slice(b"\\Z"),
                _ => to.put_u8(b),
            }
        }
        to.len() - start
    }
}

struct MockResult {
    columns: Vec<String>,
    rows: VecDeque<Vec<Option<String>>>,
    current: Vec<Option<String>>,
    state: Arc<Mutex<MockState>>,
    live: Arc<AtomicUsize>,
}

impl RawResult for MockResult {
    fn num_fields(&self) -> usize {
        self.columns.len()
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn fetch_row(&mut self) -> ServerResult<bool> {
        self.state.lock().attempt(MockOp::FetchRow)?;

        match self.rows.pop_front() {
            Some(row) => {
                self.current = row;
                Ok(true)
            }
            None => {
                self.current.clear();
                Ok(false)
            }
        }
    }

    fn current_row(&self) -> &[Option<String>] {
        &self.current
    }
}

impl Drop for MockResult {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        state.live_results = state.live_results.saturating_sub(1);
    }
}

/// Reverse the mock's escaping.
pub fn unescape(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('\0'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('Z') => out.push('\x1a'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
