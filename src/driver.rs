//! Client library seam.
//!
//! A [`Driver`] stands for a blocking SQL client library. It hands out
//! [`Session`]s (one native connection handle each) and owns the
//! library-wide per-thread hooks. Everything above this module only talks
//! to these traits, so retry policy and pooling stay independent of the
//! concrete client.

use std::fmt;

use bytes::BytesMut;

use crate::config::Config;
use crate::error::ErrorCode;

/// Failure reported by a session primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub code: ErrorCode,
    pub message: String,
}

impl ServerError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

pub type ServerResult<T> = std::result::Result<T, ServerError>;

/// A client library.
pub trait Driver: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Whether sessions may be used from threads other than the one that
    /// created them.
    fn is_thread_safe(&self) -> bool {
        true
    }

    /// Allocate a new, unconnected session.
    fn new_session(&self) -> Box<dyn Session>;

    /// Register the calling thread with the library. Returns false on
    /// failure.
    fn thread_init(&self) -> bool {
        true
    }

    /// Release per-thread library state.
    fn thread_end(&self) {}
}

/// One native connection handle.
///
/// Methods mirror the blocking client primitives: every call may block on
/// server I/O. After a failed call `errno` and `error` describe the
/// failure until the next call.
pub trait Session: Send {
    /// Open the session. When `use_database` is false the configured
    /// database is not selected.
    fn connect(&mut self, config: &Config, use_database: bool) -> ServerResult<()>;

    /// Send a (possibly multi-statement) command.
    fn real_query(&mut self, sql: &str) -> ServerResult<()>;

    /// Start reading the current result.
    ///
    /// `Ok(None)` means the current statement produced no result set,
    /// which callers distinguish from a failure through `field_count`.
    fn use_result(&mut self) -> ServerResult<Option<Box<dyn RawResult>>>;

    /// Number of columns of the current statement's result.
    fn field_count(&self) -> u32;

    /// Whether more results follow the current one.
    fn more_results(&self) -> bool;

    /// Advance to the next result. `Ok(false)` when there is none.
    ///
    /// Any result set obtained from `use_result` must be dropped first.
    fn next_result(&mut self) -> ServerResult<bool>;

    /// Code of the last failure, [`ErrorCode::NONE`] if the last call
    /// succeeded.
    fn errno(&self) -> ErrorCode;

    /// Message of the last failure.
    fn error(&self) -> String;

    /// Append `from` to `to`, escaped for use inside a quoted string
    /// literal. Returns the number of bytes written.
    fn escape(&self, to: &mut BytesMut, from: &[u8]) -> usize;
}

/// One native result-set handle, read forward only.
pub trait RawResult: Send {
    fn num_fields(&self) -> usize;

    fn column_names(&self) -> Vec<String>;

    /// Move to the next row. `Ok(false)` at the end of the set.
    fn fetch_row(&mut self) -> ServerResult<bool>;

    /// Fields of the row reached by the last successful `fetch_row`, in
    /// text form. Empty before the first row and after the end.
    fn current_row(&self) -> &[Option<String>];
}
