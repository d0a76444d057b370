//! Error types for the connection pool and query layer.
//!
//! Server-side failures carry an [`ErrorCode`]. Codes use MySQL numbering;
//! backends map their native failures onto these values so that the
//! retry classification stays the same for every driver.

use std::fmt;

use thiserror::Error;

/// Numeric error code reported by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    /// No error.
    pub const NONE: ErrorCode = ErrorCode(0);
    /// Unexpected NULL in a NOT NULL column.
    pub const BAD_NULL: ErrorCode = ErrorCode(1048);
    /// Requested database does not exist.
    pub const BAD_DB: ErrorCode = ErrorCode(1049);
    /// Duplicate key on insert.
    pub const DUP_ENTRY: ErrorCode = ErrorCode(1062);
    /// Command text contained no statement.
    pub const EMPTY_QUERY: ErrorCode = ErrorCode(1065);
    /// Catch-all for failures without a more specific code.
    pub const UNKNOWN: ErrorCode = ErrorCode(1105);
    /// Deadlock found when trying to get a lock.
    pub const LOCK_DEADLOCK: ErrorCode = ErrorCode(1213);
    /// Server has gone away.
    pub const SERVER_GONE: ErrorCode = ErrorCode(2006);
    /// Lost connection to server during query.
    pub const SERVER_LOST: ErrorCode = ErrorCode(2013);
    /// Commands issued in the wrong order.
    pub const COMMANDS_OUT_OF_SYNC: ErrorCode = ErrorCode(2014);

    /// Whether a failure with this code must abort the operation.
    ///
    /// Lost connections and deadlocks are transient. `BAD_NULL` and
    /// `DUP_ENTRY` come out of racing "insert or find" procedures, where
    /// resending the same command succeeds once the competing transaction
    /// has committed. Every other code is fatal.
    #[inline]
    pub fn is_fatal(self) -> bool {
        !matches!(
            self,
            ErrorCode::SERVER_LOST
                | ErrorCode::SERVER_GONE
                | ErrorCode::LOCK_DEADLOCK
                | ErrorCode::BAD_NULL
                | ErrorCode::DUP_ENTRY
        )
    }

    /// Inverse of [`ErrorCode::is_fatal`].
    #[inline]
    pub fn is_retryable(self) -> bool {
        !self.is_fatal()
    }

    /// Whether this is [`ErrorCode::NONE`].
    #[inline]
    pub fn is_none(self) -> bool {
        self == ErrorCode::NONE
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised by connections, pools, queries and row accessors.
#[derive(Error, Debug)]
pub enum Error {
    /// A server command failed with a fatal code or ran out of retries.
    ///
    /// `context` holds the masked connection settings when the failure
    /// happened while connecting.
    #[error("{command}: {message} ({code}){}", .context.as_deref().unwrap_or(""))]
    Server {
        command: &'static str,
        code: ErrorCode,
        message: String,
        context: Option<String>,
    },

    /// The database named in the configuration does not exist.
    #[error("unknown database '{database}': {message} ({code})")]
    UnknownDatabase {
        database: String,
        code: ErrorCode,
        message: String,
    },

    /// An operation needed an established session.
    #[error("{operation}: not connected")]
    NotConnected { operation: &'static str },

    /// The client library cannot be shared between threads.
    #[error("{driver} client library is not thread safe")]
    NotThreadSafe { driver: &'static str },

    /// Per-thread registration with the client library failed.
    #[error("{driver} thread init failed")]
    ThreadInit { driver: &'static str },

    /// `execute` never got a result set back.
    #[error("empty result set after {attempts} attempts")]
    EmptyResultSet { attempts: usize },

    #[error("wrong field index {index} (row has {count} fields)")]
    FieldIndex { index: usize, count: usize },

    #[error("NULL value in field {index}")]
    NullValue { index: usize },

    #[error("not an integer in field {index}: '{value}'")]
    NotAnInteger { index: usize, value: String },

    #[error("integer out of range in field {index}: {value}")]
    IntegerOutOfRange { index: usize, value: i64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Server error code, if the error came from a session.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::Server { code, .. } | Error::UnknownDatabase { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the underlying server code is classified as transient.
    ///
    /// Errors only surface with a retryable code once the retry bound is
    /// exhausted.
    pub fn is_retryable(&self) -> bool {
        self.code().is_some_and(ErrorCode::is_retryable)
    }

    pub fn is_unknown_database(&self) -> bool {
        matches!(self, Error::UnknownDatabase { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
