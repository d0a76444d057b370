//! A single server session with bounded retry of transient failures.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;

use crate::config::{Config, RETRY_COUNT};
use crate::driver::{Driver, ServerError, ServerResult, Session};
use crate::error::{Error, ErrorCode, Result};
use crate::result::QueryResult;

/// Shared handle to a connection.
///
/// The pool, the query that checked it out and any live result cursor
/// each hold one.
pub type ConnectionRef = Arc<Connection>;

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

struct Inner {
    session: Box<dyn Session>,
    connected: bool,
}

/// One live session to a database server.
///
/// A connection starts unconnected and moves to connected through
/// [`Connection::connect`]. There is no disconnect: the native handle is
/// released when the last [`ConnectionRef`] goes away.
///
/// The session sits behind a mutex so the handle can be shared, but a
/// connection is meant to be driven by one thread at a time (the holder of
/// its pool checkout).
pub struct Connection {
    id: usize,
    driver: &'static str,
    inner: Mutex<Inner>,
}

impl Connection {
    /// Allocate an unconnected session from `driver`.
    pub fn new(driver: &dyn Driver) -> Result<Self> {
        if !driver.is_thread_safe() {
            return Err(Error::NotThreadSafe {
                driver: driver.name(),
            });
        }

        Ok(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            driver: driver.name(),
            inner: Mutex::new(Inner {
                session: driver.new_session(),
                connected: false,
            }),
        })
    }

    /// Process-unique identity of this connection.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    /// Open the session.
    ///
    /// Fails with [`Error::UnknownDatabase`] when the configured database
    /// does not exist; any other failure carries the masked configuration.
    pub fn connect(&self, config: &Config, use_database: bool) -> Result<()> {
        let mut inner = self.inner.lock();

        match inner.session.connect(config, use_database) {
            Ok(()) => {
                inner.connected = true;
                tracing::debug!(conn = self.id, driver = self.driver, "connected");
                Ok(())
            }
            Err(e) if e.code == ErrorCode::BAD_DB => Err(Error::UnknownDatabase {
                database: config.database.clone(),
                code: e.code,
                message: e.message,
            }),
            Err(e) => {
                tracing::warn!(conn = self.id, code = %e.code, "connect failed: {}", e.message);
                Err(Error::Server {
                    command: "connect",
                    code: e.code,
                    message: e.message,
                    context: config.error_context(),
                })
            }
        }
    }

    /// Send a command, retrying transient failures.
    pub fn real_query(&self, sql: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.connected {
            return Err(Error::NotConnected {
                operation: "real_query",
            });
        }

        tracing::trace!(conn = self.id, sql, "executing");
        with_retry(self.id, "real_query", || inner.session.real_query(sql))
    }

    /// Fetch the result set of the current statement.
    ///
    /// Returns `Ok(None)` when the statement produced no result set (its
    /// field count is zero), which is not a failure.
    pub fn use_result(self: &Arc<Self>) -> Result<Option<QueryResult>> {
        let mut inner = self.inner.lock();

        let raw = with_retry(self.id, "use_result", || {
            match inner.session.use_result() {
                Ok(Some(raw)) => Ok(Some(raw)),
                Ok(None) if inner.session.field_count() == 0 => Ok(None),
                Ok(None) => Err(last_error(inner.session.as_ref())),
                Err(e) => Err(e),
            }
        })?;

        Ok(raw.map(|raw| QueryResult::new(Arc::clone(self), raw)))
    }

    /// Advance to the next result of a multi-statement command.
    ///
    /// `prev` is released before the server is asked for the next result,
    /// as the client protocol requires. Returns false when no results
    /// remain; `prev` is left untouched in that case.
    pub fn next_result(&self, prev: &mut Option<QueryResult>) -> Result<bool> {
        if !self.more_results() {
            return Ok(false);
        }

        drop(prev.take());

        let mut inner = self.inner.lock();
        with_retry(self.id, "next_result", || inner.session.next_result())
    }

    pub fn more_results(&self) -> bool {
        self.inner.lock().session.more_results()
    }

    pub fn field_count(&self) -> u32 {
        self.inner.lock().session.field_count()
    }

    /// Code of the session's last failure.
    pub fn errno(&self) -> ErrorCode {
        self.inner.lock().session.errno()
    }

    /// Message of the session's last failure.
    pub fn error(&self) -> String {
        self.inner.lock().session.error()
    }

    /// Whether the session's last failure is fatal.
    pub fn err_fatal(&self) -> bool {
        self.errno().is_fatal()
    }

    /// Append the escaped form of `from` to `to`. Returns the number of
    /// bytes written.
    pub fn escape(&self, to: &mut BytesMut, from: &[u8]) -> usize {
        self.inner.lock().session.escape(to, from)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("driver", &self.driver)
            .finish_non_exhaustive()
    }
}

fn last_error(session: &dyn Session) -> ServerError {
    missing_result(session.errno(), session.error())
}

/// Error for a result set that was announced (non-zero field count) but
/// not delivered. A session that recorded no failure still yields a fatal
/// code, never [`ErrorCode::NONE`].
fn missing_result(code: ErrorCode, message: String) -> ServerError {
    if code.is_none() {
        ServerError::new(ErrorCode::UNKNOWN, "result set announced but not returned")
    } else {
        ServerError::new(code, message)
    }
}

/// Run `attempt` until it succeeds, fails with a fatal code, or has been
/// tried [`RETRY_COUNT`] times.
pub(crate) fn with_retry<T>(
    conn: usize,
    command: &'static str,
    mut attempt: impl FnMut() -> ServerResult<T>,
) -> Result<T> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match attempt() {
            Ok(value) => return Ok(value),
            Err(e) if e.code.is_retryable() && attempts < RETRY_COUNT => {
                tracing::debug!(conn, command, attempt = attempts, code = %e.code, "retrying");
            }
            Err(e) => {
                if e.code.is_retryable() {
                    tracing::warn!(conn, command, attempts, code = %e.code, "retries exhausted");
                } else {
                    tracing::warn!(conn, command, code = %e.code, "fatal error: {}", e.message);
                }
                return Err(Error::Server {
                    command,
                    code: e.code,
                    message: e.message,
                    context: None,
                });
            }
        }
    }
}
