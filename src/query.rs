//! Command building and execution.
//!
//! A [`Query`] accumulates command text, escapes untrusted values through
//! its connection, submits the text and keeps the current result cursor.
//!
//! ```rust,ignore
//! let mut q = Query::from_pool(&pool);
//! q.push("SELECT MAXLEN, CHARACTER_SET_NAME FROM CHARACTER_SETS WHERE DESCRIPTION = ");
//! let lang = q.escape(lang);
//! q.push(lang);
//! q.execute()?;
//! while let Some(row) = q.fetch_row()? {
//!     let maxlen: i32 = row.int(0)?.try_into()?;
//!     let charset = row.get(1)?.unwrap_or_default();
//! }
//! ```

use std::fmt::{self, Write as _};

use bytes::{BufMut, BytesMut};

use crate::config::RETRY_COUNT;
use crate::connection::ConnectionRef;
use crate::error::{Error, Result};
use crate::pool::{Entry, Pool};
use crate::result::{QueryResult, Row};

const ESC_RESERVE: usize = 4096;

/// A command builder bound to one connection.
pub struct Query {
    // Fields drop in declaration order: the result goes before the
    // connection, and the connection goes back to the pool last.
    result: Option<QueryResult>,
    conn: ConnectionRef,
    entry: Entry,
    text: String,
    esc_buf: BytesMut,
}

impl Query {
    /// Build commands on a connection the caller already holds.
    pub fn new(conn: ConnectionRef) -> Self {
        Self::with_entry(conn, Entry::default())
    }

    /// Check out a connection from `pool` (blocking) for the lifetime of
    /// the query.
    pub fn from_pool(pool: &Pool) -> Self {
        let (conn, entry) = pool.checkout();
        Self::with_entry(conn, entry)
    }

    fn with_entry(conn: ConnectionRef, entry: Entry) -> Self {
        Self {
            result: None,
            conn,
            entry,
            text: String::new(),
            esc_buf: BytesMut::with_capacity(ESC_RESERVE),
        }
    }

    /// Append a chunk of command text.
    ///
    /// A `Display` impl that fails leaves whatever it wrote before failing.
    pub fn push<T: fmt::Display>(&mut self, chunk: T) -> &mut Self {
        self.write_fmt(format_args!("{chunk}")).ok();
        self
    }

    /// Escape `value` and wrap it in single quotes. Empty input yields `''`.
    pub fn escape(&mut self, value: &str) -> String {
        self.esc(value, true)
    }

    /// Escape `value` without adding quotes.
    pub fn escape_unquoted(&mut self, value: &str) -> String {
        self.esc(value, false)
    }

    /// Like [`Query::escape`], but empty input becomes `NULL`.
    pub fn escape_or_null(&mut self, value: &str) -> String {
        if value.is_empty() {
            return "NULL".to_string();
        }
        self.esc(value, true)
    }

    fn esc(&mut self, value: &str, quote: bool) -> String {
        if value.is_empty() {
            return if quote { "''" } else { "" }.to_string();
        }

        // worst case every byte is escaped, plus both quotes
        self.esc_buf.reserve(value.len() * 2 + 3);
        if quote {
            self.esc_buf.put_u8(b'\'');
        }
        self.conn.escape(&mut self.esc_buf, value.as_bytes());
        if quote {
            self.esc_buf.put_u8(b'\'');
        }

        let escaped = self.esc_buf.split();
        String::from_utf8_lossy(&escaped).into_owned()
    }

    /// Take the accumulated text and drop the previous result.
    fn build(&mut self) -> String {
        self.result = None;
        std::mem::take(&mut self.text)
    }

    /// Fetch results until one carries a result set or none remain.
    fn fetch_first_result(&mut self) -> Result<()> {
        loop {
            self.result = self.conn.use_result()?;
            if self.result.is_some() || !self.conn.next_result(&mut self.result)? {
                return Ok(());
            }
        }
    }

    /// Submit the command; a result set is optional.
    pub fn execute_only(&mut self) -> Result<()> {
        let sql = self.build();
        self.conn.real_query(&sql)?;
        self.fetch_first_result()
    }

    /// Submit the command and require a result set.
    ///
    /// The whole command is resent while it yields no result set, up to
    /// [`RETRY_COUNT`] submissions.
    pub fn execute(&mut self) -> Result<&mut QueryResult> {
        let sql = self.build();

        for attempt in 1..=RETRY_COUNT {
            self.conn.real_query(&sql)?;
            self.fetch_first_result()?;
            if self.result.is_some() {
                break;
            }
            tracing::debug!(conn = self.conn.id(), attempt, "no result set, resending");
        }

        match self.result.as_mut() {
            Some(result) => Ok(result),
            None => {
                tracing::warn!(conn = self.conn.id(), "empty result set");
                Err(Error::EmptyResultSet {
                    attempts: RETRY_COUNT,
                })
            }
        }
    }

    /// Move to the next result set of a multi-statement command, skipping
    /// statements that returned none. Returns false once all are consumed.
    pub fn next_result(&mut self) -> Result<bool> {
        loop {
            if !self.conn.next_result(&mut self.result)? {
                self.result = None;
                return Ok(false);
            }
            self.result = self.conn.use_result()?;
            if self.result.is_some() {
                return Ok(true);
            }
        }
    }

    /// Next row of the current result set; `None` when there is no result
    /// set or it is exhausted.
    pub fn fetch_row(&mut self) -> Result<Option<Row<'_>>> {
        match self.result.as_mut() {
            Some(result) => result.fetch_row(),
            None => Ok(None),
        }
    }

    /// The current result set.
    pub fn result(&mut self) -> Option<&mut QueryResult> {
        self.result.as_mut()
    }

    /// Command text accumulated since the last submission.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn connection(&self) -> &ConnectionRef {
        &self.conn
    }

    /// Whether the connection was checked out from a pool by this query.
    pub fn is_pooled(&self) -> bool {
        !self.entry.is_empty()
    }
}

impl fmt::Write for Query {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.text.push_str(s);
        Ok(())
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("conn", &self.conn.id())
            .field("text", &self.text)
            .field("result", &self.result)
            .finish()
    }
}
