//! Blocking connection pool and query layer for SQL servers.
//!
//! A [`Pool`] owns a fixed set of [`Connection`]s created up front. Worker
//! threads check connections out through an [`Entry`] (or a [`Query`]
//! built from the pool), block while all of them are busy, and return them
//! when the guard is dropped. Transient server failures (lost connections,
//! deadlocks, racing inserts) are retried a bounded number of times;
//! everything else surfaces as an [`Error`].
//!
//! ```rust,ignore
//! use dbpool::{Config, Pool, Query, SqliteDriver};
//!
//! let driver = SqliteDriver::new();
//! dbpool::init_thread(&driver)?;
//!
//! let pool = Pool::new(&driver, 4)?;
//! pool.connect(&Config::from_json_file("db.json")?, true)?;
//!
//! let mut q = Query::from_pool(&pool);
//! q.push("SELECT id, name FROM users WHERE name = ");
//! let name = q.escape("o'brien");
//! q.push(name);
//! q.execute()?;
//! while let Some(row) = q.fetch_row()? {
//!     let id: u64 = row.int(0)?.try_into()?;
//! }
//! ```
//!
//! The client library sits behind the [`Driver`] trait. [`SqliteDriver`]
//! is the built-in backend. With the `testing` feature, `mock::MockDriver`
//! scripts a server for tests.

pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod mock;
pub mod pool;
pub mod query;
pub mod result;
pub mod sqlite;
pub mod thread;

pub use config::{Config, RETRY_COUNT};
pub use connection::{Connection, ConnectionRef};
pub use driver::{Driver, RawResult, ServerError, Session};
pub use error::{Error, ErrorCode, Result};
pub use pool::{Entry, Pool, PoolStatus};
pub use query::Query;
pub use result::{IntValue, QueryResult, Row};
pub use sqlite::SqliteDriver;
pub use thread::{end_thread, init_thread};
