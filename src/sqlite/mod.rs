//! SQLite backend.
//!
//! Runs on the bundled SQLite library through rusqlite. Values come back in
//! text form and native failures are mapped onto the shared error codes,
//! so pools and queries behave the same as with a network server.

pub mod connection;
pub mod error;
pub mod types;

#[cfg(test)]
mod tests;

pub use connection::{SqliteDriver, SqliteSession};
pub use types::SqliteRows;
