//! SQLite values in text-protocol form.

use std::collections::VecDeque;

use rusqlite::types::ValueRef;
use smallvec::SmallVec;

use crate::driver::{RawResult, ServerResult};

/// Inline storage for rows with up to 16 columns.
pub(crate) type TextRow = SmallVec<[Option<String>; 16]>;

/// Render a SQLite value the way a text-protocol server sends it.
///
/// NULL stays `None`; blobs that are not UTF-8 are converted lossily.
pub(crate) fn to_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(s) | ValueRef::Blob(s) => Some(String::from_utf8_lossy(s).into_owned()),
    }
}

/// A fully read result set of one statement.
#[derive(Debug)]
pub struct SqliteRows {
    columns: Vec<String>,
    rows: VecDeque<TextRow>,
    current: TextRow,
}

impl SqliteRows {
    pub(crate) fn new(columns: Vec<String>, rows: VecDeque<TextRow>) -> Self {
        Self {
            columns,
            rows,
            current: TextRow::new(),
        }
    }
}

impl RawResult for SqliteRows {
    fn num_fields(&self) -> usize {
        self.columns.len()
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn fetch_row(&mut self) -> ServerResult<bool> {
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
