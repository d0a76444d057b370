//! Result cursors and row accessors.

use std::fmt;

use crate::connection::{with_retry, ConnectionRef};
use crate::driver::RawResult;
use crate::error::{Error, Result};

/// Forward-only cursor over one result set.
///
/// Holds the connection that produced it, so the connection outlives the
/// native result handle. The handle is freed when the cursor is dropped.
pub struct QueryResult {
    // Field order matters: the native result is dropped before the
    // connection reference.
    raw: Box<dyn RawResult>,
    conn: ConnectionRef,
}

impl QueryResult {
    pub(crate) fn new(conn: ConnectionRef, raw: Box<dyn RawResult>) -> Self {
        Self { raw, conn }
    }

    /// Fetch the next row, or `None` once the set is exhausted.
    ///
    /// The returned row borrows the cursor and is gone by the next fetch.
    pub fn fetch_row(&mut self) -> Result<Option<Row<'_>>> {
        let raw = &mut self.raw;
        let more = with_retry(self.conn.id(), "fetch_row", || raw.fetch_row())?;

        if more {
            Ok(Some(Row::new(self.raw.current_row())))
        } else {
            Ok(None)
        }
    }

    pub fn num_fields(&self) -> usize {
        self.raw.num_fields()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.raw.column_names()
    }

    pub fn connection(&self) -> &ConnectionRef {
        &self.conn
    }
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResult")
            .field("conn", &self.conn.id())
            .field("num_fields", &self.raw.num_fields())
            .finish()
    }
}

/// A row borrowed from a [`QueryResult`].
///
/// Fields are in text form; `None` stands for SQL NULL.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    fields: &'a [Option<String>],
}

impl<'a> Row<'a> {
    pub fn new(fields: &'a [Option<String>]) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Text of field `index`, `None` for NULL.
    pub fn get(&self, index: usize) -> Result<Option<&'a str>> {
        match self.fields.get(index) {
            Some(field) => Ok(field.as_deref()),
            None => Err(Error::FieldIndex {
                index,
                count: self.fields.len(),
            }),
        }
    }

    pub fn is_null(&self, index: usize) -> Result<bool> {
        Ok(self.get(index)?.is_none())
    }

    /// Field `index` for integer decoding.
    ///
    /// ```rust,ignore
    /// let maxlen: i32 = row.int(0)?.try_into()?;
    /// ```
    pub fn int(&self, index: usize) -> Result<IntValue<'a>> {
        Ok(IntValue {
            index,
            raw: self.get(index)?,
        })
    }
}

/// A text field read as a base-10 integer.
///
/// The whole field must parse, an optional sign included. NULL is an
/// error except for the `bool` conversion, where it reads as false.
#[derive(Debug, Clone, Copy)]
pub struct IntValue<'a> {
    index: usize,
    raw: Option<&'a str>,
}

impl IntValue<'_> {
    pub fn to_i64(&self) -> Result<i64> {
        let text = self.raw.ok_or(Error::NullValue { index: self.index })?;
        text.parse::<i64>().map_err(|_| Error::NotAnInteger {
            index: self.index,
            value: text.to_string(),
        })
    }

    /// NULL is false; otherwise true iff the value is non-zero.
    pub fn to_bool(&self) -> Result<bool> {
        match self.raw {
            None => Ok(false),
            Some(_) => Ok(self.to_i64()? != 0),
        }
    }

    fn narrow<T: TryFrom<i64>>(&self) -> Result<T> {
        let value = self.to_i64()?;
        T::try_from(value).map_err(|_| Error::IntegerOutOfRange {
            index: self.index,
            value,
        })
    }
}

impl TryFrom<IntValue<'_>> for i64 {
    type Error = Error;

    fn try_from(value: IntValue<'_>) -> Result<Self> {
        value.to_i64()
    }
}

impl TryFrom<IntValue<'_>> for i32 {
    type Error = Error;

    fn try_from(value: IntValue<'_>) -> Result<Self> {
        value.narrow()
    }
}

impl TryFrom<IntValue<'_>> for u64 {
    type Error = Error;

    fn try_from(value: IntValue<'_>) -> Result<Self> {
        value.narrow()
    }
}

impl TryFrom<IntValue<'_>> for u32 {
    type Error = Error;

    fn try_from(value: IntValue<'_>) -> Result<Self> {
        value.narrow()
    }
}

impl TryFrom<IntValue<'_>> for bool {
    type Error = Error;

    fn try_from(value: IntValue<'_>) -> Result<Self> {
        value.to_bool()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(values: &[Option<&str>]) -> Vec<Option<String>> {
        values.iter().map(|v| v.map(str::to_string)).collect()
    }

    #[test]
    fn test_field_access() {
        let data = fields(&[Some("latin1"), None]);
        let row = Row::new(&data);

        assert_eq!(row.len(), 2);
        assert_eq!(row.get(0).unwrap(), Some("latin1"));
        assert_eq!(row.get(1).unwrap(), None);
        assert!(row.is_null(1).unwrap());
    }

    #[test]
    fn test_field_index_out_of_range() {
        let data = fields(&[Some("1")]);
        let row = Row::new(&data);

        let err = row.get(1).unwrap_err();
        assert!(matches!(err, Error::FieldIndex { index: 1, count: 1 }));
        assert!(row.int(5).is_err());
    }

    #[test]
    fn test_decode_int() {
        let data = fields(&[Some("42"), Some("-7"), Some("+3")]);
        let row = Row::new(&data);

        assert_eq!(row.int(0).unwrap().to_i64().unwrap(), 42);
        assert_eq!(row.int(1).unwrap().to_i64().unwrap(), -7);
        assert_eq!(row.int(2).unwrap().to_i64().unwrap(), 3);

        let n: i32 = row.int(1).unwrap().try_into().unwrap();
        assert_eq!(n, -7);
    }

    #[test]
    fn test_decode_int_malformed() {
        let data = fields(&[Some("12abc"), Some(""), Some(" 1"), None]);
        let row = Row::new(&data);

        let err = row.int(0).unwrap().to_i64().unwrap_err();
        assert!(matches!(err, Error::NotAnInteger { index: 0, ref value } if value == "12abc"));
        assert!(row.int(1).unwrap().to_i64().is_err());
        assert!(row.int(2).unwrap().to_i64().is_err());

        let err = row.int(3).unwrap().to_i64().unwrap_err();
        assert!(matches!(err, Error::NullValue { index: 3 }));
    }

    #[test]
    fn test_decode_range_checks() {
        let data = fields(&[Some("-1"), Some("4294967296")]);
        let row = Row::new(&data);

        let err = u64::try_from(row.int(0).unwrap()).unwrap_err();
        assert!(matches!(err, Error::IntegerOutOfRange { value: -1, .. }));
        assert!(u32::try_from(row.int(1).unwrap()).is_err());
        assert_eq!(u64::try_from(row.int(1).unwrap()).unwrap(), 4_294_967_296);
    }

    #[test]
    fn test_decode_bool() {
        let data = fields(&[Some("0"), Some("5"), None, Some("yes")]);
        let row = Row::new(&data);

        assert!(!bool::try_from(row.int(0).unwrap()).unwrap());
        assert!(bool::try_from(row.int(1).unwrap()).unwrap());
        assert!(!bool::try_from(row.int(2).unwrap()).unwrap());
        assert!(bool::try_from(row.int(3).unwrap()).is_err());
    }
}
