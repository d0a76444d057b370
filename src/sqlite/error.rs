//! Mapping of SQLite failures onto server error codes.

use rusqlite::ffi;

use crate::driver::ServerError;
use crate::error::ErrorCode;

/// Translate a rusqlite error into the code a MySQL server would report
/// for the same condition, so retry classification applies unchanged.
pub(crate) fn server_error(err: rusqlite::Error) -> ServerError {
    let code = match &err {
        rusqlite::Error::SqliteFailure(e, _) => match e.code {
            ffi::ErrorCode::DatabaseBusy | ffi::ErrorCode::DatabaseLocked => {
                ErrorCode::LOCK_DEADLOCK
            }
            ffi::ErrorCode::ConstraintViolation => match e.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    ErrorCode::DUP_ENTRY
                }
                ffi::SQLITE_CONSTRAINT_NOTNULL => ErrorCode::BAD_NULL,
                _ => ErrorCode::UNKNOWN,
            },
            ffi::ErrorCode::CannotOpen => ErrorCode::BAD_DB,
            _ => ErrorCode::UNKNOWN,
        },
        _ => ErrorCode::UNKNOWN,
    };
    ServerError::new(code, err.to_string())
}
