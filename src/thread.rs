//! Per-thread registration with the client library.
//!
//! Client libraries keep per-thread state. Every worker thread calls
//! [`init_thread`] once before it touches a connection and [`end_thread`]
//! once before it exits. Registration is never done implicitly.

use std::cell::Cell;

use crate::driver::Driver;
use crate::error::{Error, Result};

thread_local! {
    static REGISTERED: Cell<bool> = const { Cell::new(false) };
}

/// Register the calling thread with `driver`.
pub fn init_thread(driver: &dyn Driver) -> Result<()> {
    if !driver.thread_init() {
        tracing::warn!(driver = driver.name(), "thread init failed");
        return Err(Error::ThreadInit {
            driver: driver.name(),
        });
    }
    REGISTERED.with(|r| r.set(true));
    tracing::trace!(driver = driver.name(), "thread registered");
    Ok(())
}

/// Release the calling thread's library state.
pub fn end_thread(driver: &dyn Driver) {
    driver.thread_end();
    REGISTERED.with(|r| r.set(false));
    tracing::trace!(driver = driver.name(), "thread deregistered");
}

/// Whether [`init_thread`] succeeded on this thread and [`end_thread`] has
/// not been called since.
pub fn is_registered() -> bool {
    REGISTERED.with(Cell::get)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDriver;

    #[test]
    fn test_register_and_end() {
        let driver = MockDriver::new();
        std::thread::spawn(move || {
            assert!(!is_registered());
            init_thread(&driver).unwrap();
            assert!(is_registered());
            assert_eq!(driver.registered_threads(), 1);
            end_thread(&driver);
            assert!(!is_registered());
            assert_eq!(driver.registered_threads(), 0);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_init_failure() {
        let driver = MockDriver::new().fail_thread_init();
        let err = init_thread(&driver).unwrap_err();
        assert!(matches!(err, Error::ThreadInit { driver: "mock" }));
        assert!(!is_registered());
    }
}
