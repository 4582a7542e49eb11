//! One-time, process-wide initialization.

use std::io;
use std::sync::OnceLock;

use parking_lot::{const_mutex, Mutex};

/// Double-checked initialization gate.
///
/// Concurrent first callers serialize on the mutex; exactly one of them runs
/// the initializer and the rest observe its value. A failed initializer
/// leaves the gate closed so a later call can try again.
pub(crate) struct InitGate<T> {
    lock: Mutex<()>,
    value: OnceLock<T>,
}

impl<T> InitGate<T> {
    pub(crate) const fn new() -> Self {
        Self {
            lock: const_mutex(()),
            value: OnceLock::new(),
        }
    }

    /// The value, if initialization already succeeded.
    #[inline]
    pub(crate) fn get(&self) -> Option<&T> {
        self.value.get()
    }

    pub(crate) fn get_or_try_init(&self, init: impl FnOnce() -> io::Result<T>) -> io::Result<&T> {
        if let Some(v) = self.value.get() {
            return Ok(v);
        }

        let _guard = self.lock.lock();
        if let Some(v) = self.value.get() {
            return Ok(v);
        }
        let v = init()?;
        Ok(self.value.get_or_init(|| v))
    }
}
