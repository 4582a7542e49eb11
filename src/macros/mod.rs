//! Useful macros.

/// Report a broken invariant and abort the process.
///
/// Used where the bridge cannot hand the failure to any caller: a kernel
/// facility answering outside its defined error set, a completion for a slot
/// that is not in flight, a callback that panicked on the completion thread.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)+) => {{
        log::error!($($arg)+);
        std::process::abort()
    }};
}
