use std::time::Duration;

// Convert Duration to Timespec
// It's strange that io_uring does not impl From<Duration> for Timespec.
pub(super) fn timespec(duration: Duration) -> io_uring::types::Timespec {
    io_uring::types::Timespec::new()
        .sec(duration.as_secs())
        .nsec(duration.subsec_nanos())
}

// Same conversion for the raw syscalls, which want a libc timespec.
pub(super) fn libc_timespec(duration: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    }
}

/// Do syscall and return Result<T, std::io::Error>
/// Use syscall@RAW to get the raw return value, the requirement to explicitly
/// add @RAW is to avoid misuse. Use syscall@SYS to go through `libc::syscall`
/// for calls libc has no wrapper for (the native aio family).
#[cfg(unix)]
#[macro_export]
macro_rules! syscall {
    ($fn: ident @RAW ( $($arg: expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
    ($nr: ident @SYS ( $($arg: expr),* $(,)* ) ) => {{
        let res = unsafe { libc::syscall(libc::$nr, $($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}
