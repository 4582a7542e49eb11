pub mod aio;
pub(crate) mod op;
pub mod uring;
mod util;

#[cfg(test)]
pub(crate) mod mock;

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

pub use aio::AioDriver;
pub use uring::{is_uring_supported, UringDriver};

/// Kernel-side operation code carried by a [`ControlBlock`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    #[default]
    Read,
    Write,
}

/// Portable image of one kernel submission.
///
/// Drivers translate it into their native control block (`iocb`, SQE) at
/// submit time; `user_data` comes back untouched in the matching
/// [`RawEvent`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ControlBlock {
    pub fd: RawFd,
    pub opcode: OpCode,
    /// Address of the first byte of the transfer buffer.
    pub buf: u64,
    pub len: u64,
    pub offset: i64,
    pub user_data: u64,
}

/// One reaped completion: the submission's `user_data` and the kernel's
/// result (byte count, or a negated errno).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub user_data: u64,
    pub res: i64,
}

/// A kernel asynchronous I/O facility.
///
/// Implementations relay straight to the kernel primitives. Retry, ring
/// management and completion decoding live in the bridge, never here.
pub trait Driver: Send + Sync + Sized + 'static {
    /// Whether a submission that failed with `EAGAIN` is guaranteed not to
    /// run later. Only such drivers can have a submission retry limit.
    const CAN_WITHDRAW: bool = true;

    /// Create a completion context sized for `capacity` outstanding
    /// operations.
    fn setup(capacity: u32) -> io::Result<Self>;

    /// Hand one prepared operation to the kernel.
    ///
    /// `EAGAIN` means the kernel is temporarily out of resources and the same
    /// block may be submitted again.
    fn submit(&self, cb: &ControlBlock) -> io::Result<()>;

    /// Reap between `min` and `events.len()` completions, blocking until at
    /// least `min` are available or `timeout` elapses. Returns how many
    /// entries of `events` were filled.
    fn reap(&self, min: usize, events: &mut [RawEvent], timeout: Option<Duration>)
        -> io::Result<usize>;

    /// Tear the context down.
    fn destroy(self) -> io::Result<()>;
}
