//! Block I/O submission bridge.
//!
//! Turns blocking-style read/write requests from a hosting runtime into
//! kernel asynchronous I/O and reports each completion through a callback.
//! Every blocking wait is bracketed by the runtime's [`Scheduler`] hooks so
//! the runtime can run other work meanwhile.
//!
//! ```no_run
//! use std::os::fd::AsRawFd;
//! use aio_bridge::{submit_block_io, BioOp};
//!
//! let file = std::fs::File::open("/dev/zero")?;
//! let (tx, rx) = std::sync::mpsc::channel();
//! submit_block_io(file.as_raw_fd(), BioOp::Read, vec![0; 4096], 0, move |done| {
//!     tx.send(done).unwrap();
//! });
//! let done = rx.recv().unwrap();
//! assert_eq!(done.result()?, 4096);
//! # Ok::<(), std::io::Error>(())
//! ```

pub mod macros;
pub mod driver;
pub mod runtime;

use std::io;
use std::os::fd::RawFd;

pub use driver::op::{BioCallback, BioDone, BioOp, BIO_READ, BIO_SYNC, BIO_WRITE};
pub use driver::{is_uring_supported, AioDriver, Driver, UringDriver};
pub use runtime::bridge::{Bridge, DataSync, Fdatasync};
pub use runtime::builder::BridgeBuilder;
pub use runtime::scheduler::{ContextToken, NoopScheduler, Scheduler};

use runtime::gate::InitGate;

static GLOBAL: InitGate<Bridge> = InitGate::new();

/// Initialize the process-wide bridge with custom settings.
///
/// Must run before the first [`submit_block_io`]; fails with
/// `AlreadyExists` once the bridge is up.
pub fn init(builder: BridgeBuilder) -> io::Result<&'static Bridge> {
    let mut fresh = false;
    let bridge = GLOBAL.get_or_try_init(|| {
        fresh = true;
        builder.build()
    })?;
    if fresh {
        Ok(bridge)
    } else {
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "block i/o bridge already initialized",
        ))
    }
}

/// The process-wide bridge, created with default settings on first use.
pub fn global() -> &'static Bridge {
    match GLOBAL.get_or_try_init(|| BridgeBuilder::new().build()) {
        Ok(bridge) => bridge,
        Err(e) => fatal!("cannot create kernel i/o context: {e}"),
    }
}

/// Submit one block read or write through the process-wide bridge.
///
/// See [`Bridge::submit`]. The caller's scheduling context is yielded for the
/// whole submission once the bridge exists. The very first call creates the
/// bridge before yielding: the scheduling hooks belong to that bridge, and
/// the ones it gets by default are no-ops. Hooks installed with [`init`] are
/// therefore in effect for every submission, provided `init` returns before
/// the first one starts.
pub fn submit_block_io<F>(fd: RawFd, op: BioOp, buf: Vec<u8>, offset: i64, on_done: F)
where
    F: FnOnce(BioDone) + Send + 'static,
{
    let bridge = match GLOBAL.get() {
        Some(bridge) => bridge,
        None => global(),
    };
    bridge.submit(fd, op, buf, offset, on_done)
}
