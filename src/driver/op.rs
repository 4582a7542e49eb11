use std::fmt;
use std::io;
use std::os::fd::RawFd;

use crate::driver::{ControlBlock, OpCode};

/// Read request bit as passed by the hosting runtime.
pub const BIO_READ: u32 = 0x01;
/// Write request bit.
pub const BIO_WRITE: u32 = 0x02;
/// Durably flush a write before reporting it done.
pub const BIO_SYNC: u32 = 0x04;

/// Operation kind of a block request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BioOp {
    Read,
    Write,
    /// Write, then `fdatasync` the descriptor before the callback runs.
    WriteSync,
}

impl BioOp {
    /// Decode the runtime's flag word. The read bit wins if both direction
    /// bits are set; the sync bit only matters for writes.
    pub fn from_flags(flags: u32) -> Option<BioOp> {
        match (flags & BIO_READ != 0, flags & BIO_WRITE != 0) {
            (true, _) => Some(BioOp::Read),
            (false, true) if flags & BIO_SYNC != 0 => Some(BioOp::WriteSync),
            (false, true) => Some(BioOp::Write),
            (false, false) => None,
        }
    }

    pub fn flags(self) -> u32 {
        match self {
            BioOp::Read => BIO_READ,
            BioOp::Write => BIO_WRITE,
            BioOp::WriteSync => BIO_WRITE | BIO_SYNC,
        }
    }

    #[inline]
    pub(crate) fn opcode(self) -> OpCode {
        match self {
            BioOp::Read => OpCode::Read,
            BioOp::Write | BioOp::WriteSync => OpCode::Write,
        }
    }

    #[inline]
    pub(crate) fn needs_sync(self) -> bool {
        self == BioOp::WriteSync
    }
}

/// Completion handed to the caller, exactly once per submitted request.
pub struct BioDone {
    /// The request's buffer, returned to its owner.
    pub buf: Vec<u8>,
    /// Bytes moved; 0 whenever `error` is set.
    pub transferred: usize,
    /// Positive errno, 0 on success.
    pub error: i32,
}

impl BioDone {
    /// Decode a raw kernel result: non-negative is a byte count, negative is
    /// a negated errno.
    pub(crate) fn from_raw(buf: Vec<u8>, res: i64) -> BioDone {
        if res < 0 {
            BioDone::failed(buf, (-res) as i32)
        } else {
            BioDone {
                buf,
                transferred: res as usize,
                error: 0,
            }
        }
    }

    pub(crate) fn failed(buf: Vec<u8>, error: i32) -> BioDone {
        BioDone {
            buf,
            transferred: 0,
            error,
        }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.error == 0
    }

    pub fn result(&self) -> io::Result<usize> {
        if self.error == 0 {
            Ok(self.transferred)
        } else {
            Err(io::Error::from_raw_os_error(self.error))
        }
    }
}

impl fmt::Debug for BioDone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BioDone")
            .field("buf_len", &self.buf.len())
            .field("transferred", &self.transferred)
            .field("error", &self.error)
            .finish()
    }
}

/// Completion callback. Owning the closure stands in for the runtime's
/// opaque callback argument.
pub type BioCallback = Box<dyn FnOnce(BioDone) + Send + 'static>;

/// In-flight state for one request.
pub(crate) struct Operation {
    pub(crate) fd: RawFd,
    pub(crate) kind: BioOp,
    // Kernel reads or writes through this while the op is in flight; the Vec
    // itself is never touched until the completion is reaped.
    pub(crate) buf: Vec<u8>,
    pub(crate) offset: i64,
    pub(crate) on_done: BioCallback,
    pub(crate) cb: ControlBlock,
}

impl Operation {
    pub(crate) fn new(
        fd: RawFd,
        kind: BioOp,
        buf: Vec<u8>,
        offset: i64,
        on_done: BioCallback,
    ) -> Operation {
        Operation {
            fd,
            kind,
            buf,
            offset,
            on_done,
            cb: ControlBlock::default(),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    /// Zero and rebuild the control block for a fresh submission.
    pub(crate) fn prepare(&mut self, user_data: u64) -> &ControlBlock {
        self.cb = ControlBlock {
            fd: self.fd,
            opcode: self.kind.opcode(),
            buf: self.buf.as_mut_ptr() as u64,
            len: self.len() as u64,
            offset: self.offset,
            user_data,
        };
        &self.cb
    }

    /// Give back the buffer and the callback once the kernel is done.
    pub(crate) fn into_parts(self) -> (Vec<u8>, BioCallback) {
        (self.buf, self.on_done)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("fd", &self.fd)
            .field("kind", &self.kind)
            .field("len", &self.len())
            .field("offset", &self.offset)
            .field("cb", &self.cb)
            .finish()
    }
}
