//! Linux native AIO (`io_setup(2)` family) binding.

use std::io;
use std::ptr;
use std::time::Duration;

use crate::driver::util::libc_timespec;
use crate::driver::{ControlBlock, Driver, OpCode, RawEvent};
use crate::syscall;

use self::abi::{AioContext, IoEvent, Iocb, IOCB_CMD_PREAD, IOCB_CMD_PWRITE};

mod abi;

/// A kernel AIO context. Dropping it destroys the context.
#[derive(Debug)]
pub struct AioDriver {
    ctx: AioContext,
}

impl AioDriver {
    fn iocb(cb: &ControlBlock) -> Iocb {
        Iocb {
            aio_data: cb.user_data,
            aio_lio_opcode: match cb.opcode {
                OpCode::Read => IOCB_CMD_PREAD,
                OpCode::Write => IOCB_CMD_PWRITE,
            },
            aio_fildes: cb.fd as u32,
            aio_buf: cb.buf,
            aio_nbytes: cb.len,
            aio_offset: cb.offset,
            ..Iocb::default()
        }
    }
}

impl Driver for AioDriver {
    fn setup(capacity: u32) -> io::Result<AioDriver> {
        let mut ctx: AioContext = 0;
        syscall!(SYS_io_setup @SYS (capacity as libc::c_uint, &mut ctx as *mut AioContext))?;
        log::debug!("aio context {ctx:#x} created for {capacity} events");
        Ok(AioDriver { ctx })
    }

    fn submit(&self, cb: &ControlBlock) -> io::Result<()> {
        // The kernel copies the iocb during the call, a stack copy is enough.
        let mut iocb = Self::iocb(cb);
        let mut iocbpp: [*mut Iocb; 1] = [&mut iocb];
        let n = syscall!(SYS_io_submit @SYS (self.ctx, 1 as libc::c_long, iocbpp.as_mut_ptr()))?;
        if n == 1 {
            Ok(())
        } else {
            // Nothing queued and no errno: same as "try again".
            Err(io::Error::from_raw_os_error(libc::EAGAIN))
        }
    }

    fn reap(
        &self,
        min: usize,
        events: &mut [RawEvent],
        timeout: Option<Duration>,
    ) -> io::Result<usize> {
        let mut raw = vec![IoEvent::default(); events.len()];
        let ts = timeout.map(libc_timespec);
        let ts_ptr = ts
            .as_ref()
            .map_or(ptr::null(), |ts| ts as *const libc::timespec);
        let n = syscall!(SYS_io_getevents @SYS (
            self.ctx,
            min as libc::c_long,
            raw.len() as libc::c_long,
            raw.as_mut_ptr(),
            ts_ptr,
        ))? as usize;

        for (out, ev) in events.iter_mut().zip(&raw[..n]) {
            *out = RawEvent {
                user_data: ev.data,
                res: ev.res,
            };
        }
        Ok(n)
    }

    fn destroy(self) -> io::Result<()> {
        let ctx = self.ctx;
        std::mem::forget(self);
        syscall!(SYS_io_destroy @SYS (ctx)).map(|_| ())
    }
}

impl Drop for AioDriver {
    fn drop(&mut self) {
        let _ = syscall!(SYS_io_destroy @SYS (self.ctx));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;

    fn driver() -> Option<AioDriver> {
        match AioDriver::setup(8) {
            Ok(d) => Some(d),
            Err(e) => {
                eprintln!("native aio unavailable, skipping: {e}");
                None
            }
        }
    }

    #[test]
    fn pread_roundtrip() {
        let Some(driver) = driver() else { return };
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"hello, aio").unwrap();

        let mut buf = vec![0u8; 5];
        let cb = ControlBlock {
            fd: file.as_raw_fd(),
            opcode: OpCode::Read,
            buf: buf.as_mut_ptr() as u64,
            len: buf.len() as u64,
            offset: 7,
            user_data: 0xfeed,
        };
        driver.submit(&cb).unwrap();

        let mut events = [RawEvent::default(); 4];
        let n = driver.reap(1, &mut events, None).unwrap();
        assert_eq!(n, 1);
        assert_eq!(events[0].user_data, 0xfeed);
        assert_eq!(events[0].res, 3);
        assert_eq!(&buf[..3], b"aio");
        driver.destroy().unwrap();
    }

    #[test]
    fn bad_fd_rejected_at_submit() {
        let Some(driver) = driver() else { return };
        let mut buf = vec![0u8; 16];
        let cb = ControlBlock {
            fd: -1,
            opcode: OpCode::Read,
            buf: buf.as_mut_ptr() as u64,
            len: 16,
            offset: 0,
            user_data: 1,
        };
        let err = driver.submit(&cb).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }

    #[test]
    fn reap_times_out_empty() {
        let Some(driver) = driver() else { return };
        let mut events = [RawEvent::default(); 2];
        let n = driver
            .reap(1, &mut events, Some(Duration::from_millis(10)))
            .unwrap();
        assert_eq!(n, 0);
    }
}
