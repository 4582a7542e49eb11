//! io_uring binding for the same submit/reap contract.

use std::io;
use std::time::{Duration, Instant};

use io_uring::{cqueue, opcode, squeue, types, IoUring};
use parking_lot::Mutex;

use crate::driver::util::timespec;
use crate::driver::{ControlBlock, Driver, OpCode, RawEvent};

pub struct UringDriver {
    uring: IoUring,

    // Serializes access to the submission queue. Holds the user_data of an
    // entry pushed but not yet accepted by the kernel, so a retried submit
    // does not push it twice.
    staged: Mutex<Option<u64>>,

    // Uring support ext_arg
    ext_arg: bool,
}

/// Check whether the running kernel lets us create a ring.
pub fn is_uring_supported() -> bool {
    IoUring::new(2).is_ok()
}

const POLL_INTERVAL: Duration = Duration::from_millis(1);

impl UringDriver {
    fn drain(&self, events: &mut [RawEvent]) -> usize {
        // # Safety
        // Only the reaping thread reads the completion queue.
        let mut cq = unsafe { self.uring.completion_shared() };
        cq.sync();
        let mut n = 0;
        for (out, cqe) in events.iter_mut().zip(&mut cq) {
            *out = raw_event(&cqe);
            n += 1;
        }
        n
    }

    // io_uring takes offset -1 as "current file position" and a 32-bit
    // length, so refuse what the kernel AIO interface would refuse instead of
    // letting the casts reinterpret it.
    fn sqe(cb: &ControlBlock) -> io::Result<squeue::Entry> {
        let offset = u64::try_from(cb.offset)
            .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
        let len =
            u32::try_from(cb.len).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
        let fd = types::Fd(cb.fd);
        let entry = match cb.opcode {
            OpCode::Read => opcode::Read::new(fd, cb.buf as *mut u8, len)
                .offset(offset)
                .build(),
            OpCode::Write => opcode::Write::new(fd, cb.buf as *const u8, len)
                .offset(offset)
                .build(),
        };
        Ok(entry.user_data(cb.user_data))
    }
}

impl Driver for UringDriver {
    const CAN_WITHDRAW: bool = false;

    fn setup(capacity: u32) -> io::Result<UringDriver> {
        let uring = IoUring::new(capacity.next_power_of_two())?;
        log::debug!(
            "io_uring created with {} sq entries",
            uring.params().sq_entries()
        );
        Ok(UringDriver {
            ext_arg: uring.params().is_feature_ext_arg(),
            uring,
            staged: Mutex::new(None),
        })
    }

    fn submit(&self, cb: &ControlBlock) -> io::Result<()> {
        let mut staged = self.staged.lock();
        if *staged != Some(cb.user_data) {
            let sqe = Self::sqe(cb)?;
            // # Safety
            // We hold the submission lock, and the buffer outlives the op.
            let mut sq = unsafe { self.uring.submission_shared() };
            if unsafe { sq.push(&sqe).is_err() } {
                return Err(io::Error::from_raw_os_error(libc::EAGAIN));
            }
            sq.sync();
            *staged = Some(cb.user_data);
        }

        match self.uring.submit() {
            Ok(_) => {
                *staged = None;
                Ok(())
            }
            Err(ref e) if matches!(e.raw_os_error(), Some(libc::EBUSY)) => {
                Err(io::Error::from_raw_os_error(libc::EAGAIN))
            }
            Err(e) => Err(e),
        }
    }

    fn reap(
        &self,
        min: usize,
        events: &mut [RawEvent],
        timeout: Option<Duration>,
    ) -> io::Result<usize> {
        match timeout {
            None => {
                self.uring.submitter().submit_and_wait(min)?;
            }
            // Wait with enter args (5.11+).
            Some(duration) if self.ext_arg => {
                let ts = timespec(duration);
                let args = types::SubmitArgs::new().timespec(&ts);
                if let Err(e) = self.uring.submitter().submit_with_args(min, &args) {
                    if e.raw_os_error() != Some(libc::ETIME) {
                        return Err(e);
                    }
                }
            }
            // Older kernels: poll the completion queue until the deadline.
            Some(duration) => {
                let deadline = Instant::now() + duration;
                loop {
                    self.uring.submit()?;
                    let ready = unsafe { self.uring.completion_shared() }.len();
                    if ready >= min || Instant::now() >= deadline {
                        break;
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        }
        Ok(self.drain(events))
    }

    fn destroy(self) -> io::Result<()> {
        drop(self);
        Ok(())
    }
}

fn raw_event(cqe: &cqueue::Entry) -> RawEvent {
    RawEvent {
        user_data: cqe.user_data(),
        res: cqe.result() as i64,
    }
}
