//! Submission path and completion thread.

use std::os::fd::RawFd;
use std::{fmt, io};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::driver::op::{BioDone, BioOp, Operation};
use crate::driver::{AioDriver, Driver, RawEvent};
use crate::runtime::builder::BridgeBuilder;
use crate::runtime::ring::{SlotId, SlotRing};
use crate::runtime::scheduler::{scheduled, Scheduler, Unscheduled};
use crate::{fatal, syscall};

/// Durable flush of a descriptor's data, run before a write+sync completes.
pub trait DataSync: Send + Sync + 'static {
    fn sync_data(&self, fd: RawFd) -> io::Result<()>;
}

/// `fdatasync(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Fdatasync;

impl DataSync for Fdatasync {
    fn sync_data(&self, fd: RawFd) -> io::Result<()> {
        syscall!(fdatasync @RAW (fd)).map(|_| ())
    }
}

/// Submission errors that concern the request itself rather than the
/// context. They go back to the caller like any failed transfer.
fn is_rejection(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EBADF | libc::EINVAL | libc::EFAULT | libc::EOPNOTSUPP)
    )
}

#[inline]
fn is_transient(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EAGAIN)
}

/// Handle to a kernel I/O context plus its completion thread.
///
/// Cloning is cheap. The completion thread keeps the context alive for the
/// rest of the process; there is no shutdown.
pub struct Bridge<D: Driver = AioDriver> {
    shared: Arc<Shared<D>>,
}

impl<D: Driver> Clone for Bridge<D> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<D: Driver> fmt::Debug for Bridge<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("capacity", &self.capacity())
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

struct Shared<D> {
    driver: D,
    ring: SlotRing,
    scheduler: Arc<dyn Scheduler>,
    data_sync: Arc<dyn DataSync>,
    submit_backoff: Duration,
    max_submit_retries: Option<u32>,
    reap_timeout: Option<Duration>,
}

impl<D: Driver> Bridge<D> {
    /// Builder with default settings.
    pub fn builder() -> BridgeBuilder<D> {
        BridgeBuilder::new()
    }

    pub(crate) fn start(builder: BridgeBuilder<D>, driver: D) -> io::Result<Bridge<D>> {
        let shared = Arc::new(Shared {
            driver,
            ring: SlotRing::new(builder.capacity as usize),
            scheduler: builder.scheduler,
            data_sync: builder.data_sync,
            submit_backoff: builder.submit_backoff,
            max_submit_retries: builder.max_submit_retries,
            reap_timeout: builder.reap_timeout,
        });

        let worker = shared.clone();
        thread::Builder::new()
            .name(builder.thread_name.clone())
            .spawn(move || worker.run_completions())?;
        log::debug!(
            "completion thread {} started, {} slots",
            builder.thread_name,
            builder.capacity
        );
        Ok(Bridge { shared })
    }

    /// Queue one block transfer of `buf.len()` bytes at `offset` on `fd`.
    ///
    /// Returns once the kernel accepted the request, blocking while every
    /// slot is in use. `on_done` runs exactly once, normally on the
    /// completion thread, and gets the buffer back. `fd` must stay open
    /// until then.
    pub fn submit<F>(&self, fd: RawFd, op: BioOp, buf: Vec<u8>, offset: i64, on_done: F)
    where
        F: FnOnce(BioDone) + Send + 'static,
    {
        let op = Operation::new(fd, op, buf, offset, Box::new(on_done));
        let rejected = {
            let _unscheduled = Unscheduled::new(&*self.shared.scheduler);
            self.shared.submit(op)
        };

        // Never reached the kernel: complete here, outside the ring lock.
        if let Some((op, errno)) = rejected {
            let (buf, on_done) = op.into_parts();
            on_done(BioDone::failed(buf, errno));
        }
    }

    /// Number of ring slots.
    pub fn capacity(&self) -> usize {
        self.shared.ring.capacity()
    }

    /// Slots not yet reusable.
    pub fn in_flight(&self) -> usize {
        self.shared.ring.occupied()
    }
}

impl<D: Driver> Shared<D> {
    fn submit(&self, op: Operation) -> Option<(Operation, i32)> {
        let mut ring = self.ring.acquire();
        let (id, cb) = ring.fill(op);

        let mut retries = 0u32;
        let errno = loop {
            match self.driver.submit(&cb) {
                Ok(()) => {
                    log::trace!(
                        "slot {} gen {} submitted: {:?} fd {} len {} off {}",
                        id.index,
                        id.generation,
                        cb.opcode,
                        cb.fd,
                        cb.len,
                        cb.offset
                    );
                    ring.commit();
                    return None;
                }
                Err(e) if is_transient(&e) => {
                    if self.max_submit_retries.is_some_and(|max| retries >= max) {
                        log::warn!("slot {} still refused after {retries} retries", id.index);
                        break libc::EAGAIN;
                    }
                    retries += 1;
                    if retries == 1 {
                        log::debug!("kernel busy, retrying slot {}", id.index);
                    }
                    thread::sleep(self.submit_backoff);
                }
                Err(e) if is_rejection(&e) => {
                    log::debug!("slot {} rejected at submit: {e}", id.index);
                    break e.raw_os_error().unwrap_or(libc::EIO);
                }
                Err(e) => fatal!("submit of slot {} failed: {e}", id.index),
            }
        };

        match ring.abandon() {
            Some(op) => Some((op, errno)),
            None => fatal!("slot {} lost its operation before submission", id.index),
        }
    }

    fn run_completions(&self) {
        scheduled(&*self.scheduler, || {
            if let Err(e) = self.scheduler.register_thread() {
                fatal!("completion thread registration failed: {e}");
            }
        });

        let mut events = vec![RawEvent::default(); self.ring.capacity()];
        loop {
            let n = match self.driver.reap(1, &mut events, self.reap_timeout) {
                Ok(0) => continue,
                Ok(n) => n,
                Err(ref e) if e.raw_os_error() == Some(libc::EINTR) => continue,
                Err(e) => fatal!("reaping completions failed: {e}"),
            };

            scheduled(&*self.scheduler, || {
                for ev in &events[..n] {
                    self.complete(ev);
                }
            });
        }
    }

    fn complete(&self, ev: &RawEvent) {
        let id = SlotId::from_user_data(ev.user_data);
        let op = match self.ring.take(id) {
            Ok(op) => op,
            Err(e) => fatal!("completion {:#x} does not match the ring: {e}", ev.user_data),
        };

        let (fd, kind) = (op.fd, op.kind);
        let (buf, on_done) = op.into_parts();
        let mut done = BioDone::from_raw(buf, ev.res);

        // The flush has to finish before the caller hears the write succeeded.
        if kind.needs_sync() && done.is_ok() {
            if let Err(e) = self.data_sync.sync_data(fd) {
                log::warn!("fdatasync on fd {fd} failed: {e}");
                done = BioDone::failed(done.buf, e.raw_os_error().unwrap_or(libc::EIO));
            }
        }

        log::trace!(
            "slot {} gen {} done: {} bytes, error {}",
            id.index,
            id.generation,
            done.transferred,
            done.error
        );
        if panic::catch_unwind(AssertUnwindSafe(move || on_done(done))).is_err() {
            fatal!("completion callback for slot {} panicked", id.index);
        }

        if let Err(e) = self.ring.release(id) {
            fatal!("releasing slot {} failed: {e}", id.index);
        }
    }
}
