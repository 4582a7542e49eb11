use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use std::{fmt, io};

use crate::driver::{AioDriver, Driver};
use crate::runtime::bridge::{Bridge, DataSync, Fdatasync};
use crate::runtime::scheduler::{NoopScheduler, Scheduler};

// ===== basic builder structure definition =====

/// Bridge builder
pub struct BridgeBuilder<D = AioDriver> {
    // ring slots, also the kernel context size
    pub(crate) capacity: u32,

    // pause between submissions refused with EAGAIN
    pub(crate) submit_backoff: Duration,

    // None retries forever
    pub(crate) max_submit_retries: Option<u32>,

    // None blocks the completion thread in the kernel indefinitely
    pub(crate) reap_timeout: Option<Duration>,

    pub(crate) thread_name: String,

    pub(crate) scheduler: Arc<dyn Scheduler>,

    pub(crate) data_sync: Arc<dyn DataSync>,

    // driver mark
    _mark: PhantomData<D>,
}

impl<D> Default for BridgeBuilder<D> {
    fn default() -> Self {
        BridgeBuilder::<D>::new()
    }
}

impl<D> fmt::Debug for BridgeBuilder<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeBuilder")
            .field("capacity", &self.capacity)
            .field("submit_backoff", &self.submit_backoff)
            .field("max_submit_retries", &self.max_submit_retries)
            .field("reap_timeout", &self.reap_timeout)
            .field("thread_name", &self.thread_name)
            .finish_non_exhaustive()
    }
}

impl<D> BridgeBuilder<D> {
    const DEFAULT_CAPACITY: u32 = 32;
    const MIN_CAPACITY: u32 = 2;
    const DEFAULT_BACKOFF: Duration = Duration::from_micros(1);

    #[must_use]
    pub fn new() -> Self {
        Self {
            capacity: Self::DEFAULT_CAPACITY,
            submit_backoff: Self::DEFAULT_BACKOFF,
            max_submit_retries: None,
            reap_timeout: None,
            thread_name: "bio-completion".to_owned(),
            scheduler: Arc::new(NoopScheduler),
            data_sync: Arc::new(Fdatasync),
            _mark: PhantomData,
        }
    }

    /// Set the number of ring slots, min size is 2 and the default size is 32.
    /// One slot always stays free, so `capacity - 1` requests can be in
    /// flight at once.
    #[must_use]
    pub fn with_capacity(mut self, capacity: u32) -> Self {
        // If capacity is less than 2, it will be 2.
        self.capacity = capacity.max(Self::MIN_CAPACITY);
        self
    }

    /// Pause between attempts when the kernel answers a submission with
    /// `EAGAIN`.
    #[must_use]
    pub fn submit_backoff(mut self, backoff: Duration) -> Self {
        self.submit_backoff = backoff;
        self
    }

    /// Give up after `retries` refused attempts and complete the request with
    /// `EAGAIN`. Unlimited by default.
    ///
    /// Rejected by `build` for drivers that cannot withdraw a refused
    /// submission (see [`Driver::CAN_WITHDRAW`]).
    #[must_use]
    pub fn max_submit_retries(mut self, retries: u32) -> Self {
        self.max_submit_retries = Some(retries);
        self
    }

    /// Bound each reap call. The completion thread simply reaps again when it
    /// times out.
    #[must_use]
    pub fn reap_timeout(mut self, timeout: Duration) -> Self {
        self.reap_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Install the hosting runtime's scheduling hooks.
    #[must_use]
    pub fn scheduler(mut self, scheduler: impl Scheduler) -> Self {
        self.scheduler = Arc::new(scheduler);
        self
    }

    /// Replace the flush primitive run before write+sync completions.
    #[must_use]
    pub fn data_sync(mut self, data_sync: impl DataSync) -> Self {
        self.data_sync = Arc::new(data_sync);
        self
    }

    /// Switch the kernel facility.
    #[must_use]
    pub fn driver<T>(self) -> BridgeBuilder<T> {
        BridgeBuilder {
            capacity: self.capacity,
            submit_backoff: self.submit_backoff,
            max_submit_retries: self.max_submit_retries,
            reap_timeout: self.reap_timeout,
            thread_name: self.thread_name,
            scheduler: self.scheduler,
            data_sync: self.data_sync,
            _mark: PhantomData,
        }
    }
}

// ===== builder impl =====

impl<D: Driver> BridgeBuilder<D> {
    /// Create the kernel context and start the completion thread.
    pub fn build(self) -> io::Result<Bridge<D>> {
        self.check()?;
        let driver = D::setup(self.capacity)?;
        self.build_with_driver(driver)
    }

    /// Build around an already created context.
    pub fn build_with_driver(self, driver: D) -> io::Result<Bridge<D>> {
        self.check()?;
        Bridge::start(self, driver)
    }

    fn check(&self) -> io::Result<()> {
        // A refused entry the driver cannot take back would still run after
        // its callback reported EAGAIN.
        if self.max_submit_retries.is_some() && !D::CAN_WITHDRAW {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "driver cannot withdraw refused submissions, retry limit unsupported",
            ));
        }
        Ok(())
    }
}
