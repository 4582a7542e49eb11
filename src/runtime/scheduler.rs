//! Hooks into the hosting runtime's scheduler.

use std::io;

/// What [`Scheduler::yield_context`] gave up, to be handed back to
/// [`Scheduler::resume_context`]. For a rump-style kernel this is the number
/// of kernel locks the thread held.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ContextToken(pub usize);

/// The calling runtime's scheduling capability.
///
/// Every blocking wait in the bridge is bracketed by a yield/resume pair so
/// the runtime can keep running other work on its virtual CPUs.
pub trait Scheduler: Send + Sync + 'static {
    /// Release the current thread's scheduling context.
    fn yield_context(&self) -> ContextToken;

    /// Re-acquire a scheduling context.
    fn resume_context(&self, token: ContextToken);

    /// Called once on the completion thread, while it holds a scheduling
    /// context, so the runtime can attach its per-thread state.
    fn register_thread(&self) -> io::Result<()> {
        Ok(())
    }
}

/// For callers without a cooperative runtime above them.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScheduler;

impl Scheduler for NoopScheduler {
    #[inline]
    fn yield_context(&self) -> ContextToken {
        ContextToken::default()
    }

    #[inline]
    fn resume_context(&self, _token: ContextToken) {}
}

/// Holds a yielded scheduling context and resumes it on drop.
pub(crate) struct Unscheduled<'a> {
    sched: &'a dyn Scheduler,
    token: ContextToken,
}

impl<'a> Unscheduled<'a> {
    pub(crate) fn new(sched: &'a dyn Scheduler) -> Self {
        let token = sched.yield_context();
        Self { sched, token }
    }
}

impl Drop for Unscheduled<'_> {
    fn drop(&mut self) {
        self.sched.resume_context(self.token);
    }
}

/// Run `f` while holding a scheduling context.
pub(crate) fn scheduled<R>(sched: &dyn Scheduler, f: impl FnOnce() -> R) -> R {
    sched.resume_context(ContextToken::default());
    let r = f();
    let _ = sched.yield_context();
    r
}
