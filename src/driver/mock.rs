//! Scriptable in-memory driver for exercising the bridge without a kernel.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::driver::{ControlBlock, Driver, RawEvent};

type Outcome = Box<dyn Fn(&ControlBlock) -> i64 + Send>;

struct State {
    // Completions the reaper may pick up.
    ready: VecDeque<RawEvent>,
    // Completions withheld until `release` is called.
    held: VecDeque<RawEvent>,
    hold: bool,
    eagain: usize,
    submit_error: Option<i32>,
    submitted: Vec<ControlBlock>,
    attempts: usize,
    outcome: Outcome,
}

struct Inner {
    state: Mutex<State>,
    cv: Condvar,
}

#[derive(Clone)]
pub(crate) struct MockDriver {
    inner: Arc<Inner>,
}

impl MockDriver {
    /// Every op completes with its full length as soon as it is submitted.
    pub(crate) fn new() -> MockDriver {
        MockDriver {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    ready: VecDeque::new(),
                    held: VecDeque::new(),
                    hold: false,
                    eagain: 0,
                    submit_error: None,
                    submitted: Vec::new(),
                    attempts: 0,
                    outcome: Box::new(|cb| cb.len as i64),
                }),
                cv: Condvar::new(),
            }),
        }
    }

    pub(crate) fn with_outcome(self, f: impl Fn(&ControlBlock) -> i64 + Send + 'static) -> Self {
        self.inner.state.lock().outcome = Box::new(f);
        self
    }

    /// Keep completions back until [`MockDriver::release`].
    pub(crate) fn holding(self) -> Self {
        self.inner.state.lock().hold = true;
        self
    }

    /// Fail the next `n` submissions with `EAGAIN`.
    pub(crate) fn with_eagain(self, n: usize) -> Self {
        self.inner.state.lock().eagain = n;
        self
    }

    /// Fail every submission with `errno`.
    pub(crate) fn with_submit_error(self, errno: i32) -> Self {
        self.inner.state.lock().submit_error = Some(errno);
        self
    }

    /// Let up to `n` withheld completions through, oldest first.
    pub(crate) fn release(&self, n: usize) {
        let mut state = self.inner.state.lock();
        for _ in 0..n {
            match state.held.pop_front() {
                Some(ev) => state.ready.push_back(ev),
                None => break,
            }
        }
        self.inner.cv.notify_all();
    }

    /// Let every withheld completion through, newest first.
    pub(crate) fn release_reversed(&self) {
        let mut state = self.inner.state.lock();
        while let Some(ev) = state.held.pop_back() {
            state.ready.push_back(ev);
        }
        self.inner.cv.notify_all();
    }

    pub(crate) fn held(&self) -> usize {
        self.inner.state.lock().held.len()
    }

    pub(crate) fn submitted(&self) -> Vec<ControlBlock> {
        self.inner.state.lock().submitted.clone()
    }

    pub(crate) fn attempts(&self) -> usize {
        self.inner.state.lock().attempts
    }
}

impl Driver for MockDriver {
    fn setup(_capacity: u32) -> io::Result<MockDriver> {
        Ok(MockDriver::new())
    }

    fn submit(&self, cb: &ControlBlock) -> io::Result<()> {
        let mut state = self.inner.state.lock();
        state.attempts += 1;
        if let Some(errno) = state.submit_error {
            return Err(io::Error::from_raw_os_error(errno));
        }
        if state.eagain > 0 {
            state.eagain -= 1;
            return Err(io::Error::from_raw_os_error(libc::EAGAIN));
        }
        state.submitted.push(*cb);
        let ev = RawEvent {
            user_data: cb.user_data,
            res: (state.outcome)(cb),
        };
        if state.hold {
            state.held.push_back(ev);
        } else {
            state.ready.push_back(ev);
            self.inner.cv.notify_all();
        }
        Ok(())
    }

    fn reap(
        &self,
        min: usize,
        events: &mut [RawEvent],
        timeout: Option<Duration>,
    ) -> io::Result<usize> {
        let mut state = self.inner.state.lock();
        while state.ready.len() < min {
            match timeout {
                Some(t) => {
                    if self.inner.cv.wait_for(&mut state, t).timed_out() {
                        break;
                    }
                }
                None => self.inner.cv.wait(&mut state),
            }
        }
        let mut n = 0;
        for slot in events.iter_mut() {
            match state.ready.pop_front() {
                Some(ev) => {
                    *slot = ev;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn destroy(self) -> io::Result<()> {
        Ok(())
    }
}
