//! Fixed-capacity ring of operation slots.
//!
//! `head` is the next slot to fill and `tail` the oldest slot whose
//! completion has not been fully processed. One slot is always left empty so
//! `head == tail` means empty and `head + 1 == tail` means full. Completions
//! may arrive out of order: a finished slot in the middle of the ring is
//! marked vacant, and `tail` only moves over a run of vacant slots.

use std::error::Error;
use std::fmt;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::driver::op::Operation;
use crate::driver::ControlBlock;

/// Identity of one occupancy of one slot. Travels through the kernel as the
/// control block's `user_data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SlotId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl SlotId {
    #[inline]
    pub(crate) fn to_user_data(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    #[inline]
    pub(crate) fn from_user_data(data: u64) -> SlotId {
        SlotId {
            index: data as u32,
            generation: (data >> 32) as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
    Vacant,
    InFlight,
    /// Reaped; the callback is running.
    Completing,
}

/// A completion that does not match the ring's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SlotError {
    OutOfBounds {
        index: u32,
        capacity: usize,
    },
    StaleGeneration {
        index: u32,
        expected: u32,
        found: u32,
    },
    UnexpectedState {
        index: u32,
        state: &'static str,
    },
}

impl fmt::Display for SlotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotError::OutOfBounds { index, capacity } => {
                write!(f, "slot {index} out of bounds for ring of {capacity}")
            }
            SlotError::StaleGeneration {
                index,
                expected,
                found,
            } => write!(
                f,
                "slot {index} completion for generation {found}, occupant is generation {expected}"
            ),
            SlotError::UnexpectedState { index, state } => {
                write!(f, "slot {index} completed while {state}")
            }
        }
    }
}

impl Error for SlotError {}

struct Slot {
    generation: u32,
    state: SlotState,
    op: Option<Operation>,
}

struct RingState {
    head: usize,
    tail: usize,
    slots: Box<[Slot]>,
}

impl RingState {
    #[inline]
    fn is_full(&self) -> bool {
        (self.head + 1) % self.slots.len() == self.tail
    }

    fn slot(&mut self, id: SlotId) -> Result<&mut Slot, SlotError> {
        let capacity = self.slots.len();
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .ok_or(SlotError::OutOfBounds {
                index: id.index,
                capacity,
            })?;
        if slot.generation != id.generation {
            return Err(SlotError::StaleGeneration {
                index: id.index,
                expected: slot.generation,
                found: id.generation,
            });
        }
        Ok(slot)
    }

    fn expect_state(slot: &Slot, index: u32, want: SlotState) -> Result<(), SlotError> {
        if slot.state == want {
            Ok(())
        } else {
            Err(SlotError::UnexpectedState {
                index,
                state: match slot.state {
                    SlotState::Vacant => "vacant",
                    SlotState::InFlight => "in flight",
                    SlotState::Completing => "completing",
                },
            })
        }
    }
}

pub(crate) struct SlotRing {
    state: Mutex<RingState>,
    not_full: Condvar,
}

impl SlotRing {
    pub(crate) fn new(capacity: usize) -> SlotRing {
        assert!(capacity >= 2, "ring needs at least two slots");
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                state: SlotState::Vacant,
                op: None,
            })
            .collect();
        SlotRing {
            state: Mutex::new(RingState {
                head: 0,
                tail: 0,
                slots,
            }),
            not_full: Condvar::new(),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Slots between `tail` and `head`: in flight, completing, or finished
    /// but still behind an older pending slot.
    pub(crate) fn occupied(&self) -> usize {
        let state = self.state.lock();
        let cap = state.slots.len();
        (state.head + cap - state.tail) % cap
    }

    /// Lock the ring, waiting until the slot at `head` may be filled.
    pub(crate) fn acquire(&self) -> RingGuard<'_> {
        let mut state = self.state.lock();
        while state.is_full() {
            log::trace!("slot ring full, waiting for a completion");
            self.not_full.wait(&mut state);
        }
        RingGuard { state }
    }

    /// Hand a reaped operation to the completion thread.
    pub(crate) fn take(&self, id: SlotId) -> Result<Operation, SlotError> {
        let mut state = self.state.lock();
        let slot = state.slot(id)?;
        RingState::expect_state(slot, id.index, SlotState::InFlight)?;
        let op = slot.op.take().ok_or(SlotError::UnexpectedState {
            index: id.index,
            state: "empty",
        })?;
        slot.state = SlotState::Completing;
        Ok(op)
    }

    /// Free a slot whose callback has returned and wake blocked submitters.
    pub(crate) fn release(&self, id: SlotId) -> Result<(), SlotError> {
        let mut state = self.state.lock();
        let slot = state.slot(id)?;
        RingState::expect_state(slot, id.index, SlotState::Completing)?;
        slot.state = SlotState::Vacant;

        let cap = state.slots.len();
        while state.tail != state.head && state.slots[state.tail].state == SlotState::Vacant {
            state.tail = (state.tail + 1) % cap;
        }
        drop(state);
        self.not_full.notify_all();
        Ok(())
    }
}

/// The locked ring with a free slot at `head`.
pub(crate) struct RingGuard<'a> {
    state: MutexGuard<'a, RingState>,
}

impl RingGuard<'_> {
    /// Place `op` in the head slot under a fresh generation and build its
    /// control block.
    pub(crate) fn fill(&mut self, mut op: Operation) -> (SlotId, ControlBlock) {
        let index = self.state.head;
        let slot = &mut self.state.slots[index];
        debug_assert_eq!(slot.state, SlotState::Vacant);
        debug_assert!(slot.op.is_none());

        slot.generation = slot.generation.wrapping_add(1);
        let id = SlotId {
            index: index as u32,
            generation: slot.generation,
        };
        let cb = *op.prepare(id.to_user_data());
        slot.op = Some(op);
        slot.state = SlotState::InFlight;
        (id, cb)
    }

    /// The kernel accepted the head slot.
    pub(crate) fn commit(mut self) {
        let cap = self.state.slots.len();
        self.state.head = (self.state.head + 1) % cap;
    }

    /// The kernel never saw the head slot; take the operation back.
    pub(crate) fn abandon(mut self) -> Option<Operation> {
        let head = self.state.head;
        let slot = &mut self.state.slots[head];
        slot.state = SlotState::Vacant;
        slot.op.take()
    }
}
