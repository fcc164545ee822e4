//! Fixed-size ring of pending queries for correlated mode.
//!
//! # Overview
//!
//! Three monotonic sequence numbers walk the ring; a slot is the sequence
//! modulo the ring size.
//!
//! - `tail`: next slot a submitter fills. Owned by the client's writer lock.
//! - `on_deck`: oldest query still waiting for a response. Written only by
//!   the receive thread.
//! - `head`: next resolved slot a drainer hands back. Guarded by its own
//!   lock.
//!
//! So `head <= on_deck <= tail`, `tail - on_deck` queries are in flight and
//! `on_deck - head` responses are ready to collect.
//!
//! Each slot moves through `CLEAR -> SENT -> READY -> TAKEN -> CLEAR`. The
//! state is an atomic published with release ordering so a slot's contents
//! are visible to whichever thread observes the new state.
use std::{
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, trace};

use crate::wire::Message;

use super::{
    queue::{BACKOFF, remaining},
    wake::Wake,
};

/// Callback run with the correlation id and the response of one query.
pub type QueryCallback = Box<dyn FnOnce(u64, Message) + Send>;

pub(crate) const CLEAR: u8 = 0;
pub(crate) const SENT: u8 = 1;
pub(crate) const READY: u8 = 2;
pub(crate) const TAKEN: u8 = 3;

#[derive(Default)]
struct SlotData {
    callback: Option<QueryCallback>,
    submitted: Option<Instant>,
    response: Option<Message>,
}

struct Slot {
    state: AtomicU8,
    id: AtomicU64,
    data: Mutex<SlotData>,
}

impl Slot {
    fn data(&self) -> MutexGuard<'_, SlotData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// What the receive thread did with one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Correlation {
    /// Matched; `lost` earlier queries were resolved as lost first.
    Resolved { lost: usize },
    /// No in-flight query carries the id.
    NotFound,
    /// The matching slot had already been answered.
    TooMany,
}

/// A resolved query handed to a drainer.
pub(crate) struct Completion {
    pub seq: u64,
    pub id: u64,
    pub callback: Option<QueryCallback>,
    pub response: Message,
}

pub(crate) struct Ring {
    slots: Box<[Slot]>,
    tail: AtomicU64,
    on_deck: AtomicU64,
    head: Mutex<u64>,
    head_seq: AtomicU64,
    wake: Wake,
}

impl Ring {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            slots: (0..size)
                .map(|_| Slot {
                    state: AtomicU8::new(CLEAR),
                    id: AtomicU64::new(0),
                    data: Mutex::new(SlotData::default()),
                })
                .collect(),
            tail: AtomicU64::new(0),
            on_deck: AtomicU64::new(0),
            head: Mutex::new(0),
            head_seq: AtomicU64::new(0),
            wake: Wake::new(),
        }
    }

    fn slot(&self, seq: u64) -> &Slot {
        &self.slots[(seq % self.slots.len() as u64) as usize]
    }

    /// Whether the slot for `seq` can take a new query.
    pub fn is_free(&self, seq: u64) -> bool {
        self.slot(seq).state.load(Ordering::Acquire) == CLEAR
    }

    /// Waits for the slot for `seq` to come free. A zero timeout checks
    /// once.
    pub fn wait_free(&self, seq: u64, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if self.is_free(seq) {
                return true;
            }
            let Some(remaining) = remaining(deadline) else {
                return false;
            };
            thread::sleep(BACKOFF.min(remaining));
        }
    }

    /// Fills the slot for `seq` and publishes it as in flight. Caller holds
    /// the writer lock and has checked the slot is free.
    pub fn submit(&self, seq: u64, id: u64, callback: Option<QueryCallback>) {
        let slot = self.slot(seq);
        {
            let mut data = slot.data();
            data.callback = callback;
            data.submitted = Some(Instant::now());
            data.response = None;
        }
        slot.id.store(id, Ordering::Relaxed);
        slot.state.store(SENT, Ordering::Release);
        self.tail.store(seq + 1, Ordering::Release);
    }

    /// Matches a response against the in-flight queries. Receive thread
    /// only.
    pub fn correlate(&self, response: Message) -> Correlation {
        let id = response.id();
        let on_deck = self.on_deck.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        let Some(found) = (on_deck..tail).find(|seq| self.slot(*seq).id.load(Ordering::Relaxed) == id)
        else {
            debug!("response {id} matches no pending query");
            return Correlation::NotFound;
        };
        if self.slot(found).state.load(Ordering::Acquire) != SENT {
            debug!("response {id} arrived for a query already answered");
            return Correlation::TooMany;
        }

        let mut lost = 0;
        for seq in on_deck..found {
            let slot = self.slot(seq);
            if slot.state.load(Ordering::Acquire) == SENT {
                let skipped = slot.id.load(Ordering::Relaxed);
                debug!("query {skipped} skipped by the server, resolving as lost");
                self.resolve(slot, Message::lost(skipped));
                lost += 1;
            }
        }
        self.resolve(self.slot(found), response);
        self.on_deck.store(found + 1, Ordering::Release);
        self.wake.notify();

        Correlation::Resolved { lost }
    }

    fn resolve(&self, slot: &Slot, response: Message) {
        {
            let mut data = slot.data();
            if let Some(submitted) = data.submitted {
                trace!(
                    "query {} answered after {:?}",
                    response.id(),
                    submitted.elapsed()
                );
            }
            data.response = Some(response);
        }
        slot.state.store(READY, Ordering::Release);
    }

    /// Takes the next resolved query in submission order, waiting up to
    /// `wait` for one. `blocking` selects sleeping on the wake channel over
    /// polling.
    pub fn take(&self, wait: Duration, blocking: bool) -> Option<Completion> {
        let mut head = self.head.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = *head;
        let slot = self.slot(seq);
        let deadline = Instant::now().checked_add(wait);

        while slot.state.load(Ordering::Acquire) != READY {
            let remaining = remaining(deadline)?;
            if blocking {
                let armed = self.wake.arm();
                if slot.state.load(Ordering::Acquire) == READY {
                    break;
                }
                armed.wait(remaining);
            } else {
                thread::sleep(BACKOFF.min(remaining));
            }
        }

        slot.state.store(TAKEN, Ordering::Release);
        let id = slot.id.load(Ordering::Relaxed);
        let (callback, response) = {
            let mut data = slot.data();
            (data.callback.take(), data.response.take())
        };
        *head = seq + 1;
        self.head_seq.store(seq + 1, Ordering::Release);
        drop(head);

        Some(Completion {
            seq,
            id,
            callback,
            response: response.unwrap_or_else(|| Message::lost(id)),
        })
    }

    /// Returns a taken slot to the free pool once its callback has run.
    pub fn release(&self, seq: u64) {
        let slot = self.slot(seq);
        *slot.data() = SlotData::default();
        slot.state.store(CLEAR, Ordering::Release);
    }

    pub fn pending(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        tail.saturating_sub(self.on_deck.load(Ordering::Acquire)) as usize
    }

    pub fn ready(&self) -> usize {
        let on_deck = self.on_deck.load(Ordering::Acquire);
        on_deck.saturating_sub(self.head_seq.load(Ordering::Acquire)) as usize
    }
}
