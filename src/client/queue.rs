//! Single-producer completion queue for streaming mode.
//!
//! The receive thread is the only producer. Any number of threads may pop;
//! they are serialized by a pop lock. Head and tail are monotonic counters,
//! the slot is the counter modulo capacity, so `tail - head` is the fill
//! level without a separate count.
use std::{
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use log::trace;

use crate::wire::Message;

use super::wake::Wake;

/// Smallest capacity a queue is created with.
pub const MIN_CAPACITY: usize = 4;

/// Sleep between polls while waiting on the other side.
pub(crate) const BACKOFF: Duration = Duration::from_micros(100);

#[derive(Debug)]
pub struct CompletionQueue {
    slots: Box<[Mutex<Option<Message>>]>,
    head: AtomicUsize,
    tail: AtomicUsize,
    pop_lock: Mutex<()>,
    wake: Wake,
    closed: AtomicBool,
}

impl CompletionQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY);
        Self {
            slots: (0..capacity).map(|_| Mutex::new(None)).collect(),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            pop_lock: Mutex::new(()),
            wake: Wake::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Appends a message, waiting for room while the queue is full. Only the
    /// single producer may call this.
    ///
    /// Returns `false`, dropping the message, if the queue is closed while
    /// waiting.
    pub fn push(&self, msg: Message) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        while tail - self.head.load(Ordering::Acquire) >= self.slots.len() {
            if self.closed.load(Ordering::Acquire) {
                trace!("queue closed, dropping message {}", msg.id());
                return false;
            }
            thread::sleep(BACKOFF);
        }

        *self.slot(tail) = Some(msg);
        self.tail.store(tail + 1, Ordering::Release);
        self.wake.notify();
        true
    }

    /// Removes the oldest message, polling until one arrives or `timeout`
    /// elapses. A zero timeout checks once.
    pub fn pop(&self, timeout: Duration) -> Option<Message> {
        let _guard = self.pop_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let deadline = Instant::now().checked_add(timeout);

        loop {
            if let Some(msg) = self.try_pop() {
                return Some(msg);
            }
            let remaining = remaining(deadline)?;
            thread::sleep(BACKOFF.min(remaining));
        }
    }

    /// Like [`pop`](Self::pop) but sleeps on the wake channel instead of
    /// polling.
    pub fn pop_blocking(&self, timeout: Duration) -> Option<Message> {
        let _guard = self.pop_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let deadline = Instant::now().checked_add(timeout);

        loop {
            if let Some(msg) = self.try_pop() {
                return Some(msg);
            }
            let remaining = remaining(deadline)?;
            let armed = self.wake.arm();
            if let Some(msg) = self.try_pop() {
                return Some(msg);
            }
            armed.wait(remaining);
        }
    }

    /// Caller must hold the pop lock.
    fn try_pop(&self) -> Option<Message> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }
        let msg = self.slot(head).take();
        self.head.store(head + 1, Ordering::Release);
        msg
    }

    /// Releases a producer blocked on a full queue.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Advisory while other threads are active.
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        tail.saturating_sub(self.head.load(Ordering::Acquire))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, seq: usize) -> std::sync::MutexGuard<'_, Option<Message>> {
        self.slots[seq % self.slots.len()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Time left before `deadline`, or `None` once it has passed. A deadline too
/// far out to represent never passes.
pub(crate) fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    match deadline {
        Some(deadline) => deadline
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero()),
        None => Some(Duration::from_secs(u32::MAX as u64)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn msg(id: u64) -> Message {
        let mut msg = Message::lost(0);
        msg.set_id(id);
        msg
    }

    #[test]
    fn fifo_order() {
        let queue = CompletionQueue::new(8);
        for id in 1..=5 {
            assert!(queue.push(msg(id)));
        }
        assert_eq!(queue.len(), 5);

        for id in 1..=5 {
            assert_eq!(queue.pop(Duration::ZERO).unwrap().id(), id);
        }
        assert!(queue.is_empty());
        assert!(queue.pop(Duration::ZERO).is_none());
    }

    #[test]
    fn capacity_has_a_floor() {
        assert_eq!(CompletionQueue::new(0).capacity(), MIN_CAPACITY);
        assert_eq!(CompletionQueue::new(100).capacity(), 100);
    }

    #[test]
    fn pop_times_out() {
        let queue = CompletionQueue::new(4);
        let start = Instant::now();
        assert!(queue.pop(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(queue.pop_blocking(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn full_queue_waits_for_consumer() {
        let queue = Arc::new(CompletionQueue::new(4));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for id in 0..100 {
                    assert!(queue.push(msg(id)));
                }
            })
        };

        for id in 0..100 {
            let got = queue.pop_blocking(Duration::from_secs(5)).unwrap();
            assert_eq!(got.id(), id);
        }
        producer.join().unwrap();
    }

    #[test]
    fn close_releases_blocked_producer() {
        let queue = Arc::new(CompletionQueue::new(4));
        for id in 0..4 {
            queue.push(msg(id));
        }
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(msg(99)))
        };

        thread::sleep(Duration::from_millis(10));
        queue.close();
        assert!(!producer.join().unwrap());
        assert_eq!(queue.len(), 4);
    }
}
