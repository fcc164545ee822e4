//! Edge-triggered wake channel.
//!
//! A consumer that finds nothing to do [`arm`](Wake::arm)s the channel,
//! re-checks its condition, and then waits on the returned [`Armed`] guard. A
//! producer calls [`notify`](Wake::notify) after publishing; the call is a
//! fence and an atomic load unless somebody is armed. Because arming happens before
//! the re-check, a notify that races with it is never lost: it bumps the
//! generation the waiter is about to wait past.
//!
//! The mutex and condvar are only created the first time a consumer arms.
use std::{
    sync::{
        Condvar, Mutex, OnceLock, PoisonError,
        atomic::{AtomicUsize, Ordering, fence},
    },
    time::{Duration, Instant},
};

#[derive(Debug, Default)]
struct Channel {
    generation: Mutex<u64>,
    cond: Condvar,
}

#[derive(Debug, Default)]
pub struct Wake {
    channel: OnceLock<Channel>,
    waiters: AtomicUsize,
}

impl Wake {
    pub const fn new() -> Self {
        Self {
            channel: OnceLock::new(),
            waiters: AtomicUsize::new(0),
        }
    }

    /// Registers a waiter. The returned guard disarms when dropped.
    pub fn arm(&self) -> Armed<'_> {
        let channel = self.channel.get_or_init(Channel::default);
        self.waiters.fetch_add(1, Ordering::SeqCst);
        // Pairs with the fence in `notify`: either the caller's re-check sees
        // the published state or the producer sees this waiter.
        fence(Ordering::SeqCst);
        let ticket = *channel
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Armed {
            wake: self,
            channel,
            ticket,
        }
    }

    /// Wakes every armed waiter. Does nothing when none is armed.
    pub fn notify(&self) {
        // Orders the caller's publishing store before the waiter count load.
        fence(Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) == 0 {
            return;
        }
        let Some(channel) = self.channel.get() else {
            return;
        };
        let mut generation = channel
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *generation = generation.wrapping_add(1);
        channel.cond.notify_all();
    }

    #[cfg(test)]
    fn has_waiters(&self) -> bool {
        self.waiters.load(Ordering::SeqCst) > 0
    }
}

/// An armed waiter.
#[derive(Debug)]
pub struct Armed<'a> {
    wake: &'a Wake,
    channel: &'a Channel,
    ticket: u64,
}

impl Armed<'_> {
    /// Blocks until notified or until `timeout` elapses. Returns `true` when
    /// woken by a notify.
    pub fn wait(self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut generation = self
            .channel
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        while *generation == self.ticket {
            let remaining = match deadline {
                Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                    Some(d) if !d.is_zero() => d,
                    _ => return false,
                },
                None => Duration::from_secs(u32::MAX as u64),
            };
            generation = self
                .channel
                .cond
                .wait_timeout(generation, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

impl Drop for Armed<'_> {
    fn drop(&mut self) {
        self.wake.waiters.fetch_sub(1, Ordering::SeqCst);
    }
}
