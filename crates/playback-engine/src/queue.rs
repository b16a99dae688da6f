//! Bounded ring buffer shared between pipeline stages.
//!
//! One primitive serves every hand-off in the engine:
//! - reading thread → packet queue (FIFO, expanding, never blocks the producer)
//! - decode thread → frame queue (position-sorted, bounded, blocks the producer)
//! - renderer pulls from the frame queue (non-blocking, optionally deadline-gated)
//!
//! Shutdown is terminal: once destroyed every operation is a no-op returning
//! empty/`None`, and every blocked thread is released.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::frame::Timed;

/// Thread-safe ring buffer of timed items.
///
/// ## Design
/// - Capacity is always a power of two; `head`/`tail` are monotonic and wrap
///   with `mask`.
/// - `sorted` queues keep the live range ascending by [`Timed::position`] using
///   a backward insertion pass.
/// - `expanding` queues double instead of blocking when they fill up.
/// - Non-expanding queues block the writer once full until a reader drains the
///   queue down to half capacity. [`release_writers`](FrameQueue::release_writers)
///   lets writers through a full queue by growing it instead; nothing is dropped.
pub struct FrameQueue<T> {
    inner: Mutex<Ring<T>>,
    readers: Condvar,
    writers: Condvar,
    sorted: bool,
    expanding: bool,
}

struct Ring<T> {
    buffer: Vec<Option<T>>,
    head: usize,
    tail: usize,
    /// Capacity a bounded queue returns to on flush.
    base_capacity: usize,
    /// Writers must not block on a full queue.
    released: bool,
    destroyed: bool,
}

impl<T> Ring<T> {
    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn mask(&self) -> usize {
        self.buffer.len() - 1
    }

    fn count(&self) -> usize {
        self.tail.wrapping_sub(self.head)
    }

    fn slot(&self, index: usize) -> usize {
        index & self.mask()
    }

    fn double_capacity(&mut self) {
        let old_capacity = self.capacity();
        let count = self.count();
        let mut buffer: Vec<Option<T>> = Vec::with_capacity(old_capacity * 2);
        for i in 0..count {
            let slot = self.slot(self.head.wrapping_add(i));
            buffer.push(self.buffer[slot].take());
        }
        buffer.resize_with(old_capacity * 2, || None);
        self.buffer = buffer;
        self.head = 0;
        self.tail = count;
        tracing::debug!(capacity = old_capacity * 2, "frame queue expanded");
    }

    fn clear(&mut self) {
        for slot in self.buffer.iter_mut() {
            *slot = None;
        }
        self.head = 0;
        self.tail = 0;
    }

    fn restore_capacity(&mut self) {
        if self.capacity() > self.base_capacity {
            self.buffer.truncate(self.base_capacity);
            self.buffer.shrink_to_fit();
        }
    }
}

impl<T: Timed> Ring<T> {
    fn insert(&mut self, item: T, sorted: bool) {
        let tail_slot = self.slot(self.tail);
        self.buffer[tail_slot] = Some(item);
        if sorted {
            let mut index = self.tail;
            while index != self.head {
                let prev = self.slot(index.wrapping_sub(1));
                let cur = self.slot(index);
                let out_of_order = match (&self.buffer[prev], &self.buffer[cur]) {
                    (Some(p), Some(c)) => p.position() > c.position(),
                    _ => false,
                };
                if !out_of_order {
                    break;
                }
                self.buffer.swap(prev, cur);
                index = index.wrapping_sub(1);
            }
        }
        self.tail = self.tail.wrapping_add(1);
    }
}

/// Round a requested capacity up to a power of two (minimum 1).
pub fn power_of_two_capacity(requested: usize) -> usize {
    requested.max(1).checked_next_power_of_two().unwrap_or(1 << (usize::BITS - 1))
}

enum Wait {
    No,
    Forever,
    Until(Instant),
}

impl<T: Timed> FrameQueue<T> {
    /// Create a queue holding up to `capacity` items (rounded up to a power of two).
    pub fn new(capacity: usize, sorted: bool, expanding: bool) -> Self {
        let capacity = power_of_two_capacity(capacity);
        let mut buffer = Vec::with_capacity(capacity);
        buffer.resize_with(capacity, || None);
        Self {
            inner: Mutex::new(Ring {
                buffer,
                head: 0,
                tail: 0,
                base_capacity: capacity,
                released: false,
                destroyed: false,
            }),
            readers: Condvar::new(),
            writers: Condvar::new(),
            sorted,
            expanding,
        }
    }

    /// Unsorted queue that doubles instead of blocking; used for packets.
    pub fn packets(capacity: usize) -> Self {
        Self::new(capacity, false, true)
    }

    /// Position-sorted bounded queue; used for decoded frames.
    pub fn frames(capacity: usize) -> Self {
        Self::new(capacity, true, false)
    }

    /// Push an item, blocking while a bounded queue stays full.
    pub fn push(&self, item: T) {
        self.push_if(item, || true);
    }

    /// Push an item only if `keep` still holds once the queue lock is taken.
    ///
    /// `keep` is evaluated under the lock, so a concurrent [`flush`](Self::flush)
    /// ordered before it can invalidate a stale item. Returns whether the item
    /// was inserted.
    pub fn push_if(&self, item: T, keep: impl FnOnce() -> bool) -> bool {
        let mut g = self.inner.lock();
        // A full ring here was left behind by released writers.
        if g.count() >= g.capacity() {
            if !self.expanding {
                self.wait_for_space(&mut g);
            }
            if !g.destroyed && g.count() >= g.capacity() {
                g.double_capacity();
            }
        }
        if g.destroyed || !keep() {
            return false;
        }

        let was_empty = g.count() == 0;
        g.insert(item, self.sorted);
        if was_empty {
            self.readers.notify_one();
        }

        if g.count() >= g.capacity() {
            if self.expanding {
                g.double_capacity();
            } else {
                self.wait_for_space(&mut g);
            }
        }
        true
    }

    fn wait_for_space(&self, g: &mut MutexGuard<'_, Ring<T>>) {
        while g.count() >= g.capacity() && !g.destroyed && !g.released {
            self.writers.wait(g);
        }
    }

    /// Wake blocked writers and stop blocking new ones until
    /// [`resume_writers`](Self::resume_writers). Queued items are kept.
    pub fn release_writers(&self) {
        self.inner.lock().released = true;
        self.writers.notify_all();
    }

    pub fn resume_writers(&self) {
        self.inner.lock().released = false;
    }

    /// Pop the head item.
    ///
    /// With `wait`, blocks while the queue is empty unless it is destroyed.
    /// If `predicate` rejects the head item, returns `None` without consuming it.
    pub fn pop(&self, wait: bool, predicate: Option<&dyn Fn(&T) -> bool>) -> Option<T> {
        let mode = if wait { Wait::Forever } else { Wait::No };
        self.pop_inner(mode, predicate)
    }

    /// Like a waiting [`pop`](Self::pop) but gives up after `timeout`.
    pub fn pop_timeout(
        &self,
        timeout: Duration,
        predicate: Option<&dyn Fn(&T) -> bool>,
    ) -> Option<T> {
        self.pop_inner(Wait::Until(Instant::now() + timeout), predicate)
    }

    fn pop_inner(&self, mode: Wait, predicate: Option<&dyn Fn(&T) -> bool>) -> Option<T> {
        let mut g = self.inner.lock();
        loop {
            if g.destroyed {
                return None;
            }
            if g.count() > 0 {
                break;
            }
            match mode {
                Wait::No => return None,
                Wait::Forever => self.readers.wait(&mut g),
                Wait::Until(deadline) => {
                    if self.readers.wait_until(&mut g, deadline).timed_out() {
                        if g.destroyed || g.count() == 0 {
                            return None;
                        }
                        break;
                    }
                }
            }
        }

        let slot = g.slot(g.head);
        if let (Some(predicate), Some(head)) = (predicate, g.buffer[slot].as_ref()) {
            if !predicate(head) {
                return None;
            }
        }

        let before = g.count();
        let item = g.buffer[slot].take();
        g.head = g.head.wrapping_add(1);
        self.after_consume(&g, before);
        item
    }

    /// Consume items up to and including the first one matching `predicate`.
    ///
    /// Items skipped on the way are discarded. When nothing matches the queue is
    /// left untouched and `None` is returned.
    pub fn search(&self, predicate: impl Fn(&T) -> bool) -> Option<T> {
        let mut g = self.inner.lock();
        if g.destroyed {
            return None;
        }
        let before = g.count();
        let found = (0..before).find(|&offset| {
            let slot = g.slot(g.head.wrapping_add(offset));
            g.buffer[slot].as_ref().is_some_and(&predicate)
        })?;

        for _ in 0..found {
            let slot = g.slot(g.head);
            g.buffer[slot] = None;
            g.head = g.head.wrapping_add(1);
        }
        let slot = g.slot(g.head);
        let item = g.buffer[slot].take();
        g.head = g.head.wrapping_add(1);
        self.after_consume(&g, before);
        item
    }

    fn after_consume(&self, g: &Ring<T>, before: usize) {
        let after = g.count();
        let half = g.capacity() >> 1;
        if before > half && after <= half {
            self.writers.notify_one();
        }
        if after > 0 {
            // Hand remaining items to any other waiting reader.
            self.readers.notify_one();
        }
    }

    /// Drop every queued item and reset indices; the queue stays usable.
    pub fn flush(&self) {
        let mut g = self.inner.lock();
        g.clear();
        if !self.expanding {
            g.restore_capacity();
        }
        drop(g);
        self.writers.notify_all();
    }

    /// Destroy the queue and release every waiter permanently.
    ///
    /// Idempotent and safe to call from any thread.
    pub fn shutdown(&self) {
        let mut g = self.inner.lock();
        g.destroyed = true;
        g.clear();
        drop(g);
        self.readers.notify_all();
        self.writers.notify_all();
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().destroyed
    }

    /// Items currently queued (best-effort snapshot).
    pub fn count(&self) -> usize {
        let g = self.inner.lock();
        if g.destroyed { 0 } else { g.count() }
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Current capacity.
    pub fn max_count(&self) -> usize {
        self.inner.lock().capacity()
    }
}
