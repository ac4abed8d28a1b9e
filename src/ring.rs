//! Lock-free single-producer / single-consumer byte ring.
//!
//! One context pushes, one context pops; neither ever blocks. The ring
//! holds `N - 1` bytes: a slot is kept empty so that `head == tail` always
//! means empty and `tail + 1 == head` always means full.
//!
//! The ring is split into a [`Producer`] and a [`Consumer`] half. Only the
//! producer writes `tail` and only the consumer writes `head`, which is
//! what lets an interrupt handler and thread-mode code share it without a
//! lock. Typical use is from a `static`:
//!
//! ```ignore
//! static RX: StaticCell<RingBuffer<RING_BUFFER_LENGTH>> = StaticCell::new();
//! let (producer, consumer) = RX.init(RingBuffer::new()).split();
//! ```

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Dropped;

/// Fixed-capacity byte FIFO shared by exactly one producer and one consumer.
pub struct RingBuffer<const N: usize> {
    buffer: UnsafeCell<[u8; N]>,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// SAFETY: the producer only writes the slot at `tail` and the consumer only
// reads slots in `head..tail`, so the two halves never touch the same byte.
// Index publication goes through Release/Acquire pairs.
unsafe impl<const N: usize> Sync for RingBuffer<N> {}

impl<const N: usize> RingBuffer<N> {
    pub const fn new() -> Self {
        assert!(N >= 2, "ring needs at least one usable slot");
        Self {
            buffer: UnsafeCell::new([0; N]),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Number of bytes the ring can hold.
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    pub fn is_full(&self) -> bool {
        next(self.tail.load(Ordering::Acquire), N) == self.head.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    /// Bytes currently queued.
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (tail + N - head) % N
    }

    /// Hand out the two halves. Taking `&mut self` guarantees there is
    /// never more than one of each.
    pub fn split(&mut self) -> (Producer<'_, N>, Consumer<'_, N>) {
        let ring = &*self;
        (Producer { ring }, Consumer { ring })
    }

    fn slot(&self, index: usize) -> *mut u8 {
        // In bounds: every index is reduced modulo N.
        unsafe { (self.buffer.get() as *mut u8).add(index) }
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn next(index: usize, n: usize) -> usize {
    if index + 1 == n {
        0
    } else {
        index + 1
    }
}

/// Writing half of a [`RingBuffer`].
pub struct Producer<'a, const N: usize> {
    ring: &'a RingBuffer<N>,
}

impl<'a, const N: usize> Producer<'a, N> {
    pub fn is_full(&self) -> bool {
        self.ring.is_full()
    }

    /// Free slots left.
    pub fn free(&self) -> usize {
        self.ring.capacity() - self.ring.len()
    }

    /// Append one byte.
    ///
    /// The caller must check [`is_full`](Self::is_full) first. Pushing into a
    /// full ring advances `tail` onto `head`, and the ring then reads as
    /// empty: every queued byte is lost.
    pub fn push(&mut self, byte: u8) {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        // SAFETY: the consumer never reads the slot at `tail`.
        unsafe { self.ring.slot(tail).write(byte) };
        self.ring.tail.store(next(tail, N), Ordering::Release);
    }

    /// Append one byte, or hand it back when the ring is full.
    pub fn try_push(&mut self, byte: u8) -> Result<(), u8> {
        if self.is_full() {
            return Err(byte);
        }
        self.push(byte);
        Ok(())
    }

    /// Append as much of `bytes` as fits, stopping at the first byte that
    /// would overflow.
    pub fn push_slice(&mut self, bytes: &[u8]) -> Result<(), Dropped> {
        for (kept, &b) in bytes.iter().enumerate() {
            if self.is_full() {
                return Err(Dropped {
                    kept,
                    lost: bytes.len() - kept,
                });
            }
            self.push(b);
        }
        Ok(())
    }
}

/// Reading half of a [`RingBuffer`].
pub struct Consumer<'a, const N: usize> {
    ring: &'a RingBuffer<N>,
}

impl<'a, const N: usize> Consumer<'a, N> {
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Remove the oldest byte.
    ///
    /// The caller must check [`is_empty`](Self::is_empty) first. Popping an
    /// empty ring returns a stale byte and leaves the ring reading as full.
    pub fn pop(&mut self) -> u8 {
        let head = self.ring.head.load(Ordering::Relaxed);
        // SAFETY: the producer never writes the slot at `head` while it is
        // inside the occupied range.
        let byte = unsafe { self.ring.slot(head).read() };
        self.ring.head.store(next(head, N), Ordering::Release);
        byte
    }

    pub fn try_pop(&mut self) -> Option<u8> {
        if self.is_empty() {
            None
        } else {
            Some(self.pop())
        }
    }

    /// Copy up to `out.len()` of the oldest bytes without consuming them.
    pub fn peek_into(&self, out: &mut [u8]) -> usize {
        let mut index = self.ring.head.load(Ordering::Relaxed);
        let count = out.len().min(self.len());
        for dst in &mut out[..count] {
            // SAFETY: every index visited lies inside the occupied range.
            *dst = unsafe { self.ring.slot(index).read() };
            index = next(index, N);
        }
        count
    }

    /// Drop up to `count` of the oldest bytes.
    pub fn discard(&mut self, count: usize) {
        let count = count.min(self.len());
        let head = self.ring.head.load(Ordering::Relaxed);
        self.ring.head.store((head + count) % N, Ordering::Release);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests
// ═══════════════════════════════════════════════════════════════════════════
