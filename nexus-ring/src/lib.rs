//! # nexus-ring
//!
//! Single-producer single-consumer (SPSC) ring buffer of `char`s, built for
//! moving decoded text from a background reader thread to a consumer with
//! no locks on the hot path.
//!
//! The ring is a fixed, power-of-two sized array indexed by two monotonically
//! increasing counters:
//!
//! - `tail` - characters produced so far, written only by the [`Producer`]
//! - `head` - characters consumed so far, written only by the [`Consumer`]
//!
//! The physical slot of a counter value is `counter & (capacity - 1)`.
//!
//! # Example
//!
//! ```
//! let (mut producer, mut consumer) = nexus_ring::ring_buffer(64);
//!
//! let text: Vec<char> = "hello".chars().collect();
//! assert_eq!(producer.write_from(&text), 5);
//!
//! let mut out = ['\0'; 8];
//! assert_eq!(consumer.read_into(&mut out), 5);
//! assert_eq!(&out[..5], &text[..]);
//! assert_eq!(consumer.pop(), None);
//! ```
//!
//! # Performance Notes
//!
//! Each side keeps a cached copy of the other side's counter and only
//! reloads the shared atomic when its local view says it must stop (the
//! ring looks full to the producer, or empty to the consumer). Counters are
//! published with `Release` and observed with `Acquire`, so a consumer that
//! observes `tail == n` also observes every character written to slots
//! below `n`.
//!
//! # Memory Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Cache line(s) 0: tail        (producer hot)  │
//! ├──────────────────────────────────────────────┤
//! │ Cache line(s) 1: buffer ptr, mask, padding   │
//! ├──────────────────────────────────────────────┤
//! │ Cache line(s) 2: head        (consumer hot)  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Tail Padding
//!
//! Rings larger than [`PADDING_THRESHOLD`] elements hold back
//! [`CACHE_LINE_ELEMENTS`] slots of slack: the producer never lets
//! `tail - head` exceed `capacity - tail_padding`. Smaller rings use the
//! full capacity.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

use std::fmt;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

/// Slack reserved at the producer side of large rings, in elements.
pub const CACHE_LINE_ELEMENTS: usize = 64;

/// Rings with a capacity at or below this many elements carry no tail padding.
pub const PADDING_THRESHOLD: usize = 1024;

/// Returns the tail padding used for a ring of the given (rounded) capacity.
///
/// # Example
///
/// ```
/// use nexus_ring::tail_padding_for;
///
/// assert_eq!(tail_padding_for(64), 0);
/// assert_eq!(tail_padding_for(1024), 0);
/// assert_eq!(tail_padding_for(2048), 64);
/// ```
#[inline]
pub const fn tail_padding_for(capacity: usize) -> usize {
    if capacity <= PADDING_THRESHOLD {
        0
    } else {
        CACHE_LINE_ELEMENTS
    }
}

/// Creates a new character ring buffer with the given requested capacity.
///
/// Returns a `(Producer, Consumer)` pair. The actual capacity is rounded up
/// to the next power of two (`0` rounds up to `1`).
///
/// # Example
///
/// ```
/// let (producer, consumer) = nexus_ring::ring_buffer(100);
/// assert_eq!(producer.capacity(), 128);
/// assert_eq!(consumer.capacity(), 128);
/// ```
///
/// # Panics
///
/// Panics if the rounded capacity does not fit in a `usize`.
pub fn ring_buffer(capacity: usize) -> (Producer, Consumer) {
    let capacity = capacity
        .checked_next_power_of_two()
        .unwrap_or_else(|| panic!("ring capacity {capacity} has no power of two in range"));
    let mask = capacity - 1;
    let tail_padding = tail_padding_for(capacity);

    let buffer = Box::into_raw(vec!['\0'; capacity].into_boxed_slice()).cast::<char>();

    let inner = Arc::new(Inner {
        tail: CachePadded::new(AtomicUsize::new(0)),
        slots: CachePadded::new(Slots {
            buffer,
            capacity,
            mask,
            tail_padding,
        }),
        head: CachePadded::new(AtomicUsize::new(0)),
    });

    (
        Producer {
            local_tail: 0,
            cached_head: 0,
            buffer,
            mask,
            limit: capacity - tail_padding,
            inner: Arc::clone(&inner),
        },
        Consumer {
            local_head: 0,
            cached_tail: 0,
            buffer,
            mask,
            inner,
        },
    )
}

/// Immutable description of the backing array.
struct Slots {
    /// Raw pointer to `capacity` chars (owned by a leaked boxed slice).
    buffer: *mut char,
    capacity: usize,
    /// Capacity - 1, for masking counters into slot indices.
    mask: usize,
    tail_padding: usize,
}

/// Shared state between producer and consumer.
///
/// `tail`, the buffer descriptor and `head` each sit in their own
/// cache-padded slot so producer writes never invalidate the line the
/// consumer spins on, and vice versa.
#[repr(C)]
struct Inner {
    /// Characters produced so far.
    tail: CachePadded<AtomicUsize>,
    slots: CachePadded<Slots>,
    /// Characters consumed so far.
    head: CachePadded<AtomicUsize>,
}

// Safety: the producer only writes slots in [head, head + limit) that the
// consumer has released, and the consumer only reads slots in [head, tail)
// that the producer has published.
unsafe impl Send for Inner {}
unsafe impl Sync for Inner {}

impl Drop for Inner {
    fn drop(&mut self) {
        // Reconstruct and drop the boxed slice to free memory
        unsafe {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                self.slots.buffer,
                self.slots.capacity,
            )));
        }
    }
}

/// The writing half of a character ring buffer.
///
/// Takes `&mut self` to statically ensure single-producer access. Can be
/// sent to another thread but not shared.
#[repr(C)]
pub struct Producer {
    // === Hot path fields ===
    /// Our write position (authoritative).
    local_tail: usize,
    /// Cached consumer's read position.
    cached_head: usize,
    buffer: *mut char,
    mask: usize,
    /// Largest allowed distance between tail and head.
    limit: usize,

    // === Cold path fields ===
    inner: Arc<Inner>,
}

// Safety: Producer is Send but not Sync - only one thread can use it.
unsafe impl Send for Producer {}

impl Producer {
    /// Returns the length of the contiguous free run starting at the
    /// current tail, or `0` if the ring is full.
    ///
    /// The run stops at the physical end of the backing array, so a
    /// return value smaller than the total free space does not mean the
    /// consumer is lagging.
    ///
    /// The shared `head` is reloaded only when the cached copy says the
    /// ring is full.
    #[inline]
    pub fn free_len(&mut self) -> usize {
        let tail = self.local_tail;
        let mut used = tail.wrapping_sub(self.cached_head);

        if used >= self.limit {
            self.cached_head = self.inner.head.load(Ordering::Acquire);
            used = tail.wrapping_sub(self.cached_head);
            if used >= self.limit {
                return 0;
            }
        }

        let index = tail & self.mask;
        (self.limit - used).min(self.mask + 1 - index)
    }

    /// Copies as many characters from `src` as fit in the current free run
    /// and publishes them.
    ///
    /// Returns the number of characters written, which is `0` when the
    /// ring is full or `src` is empty.
    ///
    /// # Example
    ///
    /// ```
    /// let (mut producer, _consumer) = nexus_ring::ring_buffer(4);
    ///
    /// assert_eq!(producer.write_from(&['a', 'b', 'c']), 3);
    /// // One slot left
    /// assert_eq!(producer.write_from(&['d', 'e']), 1);
    /// assert_eq!(producer.write_from(&['f']), 0);
    /// ```
    #[inline]
    pub fn write_from(&mut self, src: &[char]) -> usize {
        if src.is_empty() {
            return 0;
        }

        let n = self.free_len().min(src.len());
        if n == 0 {
            return 0;
        }

        let tail = self.local_tail;
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.buffer.add(tail & self.mask), n);
        }

        let next_tail = tail.wrapping_add(n);
        self.inner.tail.store(next_tail, Ordering::Release);
        self.local_tail = next_tail;
        n
    }

    /// Total number of characters published so far.
    #[inline]
    pub fn position(&self) -> usize {
        self.local_tail
    }

    /// Returns the capacity of the ring buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Returns the number of slots held back from the producer.
    #[inline]
    pub fn tail_padding(&self) -> usize {
        self.inner.slots.tail_padding
    }

    /// Returns the maximum number of unread characters the ring will hold.
    #[inline]
    pub fn usable_capacity(&self) -> usize {
        self.limit
    }

    /// Returns the number of unread characters.
    ///
    /// Note: This is a snapshot and may be immediately stale in concurrent contexts.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if there are no unread characters.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("capacity", &self.capacity())
            .field("tail_padding", &self.tail_padding())
            .field("position", &self.local_tail)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// The reading half of a character ring buffer.
///
/// Takes `&mut self` to statically ensure single-consumer access. Can be
/// sent to another thread but not shared.
#[repr(C)]
pub struct Consumer {
    // === Hot path fields ===
    /// Our read position (authoritative).
    local_head: usize,
    /// Cached producer's write position.
    cached_tail: usize,
    buffer: *mut char,
    mask: usize,

    // === Cold path fields ===
    inner: Arc<Inner>,
}

// Safety: Consumer is Send but not Sync - only one thread can use it.
unsafe impl Send for Consumer {}

impl Consumer {
    /// Returns the number of characters ready to read.
    ///
    /// The shared `tail` is reloaded only when the cached copy says the
    /// ring is empty.
    #[inline]
    pub fn available(&mut self) -> usize {
        if self.local_head == self.cached_tail {
            self.cached_tail = self.inner.tail.load(Ordering::Acquire);
        }
        self.cached_tail.wrapping_sub(self.local_head)
    }

    /// Pops one character, or returns `None` if the ring is empty.
    ///
    /// # Example
    ///
    /// ```
    /// let (mut producer, mut consumer) = nexus_ring::ring_buffer(8);
    ///
    /// assert_eq!(consumer.pop(), None);
    /// producer.write_from(&['x']);
    /// assert_eq!(consumer.pop(), Some('x'));
    /// ```
    #[inline]
    pub fn pop(&mut self) -> Option<char> {
        if self.available() == 0 {
            return None;
        }

        let head = self.local_head;
        let c = unsafe { self.buffer.add(head & self.mask).read() };

        let next_head = head.wrapping_add(1);
        self.inner.head.store(next_head, Ordering::Release);
        self.local_head = next_head;
        Some(c)
    }

    /// Copies up to `dst.len()` unread characters into `dst`.
    ///
    /// Copies in at most two blocks: the run up to the physical end of the
    /// backing array, then the remainder from its start. Returns the number
    /// of characters copied (`0` if the ring is empty).
    #[inline]
    pub fn read_into(&mut self, dst: &mut [char]) -> usize {
        if dst.is_empty() {
            return 0;
        }

        let n = self.available().min(dst.len());
        if n == 0 {
            return 0;
        }

        let head = self.local_head;
        let index = head & self.mask;
        let first = n.min(self.mask + 1 - index);
        let second = n - first;

        unsafe {
            ptr::copy_nonoverlapping(self.buffer.add(index), dst.as_mut_ptr(), first);
            ptr::copy_nonoverlapping(self.buffer, dst.as_mut_ptr().add(first), second);
        }

        let next_head = head.wrapping_add(n);
        self.inner.head.store(next_head, Ordering::Release);
        self.local_head = next_head;
        n
    }

    /// Total number of characters consumed so far.
    #[inline]
    pub fn position(&self) -> usize {
        self.local_head
    }

    /// Returns the capacity of the ring buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Returns the number of unread characters.
    ///
    /// Note: This is a snapshot and may be immediately stale in concurrent contexts.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if there are no unread characters.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("capacity", &self.capacity())
            .field("position", &self.local_head)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl Inner {
    #[inline]
    fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }
}
