//! Transmit path: circular buffer with interrupt-driven drain
//!
//! The protocol engine enqueues response bytes through [`TxSender`],
//! which blocks in bounded intervals when the ring is full. The
//! transmit-ready interrupt drains the ring through [`TxDrainer`],
//! feeding the hardware FIFO as much as it will accept and waking the
//! producer when space is freed.
//!
//! The ring itself exposes only `push_slice`, `read_grant` and
//! `release`; the read/write indices never leave this module. Producer
//! and drain coordinate purely through the atomic index pair and the
//! space-available signal, so no lock is held across the producer's
//! timed wait.

use core::cell::UnsafeCell;
use core::ptr;
use core::slice;

use portable_atomic::{AtomicUsize, Ordering};

use crate::engine::ByteSink;

/// Default transmit ring storage size
pub const TX_RING_SIZE: usize = 1024;

/// How long the producer waits for drain progress before re-checking
pub const TX_WAIT_MS: u32 = 10;

/// Bounded SPSC circular byte buffer
///
/// Indices are monotonic counters reduced modulo `N` on access; the
/// producer owns `write`, the drain owns `read`. Split it once into the
/// two endpoints.
pub struct TxRing<const N: usize> {
    buf: UnsafeCell<[u8; N]>,
    /// Total bytes consumed; advanced only by the drain
    read: AtomicUsize,
    /// Total bytes produced; advanced only by the producer
    write: AtomicUsize,
}

// The UnsafeCell is only reached through the split endpoints: the
// producer writes the free region, the drain reads the filled region,
// and the regions are disjoint by the index invariant.
unsafe impl<const N: usize> Sync for TxRing<N> {}

impl<const N: usize> TxRing<N> {
    /// Create an empty ring
    pub const fn new() -> Self {
        Self {
            buf: UnsafeCell::new([0; N]),
            read: AtomicUsize::new(0),
            write: AtomicUsize::new(0),
        }
    }

    /// Split into the producer and drain endpoints
    pub fn split(&mut self) -> (TxProducer<'_, N>, TxDrain<'_, N>) {
        let ring = &*self;
        (TxProducer { ring }, TxDrain { ring })
    }

    /// Number of bytes currently buffered
    pub fn len(&self) -> usize {
        self.write
            .load(Ordering::Acquire)
            .wrapping_sub(self.read.load(Ordering::Acquire))
    }

    /// Whether the ring holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<const N: usize> Default for TxRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine-side endpoint of the transmit ring
pub struct TxProducer<'a, const N: usize> {
    ring: &'a TxRing<N>,
}

impl<const N: usize> TxProducer<'_, N> {
    /// Copy as much of `data` as currently fits, wrapping across the
    /// ring boundary. Returns the number of bytes copied.
    pub fn push_slice(&mut self, data: &[u8]) -> usize {
        // We are the only writer of `write`
        let write = self.ring.write.load(Ordering::Relaxed);
        let read = self.ring.read.load(Ordering::Acquire);
        let free = N - write.wrapping_sub(read);
        let count = data.len().min(free);
        if count == 0 {
            return 0;
        }

        let idx = write % N;
        let first = count.min(N - idx);
        let base = self.ring.buf.get() as *mut u8;
        // SAFETY: [write, write + free) is not readable by the drain
        // until the Release store below publishes it.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), base.add(idx), first);
            ptr::copy_nonoverlapping(data.as_ptr().add(first), base, count - first);
        }
        self.ring
            .write
            .store(write.wrapping_add(count), Ordering::Release);
        count
    }

    /// Bytes that can be pushed without waiting
    pub fn free(&self) -> usize {
        N - self.ring.len()
    }
}

/// Interrupt-side endpoint of the transmit ring
pub struct TxDrain<'a, const N: usize> {
    ring: &'a TxRing<N>,
}

impl<'a, const N: usize> TxDrain<'a, N> {
    /// Claim the longest contiguous readable chunk
    ///
    /// The grant borrows the drain mutably, so a second claim cannot
    /// exist until this one is released.
    pub fn read_grant(&mut self) -> ReadGrant<'_, 'a, N> {
        // We are the only writer of `read`
        let read = self.ring.read.load(Ordering::Relaxed);
        let write = self.ring.write.load(Ordering::Acquire);
        let available = write.wrapping_sub(read);
        let len = available.min(N - read % N);
        ReadGrant { drain: self, len }
    }

    /// Whether the ring holds no bytes
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

/// A claimed contiguous readable chunk of the transmit ring
///
/// Dropping the grant without calling [`release`](ReadGrant::release)
/// consumes nothing.
pub struct ReadGrant<'g, 'a, const N: usize> {
    drain: &'g mut TxDrain<'a, N>,
    len: usize,
}

impl<const N: usize> ReadGrant<'_, '_, N> {
    /// The claimed bytes
    pub fn buf(&self) -> &[u8] {
        let read = self.drain.ring.read.load(Ordering::Relaxed);
        let base = self.drain.ring.buf.get() as *const u8;
        // SAFETY: [read, read + len) was published by the producer's
        // Release store and is not rewritten until `read` advances.
        unsafe { slice::from_raw_parts(base.add(read % N), self.len) }
    }

    /// Length of the claimed chunk
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the claim is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Commit the first `used` bytes of the claim, freeing them for the
    /// producer. `used` is clamped to the claimed length.
    pub fn release(self, used: usize) {
        let used = used.min(self.len);
        let read = self.drain.ring.read.load(Ordering::Relaxed);
        self.drain
            .ring
            .read
            .store(read.wrapping_add(used), Ordering::Release);
    }
}

/// Space-available notification between drain and producer
///
/// The drain side calls `notify` from interrupt context; the producer
/// waits with a bounded timeout. Spurious wakeups are fine, the
/// producer re-checks the ring either way.
pub trait TxSignal {
    /// Wake the producer, if it is waiting
    fn notify(&self);
    /// Wait up to `timeout_ms` for a notification
    fn wait(&self, timeout_ms: u32);
}

/// Transmit-ready interrupt control
///
/// `enable` is an edge-triggered kick and is safe to call repeatedly;
/// the drain calls `disable` once the ring runs empty.
pub trait TxIrqCtl {
    /// Enable the transmit-ready interrupt
    fn enable(&self);
    /// Disable the transmit-ready interrupt
    fn disable(&self);
}

/// The engine-side byte sink: enqueue and kick the drain
pub struct TxSender<'a, const N: usize, S: TxSignal, I: TxIrqCtl> {
    producer: TxProducer<'a, N>,
    signal: &'a S,
    irq: &'a I,
}

impl<'a, const N: usize, S: TxSignal, I: TxIrqCtl> TxSender<'a, N, S, I> {
    /// Create a sender over a split-off producer endpoint
    pub fn new(producer: TxProducer<'a, N>, signal: &'a S, irq: &'a I) -> Self {
        Self {
            producer,
            signal,
            irq,
        }
    }

    /// Enqueue all of `data`, waiting in bounded intervals when the
    /// ring is full. Returns once everything is buffered; delivery to
    /// the hardware stays asynchronous.
    pub fn send_all(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let n = self.producer.push_slice(data);
            data = &data[n..];
            self.irq.enable();
            if !data.is_empty() {
                self.signal.wait(TX_WAIT_MS);
            }
        }
    }
}

impl<const N: usize, S: TxSignal, I: TxIrqCtl> ByteSink for TxSender<'_, N, S, I> {
    fn send(&mut self, data: &[u8]) {
        self.send_all(data);
    }
}

/// The interrupt-side consumer: ring to hardware FIFO
pub struct TxDrainer<'a, const N: usize, S: TxSignal, I: TxIrqCtl> {
    drain: TxDrain<'a, N>,
    signal: &'a S,
    irq: &'a I,
}

impl<'a, const N: usize, S: TxSignal, I: TxIrqCtl> TxDrainer<'a, N, S, I> {
    /// Create a drainer over a split-off drain endpoint
    pub fn new(drain: TxDrain<'a, N>, signal: &'a S, irq: &'a I) -> Self {
        Self { drain, signal, irq }
    }

    /// Service one transmit-ready interrupt
    ///
    /// `fifo_fill` receives the claimed chunk and must return how many
    /// of its bytes the hardware accepted. Only those are committed.
    /// Wakes the producer if anything was freed and disables the
    /// interrupt once the ring is empty.
    pub fn on_tx_ready<F>(&mut self, fifo_fill: F)
    where
        F: FnOnce(&[u8]) -> usize,
    {
        let grant = self.drain.read_grant();
        if grant.is_empty() {
            self.irq.disable();
            return;
        }
        let len = grant.len();
        let wrote = fifo_fill(grant.buf()).min(len);
        grant.release(wrote);

        if wrote > 0 {
            self.signal.notify();
        }
        if self.drain.is_empty() {
            self.irq.disable();
        }
    }
}

/// Condvar-backed [`TxSignal`] for hosted use and tests
#[cfg(feature = "std")]
pub struct CondvarSignal {
    ready: std::sync::Mutex<bool>,
    cvar: std::sync::Condvar,
}

#[cfg(feature = "std")]
impl CondvarSignal {
    /// Create a signal with no pending notification
    pub fn new() -> Self {
        Self {
            ready: std::sync::Mutex::new(false),
            cvar: std::sync::Condvar::new(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for CondvarSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl TxSignal for CondvarSignal {
    fn notify(&self) {
        *self.ready.lock().unwrap() = true;
        self.cvar.notify_one();
    }

    fn wait(&self, timeout_ms: u32) {
        let timeout = std::time::Duration::from_millis(timeout_ms as u64);
        let guard = self.ready.lock().unwrap();
        let (mut guard, _) = self
            .cvar
            .wait_timeout_while(guard, timeout, |ready| !*ready)
            .unwrap();
        *guard = false;
    }
}
