//! Receive path: interrupt-fed byte queue
//!
//! The receive interrupt drains the hardware FIFO and pushes every byte
//! into a bounded single-producer single-consumer queue. The producer
//! never blocks: when the queue is full the byte is dropped and counted,
//! because the wire has no flow-control primitive at this layer. The
//! protocol engine is the single consumer and sees bytes in exact
//! arrival order.

use heapless::spsc::{Consumer, Producer, Queue};
use portable_atomic::{AtomicU32, Ordering};

/// Default receive queue storage size. Usable capacity is one less
/// (heapless SPSC convention).
pub const RX_QUEUE_SIZE: usize = 1024;

/// Bytes read from the hardware FIFO per pass in [`RxProducer::fill_from`]
const RX_FIFO_CHUNK: usize = 64;

/// Bounded SPSC byte queue with a drop counter
///
/// Create one (typically in a `static`), then [`split`](RxQueue::split)
/// it into the interrupt-side producer and the engine-side consumer.
pub struct RxQueue<const N: usize> {
    queue: Queue<u8, N>,
    dropped: AtomicU32,
}

impl<const N: usize> RxQueue<N> {
    /// Create an empty queue
    pub const fn new() -> Self {
        Self {
            queue: Queue::new(),
            dropped: AtomicU32::new(0),
        }
    }

    /// Split into the producer and consumer endpoints
    pub fn split(&mut self) -> (RxProducer<'_, N>, RxConsumer<'_, N>) {
        let dropped = &self.dropped;
        let (producer, consumer) = self.queue.split();
        (RxProducer { producer, dropped }, RxConsumer { consumer })
    }

    /// Total number of bytes dropped because the queue was full
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<const N: usize> Default for RxQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Interrupt-side endpoint of the receive queue
pub struct RxProducer<'a, const N: usize> {
    producer: Producer<'a, u8, N>,
    dropped: &'a AtomicU32,
}

impl<const N: usize> RxProducer<'_, N> {
    /// Push one byte without blocking
    ///
    /// Returns false if the queue was full; the byte is dropped and the
    /// drop counter incremented.
    pub fn push(&mut self, byte: u8) -> bool {
        match self.producer.enqueue(byte) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Drain the hardware receive FIFO into the queue
    ///
    /// Call from the receive-ready interrupt. `read_fifo` is invoked
    /// repeatedly with a scratch buffer and must return the number of
    /// bytes it wrote (0 when the FIFO is empty). Drops are aggregated
    /// into a single warning per call.
    pub fn fill_from<F>(&mut self, mut read_fifo: F)
    where
        F: FnMut(&mut [u8]) -> usize,
    {
        let mut chunk = [0u8; RX_FIFO_CHUNK];
        let mut dropped = 0u32;
        loop {
            let n = read_fifo(&mut chunk);
            if n == 0 {
                break;
            }
            let n = n.min(chunk.len());
            for &byte in &chunk[..n] {
                if !self.push(byte) {
                    dropped += 1;
                }
            }
        }
        if dropped > 0 {
            log::warn!("rx queue full: dropped {} byte(s)", dropped);
        }
    }
}

/// Engine-side endpoint of the receive queue
pub struct RxConsumer<'a, const N: usize> {
    consumer: Consumer<'a, u8, N>,
}

impl<const N: usize> RxConsumer<'_, N> {
    /// Take the next byte in arrival order, if any
    pub fn pop(&mut self) -> Option<u8> {
        self.consumer.dequeue()
    }

    /// Number of bytes currently queued
    pub fn len(&self) -> usize {
        self.consumer.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_order() {
        let mut q: RxQueue<8> = RxQueue::new();
        let (mut prod, mut cons) = q.split();

        for b in 0..5u8 {
            assert!(prod.push(b));
        }
        for b in 0..5u8 {
            assert_eq!(cons.pop(), Some(b));
        }
        assert_eq!(cons.pop(), None);
    }

    #[test]
    fn test_overflow_drops_and_counts() {
        let mut q: RxQueue<8> = RxQueue::new();
        {
            let (mut prod, mut cons) = q.split();

            // Usable capacity is 7
            for b in 0..7u8 {
                assert!(prod.push(b));
            }
            assert!(!prod.push(0xAA));
            assert!(!prod.push(0xBB));

            // Accepted bytes come out untouched and in order
            for b in 0..7u8 {
                assert_eq!(cons.pop(), Some(b));
            }
            assert_eq!(cons.pop(), None);
        }
        assert_eq!(q.dropped(), 2);
    }

    #[test]
    fn test_drop_counter_monotonic_under_sustained_overflow() {
        let mut q: RxQueue<4> = RxQueue::new();
        {
            let (mut prod, _cons) = q.split();
            for _ in 0..3 {
                prod.push(0);
            }
            let mut last = 0;
            for _ in 0..10 {
                prod.push(0xFF);
                let now = prod.dropped.load(Ordering::Relaxed);
                assert!(now > last);
                last = now;
            }
        }
        assert_eq!(q.dropped(), 10);
    }

    #[test]
    fn test_fill_from_drains_fifo_in_chunks() {
        let mut q: RxQueue<512> = RxQueue::new();
        let (mut prod, mut cons) = q.split();

        // Emulate a FIFO holding 100 bytes, handed out 40 at a time
        let data: Vec<u8> = (0..100u8).collect();
        let mut offset = 0;
        prod.fill_from(|buf| {
            let n = (data.len() - offset).min(buf.len()).min(40);
            buf[..n].copy_from_slice(&data[offset..offset + n]);
            offset += n;
            n
        });

        let mut received = Vec::new();
        while let Some(b) = cons.pop() {
            received.push(b);
        }
        assert_eq!(received, data);
    }

    #[test]
    fn test_fill_from_counts_drops() {
        let mut q: RxQueue<8> = RxQueue::new();
        {
            let (mut prod, _cons) = q.split();
            let mut remaining = 20usize;
            prod.fill_from(|buf| {
                let n = remaining.min(buf.len());
                buf[..n].fill(0x55);
                remaining -= n;
                n
            });
        }
        // 7 fit, 13 dropped
        assert_eq!(q.dropped(), 13);
    }
}
