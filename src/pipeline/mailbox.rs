//! Bounded FIFO queues between the camera and its consumers.
//!
//! A mailbox never blocks a producer indefinitely: [`Mailbox::post`] waits
//! at most the given timeout and hands the item back when the queue stays
//! full. Dropping the returned item is how the producer releases its
//! reference to a frame nobody had room for.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::error::{NodeError, NodeResult};
use super::frame::FrameRef;

/// Returned by a post that found no room in time.
#[derive(Debug)]
pub enum PostError<T> {
    Full(T),
}

impl<T> PostError<T> {
    /// Recover the item that could not be posted.
    pub fn into_inner(self) -> T {
        match self {
            PostError::Full(item) => item,
        }
    }
}

/// Bounded multi-producer queue owned by a consumer node.
pub struct Mailbox<T = FrameRef> {
    name: String,
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
    posted: AtomicU64,
    dropped: AtomicU64,
}

impl<T> Mailbox<T> {
    /// Create a mailbox holding at most `capacity` items (minimum one).
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            name: name.into(),
            tx,
            rx,
            capacity,
            posted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue `item`, waiting up to `timeout` for room.
    pub fn post(&self, item: T, timeout: Duration) -> Result<(), PostError<T>> {
        match self.tx.send_timeout(item, timeout) {
            Ok(()) => {
                self.posted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(SendTimeoutError::Timeout(item)) | Err(SendTimeoutError::Disconnected(item)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(PostError::Full(item))
            }
        }
    }

    /// Enqueue without waiting.
    pub fn try_post(&self, item: T) -> Result<(), PostError<T>> {
        match self.tx.try_send(item) {
            Ok(()) => {
                self.posted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(item)) | Err(TrySendError::Disconnected(item)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(PostError::Full(item))
            }
        }
    }

    /// Dequeue the oldest item, waiting up to `timeout`.
    pub fn fetch(&self, timeout: Duration) -> NodeResult<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Ok(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                Err(NodeError::WouldBlock)
            }
        }
    }

    pub fn try_fetch(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Drop every queued item. Returns how many were discarded.
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.rx.is_full()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn posted(&self) -> u64 {
        self.posted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T> fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("posted", &self.posted())
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::frame::{fan_out, BufferPool, Channel, Frame, FrameInfo, HwBuffer, PixelFormat};
    use proptest::prelude::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_fifo_order() {
        let mb = Mailbox::new("fifo", 4);
        for i in 0..3 {
            mb.post(i, Duration::ZERO).unwrap();
        }
        assert_eq!(mb.len(), 3);
        assert_eq!(mb.fetch(Duration::ZERO).unwrap(), 0);
        assert_eq!(mb.fetch(Duration::ZERO).unwrap(), 1);
        assert_eq!(mb.fetch(Duration::ZERO).unwrap(), 2);
        assert!(mb.is_empty());
    }

    #[test]
    fn test_post_full_returns_item() {
        let mb = Mailbox::new("full", 1);
        mb.post("a", Duration::ZERO).unwrap();
        assert!(mb.is_full());
        let err = mb.post("b", Duration::from_millis(5)).unwrap_err();
        assert_eq!(err.into_inner(), "b");
        assert_eq!(mb.posted(), 1);
        assert_eq!(mb.dropped(), 1);
    }

    #[test]
    fn test_fetch_timeout_is_would_block() {
        let mb: Mailbox<u32> = Mailbox::new("empty", 2);
        let start = Instant::now();
        let err = mb.fetch(Duration::from_millis(20)).unwrap_err();
        assert!(err.is_would_block());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_post_unblocks_when_consumer_fetches() {
        let mb = Arc::new(Mailbox::new("handoff", 1));
        mb.post(1u32, Duration::ZERO).unwrap();
        let consumer = {
            let mb = mb.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                mb.fetch(Duration::from_millis(100)).unwrap()
            })
        };
        mb.post(2u32, Duration::from_millis(500)).unwrap();
        assert_eq!(consumer.join().unwrap(), 1);
        assert_eq!(mb.fetch(Duration::ZERO).unwrap(), 2);
    }

    #[test]
    fn test_zero_capacity_is_promoted_to_one() {
        let mb: Mailbox<u8> = Mailbox::new("tiny", 0);
        assert_eq!(mb.capacity(), 1);
    }

    #[test]
    fn test_drain_discards_queued_items() {
        let mb = Mailbox::new("drain", 8);
        for i in 0..5 {
            mb.try_post(i).unwrap();
        }
        assert_eq!(mb.drain(), 5);
        assert!(mb.try_fetch().is_none());
    }

    #[derive(Default)]
    struct CountingPool {
        recycled: AtomicUsize,
    }

    impl BufferPool for CountingPool {
        fn recycle(&self, _handle: u64) {
            self.recycled.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    proptest! {
        #[test]
        fn prop_overflow_drops_are_counted_and_released(capacity in 1usize..8, posts in 0usize..24) {
            let pool = Arc::new(CountingPool::default());
            let mb: Mailbox = Mailbox::new("prop", capacity);
            for handle in 0..posts {
                let pool_dyn: Arc<dyn BufferPool> = pool.clone();
                let info = FrameInfo::new(Channel::Raw, 2, 2, PixelFormat::Rgb888);
                let frame = Frame::hardware(info, HwBuffer::new(handle as u64, 0, vec![0u8; 12], pool_dyn));
                for frame in fan_out(frame, 1) {
                    // Rejected frames are dropped right here.
                    let _ = mb.post(frame, Duration::from_millis(1));
                }
            }
            let expected_drops = posts.saturating_sub(capacity);
            prop_assert_eq!(mb.dropped() as usize, expected_drops);
            prop_assert_eq!(pool.recycled.load(std::sync::atomic::Ordering::SeqCst), expected_drops);
            prop_assert_eq!(mb.drain(), posts.min(capacity));
            prop_assert_eq!(pool.recycled.load(std::sync::atomic::Ordering::SeqCst), posts);
        }
    }
}
