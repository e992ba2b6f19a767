//! Fixed pool of pre-allocated frame buffers.
//!
//! Buffers cycle FREE → CAPTURING → READY → IN_USE → FREE. Memory moves with
//! the lifecycle: a CAPTURING buffer is lent to the capture engine (and on to
//! the DMA peripheral), an IN_USE buffer is lent to the consumer inside a
//! [`Frame`]. The pool mutex only guards the state table and the ready FIFO,
//! so every interrupt-context call completes in a handful of word updates.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use bytes::BytesMut;

use crate::capture::frame::{BufferHandle, Frame, FrameMetadata};
use crate::{CameraError, Result};

/// Lifecycle state of one pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Free,
    Capturing,
    Ready,
    InUse,
}

/// A FREE buffer on loan to the capture engine for one DMA transfer.
pub struct CaptureGrant {
    pub(crate) index: usize,
    pub(crate) buf: BytesMut,
}

struct Slot {
    state: BufferState,
    /// Buffer memory; `None` while lent out to the engine or a consumer.
    storage: Option<BytesMut>,
    meta: Option<FrameMetadata>,
}

struct PoolInner {
    slots: Vec<Slot>,
    /// READY indices in capture order.
    ready: VecDeque<usize>,
    /// Bumped by `reset` so blocked waiters can tell the stream was torn down.
    generation: u64,
    frame_capacity: usize,
}

pub struct FrameBufferPool {
    inner: Mutex<PoolInner>,
    readable: Condvar,
}

impl FrameBufferPool {
    /// Allocate `count` buffers of `frame_capacity` bytes each up front; no
    /// allocation happens on the capture path after this.
    pub fn new(count: usize, frame_capacity: usize) -> Self {
        assert!(count >= 1, "pool needs at least one buffer");
        let slots = (0..count)
            .map(|_| Slot {
                state: BufferState::Free,
                storage: Some(BytesMut::with_capacity(frame_capacity)),
                meta: None,
            })
            .collect();

        Self {
            inner: Mutex::new(PoolInner {
                slots,
                ready: VecDeque::with_capacity(count),
                generation: 0,
                frame_capacity,
            }),
            readable: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().slots.len()
    }

    /// Resize buffer storage for a new format and force everything FREE.
    /// Called between streams, never while capturing.
    pub fn configure(&self, frame_capacity: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.frame_capacity = frame_capacity;
        for slot in &mut inner.slots {
            slot.state = BufferState::Free;
            slot.meta = None;
            slot.storage = Some(BytesMut::with_capacity(frame_capacity));
        }
        inner.ready.clear();
        inner.generation += 1;
        self.readable.notify_all();
    }

    /// Take a FREE buffer for capture. `None` means the pool is exhausted and
    /// the caller must drop the current hardware frame instead of blocking.
    pub fn acquire_free(&self) -> Option<CaptureGrant> {
        let mut inner = self.inner.lock().unwrap();
        debug_assert!(
            !inner.slots.iter().any(|s| s.state == BufferState::Capturing),
            "single capture engine writes one buffer at a time"
        );
        let index = inner
            .slots
            .iter()
            .position(|s| s.state == BufferState::Free)?;
        let slot = &mut inner.slots[index];
        let mut buf = slot.storage.take()?;
        slot.state = BufferState::Capturing;
        buf.clear();
        Some(CaptureGrant { index, buf })
    }

    /// Publish a completed frame: CAPTURING → READY, FIFO-ordered, and wake
    /// one consumer blocked on [`claim_ready_wait`].
    ///
    /// Fails if the slot is no longer CAPTURING (the stream was reset while
    /// the transfer was in flight); the stale buffer is simply dropped.
    pub fn mark_ready(&self, index: usize, buf: BytesMut, meta: FrameMetadata) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner
            .slots
            .get_mut(index)
            .ok_or(CameraError::InvalidHandle)?;
        if slot.state != BufferState::Capturing {
            return Err(CameraError::InvalidHandle);
        }
        slot.state = BufferState::Ready;
        slot.storage = Some(buf);
        slot.meta = Some(meta);
        inner.ready.push_back(index);
        self.readable.notify_one();
        Ok(())
    }

    /// Return a CAPTURING buffer straight to FREE, bypassing READY. Used for
    /// partial or corrupt frames, which must never reach a consumer.
    pub fn discard(&self, index: usize, buf: BytesMut) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner
            .slots
            .get_mut(index)
            .ok_or(CameraError::InvalidHandle)?;
        if slot.state != BufferState::Capturing {
            return Err(CameraError::InvalidHandle);
        }
        slot.state = BufferState::Free;
        slot.storage = Some(buf);
        slot.meta = None;
        Ok(())
    }

    /// Claim the oldest READY frame, READY → IN_USE. Non-blocking.
    pub fn claim_ready(&self) -> Option<Frame> {
        let mut inner = self.inner.lock().unwrap();
        Self::pop_ready(&mut inner)
    }

    /// Claim the oldest READY frame, waiting until one is published, the
    /// timeout elapses, or the pool is reset. `None` timeout waits forever,
    /// zero polls once.
    pub fn claim_ready_wait(&self, timeout: Option<Duration>) -> Option<Frame> {
        let mut inner = self.inner.lock().unwrap();
        let generation = inner.generation;
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if let Some(frame) = Self::pop_ready(&mut inner) {
                return Some(frame);
            }
            if inner.generation != generation {
                // Stream torn down while we slept.
                return None;
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    let (guard, _) = self
                        .readable
                        .wait_timeout(inner, deadline - now)
                        .unwrap();
                    inner = guard;
                }
                None => inner = self.readable.wait(inner).unwrap(),
            }
        }
    }

    fn pop_ready(inner: &mut PoolInner) -> Option<Frame> {
        let index = inner.ready.pop_front()?;
        let slot = &mut inner.slots[index];
        let payload = slot.storage.take()?;
        let meta = slot.meta.take()?;
        slot.state = BufferState::InUse;
        Some(Frame::new(BufferHandle(index), payload, meta))
    }

    /// Hand a consumed frame back: IN_USE → FREE. Rejects handles that are
    /// not IN_USE, including frames that outlived a reset.
    pub fn release(&self, frame: Frame) -> Result<()> {
        let (handle, mut buf) = frame.into_storage();
        let mut inner = self.inner.lock().unwrap();
        let slot = inner
            .slots
            .get_mut(handle.index())
            .ok_or(CameraError::InvalidHandle)?;
        if slot.state != BufferState::InUse {
            return Err(CameraError::InvalidHandle);
        }
        slot.state = BufferState::Free;
        buf.clear();
        slot.storage = Some(buf);
        slot.meta = None;
        Ok(())
    }

    /// Force every buffer FREE, discarding undelivered frames, and wake all
    /// blocked waiters. Buffers still lent out get fresh storage; their stale
    /// handles fail with `InvalidHandle` on release.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.ready.clear();
        inner.generation += 1;
        let frame_capacity = inner.frame_capacity;
        for slot in &mut inner.slots {
            slot.state = BufferState::Free;
            slot.meta = None;
            if slot.storage.is_none() {
                slot.storage = Some(BytesMut::with_capacity(frame_capacity));
            }
        }
        self.readable.notify_all();
    }

    pub fn free_buffers(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .slots
            .iter()
            .filter(|s| s.state == BufferState::Free)
            .count()
    }

    pub fn ready_frames(&self) -> usize {
        self.inner.lock().unwrap().ready.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::PixelFormat;
    use std::sync::Arc;
    use std::thread;

    fn meta(sequence: u64, bytes_used: usize) -> FrameMetadata {
        FrameMetadata {
            sequence,
            width: 320,
            height: 240,
            format: PixelFormat::Jpeg,
            bytes_used,
            timestamp: Instant::now(),
        }
    }

    fn complete_one(pool: &FrameBufferPool, sequence: u64, len: usize) {
        let grant = pool.acquire_free().expect("free buffer");
        let mut buf = grant.buf;
        buf.resize(len, sequence as u8);
        pool.mark_ready(grant.index, buf, meta(sequence, len)).unwrap();
    }

    #[test]
    fn frames_delivered_in_capture_order() {
        let pool = FrameBufferPool::new(3, 1024);
        complete_one(&pool, 0, 100);
        complete_one(&pool, 1, 200);
        complete_one(&pool, 2, 300);

        for expected in 0..3u64 {
            let frame = pool.claim_ready().expect("ready frame");
            assert_eq!(frame.meta.sequence, expected);
            pool.release(frame).unwrap();
        }
        assert_eq!(pool.free_buffers(), 3);
    }

    #[test]
    fn exhausted_pool_returns_none() {
        let pool = FrameBufferPool::new(1, 64);
        complete_one(&pool, 0, 10);
        assert!(pool.acquire_free().is_none());

        let frame = pool.claim_ready().unwrap();
        // Still exhausted: the only buffer is IN_USE.
        assert!(pool.acquire_free().is_none());
        pool.release(frame).unwrap();
        assert!(pool.acquire_free().is_some());
    }

    #[test]
    fn at_most_one_capturing() {
        let pool = FrameBufferPool::new(2, 64);
        let grant = pool.acquire_free().unwrap();
        // The engine only ever holds one grant; the pool tracks the rest as FREE.
        assert_eq!(pool.free_buffers(), 1);
        pool.discard(grant.index, grant.buf).unwrap();
        assert_eq!(pool.free_buffers(), 2);
    }

    #[test]
    fn discard_bypasses_ready() {
        let pool = FrameBufferPool::new(1, 64);
        let grant = pool.acquire_free().unwrap();
        pool.discard(grant.index, grant.buf).unwrap();
        assert_eq!(pool.ready_frames(), 0);
        assert!(pool.claim_ready().is_none());
    }

    #[test]
    fn release_requires_in_use() {
        let pool = FrameBufferPool::new(2, 64);
        complete_one(&pool, 0, 8);
        let frame = pool.claim_ready().unwrap();
        pool.reset();
        // The slot went back to FREE under us; the stale loan is rejected.
        assert!(matches!(
            pool.release(frame),
            Err(CameraError::InvalidHandle)
        ));
        // Reset replenished storage, so the pool is still fully usable.
        assert_eq!(pool.free_buffers(), 2);
        complete_one(&pool, 1, 8);
        assert!(pool.claim_ready().is_some());
    }

    #[test]
    fn zero_timeout_polls_once() {
        let pool = FrameBufferPool::new(1, 64);
        let start = Instant::now();
        assert!(pool.claim_ready_wait(Some(Duration::ZERO)).is_none());
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn waiter_wakes_on_mark_ready() {
        let pool = Arc::new(FrameBufferPool::new(1, 64));
        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.claim_ready_wait(Some(Duration::from_secs(5))))
        };
        thread::sleep(Duration::from_millis(20));
        complete_one(&pool, 7, 16);
        let frame = waiter.join().unwrap().expect("woken with a frame");
        assert_eq!(frame.meta.sequence, 7);
    }

    #[test]
    fn reset_cancels_infinite_wait() {
        let pool = Arc::new(FrameBufferPool::new(1, 64));
        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.claim_ready_wait(None))
        };
        thread::sleep(Duration::from_millis(20));
        pool.reset();
        assert!(waiter.join().unwrap().is_none());
    }
}
