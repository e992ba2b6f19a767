//! Capture engine: drives the frame-sync/DMA sequence that fills one pool
//! buffer per hardware frame.
//!
//! `frame_sync` and `transfer_complete` are the two signal entry points and
//! run on the interrupt dispatch context. They never block and never
//! allocate; backpressure is applied by dropping the current hardware frame
//! and counting it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::BytesMut;
use crossbeam::utils::CachePadded;
use metrics::counter;
use tracing::{debug, warn};

use crate::capture::frame::{FrameMetadata, PixelFormat, StreamFormat};
use crate::capture::pool::FrameBufferPool;
use crate::hw::{CapturePeripheral, TransferOutcome, TransferRejected};
use crate::{CameraError, Result};

/// Captured/dropped/error frame totals for the current session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub captured: u64,
    pub dropped: u64,
    pub errors: u64,
}

#[derive(Default)]
struct Counters {
    captured: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
}

#[derive(Clone, Copy)]
enum EngineState {
    Idle,
    /// Armed and waiting for the next frame-sync.
    Armed,
    /// DMA in flight into the pool buffer at `index`.
    Filling {
        index: usize,
        sequence: u64,
        synced_at: Instant,
    },
}

struct ActiveFormat {
    width: u32,
    height: u32,
    format: PixelFormat,
    exact_len: Option<usize>,
    capacity: usize,
}

struct EngineInner {
    state: EngineState,
    active: Option<ActiveFormat>,
}

pub struct CaptureEngine {
    pool: Arc<FrameBufferPool>,
    hw: Mutex<Box<dyn CapturePeripheral>>,
    inner: Mutex<EngineInner>,
    sequence: AtomicU64,
    counters: CachePadded<Counters>,
}

impl CaptureEngine {
    pub fn new(pool: Arc<FrameBufferPool>, hw: Box<dyn CapturePeripheral>) -> Self {
        Self {
            pool,
            hw: Mutex::new(hw),
            inner: Mutex::new(EngineInner {
                state: EngineState::Idle,
                active: None,
            }),
            sequence: AtomicU64::new(0),
            counters: CachePadded::new(Counters::default()),
        }
    }

    /// Arm the peripheral; capture begins on the next frame-sync.
    pub fn start(&self, fmt: &StreamFormat) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !matches!(inner.state, EngineState::Idle) {
            return Err(CameraError::AlreadyStreaming);
        }

        self.hw.lock().unwrap().arm()?;

        inner.active = Some(ActiveFormat {
            width: fmt.width,
            height: fmt.height,
            format: fmt.pixel_format,
            exact_len: fmt.exact_frame_len(),
            capacity: fmt.frame_capacity(),
        });
        inner.state = EngineState::Armed;
        self.sequence.store(0, Ordering::Relaxed);
        self.counters.captured.store(0, Ordering::Relaxed);
        self.counters.dropped.store(0, Ordering::Relaxed);
        self.counters.errors.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Disarm the peripheral, aborting and discarding any in-flight frame.
    /// Calling `stop` while idle is a no-op.
    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        let mut hw = self.hw.lock().unwrap();
        if let EngineState::Filling { index, .. } = inner.state {
            match hw.abort_transfer() {
                Some(buf) => {
                    let _ = self.pool.discard(index, buf);
                }
                // Completion already in flight; the late transfer_complete
                // finds the engine idle and drops the buffer.
                None => debug!(index, "abort raced transfer completion"),
            }
        }
        hw.disarm();
        inner.state = EngineState::Idle;
        inner.active = None;
    }

    /// Frame-sync signal handler. Grabs a FREE buffer and programs the DMA,
    /// or drops this hardware frame if the pool is exhausted.
    pub fn frame_sync(&self) {
        let mut inner = self.inner.lock().unwrap();
        if !matches!(inner.state, EngineState::Armed) {
            return;
        }

        let Some(grant) = self.pool.acquire_free() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            counter!("frames_dropped").increment(1);
            return;
        };

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let index = grant.index;
        match self.hw.lock().unwrap().start_transfer(grant.buf) {
            Ok(()) => {
                inner.state = EngineState::Filling {
                    index,
                    sequence,
                    synced_at: Instant::now(),
                };
            }
            Err(TransferRejected(buf)) => {
                let _ = self.pool.discard(index, buf);
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                counter!("transfer_errors").increment(1);
            }
        }
    }

    /// Transfer-complete signal handler. Validates the received length and
    /// publishes the frame, or discards it on error; either way the engine
    /// re-arms for the next frame-sync.
    pub fn transfer_complete(&self, mut buf: BytesMut, outcome: TransferOutcome) {
        let mut inner = self.inner.lock().unwrap();
        let EngineState::Filling {
            index,
            sequence,
            synced_at,
        } = inner.state
        else {
            // Stopped between DMA completion and dispatch; nothing owns the
            // slot anymore.
            debug!("late transfer completion discarded");
            return;
        };
        inner.state = EngineState::Armed;

        let Some(active) = inner.active.as_ref() else {
            return;
        };

        match outcome {
            TransferOutcome::Complete { bytes_used }
                if Self::length_valid(active, bytes_used) =>
            {
                buf.truncate(bytes_used);
                let meta = FrameMetadata {
                    sequence,
                    width: active.width,
                    height: active.height,
                    format: active.format,
                    bytes_used,
                    timestamp: synced_at,
                };
                if self.pool.mark_ready(index, buf, meta).is_ok() {
                    self.counters.captured.fetch_add(1, Ordering::Relaxed);
                    counter!("frames_captured").increment(1);
                }
            }
            TransferOutcome::Complete { bytes_used } => {
                warn!(bytes_used, sequence, "frame length mismatch, discarding");
                let _ = self.pool.discard(index, buf);
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                counter!("transfer_errors").increment(1);
            }
            TransferOutcome::Fault => {
                warn!(sequence, "transfer fault, discarding partial frame");
                let _ = self.pool.discard(index, buf);
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                counter!("transfer_errors").increment(1);
            }
        }
    }

    fn length_valid(active: &ActiveFormat, bytes_used: usize) -> bool {
        match active.exact_len {
            Some(exact) => bytes_used == exact,
            // JPEG frames are variable-length up to the buffer capacity.
            None => bytes_used > 0 && bytes_used <= active.capacity,
        }
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            captured: self.counters.captured.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::PixelFormat;
    use crate::hw::sim::SimCapture;

    fn engine_with(
        buffers: usize,
        fmt: &StreamFormat,
    ) -> (Arc<CaptureEngine>, SimCapture, Arc<FrameBufferPool>) {
        let pool = Arc::new(FrameBufferPool::new(buffers, fmt.frame_capacity()));
        let sim = SimCapture::new();
        let engine = Arc::new(CaptureEngine::new(
            Arc::clone(&pool),
            Box::new(sim.clone()),
        ));
        engine.start(fmt).unwrap();
        (engine, sim, pool)
    }

    fn complete(engine: &CaptureEngine, sim: &SimCapture, len: usize) {
        engine.frame_sync();
        let mut buf = sim.take_transfer().expect("transfer programmed");
        buf.resize(len, 0xA5);
        engine.transfer_complete(buf, TransferOutcome::Complete { bytes_used: len });
    }

    #[test]
    fn captures_a_jpeg_frame() {
        let fmt = StreamFormat::new(PixelFormat::Jpeg, 320, 240);
        let (engine, sim, pool) = engine_with(2, &fmt);

        complete(&engine, &sim, 1000);
        assert_eq!(pool.ready_frames(), 1);
        assert_eq!(engine.stats().captured, 1);

        let frame = pool.claim_ready().unwrap();
        assert_eq!(frame.meta.sequence, 0);
        assert_eq!(frame.meta.bytes_used, 1000);
        assert_eq!(frame.data().len(), 1000);
    }

    #[test]
    fn exhausted_pool_drops_exactly_one() {
        let fmt = StreamFormat::new(PixelFormat::Jpeg, 320, 240);
        let (engine, sim, pool) = engine_with(1, &fmt);

        complete(&engine, &sim, 500);
        // Pool full: next frame-sync must drop, not block, not corrupt.
        engine.frame_sync();
        assert!(sim.take_transfer().is_none());
        assert_eq!(engine.stats().dropped, 1);
        assert_eq!(pool.ready_frames(), 1);
    }

    #[test]
    fn fixed_format_requires_exact_length() {
        let fmt = StreamFormat::new(PixelFormat::Rgb565, 96, 96);
        let (engine, sim, pool) = engine_with(2, &fmt);

        complete(&engine, &sim, 96 * 96 * 2 - 4);
        assert_eq!(pool.ready_frames(), 0);
        assert_eq!(engine.stats().errors, 1);

        complete(&engine, &sim, 96 * 96 * 2);
        assert_eq!(pool.ready_frames(), 1);
        assert_eq!(engine.stats().captured, 1);
    }

    #[test]
    fn fault_discards_partial_frame() {
        let fmt = StreamFormat::new(PixelFormat::Jpeg, 320, 240);
        let (engine, sim, pool) = engine_with(1, &fmt);

        engine.frame_sync();
        let buf = sim.take_transfer().unwrap();
        engine.transfer_complete(buf, TransferOutcome::Fault);

        assert_eq!(engine.stats().errors, 1);
        assert_eq!(pool.ready_frames(), 0);
        assert_eq!(pool.free_buffers(), 1);
    }

    #[test]
    fn oversized_jpeg_is_rejected() {
        let fmt = StreamFormat::new(PixelFormat::Jpeg, 96, 96);
        let (engine, sim, pool) = engine_with(1, &fmt);

        complete(&engine, &sim, fmt.frame_capacity() + 1);
        assert_eq!(pool.ready_frames(), 0);
        assert_eq!(engine.stats().errors, 1);
    }

    #[test]
    fn start_twice_is_rejected() {
        let fmt = StreamFormat::new(PixelFormat::Jpeg, 320, 240);
        let (engine, _sim, _pool) = engine_with(1, &fmt);
        assert!(matches!(
            engine.start(&fmt),
            Err(CameraError::AlreadyStreaming)
        ));
    }

    #[test]
    fn stop_recovers_in_flight_buffer() {
        let fmt = StreamFormat::new(PixelFormat::Jpeg, 320, 240);
        let (engine, sim, pool) = engine_with(1, &fmt);

        engine.frame_sync();
        assert!(sim.has_transfer());
        engine.stop();
        assert!(!sim.is_armed());
        assert_eq!(pool.free_buffers(), 1);

        // Idempotent from idle.
        engine.stop();
    }

    #[test]
    fn sequence_numbers_skip_nothing_delivered() {
        let fmt = StreamFormat::new(PixelFormat::Jpeg, 320, 240);
        let (engine, sim, pool) = engine_with(3, &fmt);

        for len in [100, 200, 300] {
            complete(&engine, &sim, len);
        }
        for expected in 0..3u64 {
            assert_eq!(pool.claim_ready().unwrap().meta.sequence, expected);
        }
    }
}
