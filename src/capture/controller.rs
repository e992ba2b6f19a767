//! Streaming controller: the single point of truth for "are we capturing".
//!
//! Serializes start/stop/format changes through one state machine and owns
//! the only blocking wait in the system, the consumer side of `dequeue`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, instrument};

use crate::capture::engine::{CaptureEngine, CaptureStats};
use crate::capture::frame::{Frame, StreamFormat};
use crate::capture::pool::FrameBufferPool;
use crate::hw::PixelClock;
use crate::sensor::SensorControl;
use crate::video::Capabilities;
use crate::{CameraError, Result};

/// Stream lifecycle. STARTING and STOPPING are only ever observed by calls
/// racing a transition; both resolve synchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingState {
    Stopped,
    Starting,
    Streaming,
    Stopping,
}

pub struct StreamingController {
    state: Mutex<StreamingState>,
    format: Mutex<StreamFormat>,
    caps: Capabilities,
    pool: Arc<FrameBufferPool>,
    engine: Arc<CaptureEngine>,
    clock: Mutex<Box<dyn PixelClock>>,
    sensor: Mutex<Box<dyn SensorControl>>,
    xclk_freq_hz: u32,
}

impl StreamingController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        caps: Capabilities,
        initial_format: StreamFormat,
        xclk_freq_hz: u32,
        pool: Arc<FrameBufferPool>,
        engine: Arc<CaptureEngine>,
        clock: Box<dyn PixelClock>,
        sensor: Box<dyn SensorControl>,
    ) -> Self {
        Self {
            state: Mutex::new(StreamingState::Stopped),
            format: Mutex::new(initial_format),
            caps,
            pool,
            engine,
            clock: Mutex::new(clock),
            sensor: Mutex::new(sensor),
            xclk_freq_hz,
        }
    }

    pub fn state(&self) -> StreamingState {
        *self.state.lock().unwrap()
    }

    pub fn format(&self) -> StreamFormat {
        *self.format.lock().unwrap()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps.clone()
    }

    pub fn stats(&self) -> CaptureStats {
        self.engine.stats()
    }

    /// Bring the pipeline up: pool reset, pixel clock, sensor format, engine
    /// arm. Any hardware failure rolls everything back to STOPPED.
    #[instrument(skip(self))]
    pub fn request_start(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != StreamingState::Stopped {
                return Err(CameraError::AlreadyStreaming);
            }
            *state = StreamingState::Starting;
        }

        let fmt = self.format();
        self.pool.configure(fmt.frame_capacity());

        let brought_up = self.bring_up_hardware(&fmt);
        match brought_up {
            Ok(()) => {
                *self.state.lock().unwrap() = StreamingState::Streaming;
                info!(?fmt, "stream started");
                Ok(())
            }
            Err(e) => {
                self.engine.stop();
                self.clock.lock().unwrap().disable();
                *self.state.lock().unwrap() = StreamingState::Stopped;
                Err(match e {
                    CameraError::HardwareInit(_) => e,
                    other => CameraError::HardwareInit(other.to_string()),
                })
            }
        }
    }

    fn bring_up_hardware(&self, fmt: &StreamFormat) -> Result<()> {
        self.clock.lock().unwrap().enable(self.xclk_freq_hz)?;
        self.sensor.lock().unwrap().apply_format(fmt)?;
        self.engine.start(fmt)
    }

    /// Tear the pipeline down. Undelivered frames are discarded; any consumer
    /// blocked in `dequeue_frame` wakes with `NotStreaming`. Reports the
    /// session's frame totals.
    pub fn request_stop(&self) -> Result<CaptureStats> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != StreamingState::Streaming {
                return Err(CameraError::NotStreaming);
            }
            *state = StreamingState::Stopping;
        }

        self.engine.stop();
        self.clock.lock().unwrap().disable();
        let stats = self.engine.stats();
        self.pool.reset();
        *self.state.lock().unwrap() = StreamingState::Stopped;
        info!(
            captured = stats.captured,
            dropped = stats.dropped,
            errors = stats.errors,
            "stream stopped"
        );
        Ok(stats)
    }

    /// Change the negotiated format. Only legal while STOPPED; an in-flight
    /// DMA sized for the old format must never race a consumer expecting the
    /// new one.
    pub fn set_format(&self, fmt: StreamFormat) -> Result<()> {
        let state = self.state.lock().unwrap();
        if *state != StreamingState::Stopped {
            return Err(CameraError::InvalidState(*state));
        }
        if !self.caps.supports(&fmt) {
            return Err(CameraError::UnsupportedFormat(fmt));
        }
        *self.format.lock().unwrap() = fmt;
        Ok(())
    }

    /// Claim the oldest completed frame, blocking up to `timeout`. `None`
    /// waits forever, zero polls once. Stopping the stream wakes blocked
    /// callers with `NotStreaming`.
    pub fn dequeue_frame(&self, timeout: Option<Duration>) -> Result<Frame> {
        if self.state() != StreamingState::Streaming {
            return Err(CameraError::NotStreaming);
        }
        match self.pool.claim_ready_wait(timeout) {
            Some(frame) => Ok(frame),
            None if self.state() != StreamingState::Streaming => Err(CameraError::NotStreaming),
            None => Err(CameraError::Timeout),
        }
    }

    /// Hand a consumed frame's buffer back to the pool.
    pub fn enqueue_frame(&self, frame: Frame) -> Result<()> {
        self.pool.release(frame)
    }
}
