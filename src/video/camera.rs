//! OV2640 video device: wires sensor, clock and capture pipeline together.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::capture::engine::CaptureEngine;
use crate::capture::frame::{Frame, StreamFormat};
use crate::capture::pool::FrameBufferPool;
use crate::capture::{CaptureStats, StreamingController};
use crate::hw::{CapturePeripheral, ControlBus, PixelClock};
use crate::sensor::{ov2640, Ov2640};
use crate::video::{Capabilities, VideoDevice};
use crate::{CameraConfig, Result};

/// The collaborator set for one physical camera.
pub struct CameraHardware {
    pub bus: Box<dyn ControlBus>,
    pub clock: Box<dyn PixelClock>,
    pub capture: Box<dyn CapturePeripheral>,
}

/// An OV2640 behind the standard video device surface.
pub struct Camera {
    controller: StreamingController,
    engine: Arc<CaptureEngine>,
}

impl Camera {
    /// Probe the sensor and build the capture pipeline. Buffer memory is
    /// allocated here, once; streaming allocates nothing.
    pub fn new(config: CameraConfig, hw: CameraHardware) -> Result<Self> {
        let CameraHardware {
            bus,
            mut clock,
            capture,
        } = hw;

        let mut sensor = Ov2640::new(bus);
        // The sensor needs its pixel clock to talk; drop it again until the
        // stream actually starts.
        clock.enable(config.xclk_freq_hz)?;
        let probed = sensor.probe();
        clock.disable();
        let id = probed?;
        info!(pid = id.pid, ver = id.ver, "camera probed");

        let caps = Capabilities {
            formats: ov2640::FORMAT_CAPS,
            min_buffer_count: ov2640::MIN_BUFFER_COUNT,
        };
        let buffer_count = config.buffer_count.max(ov2640::MIN_BUFFER_COUNT) as usize;
        let pool = Arc::new(FrameBufferPool::new(
            buffer_count,
            config.format.frame_capacity(),
        ));
        let engine = Arc::new(CaptureEngine::new(Arc::clone(&pool), capture));
        let controller = StreamingController::new(
            caps,
            config.format,
            config.xclk_freq_hz,
            pool,
            Arc::clone(&engine),
            clock,
            Box::new(sensor),
        );

        Ok(Self { controller, engine })
    }

    /// The signal target for the platform's interrupt dispatch: wire the
    /// frame-sync and DMA-completion interrupts to this engine's handlers.
    pub fn engine(&self) -> Arc<CaptureEngine> {
        Arc::clone(&self.engine)
    }

    /// Frame totals for the current session.
    pub fn stats(&self) -> CaptureStats {
        self.controller.stats()
    }
}

impl VideoDevice for Camera {
    fn capabilities(&self) -> Capabilities {
        self.controller.capabilities()
    }

    fn format(&self) -> StreamFormat {
        self.controller.format()
    }

    fn set_format(&self, fmt: StreamFormat) -> Result<()> {
        self.controller.set_format(fmt)
    }

    fn stream_start(&self) -> Result<()> {
        self.controller.request_start()
    }

    fn stream_stop(&self) -> Result<CaptureStats> {
        self.controller.request_stop()
    }

    fn enqueue(&self, frame: Frame) -> Result<()> {
        self.controller.enqueue_frame(frame)
    }

    fn dequeue(&self, timeout: Option<Duration>) -> Result<Frame> {
        self.controller.dequeue_frame(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::sim::{SimBus, SimCapture, SimClock};
    use crate::CameraError;

    fn sim_camera() -> (Camera, SimClock) {
        let clock = SimClock::new();
        let camera = Camera::new(
            CameraConfig::default(),
            CameraHardware {
                bus: Box::new(SimBus::with_ov2640_identity()),
                clock: Box::new(clock.clone()),
                capture: Box::new(SimCapture::new()),
            },
        )
        .unwrap();
        (camera, clock)
    }

    #[test]
    fn new_probes_then_parks_the_clock() {
        let (camera, clock) = sim_camera();
        assert!(!clock.is_enabled());
        assert_eq!(camera.format(), CameraConfig::default().format);
    }

    #[test]
    fn new_rejects_wrong_sensor() {
        let bus = SimBus::new();
        bus.preload(0x01, 0x0A, 0x99);
        let result = Camera::new(
            CameraConfig::default(),
            CameraHardware {
                bus: Box::new(bus),
                clock: Box::new(SimClock::new()),
                capture: Box::new(SimCapture::new()),
            },
        );
        assert!(matches!(result, Err(CameraError::HardwareInit(_))));
    }

    #[test]
    fn start_enables_clock_at_configured_rate() {
        let (camera, clock) = sim_camera();
        camera.stream_start().unwrap();
        assert_eq!(clock.freq_hz(), Some(20_000_000));
        camera.stream_stop().unwrap();
        assert!(!clock.is_enabled());
    }
}
