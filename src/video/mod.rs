//! Consumer-facing video device surface.

pub mod camera;

pub use camera::{Camera, CameraHardware};

use std::time::Duration;

use crate::capture::frame::{Frame, PixelFormat, StreamFormat};
use crate::capture::CaptureStats;
use crate::Result;

/// Bounds and step alignment for one pixel format.
#[derive(Debug, Clone, Copy)]
pub struct FormatCaps {
    pub pixel_format: PixelFormat,
    pub width_min: u32,
    pub width_max: u32,
    pub width_step: u32,
    pub height_min: u32,
    pub height_max: u32,
    pub height_step: u32,
}

impl FormatCaps {
    fn admits(&self, fmt: &StreamFormat) -> bool {
        fmt.pixel_format == self.pixel_format
            && (self.width_min..=self.width_max).contains(&fmt.width)
            && (self.height_min..=self.height_max).contains(&fmt.height)
            && fmt.width % self.width_step == 0
            && fmt.height % self.height_step == 0
    }
}

/// What the device can do, advertised before any negotiation.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub formats: &'static [FormatCaps],
    pub min_buffer_count: u32,
}

impl Capabilities {
    pub fn supports(&self, fmt: &StreamFormat) -> bool {
        self.formats.iter().any(|caps| caps.admits(fmt))
    }
}

/// The standard device-driver surface. One implementation per sensor
/// variant; consumers hold the trait, not the concrete type.
pub trait VideoDevice {
    fn capabilities(&self) -> Capabilities;

    fn format(&self) -> StreamFormat;

    /// Negotiate a new format. Rejected while streaming.
    fn set_format(&self, fmt: StreamFormat) -> Result<()>;

    fn stream_start(&self) -> Result<()>;

    /// Stop streaming and report the session's frame totals.
    fn stream_stop(&self) -> Result<CaptureStats>;

    /// Return a consumed frame's buffer to the pool.
    fn enqueue(&self, frame: Frame) -> Result<()>;

    /// Wait for the next completed frame. `None` waits forever, zero polls.
    fn dequeue(&self, timeout: Option<Duration>) -> Result<Frame>;
}
