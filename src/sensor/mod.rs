pub mod ov2640;

pub use ov2640::Ov2640;

use crate::capture::frame::StreamFormat;
use crate::Result;

/// Identity read back from a probed sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorId {
    pub pid: u8,
    pub ver: u8,
}

/// Sensor-side configuration relay. Register traffic happens only here,
/// while the stream is stopped, never on the capture hot path.
pub trait SensorControl: Send {
    fn apply_format(&mut self, fmt: &StreamFormat) -> Result<()>;
}
