//! OV2640 sensor driver: probe and format relay over the two-wire bus.

use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::capture::frame::{PixelFormat, StreamFormat};
use crate::hw::ControlBus;
use crate::sensor::{SensorControl, SensorId};
use crate::video::FormatCaps;
use crate::{CameraError, Result};

/// Product ID the OV2640 reports.
pub const OV2640_PID: u8 = 0x26;

/// Fewer buffers than this cannot sustain streaming.
pub const MIN_BUFFER_COUNT: u32 = 1;

/// Formats this pipeline advertises. JPEG spans the full sensor range; raw
/// formats stop at SVGA, the most the 8-bit parallel bus sustains at the
/// configured pixel clock.
pub const FORMAT_CAPS: &[FormatCaps] = &[
    FormatCaps {
        pixel_format: PixelFormat::Jpeg,
        width_min: 96,
        width_max: 1600,
        width_step: 2,
        height_min: 96,
        height_max: 1200,
        height_step: 2,
    },
    FormatCaps {
        pixel_format: PixelFormat::Rgb565,
        width_min: 96,
        width_max: 800,
        width_step: 2,
        height_min: 96,
        height_max: 600,
        height_step: 2,
    },
    FormatCaps {
        pixel_format: PixelFormat::Yuv422,
        width_min: 96,
        width_max: 800,
        width_step: 2,
        height_min: 96,
        height_max: 600,
        height_step: 2,
    },
];

// Register banks, selected through BANK_SEL.
const BANK_SEL: u8 = 0xFF;
const BANK_DSP: u8 = 0x00;
const BANK_SENSOR: u8 = 0x01;

// Sensor bank.
const COM7: u8 = 0x12;
const COM7_SRST: u8 = 0x80;
const REG_PID: u8 = 0x0A;
const REG_VER: u8 = 0x0B;

// DSP bank.
const R_RESET: u8 = 0xE0;
const RESET_DVP: u8 = 0x04;
const ZMOW: u8 = 0x5A;
const ZMOH: u8 = 0x5B;
const ZMHH: u8 = 0x5C;
const IMAGE_MODE: u8 = 0xDA;
const IMAGE_MODE_JPEG: u8 = 0x10;
const IMAGE_MODE_RGB565: u8 = 0x08;
const IMAGE_MODE_YUV422: u8 = 0x00;

pub struct Ov2640 {
    bus: Box<dyn ControlBus>,
}

impl Ov2640 {
    pub fn new(bus: Box<dyn ControlBus>) -> Self {
        Self { bus }
    }

    /// Software-reset the sensor and verify its identity.
    pub fn probe(&mut self) -> Result<SensorId> {
        self.bus.write_register(BANK_SEL, BANK_SENSOR)?;
        self.bus.write_register(COM7, COM7_SRST)?;
        // Datasheet: settle after software reset before further access.
        thread::sleep(Duration::from_millis(10));

        let pid = self.bus.read_register(REG_PID)?;
        let ver = self.bus.read_register(REG_VER)?;
        if pid != OV2640_PID {
            return Err(CameraError::HardwareInit(format!(
                "unexpected sensor id {pid:#04x} (want {OV2640_PID:#04x})"
            )));
        }
        info!(pid, ver, "OV2640 identified");
        Ok(SensorId { pid, ver })
    }
}

impl SensorControl for Ov2640 {
    /// Program output size and mode. The DSP output-size registers hold the
    /// dimensions divided by four, with overflow bits collected in ZMHH.
    fn apply_format(&mut self, fmt: &StreamFormat) -> Result<()> {
        debug!(?fmt, "applying sensor format");
        let w4 = fmt.width / 4;
        let h4 = fmt.height / 4;

        self.bus.write_register(BANK_SEL, BANK_DSP)?;
        self.bus.write_register(R_RESET, RESET_DVP)?;
        self.bus.write_register(ZMOW, (w4 & 0xFF) as u8)?;
        self.bus.write_register(ZMOH, (h4 & 0xFF) as u8)?;
        self.bus
            .write_register(ZMHH, (((w4 >> 8) & 0x03) | (((h4 >> 8) & 0x01) << 2)) as u8)?;

        let mode = match fmt.pixel_format {
            PixelFormat::Jpeg => IMAGE_MODE_JPEG,
            PixelFormat::Rgb565 => IMAGE_MODE_RGB565,
            PixelFormat::Yuv422 | PixelFormat::Grayscale => IMAGE_MODE_YUV422,
        };
        self.bus.write_register(IMAGE_MODE, mode)?;
        self.bus.write_register(R_RESET, 0x00)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::sim::SimBus;

    #[test]
    fn probe_accepts_ov2640() {
        let bus = SimBus::with_ov2640_identity();
        let mut sensor = Ov2640::new(Box::new(bus.clone()));
        let id = sensor.probe().unwrap();
        assert_eq!(id.pid, OV2640_PID);
    }

    #[test]
    fn probe_rejects_unknown_sensor() {
        let bus = SimBus::new();
        bus.preload(BANK_SENSOR, REG_PID, 0x77);
        let mut sensor = Ov2640::new(Box::new(bus.clone()));
        assert!(matches!(
            sensor.probe(),
            Err(CameraError::HardwareInit(_))
        ));
    }

    #[test]
    fn apply_format_programs_output_size() {
        let bus = SimBus::with_ov2640_identity();
        let mut sensor = Ov2640::new(Box::new(bus.clone()));
        let fmt = StreamFormat::new(PixelFormat::Jpeg, 1600, 1200);
        sensor.apply_format(&fmt).unwrap();

        assert_eq!(bus.written(BANK_DSP, ZMOW), Some((1600 / 4 & 0xFF) as u8));
        assert_eq!(bus.written(BANK_DSP, ZMOH), Some((1200 / 4 & 0xFF) as u8));
        // 400 = 0x190, 300 = 0x12C: one overflow bit each.
        assert_eq!(bus.written(BANK_DSP, ZMHH), Some(0x01 | 0x04));
        assert_eq!(bus.written(BANK_DSP, IMAGE_MODE), Some(IMAGE_MODE_JPEG));
    }
}
