//! Artemis camera capture pipeline
//!
//! Presents an OV2640-class image sensor and its DMA-fed capture pipeline as
//! a video device: format negotiation, buffer queueing, stream start/stop and
//! frame delivery. Hardware access goes through the collaborator traits in
//! [`hw`], so the same pipeline runs against real peripherals or the
//! simulated backend.

pub mod capture;
pub mod hw;
pub mod sensor;
pub mod video;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use capture::{
    BufferHandle, CaptureStats, Frame, FrameMetadata, PixelFormat, StreamFormat, StreamingState,
};
pub use video::{Camera, CameraHardware, Capabilities, VideoDevice};

/// Per-device configuration, one instance per physical camera.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Pixel clock fed to the sensor, in Hz.
    pub xclk_freq_hz: u32,
    /// Number of frame buffers in the pool. Clamped to at least one.
    pub buffer_count: u32,
    /// Format active until the first `set_format` call.
    pub format: StreamFormat,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            xclk_freq_hz: 20_000_000,
            buffer_count: 2,
            format: StreamFormat::new(PixelFormat::Jpeg, 320, 240),
        }
    }
}

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("format not supported: {0:?}")]
    UnsupportedFormat(StreamFormat),

    #[error("operation invalid while {0:?}")]
    InvalidState(StreamingState),

    #[error("stream already running")]
    AlreadyStreaming,

    #[error("stream is not running")]
    NotStreaming,

    #[error("no frame available within the timeout")]
    Timeout,

    #[error("buffer handle does not refer to a frame in use")]
    InvalidHandle,

    #[error("hardware init failed: {0}")]
    HardwareInit(String),

    #[error("control bus error: {0}")]
    Bus(String),
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;
