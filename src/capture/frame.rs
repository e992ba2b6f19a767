use std::time::Instant;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

/// Pixel formats the sensor can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Compressed, variable-length frames.
    Jpeg,
    Rgb565,
    Yuv422,
    Grayscale,
}

impl PixelFormat {
    /// Bytes per pixel on the parallel bus. JPEG streams one byte per clock.
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Jpeg | Self::Grayscale => 1,
            Self::Rgb565 | Self::Yuv422 => 2,
        }
    }
}

// Worst-case compression ratio used to size JPEG buffers. Holds for the
// quality divisor the sensor is configured with.
const JPEG_CAPACITY_DIV: u32 = 4;

/// Negotiated stream format. Immutable while streaming is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Bytes per line.
    pub pitch: u32,
}

impl StreamFormat {
    pub fn new(pixel_format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            pixel_format,
            width,
            height,
            pitch: width * pixel_format.bytes_per_pixel(),
        }
    }

    /// Exact frame length in bytes, or `None` for variable-length JPEG.
    pub fn exact_frame_len(&self) -> Option<usize> {
        match self.pixel_format {
            PixelFormat::Jpeg => None,
            _ => Some((self.pitch * self.height) as usize),
        }
    }

    /// Buffer capacity required to hold any frame of this format.
    pub fn frame_capacity(&self) -> usize {
        match self.exact_frame_len() {
            Some(len) => len,
            None => (self.width * self.height / JPEG_CAPACITY_DIV).max(1) as usize,
        }
    }
}

/// Identifies one buffer in the pool. Stale handles are rejected on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferHandle(pub(crate) usize);

impl BufferHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Frame metadata
#[derive(Debug, Clone, Copy)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Bytes actually transferred; equals the payload length.
    pub bytes_used: usize,
    /// Frame-sync timestamp for latency tracking.
    pub timestamp: Instant,
}

/// A completed frame on loan to the consumer.
///
/// The frame keeps exclusive ownership of its buffer until it is handed back
/// through `enqueue`, so it is deliberately not `Clone`.
pub struct Frame {
    handle: BufferHandle,
    payload: BytesMut,
    pub meta: FrameMetadata,
}

impl Frame {
    pub(crate) fn new(handle: BufferHandle, payload: BytesMut, meta: FrameMetadata) -> Self {
        Self {
            handle,
            payload,
            meta,
        }
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    /// Frame payload, opaque to the pipeline (raw or JPEG bytes).
    pub fn data(&self) -> &[u8] {
        &self.payload
    }

    pub(crate) fn into_storage(self) -> (BufferHandle, BytesMut) {
        (self.handle, self.payload)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("handle", &self.handle)
            .field("len", &self.payload.len())
            .field("meta", &self.meta)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_len_for_fixed_formats() {
        let fmt = StreamFormat::new(PixelFormat::Rgb565, 320, 240);
        assert_eq!(fmt.pitch, 640);
        assert_eq!(fmt.exact_frame_len(), Some(320 * 240 * 2));
        assert_eq!(fmt.frame_capacity(), 320 * 240 * 2);
    }

    #[test]
    fn jpeg_is_variable_length() {
        let fmt = StreamFormat::new(PixelFormat::Jpeg, 1600, 1200);
        assert_eq!(fmt.pitch, 1600);
        assert_eq!(fmt.exact_frame_len(), None);
        assert_eq!(fmt.frame_capacity(), (1600 * 1200 / 4) as usize);
    }
}
