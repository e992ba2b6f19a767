pub mod controller;
pub mod engine;
pub mod frame;
pub mod pool;

pub use controller::{StreamingController, StreamingState};
pub use engine::{CaptureEngine, CaptureStats};
pub use frame::{BufferHandle, Frame, FrameMetadata, PixelFormat, StreamFormat};
pub use pool::{BufferState, FrameBufferPool};
