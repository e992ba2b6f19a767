//! Hardware collaborator traits.
//!
//! The pipeline never touches registers directly; it drives these traits.
//! Real targets implement them over the platform HAL, development and tests
//! use the [`sim`] backend.

pub mod sim;

use bytes::BytesMut;

use crate::Result;

/// Generates the sensor's pixel clock.
pub trait PixelClock: Send {
    fn enable(&mut self, freq_hz: u32) -> Result<()>;
    fn disable(&mut self);
}

/// Register access to the sensor over the shared two-wire control bus.
///
/// Used only during initialization and format application, never on the
/// capture hot path.
pub trait ControlBus: Send {
    fn write_register(&mut self, addr: u8, value: u8) -> Result<()>;
    fn read_register(&mut self, addr: u8) -> Result<u8>;
}

/// The capture peripheral cannot accept a transfer right now; the buffer
/// travels back to the caller.
pub struct TransferRejected(pub BytesMut);

/// Result of a DMA transfer, reported through the interrupt dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Complete { bytes_used: usize },
    Fault,
}

/// The frame capture peripheral: frame-sync triggering plus DMA transfers.
///
/// Buffers are passed by value while a transfer is in flight and come back
/// through `transfer_complete` on the engine (or `abort_transfer` here), so
/// the DMA writer never aliases pipeline-owned memory.
pub trait CapturePeripheral: Send {
    /// Arm the peripheral to trigger on the next frame-sync signal.
    fn arm(&mut self) -> Result<()>;

    fn disarm(&mut self);

    /// Program a DMA transfer of one frame into `buf`.
    fn start_transfer(&mut self, buf: BytesMut) -> std::result::Result<(), TransferRejected>;

    /// Abort an in-flight transfer, recovering its buffer if the completion
    /// signal has not fired yet.
    fn abort_transfer(&mut self) -> Option<BytesMut>;
}
