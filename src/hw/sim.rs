//! Simulated hardware backend.
//!
//! Stands in for the real peripherals during development and in tests: an
//! in-memory banked register file for the control bus, a recording pixel
//! clock, and a capture peripheral whose DMA transfers are completed by
//! whatever thread plays the interrupt dispatch role.
//!
//! Every type is a cheap cloneable handle, so a test can keep one end while
//! the camera owns the other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::BytesMut;

use crate::hw::{CapturePeripheral, ControlBus, PixelClock, TransferRejected};
use crate::{CameraError, Result};

// Bank-select register of the simulated sensor, mirroring the OV2640 layout.
const BANK_SEL: u8 = 0xFF;

#[derive(Default)]
struct BusState {
    bank: u8,
    regs: HashMap<(u8, u8), u8>,
    fail: bool,
}

/// In-memory control bus with banked registers.
#[derive(Clone, Default)]
pub struct SimBus {
    state: Arc<Mutex<BusState>>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus with an OV2640 answering on it (PID 0x26, VER 0x41).
    pub fn with_ov2640_identity() -> Self {
        let bus = Self::new();
        bus.preload(0x01, 0x0A, 0x26);
        bus.preload(0x01, 0x0B, 0x41);
        bus
    }

    pub fn preload(&self, bank: u8, addr: u8, value: u8) {
        self.state.lock().unwrap().regs.insert((bank, addr), value);
    }

    /// Last value written to a register, if any.
    pub fn written(&self, bank: u8, addr: u8) -> Option<u8> {
        self.state.lock().unwrap().regs.get(&(bank, addr)).copied()
    }

    pub fn set_fail(&self, fail: bool) {
        self.state.lock().unwrap().fail = fail;
    }
}

impl ControlBus for SimBus {
    fn write_register(&mut self, addr: u8, value: u8) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail {
            return Err(CameraError::Bus("simulated bus failure".into()));
        }
        if addr == BANK_SEL {
            state.bank = value;
        } else {
            let bank = state.bank;
            state.regs.insert((bank, addr), value);
        }
        Ok(())
    }

    fn read_register(&mut self, addr: u8) -> Result<u8> {
        let state = self.state.lock().unwrap();
        if state.fail {
            return Err(CameraError::Bus("simulated bus failure".into()));
        }
        Ok(state.regs.get(&(state.bank, addr)).copied().unwrap_or(0))
    }
}

#[derive(Default)]
struct ClockState {
    enabled: bool,
    freq_hz: Option<u32>,
    fail: bool,
}

/// Recording pixel clock.
#[derive(Clone, Default)]
pub struct SimClock {
    state: Arc<Mutex<ClockState>>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().unwrap().enabled
    }

    pub fn freq_hz(&self) -> Option<u32> {
        self.state.lock().unwrap().freq_hz
    }

    pub fn set_fail(&self, fail: bool) {
        self.state.lock().unwrap().fail = fail;
    }
}

impl PixelClock for SimClock {
    fn enable(&mut self, freq_hz: u32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail {
            return Err(CameraError::HardwareInit(
                "simulated clock failure".into(),
            ));
        }
        state.enabled = true;
        state.freq_hz = Some(freq_hz);
        Ok(())
    }

    fn disable(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.enabled = false;
        state.freq_hz = None;
    }
}

#[derive(Default)]
struct CaptureState {
    armed: bool,
    in_flight: Option<BytesMut>,
    fail_arm: bool,
    reject_transfers: bool,
}

/// Capture peripheral whose transfers are driven from the outside: the
/// engine programs a buffer in, the signal-generator thread takes it with
/// [`SimCapture::take_transfer`], fills it, and reports completion back
/// through the engine.
#[derive(Clone, Default)]
pub struct SimCapture {
    state: Arc<Mutex<CaptureState>>,
}

impl SimCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        self.state.lock().unwrap().armed
    }

    pub fn has_transfer(&self) -> bool {
        self.state.lock().unwrap().in_flight.is_some()
    }

    /// Take the programmed DMA buffer, acting as the transfer engine.
    pub fn take_transfer(&self) -> Option<BytesMut> {
        self.state.lock().unwrap().in_flight.take()
    }

    pub fn set_fail_arm(&self, fail: bool) {
        self.state.lock().unwrap().fail_arm = fail;
    }

    pub fn set_reject_transfers(&self, reject: bool) {
        self.state.lock().unwrap().reject_transfers = reject;
    }
}

impl CapturePeripheral for SimCapture {
    fn arm(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_arm {
            return Err(CameraError::HardwareInit(
                "simulated peripheral failure".into(),
            ));
        }
        state.armed = true;
        Ok(())
    }

    fn disarm(&mut self) {
        self.state.lock().unwrap().armed = false;
    }

    fn start_transfer(&mut self, buf: BytesMut) -> std::result::Result<(), TransferRejected> {
        let mut state = self.state.lock().unwrap();
        if !state.armed || state.reject_transfers || state.in_flight.is_some() {
            return Err(TransferRejected(buf));
        }
        state.in_flight = Some(buf);
        Ok(())
    }

    fn abort_transfer(&mut self) -> Option<BytesMut> {
        self.state.lock().unwrap().in_flight.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_banks_are_independent() {
        let mut bus = SimBus::new();
        bus.write_register(BANK_SEL, 0x00).unwrap();
        bus.write_register(0x5A, 0x50).unwrap();
        bus.write_register(BANK_SEL, 0x01).unwrap();
        assert_eq!(bus.read_register(0x5A).unwrap(), 0);
        assert_eq!(bus.written(0x00, 0x5A), Some(0x50));
    }

    #[test]
    fn capture_rejects_when_disarmed() {
        let mut cap = SimCapture::new();
        assert!(cap.start_transfer(BytesMut::new()).is_err());
        cap.arm().unwrap();
        assert!(cap.start_transfer(BytesMut::new()).is_ok());
        assert!(cap.has_transfer());
    }
}
