//! Artemis demo: stream the capture pipeline against simulated hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use artemis::hw::sim::{SimBus, SimCapture, SimClock};
use artemis::hw::TransferOutcome;
use artemis::{
    Camera, CameraConfig, CameraError, CameraHardware, PixelFormat, StreamFormat, VideoDevice,
};
use bytes::BytesMut;
use color_eyre::Result;
use tracing::{info, warn};

fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("artemis=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Artemis launching...");

    let config = CameraConfig::default();
    let capture = SimCapture::new();
    let camera = Camera::new(
        config,
        CameraHardware {
            bus: Box::new(SimBus::with_ov2640_identity()),
            clock: Box::new(SimClock::new()),
            capture: Box::new(capture.clone()),
        },
    )?;

    camera.set_format(StreamFormat::new(PixelFormat::Jpeg, 640, 480))?;
    camera.stream_start()?;

    // Signal-generator thread standing in for the vsync/DMA interrupt
    // context: raises a frame-sync at ~30 fps and completes each programmed
    // transfer with a synthetic JPEG payload.
    let engine = camera.engine();
    let running = Arc::new(AtomicBool::new(true));
    let hw_thread = {
        let running = Arc::clone(&running);
        let capture = capture.clone();
        thread::spawn(move || {
            let mut frame_no = 0u8;
            while running.load(Ordering::Relaxed) {
                engine.frame_sync();
                if let Some(mut buf) = capture.take_transfer() {
                    let bytes_used = synth_jpeg(&mut buf, frame_no);
                    engine.transfer_complete(buf, TransferOutcome::Complete { bytes_used });
                    frame_no = frame_no.wrapping_add(1);
                }
                thread::sleep(Duration::from_millis(33));
            }
        })
    };

    for _ in 0..60 {
        match camera.dequeue(Some(Duration::from_secs(1))) {
            Ok(frame) => {
                info!(
                    seq = frame.meta.sequence,
                    bytes = frame.meta.bytes_used,
                    latency_us = frame.meta.timestamp.elapsed().as_micros() as u64,
                    "frame"
                );
                camera.enqueue(frame)?;
            }
            Err(CameraError::Timeout) => warn!("no frame within a second"),
            Err(e) => return Err(e.into()),
        }
    }

    running.store(false, Ordering::Relaxed);
    let _ = hw_thread.join();

    let stats = camera.stream_stop()?;
    info!(
        captured = stats.captured,
        dropped = stats.dropped,
        errors = stats.errors,
        "Artemis shutting down"
    );
    Ok(())
}

/// Fill `buf` with a JPEG-shaped payload: SOI marker, patterned body, EOI.
fn synth_jpeg(buf: &mut BytesMut, frame_no: u8) -> usize {
    let body_len = 2048 + usize::from(frame_no) * 16;
    buf.extend_from_slice(&[0xFF, 0xD8]);
    buf.extend(std::iter::repeat(frame_no).take(body_len));
    buf.extend_from_slice(&[0xFF, 0xD9]);
    buf.len()
}
