mod still;
#[cfg(feature = "camera")]
mod webcam;

pub use still::StillCapture;
#[cfg(feature = "camera")]
pub use webcam::WebcamCapture;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use tokio::sync::watch;

use crate::error::PipelineError;
use crate::imaging::Frame;
use crate::readiness::Readiness;

/// Latest captured frame, shared with the frame loop.
pub type FrameSnapshot = Option<Arc<Frame>>;

/// Trait for camera capture sources
pub trait CaptureSource {
    /// Capture a single frame, blocking until one is available
    fn capture_frame(&mut self) -> Result<Frame>;

    /// Get the resolution of captured frames
    fn resolution(&self) -> (u32, u32);
}

/// A running capture thread publishing into a frame channel.
///
/// The source is opened on the capture thread itself, since camera handles
/// are generally not `Send`. Signals `camera_started` on the first decoded
/// frame and `camera_failed` when opening or capturing errors; a failed feed
/// does not retry.
pub struct CameraFeed {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CameraFeed {
    pub fn start<S, F>(open: F, frames: Arc<watch::Sender<FrameSnapshot>>, readiness: Readiness) -> Self
    where
        S: CaptureSource,
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = thread::spawn(move || {
            let mut source = match open() {
                Ok(source) => source,
                Err(err) => {
                    tracing::error!("Failed to open camera: {err:#}");
                    readiness.camera_failed(&PipelineError::CameraAccess(format!("{err:#}")));
                    return;
                }
            };
            let (width, height) = source.resolution();
            tracing::info!("Camera feed running at {}x{}", width, height);

            let mut first = true;
            while !stop_flag.load(Ordering::Relaxed) {
                match source.capture_frame() {
                    Ok(frame) => {
                        frames.send_replace(Some(Arc::new(frame)));
                        if first {
                            first = false;
                            tracing::info!("First camera frame decoded");
                            readiness.camera_started();
                        }
                    }
                    Err(err) => {
                        tracing::error!("Camera capture failed: {err:#}");
                        readiness.camera_failed(&PipelineError::CameraAccess(format!("{err:#}")));
                        break;
                    }
                }
            }
            frames.send_replace(None);
            readiness.camera_stopped();
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop the capture thread and wait for it. Only the first call does
    /// anything; returns whether it was this call.
    pub fn stop(&mut self) -> bool {
        self.stop.store(true, Ordering::SeqCst);
        match self.handle.take() {
            Some(handle) => {
                if handle.join().is_err() {
                    tracing::warn!("Camera thread panicked");
                }
                tracing::info!("Camera feed stopped");
                true
            }
            None => false,
        }
    }
}

impl Drop for CameraFeed {
    fn drop(&mut self) {
        self.stop();
    }
}
