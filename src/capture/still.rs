use super::CaptureSource;
use anyhow::{Context, Result};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::imaging::Frame;

/// Replays one still image as a camera stream at a fixed frame interval.
pub struct StillCapture {
    frame: Frame,
    interval: Duration,
    next_due: Option<Instant>,
}

impl StillCapture {
    pub fn open<P: AsRef<Path>>(path: P, fps: u32) -> Result<Self> {
        let path = path.as_ref();
        let frame = image::open(path)
            .with_context(|| format!("Failed to open still image {}", path.display()))?
            .to_rgba8();
        let interval = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
        Ok(Self::from_frame(frame, interval))
    }

    pub fn from_frame(frame: Frame, interval: Duration) -> Self {
        Self {
            frame,
            interval,
            next_due: None,
        }
    }
}

impl CaptureSource for StillCapture {
    fn capture_frame(&mut self) -> Result<Frame> {
        let now = Instant::now();
        if let Some(due) = self.next_due {
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        self.next_due = Some(Instant::now() + self.interval);
        Ok(self.frame.clone())
    }

    fn resolution(&self) -> (u32, u32) {
        self.frame.dimensions()
    }
}
