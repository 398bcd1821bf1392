#[cfg(feature = "loopback")]
mod loopback;

#[cfg(feature = "loopback")]
pub use loopback::V4L2Output;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;

use crate::imaging::Frame;

/// Trait for output destinations
pub trait OutputSink: Send {
    /// Write a finished frame to the output
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;
}

/// In-memory display: holds the most recently presented frame.
pub struct DisplaySlot {
    tx: watch::Sender<Option<Arc<Frame>>>,
    presented: Arc<AtomicU64>,
}

/// Read side of a [`DisplaySlot`].
#[derive(Clone)]
pub struct DisplayWatch {
    rx: watch::Receiver<Option<Arc<Frame>>>,
    presented: Arc<AtomicU64>,
}

impl DisplaySlot {
    pub fn new() -> (Self, DisplayWatch) {
        let (tx, rx) = watch::channel(None);
        let presented = Arc::new(AtomicU64::new(0));
        let watch = DisplayWatch {
            rx,
            presented: Arc::clone(&presented),
        };
        (Self { tx, presented }, watch)
    }
}

impl OutputSink for DisplaySlot {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.tx.send_replace(Some(Arc::new(frame.clone())));
        self.presented.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl DisplayWatch {
    /// Frame currently on display, if any was presented yet.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.rx.borrow().clone()
    }

    /// Number of frames presented so far.
    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::SeqCst)
    }

    /// Wait for the next presented frame. `None` once the slot is gone.
    pub async fn next_frame(&mut self) -> Option<Arc<Frame>> {
        self.rx.changed().await.ok()?;
        self.rx.borrow_and_update().clone()
    }

    /// Save the frame on display as an image file.
    pub fn save_latest<P: AsRef<Path>>(&self, path: P) -> Result<bool> {
        let path = path.as_ref();
        let Some(frame) = self.latest() else {
            return Ok(false);
        };
        frame
            .save(path)
            .with_context(|| format!("Failed to save snapshot to {}", path.display()))?;
        Ok(true)
    }
}
