//! Real-time background replacement for a camera feed.
//!
//! A segmentation backend produces a foreground mask for each frame; the
//! mask is reconciled to the frame's size, and the foreground is composited
//! over a chosen backdrop. A readiness gate decides when the frame loop may
//! run, and the loop keeps at most one inference call outstanding.

pub mod background;
pub mod capture;
pub mod compositor;
pub mod config;
pub mod control;
pub mod controller;
pub mod error;
pub mod imaging;
pub mod output;
pub mod readiness;
pub mod scheduler;
pub mod segmentation;

pub use config::{Enhancement, PipelineConfig, SchedulerConfig};
pub use controller::Controller;
pub use error::PipelineError;
