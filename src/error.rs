use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures the compositing pipeline distinguishes between.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The segmentation backend could not be brought up. Terminal for that attempt.
    #[error("segmentation model failed to initialize: {0:#}")]
    ModelInit(anyhow::Error),

    /// The camera could not be opened or stopped delivering frames.
    #[error("camera unavailable: {0}")]
    CameraAccess(String),

    /// No usable mask for this frame; the cycle is skipped.
    #[error("mask unavailable: {0}")]
    MaskUnavailable(String),

    /// The selected backdrop could not be decoded; the fallback fill is used.
    #[error("failed to load background {}: {reason}", path.display())]
    BackgroundLoad { path: PathBuf, reason: String },

    /// The backend raised an error while segmenting a frame.
    #[error("inference failed: {0:#}")]
    Inference(anyhow::Error),

    /// The backend did not answer within the configured bound.
    #[error("inference did not finish within {0:?}")]
    InferenceTimeout(Duration),

    #[error("inference service has been disposed")]
    ServiceDisposed,
}

impl PipelineError {
    /// Per-cycle failures that the scheduler absorbs and skips over.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::MaskUnavailable(_) | Self::Inference(_) | Self::InferenceTimeout(_)
        )
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_cycle_failures_are_transient() {
        assert!(PipelineError::MaskUnavailable("empty".into()).is_transient());
        assert!(PipelineError::InferenceTimeout(Duration::from_millis(500)).is_transient());
        assert!(!PipelineError::ServiceDisposed.is_transient());
        assert!(!PipelineError::ModelInit(anyhow::anyhow!("missing weights")).is_transient());
    }

    #[test]
    fn messages_include_the_cause_chain() {
        let err = PipelineError::Inference(anyhow::anyhow!("out of memory").context("session run"));
        assert_eq!(err.to_string(), "inference failed: session run: out of memory");
    }
}
