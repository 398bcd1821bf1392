use std::path::PathBuf;
use std::time::Duration;

use anyhow::{ensure, Result};

/// Gamma exponent used when the gamma enhancement is picked without a value.
pub const DEFAULT_GAMMA: f32 = 1.5;

/// Visual enhancement applied to the foreground before compositing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Enhancement {
    #[default]
    None,
    Gamma {
        gamma: f32,
    },
}

/// Enhancement selector as exposed on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum EnhancementMode {
    #[default]
    None,
    Gamma,
}

impl Enhancement {
    pub fn from_mode(mode: EnhancementMode, gamma: f32) -> Self {
        match mode {
            EnhancementMode::None => Self::None,
            EnhancementMode::Gamma => Self::Gamma { gamma },
        }
    }

    pub fn mode(&self) -> EnhancementMode {
        match self {
            Self::None => EnhancementMode::None,
            Self::Gamma { .. } => EnhancementMode::Gamma,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Self::Gamma { gamma } = self {
            ensure!(
                gamma.is_finite() && *gamma > 0.0,
                "gamma must be a positive number, got {gamma}"
            );
        }
        Ok(())
    }
}

/// Pacing and diagnostics for the frame loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Period of the refresh signal driving the loop.
    pub tick_interval: Duration,
    /// Upper bound on a single inference call.
    pub inference_timeout: Duration,
    /// Present the reconciled mask instead of the composite.
    pub show_matte: bool,
    /// Log averaged timings every this many presented frames.
    pub stats_every: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs_f64(1.0 / 60.0),
            inference_timeout: Duration::from_millis(500),
            show_matte: false,
            stats_every: 30,
        }
    }
}

/// Everything the controller needs to start a session.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub scheduler: SchedulerConfig,
    pub enhancement: Enhancement,
    pub background: Option<PathBuf>,
    /// Whether the run toggle starts switched on.
    pub start_running: bool,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.scheduler.tick_interval.is_zero(),
            "tick interval must be non-zero"
        );
        ensure!(
            !self.scheduler.inference_timeout.is_zero(),
            "inference timeout must be non-zero"
        );
        ensure!(self.scheduler.stats_every > 0, "stats interval must be non-zero");
        self.enhancement.validate()
    }
}
