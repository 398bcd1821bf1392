//! The frame loop.
//!
//! One cycle: read the current frame and background snapshot, run inference
//! on the blocking pool, reconcile the mask, composite, present. Inference is
//! the only suspension point. At most one cycle is outstanding at a time, and
//! every cycle carries a generation so that results arriving after the gate
//! closed are dropped instead of drawn.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::background::BackgroundSnapshot;
use crate::capture::FrameSnapshot;
use crate::compositor::{matte_view, Compositor};
use crate::config::{Enhancement, SchedulerConfig};
use crate::error::{PipelineError, Result};
use crate::imaging::Frame;
use crate::output::OutputSink;
use crate::readiness::ReadinessState;
use crate::segmentation::{InferenceService, MaskReconciler, RawMask};

/// Channels the loop reads from. Everything here is a snapshot handle; the
/// loop never mutates its inputs.
pub struct SchedulerInputs {
    pub readiness: watch::Receiver<ReadinessState>,
    pub frames: watch::Receiver<FrameSnapshot>,
    pub background: watch::Receiver<BackgroundSnapshot>,
    pub enhancement: watch::Receiver<Enhancement>,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Gate closed; the loop disarmed itself.
    Gated,
    /// A cycle is still outstanding.
    Busy,
    /// The camera has not published a frame yet.
    NoFrame,
    /// A new cycle with this generation was started.
    Started(u64),
}

/// How an outstanding cycle ended.
#[derive(Debug)]
pub enum CycleOutcome {
    Presented(u64),
    /// The gate closed while the cycle was in flight.
    Discarded(u64),
    /// The cycle failed; the previous output stays on display.
    Skipped { generation: u64, error: PipelineError },
}

type InferenceHandle = JoinHandle<Result<Option<RawMask>>>;

enum Resolution {
    Completed(Result<Option<RawMask>>),
    TimedOut,
}

struct Cycle {
    generation: u64,
    gate_closures: u64,
    frame: Arc<Frame>,
    background: BackgroundSnapshot,
    enhancement: Enhancement,
    handle: InferenceHandle,
    deadline: time::Instant,
    started: Instant,
}

/// Counters plus a rolling timing window that is logged and reset every
/// `stats_every` presented frames.
#[derive(Debug, Default, Clone)]
pub struct CycleStats {
    pub presented: u64,
    pub skipped: u64,
    pub discarded: u64,
    window_frames: u64,
    window_inference: Duration,
    window_composite: Duration,
    window_start: Option<Instant>,
}

impl CycleStats {
    fn record(&mut self, inference: Duration, composite: Duration, every: u64) {
        self.presented += 1;
        self.window_frames += 1;
        self.window_inference += inference;
        self.window_composite += composite;
        let start = *self.window_start.get_or_insert_with(Instant::now);

        if self.window_frames >= every {
            let frames = self.window_frames as f64;
            let avg_inference_ms = self.window_inference.as_secs_f64() * 1000.0 / frames;
            let avg_composite_ms = self.window_composite.as_secs_f64() * 1000.0 / frames;
            let elapsed = start.elapsed().as_secs_f64();
            let fps = if elapsed > 0.0 { frames / elapsed } else { 0.0 };
            tracing::info!(
                "Frame {}: inference={:.1}ms, composite={:.1}ms, skipped={}, discarded={}, fps={:.1}",
                self.presented,
                avg_inference_ms,
                avg_composite_ms,
                self.skipped,
                self.discarded,
                fps
            );
            self.window_frames = 0;
            self.window_inference = Duration::ZERO;
            self.window_composite = Duration::ZERO;
            self.window_start = Some(Instant::now());
        }
    }
}

async fn resolve(slot: &mut Option<Cycle>) -> Resolution {
    let Some(cycle) = slot.as_mut() else {
        return std::future::pending().await;
    };
    match time::timeout_at(cycle.deadline, &mut cycle.handle).await {
        Ok(Ok(result)) => Resolution::Completed(result),
        Ok(Err(join)) => Resolution::Completed(Err(PipelineError::Inference(anyhow!(
            "inference task failed: {join}"
        )))),
        Err(_) => Resolution::TimedOut,
    }
}

pub struct FrameScheduler {
    config: SchedulerConfig,
    inputs: SchedulerInputs,
    service: InferenceService,
    sink: Box<dyn OutputSink>,
    reconciler: MaskReconciler,
    compositor: Compositor,
    generation: u64,
    live: bool,
    armed: bool,
    in_flight: Option<Cycle>,
    // timed-out call still holding the model
    abandoned: Option<InferenceHandle>,
    stats: CycleStats,
}

impl FrameScheduler {
    pub fn new(
        config: SchedulerConfig,
        inputs: SchedulerInputs,
        service: InferenceService,
        sink: Box<dyn OutputSink>,
    ) -> Self {
        Self {
            config,
            inputs,
            service,
            sink,
            reconciler: MaskReconciler::default(),
            compositor: Compositor::new(),
            generation: 0,
            live: false,
            armed: false,
            in_flight: None,
            abandoned: None,
            stats: CycleStats::default(),
        }
    }

    pub fn can_run(&self) -> bool {
        self.inputs.readiness.borrow().can_run()
    }

    fn gate_closures(&self) -> u64 {
        self.inputs.readiness.borrow().gate_closures
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn has_cycle_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Stop drawing: clear the liveness flag and invalidate whatever is in
    /// flight.
    fn halt(&mut self) {
        if self.live {
            tracing::debug!("Gate closed, halting frame loop");
            self.generation += 1;
        }
        self.live = false;
        self.armed = false;
    }

    /// React to a readiness change. Returns true when the loop was re-armed.
    pub fn gate_changed(&mut self) -> bool {
        if self.can_run() {
            let rearmed = !self.armed;
            self.armed = true;
            rearmed
        } else {
            self.halt();
            false
        }
    }

    /// One refresh tick: start a cycle if the gate is open and nothing is
    /// outstanding.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.can_run() {
            self.halt();
            return TickOutcome::Gated;
        }
        self.live = true;
        self.armed = true;

        if self.abandoned.as_ref().is_some_and(|h| h.is_finished()) {
            tracing::debug!("Timed-out inference call has returned");
            self.abandoned = None;
        }
        if self.in_flight.is_some() || self.abandoned.is_some() {
            return TickOutcome::Busy;
        }

        let Some(frame) = self.inputs.frames.borrow().clone() else {
            return TickOutcome::NoFrame;
        };
        let background = self.inputs.background.borrow().clone();
        let enhancement = *self.inputs.enhancement.borrow();

        self.generation += 1;
        let handle = self.service.predict(Arc::clone(&frame));
        self.in_flight = Some(Cycle {
            generation: self.generation,
            gate_closures: self.gate_closures(),
            frame,
            background,
            enhancement,
            handle,
            deadline: time::Instant::now() + self.config.inference_timeout,
            started: Instant::now(),
        });
        TickOutcome::Started(self.generation)
    }

    /// Wait for the outstanding cycle, if any, and finish it.
    pub async fn settle(&mut self) -> Option<CycleOutcome> {
        if self.in_flight.is_none() {
            return None;
        }
        let resolution = resolve(&mut self.in_flight).await;
        self.finish(resolution)
    }

    fn finish(&mut self, resolution: Resolution) -> Option<CycleOutcome> {
        let cycle = self.in_flight.take()?;
        let generation = cycle.generation;
        let inference_time = cycle.started.elapsed();

        let result = match resolution {
            Resolution::Completed(result) => result,
            Resolution::TimedOut => {
                self.abandoned = Some(cycle.handle);
                Err(PipelineError::InferenceTimeout(self.config.inference_timeout))
            }
        };

        // The readiness watch only keeps the latest state, so a pause that was
        // undone before this task ran shows up in the closure count alone.
        let stale = !self.live
            || generation != self.generation
            || cycle.gate_closures != self.gate_closures()
            || !self.can_run();
        if stale {
            tracing::debug!("Discarding cycle {} resolved after halt", generation);
            self.stats.discarded += 1;
            return Some(CycleOutcome::Discarded(generation));
        }

        let _span = tracing::debug_span!("cycle", generation).entered();
        let composite_start = Instant::now();
        let (width, height) = cycle.frame.dimensions();
        let mask = match result.and_then(|raw| self.reconciler.reconcile(raw, width, height)) {
            Ok(mask) => mask,
            Err(error) => {
                match &error {
                    PipelineError::MaskUnavailable(_) => {
                        tracing::debug!("Skipping cycle {}: {}", generation, error)
                    }
                    e if e.is_transient() => tracing::warn!("Skipping cycle {}: {}", generation, e),
                    e => tracing::error!("Cycle {} failed: {}", generation, e),
                }
                self.stats.skipped += 1;
                return Some(CycleOutcome::Skipped { generation, error });
            }
        };

        let output = if self.config.show_matte {
            matte_view(&mask)
        } else {
            self.compositor
                .compose(&cycle.frame, cycle.background.as_ref(), &mask, cycle.enhancement)
        };

        if let Err(err) = self.sink.write_frame(&output) {
            tracing::warn!("Failed to present frame {}: {err:#}", generation);
        }
        self.stats
            .record(inference_time, composite_start.elapsed(), self.config.stats_every);
        Some(CycleOutcome::Presented(generation))
    }

    /// Drive the loop until `cancel` fires or the readiness publisher goes
    /// away.
    ///
    /// Ticks are only consumed while armed; a closed gate parks the loop
    /// until the next readiness change re-arms it.
    pub async fn run(&mut self, cancel: CancellationToken) {
        let mut ticker = time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.armed = self.can_run();

        tracing::info!("Starting frame loop");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                changed = self.inputs.readiness.changed() => {
                    if changed.is_err() {
                        tracing::warn!("Readiness publisher dropped, stopping frame loop");
                        break;
                    }
                    if self.gate_changed() {
                        tracing::debug!("Gate open, frame loop re-armed");
                        ticker.reset_immediately();
                    }
                }

                resolution = resolve(&mut self.in_flight), if self.in_flight.is_some() => {
                    self.finish(resolution);
                }

                _ = ticker.tick(), if self.armed => {
                    self.tick();
                }
            }
        }

        self.halt();
        if let Some(cycle) = self.in_flight.take() {
            tracing::debug!("Dropping in-flight cycle {} at shutdown", cycle.generation);
        }
        tracing::info!(
            "Frame loop stopped: presented={}, skipped={}, discarded={}",
            self.stats.presented,
            self.stats.skipped,
            self.stats.discarded
        );
    }
}
