//! Readiness gate for the frame loop.
//!
//! Three independent signals feed one predicate: the model is ready, the
//! camera is delivering frames, and the user asked the loop to run.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelStatus {
    #[default]
    Idle,
    Loading,
    Ready,
    Error,
}

/// Inputs to the model status machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelEvent {
    InitStarted,
    HandshakeSucceeded,
    HandshakeFailed,
    Disposed,
}

impl ModelStatus {
    /// Next status after `event`, or `None` if the event does not apply.
    pub fn on(self, event: ModelEvent) -> Option<Self> {
        use ModelEvent::*;
        use ModelStatus::*;
        match (self, event) {
            (Idle | Error, InitStarted) => Some(Loading),
            (Loading, HandshakeSucceeded) => Some(Ready),
            (Loading, HandshakeFailed) => Some(Error),
            (_, Disposed) => Some(Idle),
            _ => None,
        }
    }
}

/// Initialization-level failure surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    ModelInit(String),
    CameraAccess(String),
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModelInit(msg) | Self::CameraAccess(msg) => f.write_str(msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReadinessState {
    pub model: ModelStatus,
    pub camera_ready: bool,
    pub run_requested: bool,
    pub fault: Option<Fault>,
    /// Count of open -> closed gate transitions so far. Lets a reader that
    /// only sees the latest state tell that the gate closed in between.
    pub gate_closures: u64,
}

impl ReadinessState {
    /// The single gate for running an inference cycle.
    pub fn can_run(&self) -> bool {
        self.model == ModelStatus::Ready && self.camera_ready && self.run_requested
    }
}

/// Cloneable publisher of [`ReadinessState`]. Subscribers are woken only
/// when a value actually changes.
#[derive(Clone)]
pub struct Readiness {
    tx: Arc<watch::Sender<ReadinessState>>,
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

impl Readiness {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ReadinessState::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<ReadinessState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> ReadinessState {
        self.tx.borrow().clone()
    }

    pub fn can_run(&self) -> bool {
        self.tx.borrow().can_run()
    }

    fn update(&self, f: impl FnOnce(&mut ReadinessState)) -> bool {
        self.tx.send_if_modified(|state| {
            let before = state.clone();
            f(state);
            if before.can_run() && !state.can_run() {
                state.gate_closures += 1;
            }
            *state != before
        })
    }

    fn apply_model_event(state: &mut ReadinessState, event: ModelEvent) -> bool {
        let Some(next) = state.model.on(event) else {
            tracing::warn!("Ignoring model event {:?} while {:?}", event, state.model);
            return false;
        };
        tracing::debug!("Model status {:?} -> {:?}", state.model, next);
        state.model = next;
        if event == ModelEvent::InitStarted && matches!(state.fault, Some(Fault::ModelInit(_))) {
            state.fault = None;
        }
        true
    }

    /// Feed `event` to the model status machine. Returns whether it applied.
    pub fn model_event(&self, event: ModelEvent) -> bool {
        let mut applied = false;
        self.update(|state| applied = Self::apply_model_event(state, event));
        applied
    }

    pub fn begin_model_init(&self) -> bool {
        self.model_event(ModelEvent::InitStarted)
    }

    pub fn model_ready(&self) -> bool {
        self.model_event(ModelEvent::HandshakeSucceeded)
    }

    /// Move to `Error` and surface `err` in a single notification.
    pub fn model_failed(&self, err: &PipelineError) -> bool {
        let mut applied = false;
        self.update(|state| {
            applied = Self::apply_model_event(state, ModelEvent::HandshakeFailed);
            if applied {
                state.fault = Some(Fault::ModelInit(err.to_string()));
            }
        });
        applied
    }

    /// First decoded frame observed.
    pub fn camera_started(&self) -> bool {
        self.update(|state| {
            state.camera_ready = true;
            if matches!(state.fault, Some(Fault::CameraAccess(_))) {
                state.fault = None;
            }
        })
    }

    pub fn camera_stopped(&self) -> bool {
        self.update(|state| state.camera_ready = false)
    }

    /// Camera could not be opened or failed mid-stream.
    pub fn camera_failed(&self, err: &PipelineError) -> bool {
        self.update(|state| {
            state.camera_ready = false;
            state.fault = Some(Fault::CameraAccess(err.to_string()));
        })
    }

    pub fn set_run_requested(&self, run: bool) -> bool {
        self.update(|state| state.run_requested = run)
    }

    /// Flip the run toggle; returns the new value.
    pub fn toggle_run(&self) -> bool {
        let mut now = false;
        self.update(|state| {
            state.run_requested = !state.run_requested;
            now = state.run_requested;
        });
        now
    }
}
