use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::anyhow;
use tokio::task::JoinHandle;

use super::types::{RawMask, SegmentationModel};
use crate::error::{PipelineError, Result};
use crate::imaging::Frame;

type ModelSlot = Option<Box<dyn SegmentationModel>>;

/// Releases the model's scratch state when the cycle that borrowed it ends,
/// on every exit path including unwinding.
struct ScratchScope<'a> {
    model: &'a mut dyn SegmentationModel,
}

impl<'a> ScratchScope<'a> {
    fn enter(model: &'a mut dyn SegmentationModel) -> Self {
        Self { model }
    }
}

impl<'a> Deref for ScratchScope<'a> {
    type Target = dyn SegmentationModel + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.model
    }
}

impl DerefMut for ScratchScope<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.model
    }
}

impl Drop for ScratchScope<'_> {
    fn drop(&mut self) {
        self.model.release_scratch();
    }
}

/// Shared handle to the segmentation backend.
///
/// Starts empty; the controller installs a model once initialization
/// succeeds. Every `predict` runs the model on the blocking pool so the frame
/// loop only suspends while waiting for the mask.
#[derive(Clone, Default)]
pub struct InferenceService {
    model: Arc<Mutex<ModelSlot>>,
    disposed: Arc<AtomicBool>,
}

fn lock(model: &Mutex<ModelSlot>) -> MutexGuard<'_, ModelSlot> {
    model.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("recovering segmentation model after a panicked cycle");
        model.clear_poison();
        PoisonError::into_inner(poisoned)
    })
}

impl InferenceService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a freshly initialized model, replacing any previous one.
    pub fn install(&self, model: Box<dyn SegmentationModel>) -> Result<()> {
        if self.is_disposed() {
            return Err(PipelineError::ServiceDisposed);
        }
        match model.input_size() {
            Some((w, h)) => tracing::info!("Segmentation model installed, input {}x{}", w, h),
            None => tracing::info!("Segmentation model installed, any input size"),
        }
        *lock(&self.model) = Some(model);
        Ok(())
    }

    pub fn is_installed(&self) -> bool {
        lock(&self.model).is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Forward to the model's recurrent-state reset.
    pub fn reset_state(&self) {
        if let Some(model) = lock(&self.model).as_mut() {
            model.reset_state();
        }
    }

    /// Segment `frame` on the blocking pool.
    pub fn predict(&self, frame: Arc<Frame>) -> JoinHandle<Result<Option<RawMask>>> {
        let model = Arc::clone(&self.model);
        let disposed = Arc::clone(&self.disposed);

        tokio::task::spawn_blocking(move || {
            if disposed.load(Ordering::SeqCst) {
                return Err(PipelineError::ServiceDisposed);
            }

            let mut slot = lock(&model);
            let result = match slot.as_deref_mut() {
                Some(backend) => {
                    let _span = tracing::debug_span!("inference").entered();
                    let mut scope = ScratchScope::enter(backend);
                    let outcome = scope.segment(&frame);
                    outcome.map_err(PipelineError::Inference)
                }
                None => Err(PipelineError::Inference(anyhow!("no segmentation model installed"))),
            };

            // dispose() found the model busy and left the drop to us
            if disposed.load(Ordering::SeqCst) && slot.take().is_some() {
                tracing::info!("Segmentation model released after its last cycle");
            }
            result
        })
    }

    /// Drop the model. Only the first call does anything; returns whether it
    /// was this call.
    pub fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }

        match self.model.try_lock() {
            Ok(mut slot) => {
                if slot.take().is_some() {
                    tracing::info!("Segmentation model released");
                }
            }
            Err(std::sync::TryLockError::Poisoned(poisoned)) => {
                poisoned.into_inner().take();
                tracing::info!("Segmentation model released");
            }
            Err(std::sync::TryLockError::WouldBlock) => {
                tracing::debug!("Segmentation model busy, release deferred to the running cycle");
            }
        }
        true
    }
}

impl std::fmt::Debug for InferenceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceService")
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
