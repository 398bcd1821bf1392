//! Top-level owner of the pipeline's long-lived resources.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::background::{BackgroundLoader, BackgroundSnapshot};
use crate::capture::{CameraFeed, CaptureSource, FrameSnapshot};
use crate::config::{Enhancement, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::output::OutputSink;
use crate::readiness::{ModelEvent, Readiness, ReadinessState};
use crate::scheduler::{FrameScheduler, SchedulerInputs};
use crate::segmentation::{InferenceService, ModelFactory};

/// Owns the camera feed, the inference service, the background cache and the
/// frame loop task, and tears all of them down exactly once.
pub struct Controller {
    config: PipelineConfig,
    readiness: Readiness,
    frames: Arc<watch::Sender<FrameSnapshot>>,
    enhancement: watch::Sender<Enhancement>,
    background: BackgroundLoader,
    camera: Option<CameraFeed>,
    service: Option<InferenceService>,
    factory: Option<ModelFactory>,
    sink: Option<Box<dyn OutputSink>>,
    scheduler: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Controller {
    pub fn new(config: PipelineConfig, sink: Box<dyn OutputSink>) -> Self {
        let (frames, _) = watch::channel(None);
        let (enhancement, _) = watch::channel(config.enhancement);
        let readiness = Readiness::new();
        readiness.set_run_requested(config.start_running);

        Self {
            config,
            readiness,
            frames: Arc::new(frames),
            enhancement,
            background: BackgroundLoader::new(),
            camera: None,
            service: Some(InferenceService::new()),
            factory: None,
            sink: Some(sink),
            scheduler: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Spawn the frame loop and kick off the configured background load.
    /// Must run inside a tokio runtime; later calls are no-ops.
    pub fn start(&mut self) {
        let (Some(sink), Some(service)) = (self.sink.take(), self.service.clone()) else {
            return;
        };

        let inputs = SchedulerInputs {
            readiness: self.readiness.subscribe(),
            frames: self.frames.subscribe(),
            background: self.background.subscribe(),
            enhancement: self.enhancement.subscribe(),
        };
        let mut scheduler = FrameScheduler::new(self.config.scheduler.clone(), inputs, service, sink);
        let token = self.cancel.child_token();
        self.scheduler = Some(tokio::spawn(async move { scheduler.run(token).await }));

        if let Some(path) = self.config.background.clone() {
            self.background.select(Some(path));
        }
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    pub fn status(&self) -> watch::Receiver<ReadinessState> {
        self.readiness.subscribe()
    }

    pub fn service(&self) -> Option<&InferenceService> {
        self.service.as_ref()
    }

    /// Bring up a backend with `factory`, moving the model status through
    /// `Loading` to `Ready` or `Error`. A failure is surfaced on the status
    /// channel and returned; calling again is a fresh attempt.
    pub async fn initialize_model(&mut self, factory: ModelFactory) -> Result<()> {
        let Some(service) = self.service.clone() else {
            return Err(PipelineError::ServiceDisposed);
        };
        self.factory = Some(Arc::clone(&factory));

        if !self.readiness.begin_model_init() {
            tracing::warn!("Model initialization already in progress or complete");
            return Ok(());
        }
        tracing::info!("Initializing segmentation model");

        let loaded = tokio::task::spawn_blocking(move || factory()).await;
        let installed = match loaded {
            Ok(Ok(model)) => service
                .install(model)
                .map_err(|err| PipelineError::ModelInit(err.into())),
            Ok(Err(err)) => Err(PipelineError::ModelInit(err)),
            Err(join) => Err(PipelineError::ModelInit(anyhow!("model loader failed: {join}"))),
        };

        match installed {
            Ok(()) => {
                self.readiness.model_ready();
                tracing::info!("Segmentation model ready");
                Ok(())
            }
            Err(err) => {
                tracing::error!("{err}");
                self.readiness.model_failed(&err);
                Err(err)
            }
        }
    }

    /// Re-run the last factory after a failed initialization.
    pub async fn retry_model(&mut self) -> Result<()> {
        let Some(factory) = self.factory.clone() else {
            return Err(PipelineError::ModelInit(anyhow!("no model has been configured")));
        };
        self.initialize_model(factory).await
    }

    /// Replace the camera feed with one opened by `open` on its own thread.
    pub fn start_camera<S, F>(&mut self, open: F)
    where
        S: CaptureSource,
        F: FnOnce() -> anyhow::Result<S> + Send + 'static,
    {
        self.stop_camera();
        if let Some(service) = &self.service {
            service.reset_state();
        }
        self.camera = Some(CameraFeed::start(
            open,
            Arc::clone(&self.frames),
            self.readiness.clone(),
        ));
    }

    pub fn stop_camera(&mut self) -> bool {
        match self.camera.take() {
            Some(mut camera) => camera.stop(),
            None => false,
        }
    }

    pub fn select_background(&mut self, path: Option<PathBuf>) -> JoinHandle<()> {
        self.background.select(path)
    }

    pub fn background(&self) -> BackgroundSnapshot {
        self.background.current()
    }

    pub fn set_enhancement(&self, enhancement: Enhancement) {
        tracing::info!("Enhancement set to {:?}", enhancement);
        self.enhancement.send_replace(enhancement);
    }

    pub fn enhancement(&self) -> Enhancement {
        *self.enhancement.borrow()
    }

    pub fn set_running(&self, run: bool) {
        self.readiness.set_run_requested(run);
    }

    pub fn toggle_running(&self) -> bool {
        self.readiness.toggle_run()
    }

    /// Release everything that does not need awaiting. Returns whether this
    /// call released anything.
    fn release(&mut self) -> bool {
        self.cancel.cancel();
        let mut released = self.stop_camera();
        if let Some(service) = self.service.take() {
            released |= service.dispose();
            self.readiness.model_event(ModelEvent::Disposed);
        }
        self.background.shutdown();
        released
    }

    /// Stop the frame loop and release camera, model and pending loads.
    /// Safe to call repeatedly.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.scheduler.take() {
            if let Err(err) = task.await {
                tracing::warn!("Frame loop ended abnormally: {err}");
            }
        }
        if self.release() {
            tracing::info!("Pipeline shut down");
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Some(task) = self.scheduler.take() {
            task.abort();
        }
        self.release();
    }
}
