//! Asynchronously loaded backdrop shared with the frame loop.
//!
//! Each completed load is published as a fresh `Arc` snapshot over a watch
//! channel; readers always see either the previous image or the new one.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};

use crate::error::{PipelineError, Result};
use crate::imaging::Background;

pub type BackgroundSnapshot = Option<Arc<Background>>;

/// Decode `path` into an RGBA backdrop.
pub fn load_background(path: &Path) -> Result<Background> {
    let _span = tracing::debug_span!("load_background").entered();
    let failed = |reason: String| PipelineError::BackgroundLoad {
        path: path.to_path_buf(),
        reason,
    };

    let image = image::open(path).map_err(|e| failed(e.to_string()))?.to_rgba8();
    if image.width() == 0 || image.height() == 0 {
        return Err(failed("image has no pixels".into()));
    }
    Ok(image)
}

/// Owns the background cache and materializes selections into it.
pub struct BackgroundLoader {
    tx: Arc<watch::Sender<BackgroundSnapshot>>,
    selection: Arc<AtomicU64>,
    pending: Option<AbortHandle>,
}

impl Default for BackgroundLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundLoader {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            selection: Arc::new(AtomicU64::new(0)),
            pending: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<BackgroundSnapshot> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> BackgroundSnapshot {
        self.tx.borrow().clone()
    }

    /// Switch to `selection`, superseding any load still in progress.
    ///
    /// `None` clears the backdrop immediately. A path is decoded on the
    /// blocking pool; on failure the cache is cleared so the fallback fill
    /// shows. The returned handle resolves once the selection has settled.
    pub fn select(&mut self, selection: Option<PathBuf>) -> JoinHandle<()> {
        let generation = self.selection.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }

        let tx = Arc::clone(&self.tx);
        let current = Arc::clone(&self.selection);
        let handle = tokio::spawn(async move {
            let loaded = match selection {
                None => {
                    tracing::info!("Background cleared");
                    None
                }
                Some(path) => {
                    let decode_path = path.clone();
                    let decoded = tokio::task::spawn_blocking(move || load_background(&decode_path))
                        .await
                        .unwrap_or_else(|join| {
                            Err(PipelineError::BackgroundLoad {
                                path: path.clone(),
                                reason: join.to_string(),
                            })
                        });
                    match decoded {
                        Ok(image) => {
                            tracing::info!(
                                "Background {} loaded ({}x{})",
                                path.display(),
                                image.width(),
                                image.height()
                            );
                            Some(Arc::new(image))
                        }
                        Err(err) => {
                            tracing::warn!("{err}; using fallback fill");
                            None
                        }
                    }
                }
            };

            if current.load(Ordering::SeqCst) == generation {
                tx.send_replace(loaded);
            } else {
                tracing::debug!("Dropping superseded background selection {}", generation);
            }
        });

        self.pending = Some(handle.abort_handle());
        handle
    }

    /// Abort any load in flight.
    pub fn shutdown(&mut self) {
        self.selection.fetch_add(1, Ordering::SeqCst);
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }
}
