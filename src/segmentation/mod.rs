mod passthrough;
#[cfg(feature = "onnx")]
mod preprocess;
mod reconcile;
#[cfg(feature = "onnx")]
mod rvm;
mod service;
pub mod types;

pub use passthrough::Passthrough;
#[cfg(feature = "onnx")]
pub use preprocess::Preprocessor;
pub use reconcile::{canonicalize, MaskReconciler, MASK_BLUR_RADIUS};
#[cfg(feature = "onnx")]
pub use rvm::RobustVideoMatting;
pub use service::InferenceService;
pub use types::{PlaneLayout, RawMask, SegmentationModel};

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

/// Builds a model instance; called again for every initialization retry.
pub type ModelFactory = Arc<dyn Fn() -> Result<Box<dyn SegmentationModel>> + Send + Sync>;

/// Factory for the all-foreground passthrough backend.
pub fn passthrough_factory() -> ModelFactory {
    Arc::new(|| Ok(Box::new(Passthrough) as Box<dyn SegmentationModel>))
}

/// Create a default segmentation model (RVM)
#[cfg(feature = "onnx")]
pub fn create_default_model(model_path: PathBuf) -> ModelFactory {
    Arc::new(move || {
        let model = RobustVideoMatting::new(&model_path)?;
        Ok(Box::new(model) as Box<dyn SegmentationModel>)
    })
}

#[cfg(not(feature = "onnx"))]
pub fn create_default_model(model_path: PathBuf) -> ModelFactory {
    Arc::new(move || {
        anyhow::bail!(
            "cannot load {}: built without the `onnx` feature",
            model_path.display()
        )
    })
}
