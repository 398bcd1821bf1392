use super::preprocess::Preprocessor;
use super::types::{RawMask, SegmentationModel};
use crate::imaging::Frame;
use anyhow::{anyhow, Context, Result};
use ndarray::{arr1, Array4, Ix4};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;

/// Recurrent hidden states carried between frames.
struct HiddenStates {
    r1: Array4<f32>,
    r2: Array4<f32>,
    r3: Array4<f32>,
    r4: Array4<f32>,
}

/// RobustVideoMatting segmentation model
///
/// The network is recurrent: hidden states (r1-r4) from one frame are fed
/// into the next. The matte comes back at model resolution; the reconciler
/// scales it to the frame.
pub struct RobustVideoMatting {
    session: Session,
    preprocessor: Preprocessor,
    states: Option<HiddenStates>,
    // Downsample ratio for hidden states
    downsample_ratio: f32,
}

impl RobustVideoMatting {
    /// Create a new RVM model from an ONNX file
    ///
    /// # Default Configuration
    /// - Input size: 512x512 (can be adjusted for performance/quality tradeoff)
    /// - Downsample ratio: 0.25 (hidden states are 1/4 of input resolution)
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading RVM model from {}", path.display());

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::info!("RVM model loaded successfully");

        Ok(Self {
            session,
            preprocessor: Preprocessor::new(512, 512),
            states: None,
            downsample_ratio: 0.25,
        })
    }

    /// Zeroed hidden states sized for the current input resolution
    fn initial_states(&self) -> HiddenStates {
        let (width, height) = self.preprocessor.target_size();
        let h = (height as f32 * self.downsample_ratio) as usize;
        let w = (width as f32 * self.downsample_ratio) as usize;

        tracing::debug!("Initializing hidden states to {}x{}", w, h);

        HiddenStates {
            r1: Array4::zeros((1, 16, h, w)),
            r2: Array4::zeros((1, 20, h / 2, w / 2)),
            r3: Array4::zeros((1, 24, h / 4, w / 4)),
            r4: Array4::zeros((1, 28, h / 8, w / 8)),
        }
    }
}

fn extract_state(value: &ort::value::DynValue) -> Result<Array4<f32>> {
    Ok(value
        .try_extract_array::<f32>()?
        .to_owned()
        .into_dimensionality::<Ix4>()?)
}

impl SegmentationModel for RobustVideoMatting {
    fn segment(&mut self, frame: &Frame) -> Result<Option<RawMask>> {
        let _span = tracing::debug_span!("rvm_segment").entered();

        if self.states.is_none() {
            self.states = Some(self.initial_states());
        }
        let states = self
            .states
            .as_ref()
            .ok_or_else(|| anyhow!("hidden states missing"))?;

        let input_tensor = self.preprocessor.preprocess(frame)?;

        // RVM expects: src (frame), r1, r2, r3, r4, downsample_ratio
        let outputs = self
            .session
            .run(ort::inputs![
                Tensor::from_array(input_tensor)?,
                Tensor::from_array(states.r1.clone())?,
                Tensor::from_array(states.r2.clone())?,
                Tensor::from_array(states.r3.clone())?,
                Tensor::from_array(states.r4.clone())?,
                Tensor::from_array(arr1(&[self.downsample_ratio]))?
            ])
            .context("Failed to run inference")?;

        if outputs.len() < 6 {
            return Err(anyhow!("RVM returned {} outputs, expected 6", outputs.len()));
        }

        // Outputs: fgr (foreground), pha (alpha), r1..r4. Only pha and the
        // updated hidden states are used.
        let pha = outputs[1].try_extract_array::<f32>()?;
        let shape = pha.shape().to_vec();
        if shape.len() != 4 {
            return Ok(None);
        }
        let (height, width) = (shape[2] as u32, shape[3] as u32);
        let values: Vec<f32> = pha.iter().copied().collect();

        let next = HiddenStates {
            r1: extract_state(&outputs[2])?,
            r2: extract_state(&outputs[3])?,
            r3: extract_state(&outputs[4])?,
            r4: extract_state(&outputs[5])?,
        };
        drop(outputs);
        self.states = Some(next);

        Ok(Some(RawMask::Probabilities {
            width,
            height,
            values,
        }))
    }

    fn reset_state(&mut self) {
        tracing::info!("Resetting RVM hidden states");
        self.states = None;
    }

    fn input_size(&self) -> Option<(u32, u32)> {
        Some(self.preprocessor.target_size())
    }
}
