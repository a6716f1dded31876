//! Silero VAD classifier
//!
//! Wraps the Silero speech-detection ONNX model behind the
//! [`VoiceClassifier`] trait. The model is recurrent; the hidden and cell
//! state tensors are carried between windows and zeroed on
//! [`reset`](VoiceClassifier::reset).

use std::path::Path;

use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;

use super::gate::VoiceClassifier;
use crate::error::{Error, Result};

/// Hidden/cell state layout: 2 layers x 1 batch x 64 units
const STATE_DIMS: [usize; 3] = [2, 1, 64];
const STATE_LEN: usize = 2 * 64;

pub struct SileroVad {
    session: Session,
    h: Vec<f32>,
    c: Vec<f32>,
    sample_rate: i64,
    threshold: f32,
}

impl SileroVad {
    pub fn load(model_path: &Path, sample_rate: u32, threshold: f32) -> Result<Self> {
        macro_rules! map_err {
            ($e:expr) => {
                Error::Classifier(format!("loading {}: {}", model_path.display(), $e))
            };
        }

        let mut builder = Session::builder().map_err(|e| map_err!(e))?;
        builder = builder
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| map_err!(e))?;
        builder = builder.with_intra_threads(1).map_err(|e| map_err!(e))?;
        let session = builder
            .commit_from_file(model_path)
            .map_err(|e| map_err!(e))?;

        Ok(Self {
            session,
            h: vec![0.0; STATE_LEN],
            c: vec![0.0; STATE_LEN],
            sample_rate: i64::from(sample_rate),
            threshold,
        })
    }
}

impl VoiceClassifier for SileroVad {
    fn reset(&mut self) {
        self.h.fill(0.0);
        self.c.fill(0.0);
    }

    fn process(&mut self, window: &[f32]) -> Result<bool> {
        let map_err = |e: ort::Error| Error::Classifier(e.to_string());

        let input =
            Tensor::from_array(([1, window.len()], window.to_vec())).map_err(map_err)?;
        let sr = Tensor::from_array(([1], vec![self.sample_rate])).map_err(map_err)?;
        let h = Tensor::from_array((STATE_DIMS, self.h.clone())).map_err(map_err)?;
        let c = Tensor::from_array((STATE_DIMS, self.c.clone())).map_err(map_err)?;

        let outputs = self
            .session
            .run(ort::inputs!["input" => input, "sr" => sr, "h" => h, "c" => c])
            .map_err(map_err)?;

        let (_, probs) = outputs["output"]
            .try_extract_tensor::<f32>()
            .map_err(map_err)?;
        let prob = *probs
            .first()
            .ok_or_else(|| Error::Classifier("empty model output".into()))?;

        let (_, hn) = outputs["hn"].try_extract_tensor::<f32>().map_err(map_err)?;
        let (_, cn) = outputs["cn"].try_extract_tensor::<f32>().map_err(map_err)?;
        if hn.len() != STATE_LEN || cn.len() != STATE_LEN {
            return Err(Error::Classifier("unexpected recurrent state shape".into()));
        }
        self.h.copy_from_slice(hn);
        self.c.copy_from_slice(cn);

        Ok(prob >= self.threshold)
    }
}
