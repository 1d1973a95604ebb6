//! Sentence encoder backends.
//!
//! `SentenceEncoder` is the seam between the engine and the embedding model:
//! the classifier only needs a fixed-size vector per text. The production
//! backend loads a pretrained multilingual sentence transformer exported to
//! ONNX and runs it via `ort`.

use std::path::Path;
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;
use tracing::debug;

use crate::error::{ModelError, Result};

/// Encodes short text into a fixed-size vector.
pub trait SentenceEncoder: Send + Sync {
    /// Embedding dimensionality; every `encode` result has this length.
    fn dimensions(&self) -> usize;

    fn encode(&self, text: &str) -> Result<Vec<f32>>;
}

/// ONNX-backed sentence encoder.
///
/// Wraps an ort `Session` and handles tokenization, inference, mean pooling
/// and L2 normalization of the output tensor.
pub struct OnnxEncoder {
    /// `Session::run` needs `&mut self`; the Mutex restores `&self` access.
    session: Mutex<Session>,
    dimensions: usize,
}

impl OnnxEncoder {
    /// Load an exported sentence-transformer model from disk.
    pub fn load(model_path: &str, dimensions: usize) -> Result<Self> {
        let path = Path::new(model_path);
        if !path.exists() {
            return Err(ModelError::NotFound {
                path: model_path.to_string(),
            }
            .into());
        }

        let session = Session::builder()
            .map_err(|e| load_error(model_path, e))?
            .with_intra_threads(2)
            .map_err(|e| load_error(model_path, e))?
            .commit_from_file(model_path)
            .map_err(|e| load_error(model_path, e))?;

        debug!(model = %model_path, dims = dimensions, "ONNX encoder loaded");

        Ok(Self {
            session: Mutex::new(session),
            dimensions,
        })
    }

    fn infer(&self, text: &str) -> Result<Vec<f32>> {
        let token_ids = tokenize(text);
        let seq_len = token_ids.len();

        let input_ids: Vec<i64> = token_ids.iter().map(|&id| id as i64).collect();
        let attention_mask = vec![1i64; seq_len];

        let ids_tensor = Tensor::from_array((vec![1i64, seq_len as i64], input_ids))
            .map_err(|e| encoder_error(format!("tensor creation error: {e}")))?;
        let mask_tensor = Tensor::from_array((vec![1i64, seq_len as i64], attention_mask))
            .map_err(|e| encoder_error(format!("tensor creation error: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| encoder_error(format!("session lock poisoned: {e}")))?;

        let outputs = session
            .run(ort::inputs![ids_tensor, mask_tensor])
            .map_err(|e| encoder_error(e.to_string()))?;

        let (_name, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| encoder_error("no output tensor".to_string()))?;

        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| encoder_error(format!("tensor extraction failed: {e}")))?;

        // Mean pool across the sequence dimension when the model emits
        // per-token states; 2-D output is already pooled.
        let mut embedding = if shape.len() == 3 {
            let seq = shape[1] as usize;
            let dims = shape[2] as usize;
            let mut pooled = vec![0.0f32; dims];
            for s in 0..seq {
                for d in 0..dims {
                    pooled[d] += data[s * dims + d];
                }
            }
            for v in &mut pooled {
                *v /= seq as f32;
            }
            pooled
        } else if shape.len() == 2 {
            let dims = shape[1] as usize;
            data[..dims].to_vec()
        } else {
            return Err(encoder_error(format!("unexpected output shape: {shape:?}")));
        };

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut embedding {
                *v /= norm;
            }
        }

        embedding.resize(self.dimensions, 0.0);
        Ok(embedding)
    }
}

impl SentenceEncoder for OnnxEncoder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        self.infer(text)
    }
}

fn load_error(path: &str, e: impl std::fmt::Display) -> crate::error::Error {
    ModelError::LoadFailed {
        path: path.to_string(),
        reason: e.to_string(),
    }
    .into()
}

fn encoder_error(reason: String) -> crate::error::Error {
    ModelError::Encoder(reason).into()
}

/// Simple tokenizer: split on non-word boundaries, hash each word into the
/// vocab range between the [CLS]/[SEP] markers.
fn tokenize(text: &str) -> Vec<u32> {
    if text.is_empty() {
        return vec![101, 102];
    }
    let mut ids = vec![101u32];
    for word in text.split(|c: char| !c.is_alphanumeric() && c != '_') {
        if word.is_empty() {
            continue;
        }
        let mut h: u32 = 0x811c9dc5;
        for b in word.to_lowercase().as_bytes() {
            h ^= *b as u32;
            h = h.wrapping_mul(0x01000193);
        }
        ids.push(1 + (h % 29999));
    }
    ids.push(102);
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_empty_is_cls_sep() {
        assert_eq!(tokenize(""), vec![101, 102]);
    }

    #[test]
    fn tokenize_is_case_insensitive_and_bounded() {
        let upper = tokenize("Security Alert");
        let lower = tokenize("security alert");
        assert_eq!(upper, lower);
        assert_eq!(upper.len(), 4);
        assert!(upper[1..3].iter().all(|&id| (1..=29999).contains(&id)));
    }

    #[test]
    fn loading_missing_model_fails() {
        let result = OnnxEncoder::load("/nonexistent/model.onnx", 384);
        assert!(matches!(
            result,
            Err(crate::error::Error::Model(ModelError::NotFound { .. }))
        ));
    }
}
