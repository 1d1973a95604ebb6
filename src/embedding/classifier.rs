//! Linear classifier over sentence embeddings.
//!
//! A trained `LinearModel` maps an embedding to class probabilities for
//! {promo, important} via softmax. The model plus its label table persist as
//! one JSON artifact; loading is lazy and happens once, on first prediction.
//! Prediction never fails: short text, a missing artifact or an encoder
//! failure all degrade to an empty prediction the combiner treats as
//! "rules only".

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::embedding::encoder::SentenceEncoder;
use crate::error::{ModelError, Result};

/// Class label for promotional mail.
pub const LABEL_PROMO: &str = "promo";
/// Class label for important mail.
pub const LABEL_IMPORTANT: &str = "important";

/// Minimum usable text length, before and after preprocessing.
const MIN_TEXT_LEN: usize = 10;

const TRAIN_EPOCHS: usize = 300;
const LEARNING_RATE: f32 = 0.5;

// ── Model artifact ──────────────────────────────────────────────────

/// Multinomial logistic regression weights plus the label encoding,
/// persisted together as one artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModel {
    /// Class labels, row-aligned with `weights` and `biases`.
    pub labels: Vec<String>,
    /// One weight row per class.
    pub weights: Vec<Vec<f32>>,
    pub biases: Vec<f32>,
    /// Embedding dimensionality the model was trained on.
    pub dimensions: usize,
}

impl LinearModel {
    /// Softmax class probabilities for one embedding.
    pub fn probabilities(&self, embedding: &[f32]) -> Vec<f64> {
        let logits: Vec<f32> = self
            .weights
            .iter()
            .zip(&self.biases)
            .map(|(row, bias)| {
                row.iter()
                    .zip(embedding)
                    .map(|(w, x)| w * x)
                    .sum::<f32>()
                    + bias
            })
            .collect();

        let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f64> = logits.iter().map(|&l| ((l - max) as f64).exp()).collect();
        let sum: f64 = exps.iter().sum();
        exps.into_iter().map(|e| e / sum).collect()
    }

    /// Fit by gradient descent on softmax cross-entropy.
    fn fit(embeddings: &[Vec<f32>], class_indices: &[usize], labels: Vec<String>) -> Self {
        let dimensions = embeddings.first().map(Vec::len).unwrap_or(0);
        let classes = labels.len();
        let mut model = Self {
            labels,
            weights: vec![vec![0.0; dimensions]; classes],
            biases: vec![0.0; classes],
            dimensions,
        };

        let n = embeddings.len() as f32;
        for _ in 0..TRAIN_EPOCHS {
            for (embedding, &target) in embeddings.iter().zip(class_indices) {
                let probs = model.probabilities(embedding);
                for c in 0..classes {
                    let grad = probs[c] as f32 - if c == target { 1.0 } else { 0.0 };
                    let step = LEARNING_RATE * grad / n;
                    for (w, x) in model.weights[c].iter_mut().zip(embedding) {
                        *w -= step * x;
                    }
                    model.biases[c] -= step;
                }
            }
        }
        model
    }

    /// Load the artifact from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ModelError::NotFound {
                    path: path.display().to_string(),
                }
            } else {
                ModelError::LoadFailed {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                }
            }
        })?;
        let model: Self = serde_json::from_str(&raw).map_err(|e| ModelError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(model)
    }

    /// Persist the artifact atomically (temp file then rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let save_error = |reason: String| ModelError::SaveFailed {
            path: path.display().to_string(),
            reason,
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| save_error(e.to_string()))?;
        }
        let json = serde_json::to_string(self).map_err(|e| save_error(e.to_string()))?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(|e| save_error(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| save_error(e.to_string()))?;
        Ok(())
    }
}

// ── Prediction ──────────────────────────────────────────────────────

/// Ranked class probabilities plus the derived confidence.
///
/// `confidence` is the gap between the top two class probabilities; callers
/// use it to modulate how much they trust the prediction.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingPrediction {
    /// (label, probability) pairs, highest first. Empty when no usable
    /// prediction was possible.
    pub ranked: Vec<(String, f64)>,
    pub confidence: f64,
}

impl EmbeddingPrediction {
    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }

    fn probability_of(&self, label: &str) -> Option<f64> {
        self.ranked
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, p)| *p)
    }

    /// Probability of the promotional class, 0 when unavailable.
    pub fn promo_probability(&self) -> f64 {
        self.probability_of(LABEL_PROMO).unwrap_or(0.0)
    }

    /// Probability of the important class; falls back to the complement of
    /// the promotional class when the label table has no "important" entry.
    pub fn importance_probability(&self) -> f64 {
        self.probability_of(LABEL_IMPORTANT)
            .or_else(|| self.probability_of(LABEL_PROMO).map(|p| 1.0 - p))
            .unwrap_or(0.0)
    }
}

// ── Classifier ──────────────────────────────────────────────────────

/// Embedding classifier: sentence encoder plus lazily loaded linear model.
pub struct EmbeddingClassifier {
    encoder: Arc<dyn SentenceEncoder>,
    artifact_path: PathBuf,
    /// Loaded once on first use; `None` inside means the artifact was
    /// missing or unreadable and we run rules-only.
    model: OnceLock<Option<LinearModel>>,
}

impl EmbeddingClassifier {
    pub fn new(encoder: Arc<dyn SentenceEncoder>, artifact_path: impl Into<PathBuf>) -> Self {
        Self {
            encoder,
            artifact_path: artifact_path.into(),
            model: OnceLock::new(),
        }
    }

    fn model(&self) -> Option<&LinearModel> {
        self.model
            .get_or_init(|| match LinearModel::load(&self.artifact_path) {
                Ok(model) => {
                    debug!(path = %self.artifact_path.display(), classes = model.labels.len(), "Classifier artifact loaded");
                    Some(model)
                }
                Err(e) => {
                    warn!(path = %self.artifact_path.display(), error = %e, "No usable classifier artifact, running rules-only");
                    None
                }
            })
            .as_ref()
    }

    /// Whether a trained model is available without forcing a load.
    pub fn has_artifact(&self) -> bool {
        self.artifact_path.exists()
    }

    /// Classify a text. Returns an empty prediction when the text is too
    /// short after normalization, no model is available, or encoding fails.
    pub fn predict(&self, text: &str) -> EmbeddingPrediction {
        let Some(processed) = preprocess(text) else {
            return EmbeddingPrediction::default();
        };
        let Some(model) = self.model() else {
            return EmbeddingPrediction::default();
        };

        let embedding = match self.encoder.encode(&processed) {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!(error = %e, "Encoder failure, skipping embedding prediction");
                return EmbeddingPrediction::default();
            }
        };

        let probs = model.probabilities(&embedding);
        let mut ranked: Vec<(String, f64)> = model
            .labels
            .iter()
            .cloned()
            .zip(probs)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let confidence = match ranked.as_slice() {
            [(_, top), (_, second), ..] => top - second,
            _ => 0.0,
        };

        EmbeddingPrediction { ranked, confidence }
    }

    /// Train on labeled (text, label) pairs and persist the artifact.
    ///
    /// Texts failing preprocessing are skipped. The freshly trained model is
    /// written to the artifact path; a classifier constructed afterwards
    /// picks it up.
    pub fn train(&self, examples: &[(String, String)]) -> Result<LinearModel> {
        let mut labels: Vec<String> = Vec::new();
        let mut embeddings = Vec::new();
        let mut class_indices = Vec::new();

        for (text, label) in examples {
            let Some(processed) = preprocess(text) else {
                continue;
            };
            let embedding = self
                .encoder
                .encode(&processed)
                .map_err(|e| ModelError::Training(format!("encoding failed: {e}")))?;

            let class = match labels.iter().position(|l| l == label) {
                Some(idx) => idx,
                None => {
                    labels.push(label.clone());
                    labels.len() - 1
                }
            };
            embeddings.push(embedding);
            class_indices.push(class);
        }

        if embeddings.is_empty() || labels.len() < 2 {
            return Err(ModelError::Training(
                "need usable examples from at least two classes".to_string(),
            )
            .into());
        }

        let model = LinearModel::fit(&embeddings, &class_indices, labels);
        model.save(&self.artifact_path)?;
        info!(
            path = %self.artifact_path.display(),
            samples = embeddings.len(),
            classes = model.labels.len(),
            "Classifier trained and saved"
        );
        Ok(model)
    }
}

/// Normalize text for classification: collapse whitespace, strip everything
/// but word characters and basic punctuation. `None` when too little text
/// remains to classify.
pub fn preprocess(text: &str) -> Option<String> {
    if text.trim().len() < MIN_TEXT_LEN {
        return None;
    }

    let filtered: String = text
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || matches!(c, '.' | ',' | '!' | '?' | '@' | '-') {
                c
            } else {
                ' '
            }
        })
        .collect();
    let collapsed = filtered.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.len() < MIN_TEXT_LEN {
        return None;
    }
    Some(collapsed)
}
