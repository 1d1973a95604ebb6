//! Embedding side: sentence encoders and the linear classifier on top.

pub mod classifier;
pub mod encoder;

pub use classifier::{EmbeddingClassifier, EmbeddingPrediction, LinearModel};
pub use encoder::{OnnxEncoder, SentenceEncoder};
