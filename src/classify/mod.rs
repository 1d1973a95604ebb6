//! Classification: rule scorers, the hybrid combiner and batch statistics.

pub mod hybrid;
pub mod importance;
pub mod promo;
pub mod score;
pub mod stats;

pub use hybrid::{ClassificationResult, Confidence, HybridClassifier};
pub use importance::{ImportanceScorer, ImportanceVerdict};
pub use promo::{PromoScorer, PromoVerdict};
pub use stats::BatchStats;
