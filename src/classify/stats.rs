//! Batch classification statistics.

use serde::Serialize;

use crate::classify::hybrid::{ClassificationResult, Confidence};

/// Accumulated statistics over a batch of classifications.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchStats {
    pub total: usize,
    pub promotional: usize,
    pub important: usize,
    pub borderline: usize,
    pub high_confidence: usize,
    pub medium_confidence: usize,
    pub low_confidence: usize,
    combined_score_sum: f64,
}

impl BatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: &ClassificationResult) {
        self.total += 1;
        if result.is_promotional {
            self.promotional += 1;
        }
        if result.is_important {
            self.important += 1;
        }
        if result.borderline {
            self.borderline += 1;
        }
        match result.confidence {
            Confidence::High => self.high_confidence += 1,
            Confidence::Medium => self.medium_confidence += 1,
            Confidence::Low => self.low_confidence += 1,
        }
        self.combined_score_sum += result.combined_promo_score;
    }

    /// Share of the batch classified promotional, in [0, 1].
    pub fn promotional_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.promotional as f64 / self.total as f64
    }

    /// Mean combined promotional score over the batch.
    pub fn mean_combined_score(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.combined_score_sum / self.total as f64
    }

    pub fn merge(&mut self, other: &BatchStats) {
        self.total += other.total;
        self.promotional += other.promotional;
        self.important += other.important;
        self.borderline += other.borderline;
        self.high_confidence += other.high_confidence;
        self.medium_confidence += other.medium_confidence;
        self.low_confidence += other.low_confidence;
        self.combined_score_sum += other.combined_score_sum;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(promotional: bool, combined: f64, confidence: Confidence) -> ClassificationResult {
        ClassificationResult {
            is_promotional: promotional,
            is_important: !promotional,
            importance_score: 0.0,
            promo_score: combined * 10.0,
            combined_promo_score: combined,
            effective_threshold: 0.55,
            embedding_promo_probability: 0.0,
            embedding_importance_probability: 0.0,
            embedding_confidence: 0.0,
            borderline: (combined - 0.55).abs() < 0.08,
            confidence,
            reasons: Vec::new(),
        }
    }

    #[test]
    fn accumulates_counts_and_rates() {
        let mut stats = BatchStats::new();
        stats.record(&result(true, 0.9, Confidence::High));
        stats.record(&result(true, 0.6, Confidence::Medium));
        stats.record(&result(false, 0.1, Confidence::Low));
        stats.record(&result(false, 0.2, Confidence::High));

        assert_eq!(stats.total, 4);
        assert_eq!(stats.promotional, 2);
        assert_eq!(stats.important, 2);
        assert_eq!(stats.borderline, 1);
        assert_eq!(stats.high_confidence, 2);
        assert_eq!(stats.promotional_rate(), 0.5);
        assert!((stats.mean_combined_score() - 0.45).abs() < 1e-9);
    }

    #[test]
    fn empty_batch_has_zero_rates() {
        let stats = BatchStats::new();
        assert_eq!(stats.promotional_rate(), 0.0);
        assert_eq!(stats.mean_combined_score(), 0.0);
    }

    #[test]
    fn merge_combines_batches() {
        let mut a = BatchStats::new();
        a.record(&result(true, 0.8, Confidence::High));
        let mut b = BatchStats::new();
        b.record(&result(false, 0.2, Confidence::Low));
        b.record(&result(false, 0.3, Confidence::Low));

        a.merge(&b);
        assert_eq!(a.total, 3);
        assert_eq!(a.promotional, 1);
        assert!((a.mean_combined_score() - (1.3 / 3.0)).abs() < 1e-9);
    }
}
