//! Hybrid classifier: rule scores fused with embedding predictions.
//!
//! Classification runs as a fixed sequence: rule importance first with two
//! skip levels that keep obviously important mail away from promotional
//! analysis, then importance fusion, promotional fusion, confidence-driven
//! threshold adjustment, and a borderline check that biases ties toward
//! keeping mail. Classification never fails; when the embedding side is
//! unavailable the combiner degrades to rules-only.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::classify::importance::{ImportanceScorer, ImportanceVerdict};
use crate::classify::promo::{PromoScorer, PromoVerdict};
use crate::config::TriageConfig;
use crate::embedding::classifier::{EmbeddingClassifier, EmbeddingPrediction};
use crate::error::Result;
use crate::message::MessageRecord;

/// Rule promo score at which skip-level importance is overridden anyway.
const OVERWHELMING_PROMO_RULE_SCORE: f64 = 9.0;
/// Embedding promo probability treated as overwhelming at skip level.
const OVERWHELMING_PROMO_PROBABILITY: f64 = 0.95;
/// Band below `borderline_band` where the keep bias applies.
const KEEP_BIAS_BAND: f64 = 0.03;
/// Maximum reasons surfaced on a result.
const MAX_REASONS: usize = 6;

/// Reason fragments that should survive the reason cap.
const PRIORITY_REASONS: &[&str] = &[
    "Whitelisted sender",
    "Critical security email",
    "Unsubscribe link detected",
    "Email tracking detected",
    "Promotional sender",
    "Reply to previous email",
    "High priority header",
    "Rule-embedding disagreement",
    "Borderline promotional call overridden by importance",
];

/// How much the final verdict can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Final classification for one message.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationResult {
    pub is_promotional: bool,
    pub is_important: bool,
    /// Fused importance on the rule 0..10 scale.
    pub importance_score: f64,
    /// Rule promotional score, clamped to zero.
    pub promo_score: f64,
    /// Fused promotional score in [0, 1].
    pub combined_promo_score: f64,
    /// Threshold the combined score was compared against.
    pub effective_threshold: f64,
    pub embedding_promo_probability: f64,
    pub embedding_importance_probability: f64,
    pub embedding_confidence: f64,
    /// Whether the combined score landed inside the borderline band.
    pub borderline: bool,
    pub confidence: Confidence,
    pub reasons: Vec<String>,
}

/// Hybrid classifier. Construct once per config; `classify` is safe to call
/// from multiple threads.
pub struct HybridClassifier {
    config: Arc<TriageConfig>,
    importance: ImportanceScorer,
    promo: PromoScorer,
    embedding: Option<EmbeddingClassifier>,
}

impl HybridClassifier {
    pub fn new(config: Arc<TriageConfig>, embedding: Option<EmbeddingClassifier>) -> Result<Self> {
        Ok(Self {
            importance: ImportanceScorer::new(config.clone())?,
            promo: PromoScorer::new(config.clone())?,
            embedding,
            config,
        })
    }

    /// Rules-only classifier, no embedding side.
    pub fn rules_only(config: Arc<TriageConfig>) -> Result<Self> {
        Self::new(config, None)
    }

    pub fn promo_scorer(&self) -> &PromoScorer {
        &self.promo
    }

    /// Classify a message against the current time.
    pub fn classify(&self, record: &MessageRecord) -> ClassificationResult {
        self.classify_at(record, Utc::now(), None)
    }

    /// Classify against an explicit `now`, optionally informed by thread
    /// context. `thread_is_important` only matters in the borderline band
    /// and only ever flips a promotional call back to kept.
    pub fn classify_at(
        &self,
        record: &MessageRecord,
        now: DateTime<Utc>,
        thread_is_important: Option<bool>,
    ) -> ClassificationResult {
        let importance = self.importance.score(record, now);

        // Rule importance alone can settle it; neither the encoder nor the
        // promotional scorer is consulted.
        if importance.score >= self.config.importance_fast_skip_threshold {
            return self.skip_result(
                &importance,
                importance.displayed_score(),
                &EmbeddingPrediction::default(),
                None,
                "rule importance above fast-skip level",
            );
        }

        let prediction = self.predict(record);
        let combined_importance = self.fuse_importance(&importance, &prediction);

        if combined_importance >= self.config.importance_fast_skip_threshold {
            return self.skip_result(
                &importance,
                combined_importance,
                &prediction,
                None,
                "combined importance above fast-skip level",
            );
        }

        let promo = self.promo.score(record, &importance, now);

        if combined_importance >= self.config.importance_skip_threshold
            && !self.overwhelming_promo_evidence(&promo, &prediction)
        {
            return self.skip_result(
                &importance,
                combined_importance,
                &prediction,
                Some(&promo),
                "combined importance above skip level",
            );
        }

        let (combined_promo, agreement_delta) = self.fuse_promo(&promo, &prediction);
        let (mut threshold, mut extra_reasons) = self.effective_threshold(&prediction);

        // Large rule/embedding disagreement makes the call conservative.
        if !prediction.is_empty() && agreement_delta > self.config.disagreement_limit {
            threshold = (threshold + (agreement_delta * 0.2).min(0.1)).min(0.75);
            extra_reasons.push("Rule-embedding disagreement".to_string());
        }

        let mut is_promotional = combined_promo >= threshold;
        let distance = (combined_promo - threshold).abs();
        let borderline = distance < self.config.borderline_band;

        if borderline && is_promotional {
            if distance < KEEP_BIAS_BAND
                && importance.score > self.config.borderline_importance_override
            {
                is_promotional = false;
                extra_reasons
                    .push("Borderline promotional call overridden by importance".to_string());
            } else if thread_is_important == Some(true) {
                is_promotional = false;
                extra_reasons.push("Active conversation thread".to_string());
            }
        }

        let confidence = grade_confidence(
            &prediction,
            distance,
            agreement_delta,
            self.config.borderline_band,
        );
        let is_important = !is_promotional
            && (importance.is_important
                || combined_importance >= self.config.importance_threshold);

        let mut reasons = promo.reasons.clone();
        reasons.extend(extra_reasons);

        debug!(
            sender = %record.normalized_sender,
            combined_promo,
            threshold,
            is_promotional,
            borderline,
            ?confidence,
            "Hybrid classification complete"
        );

        ClassificationResult {
            is_promotional,
            is_important,
            importance_score: round1(combined_importance),
            promo_score: promo.displayed_score(),
            combined_promo_score: round2(combined_promo),
            effective_threshold: round2(threshold),
            embedding_promo_probability: prediction.promo_probability(),
            embedding_importance_probability: prediction.importance_probability(),
            embedding_confidence: prediction.confidence,
            borderline,
            confidence,
            reasons: cap_reasons(reasons),
        }
    }

    fn predict(&self, record: &MessageRecord) -> EmbeddingPrediction {
        let Some(classifier) = &self.embedding else {
            return EmbeddingPrediction::default();
        };
        let text = format!("{} {}", record.subject, truncate(&record.html_body, 1000));
        classifier.predict(&text)
    }

    /// Fuse rule and embedding importance onto the rule 0..10 scale.
    ///
    /// With positive rule evidence both signals are weighted by embedding
    /// confidence; with none, the embedding carries the estimate alone,
    /// damped by its own confidence.
    fn fuse_importance(
        &self,
        importance: &ImportanceVerdict,
        prediction: &EmbeddingPrediction,
    ) -> f64 {
        if prediction.is_empty() {
            return importance.displayed_score();
        }

        let embedding_score = prediction.importance_probability() * 10.0;
        if importance.score <= 0.0 {
            return embedding_score * prediction.confidence.max(0.4);
        }

        let (mut embedding_weight, mut rules_weight) =
            (self.config.embedding_weight, self.config.rules_weight);
        if prediction.confidence > 0.3 {
            embedding_weight *= 1.2;
            rules_weight *= 0.9;
        } else if prediction.confidence < 0.1 {
            embedding_weight *= 0.7;
            rules_weight *= 1.1;
        }

        (embedding_weight * embedding_score + rules_weight * importance.score)
            / (embedding_weight + rules_weight)
    }

    /// Fuse rule and embedding promotional signals into [0, 1]. Returns the
    /// combined score and the rule/embedding gap.
    fn fuse_promo(&self, promo: &PromoVerdict, prediction: &EmbeddingPrediction) -> (f64, f64) {
        let rules_norm = (promo.score.max(0.0) / 10.0).min(1.0);
        if prediction.is_empty() {
            return (rules_norm, 0.0);
        }

        let probability = prediction.promo_probability();
        let (embedding_weight, rules_weight) = if prediction.confidence > 0.3 {
            (1.3, 0.7)
        } else if prediction.confidence > self.config.min_confidence {
            (1.1, 0.9)
        } else {
            (0.8, 1.2)
        };

        let mut combined = (embedding_weight * probability + rules_weight * rules_norm)
            / (embedding_weight + rules_weight);

        let delta = (probability - rules_norm).abs();
        if delta < 0.15 {
            combined = (combined + 0.05).min(1.0);
        } else if delta > 0.4 {
            combined = (combined - 0.05).max(0.0);
        }

        (combined, delta)
    }

    /// Confidence-adjusted decision threshold, bounded around the base.
    fn effective_threshold(&self, prediction: &EmbeddingPrediction) -> (f64, Vec<String>) {
        let base = self.config.promo_threshold;
        let mut threshold = base;
        let mut reasons = Vec::new();

        if !prediction.is_empty() {
            if prediction.confidence > 0.4 {
                threshold = (base - self.config.high_confidence_reduction).max(0.35);
                reasons.push("High embedding confidence".to_string());
            } else if prediction.confidence < self.config.min_confidence {
                threshold = (base + self.config.low_confidence_increase).min(0.75);
                reasons.push("Low embedding confidence".to_string());
            }
        }

        // Confidence may never move the threshold further than the cap.
        let cap = self.config.max_threshold_adjustment;
        threshold = threshold.clamp(base - cap, base + cap);
        (threshold, reasons)
    }

    fn overwhelming_promo_evidence(
        &self,
        promo: &PromoVerdict,
        prediction: &EmbeddingPrediction,
    ) -> bool {
        promo.score >= OVERWHELMING_PROMO_RULE_SCORE
            || (prediction.promo_probability() >= OVERWHELMING_PROMO_PROBABILITY
                && prediction.confidence > 0.5)
    }

    /// Skip-path result. Reports the importance that triggered the skip and
    /// whatever embedding/promo signals were computed before it triggered;
    /// the rule-only fast skip legitimately reports zeros for both.
    fn skip_result(
        &self,
        importance: &ImportanceVerdict,
        fused_importance: f64,
        prediction: &EmbeddingPrediction,
        promo: Option<&PromoVerdict>,
        why: &str,
    ) -> ClassificationResult {
        debug!(score = fused_importance, why, "Promotional analysis skipped");
        let mut reasons = vec![format!(
            "Importance {:.1} rules out promotional classification",
            fused_importance
        )];
        reasons.extend(importance.reasons.iter().cloned());

        ClassificationResult {
            is_promotional: false,
            is_important: true,
            importance_score: round1(fused_importance.max(0.0)),
            promo_score: promo.map(PromoVerdict::displayed_score).unwrap_or(0.0),
            combined_promo_score: 0.0,
            effective_threshold: self.config.promo_threshold,
            embedding_promo_probability: prediction.promo_probability(),
            embedding_importance_probability: prediction.importance_probability(),
            embedding_confidence: prediction.confidence,
            borderline: false,
            confidence: Confidence::High,
            reasons: cap_reasons(reasons),
        }
    }
}

/// Three-way confidence grade from embedding confidence, distance to the
/// threshold and rule/embedding agreement. Distance cutoffs scale with the
/// borderline band: clear of it, half of it, twice it.
fn grade_confidence(
    prediction: &EmbeddingPrediction,
    distance: f64,
    delta: f64,
    band: f64,
) -> Confidence {
    if prediction.confidence > 0.3 && distance > band && delta < 0.2 {
        Confidence::High
    } else if prediction.confidence > 0.15 && distance > band / 2.0 {
        Confidence::Medium
    } else if distance > band * 2.0 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

/// Cap reasons, keeping strong indicators ahead of circumstantial ones.
fn cap_reasons(reasons: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut deduped: Vec<String> = reasons
        .into_iter()
        .filter(|r| seen.insert(r.clone()))
        .collect();

    // Stable partition: priority reasons first, original order otherwise.
    deduped.sort_by_key(|r| !PRIORITY_REASONS.iter().any(|p| r.contains(p)));
    deduped.truncate(MAX_REASONS);
    deduped
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn truncate(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
