//! End-to-end classification tests over the public API.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use mail_triage::classify::{BatchStats, Confidence, HybridClassifier};
use mail_triage::config::TriageConfig;
use mail_triage::embedding::{EmbeddingClassifier, LinearModel, SentenceEncoder};
use mail_triage::error::Result;
use mail_triage::message::{MessageRecord, RawMessage};

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

fn config() -> Arc<TriageConfig> {
    Arc::new(TriageConfig::default())
}

fn record(sender: &str, subject: &str, body: &str) -> MessageRecord {
    MessageRecord::from_raw(&RawMessage {
        sender: sender.to_string(),
        to: "me@example.com".to_string(),
        subject: subject.to_string(),
        html_body: body.to_string(),
        internal_date: Utc::now().timestamp_millis(),
        ..RawMessage::default()
    })
}

fn newsletter_blast() -> MessageRecord {
    let mut headers = HashMap::new();
    headers.insert(
        "list-unsubscribe".to_string(),
        "<https://shop.example/u>".to_string(),
    );
    headers.insert("x-campaign".to_string(), "summer-blast".to_string());

    MessageRecord::from_raw(&RawMessage {
        sender: "newsletter@shop.example".to_string(),
        to: "me@example.com".to_string(),
        subject: "50% OFF today only! Unsubscribe here".to_string(),
        html_body: format!(
            "{}<a href=\"https://shop.example/unsubscribe?utm_campaign=blast\">unsubscribe</a> \
             shop now - click here - expires tonight - $19.99",
            "<img src=\"banner.png\">".repeat(8)
        ),
        headers,
        internal_date: Utc::now().timestamp_millis(),
        ..RawMessage::default()
    })
}

/// Word-presence encoder with a deterministic, hand-checkable embedding.
struct KeywordEncoder {
    calls: AtomicUsize,
}

impl KeywordEncoder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

impl SentenceEncoder for KeywordEncoder {
    fn dimensions(&self) -> usize {
        2
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(vec![
            if text.contains("zebra") { 1.0 } else { 0.0 },
            if text.contains("quokka") { 1.0 } else { 0.0 },
        ])
    }
}

/// Classifier whose embedding side reports promo probability 0.8 for texts
/// containing "zebra" and importance probability 0.8 for "quokka", both at
/// confidence 0.6.
fn embedding_classifier(
    dir: &std::path::Path,
    encoder: Arc<KeywordEncoder>,
) -> EmbeddingClassifier {
    // logit gap ln(4) gives probabilities 0.8 / 0.2.
    let gap = 4.0f32.ln();
    let model = LinearModel {
        labels: vec!["promo".to_string(), "important".to_string()],
        weights: vec![vec![gap, 0.0], vec![0.0, gap]],
        biases: vec![0.0, 0.0],
        dimensions: 2,
    };
    let path = dir.join("model.json");
    model.save(&path).unwrap();
    EmbeddingClassifier::new(encoder, path)
}

#[test]
fn obvious_newsletter_is_promotional_with_unsubscribe_reason() {
    init_tracing();
    let classifier = HybridClassifier::rules_only(config()).unwrap();
    let result = classifier.classify(&newsletter_blast());

    assert!(result.is_promotional);
    assert!(!result.is_important);
    assert!(result.reasons.len() <= 6);
    assert!(
        result.reasons.iter().any(|r| r.contains("Unsubscribe link detected")),
        "reasons: {:?}",
        result.reasons
    );
}

#[test]
fn bank_security_alert_fast_skips_promotional_analysis() {
    let classifier = HybridClassifier::rules_only(config()).unwrap();
    let result = classifier.classify(&record(
        "alerts@mybank.example",
        "Security Alert: new sign-in detected",
        "",
    ));

    assert!(result.is_important);
    assert!(!result.is_promotional);
    assert!(result.importance_score >= 9.0);
    assert_eq!(result.confidence, Confidence::High);
    assert_eq!(classifier.promo_scorer().invocation_count(), 0);
}

#[test]
fn whitelisted_sender_never_consults_the_encoder() {
    let dir = tempfile::tempdir().unwrap();
    let encoder = Arc::new(KeywordEncoder::new());
    let embedding = embedding_classifier(dir.path(), encoder.clone());

    let mut config = TriageConfig::default();
    config.whitelist = vec!["boss@example.com".to_string()];
    let classifier = HybridClassifier::new(Arc::new(config), Some(embedding)).unwrap();

    let result = classifier.classify(&record(
        "boss@example.com",
        "everything must go: zebra sale",
        "zebra zebra unsubscribe",
    ));

    assert!(!result.is_promotional);
    assert!(result.is_important);
    assert_eq!(encoder.calls.load(Ordering::Relaxed), 0);
    assert_eq!(classifier.promo_scorer().invocation_count(), 0);
}

#[test]
fn strong_rule_embedding_disagreement_is_conservative() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let encoder = Arc::new(KeywordEncoder::new());
    let embedding = embedding_classifier(dir.path(), encoder);
    let classifier = HybridClassifier::new(config(), Some(embedding)).unwrap();

    // Heavy promotional rule evidence while the embedding confidently reads
    // the text as important.
    let mut message = newsletter_blast();
    message.html_body.push_str(" quokka quokka quokka");
    let result = classifier.classify(&message);

    assert!(result.embedding_importance_probability > 0.7);
    assert!((result.embedding_confidence - 0.6).abs() < 1e-6);
    assert!(result.promo_score >= 9.0);
    assert!(
        result.effective_threshold > 0.55,
        "threshold {} should be raised on disagreement",
        result.effective_threshold
    );
    assert!(!result.is_promotional);
    assert_ne!(result.confidence, Confidence::High);
    assert!(
        result
            .reasons
            .iter()
            .any(|r| r.contains("Rule-embedding disagreement")),
        "reasons: {:?}",
        result.reasons
    );
}

#[test]
fn reply_is_kept_independent_of_promo_evidence() {
    let classifier = HybridClassifier::rules_only(config()).unwrap();
    let mut raw = RawMessage {
        sender: "colleague@example.com".to_string(),
        to: "me@example.com".to_string(),
        subject: "Re: Project deadline tomorrow".to_string(),
        html_body: "as discussed, the sale numbers are attached".to_string(),
        internal_date: Utc::now().timestamp_millis(),
        ..RawMessage::default()
    };
    raw.headers
        .insert("In-Reply-To".to_string(), "<prev@example.com>".to_string());

    let result = classifier.classify(&MessageRecord::from_raw(&raw));
    assert!(!result.is_promotional);
    assert!(result.is_important);
}

#[test]
fn agreement_confirms_promotional_with_embedding() {
    let dir = tempfile::tempdir().unwrap();
    let encoder = Arc::new(KeywordEncoder::new());
    let embedding = embedding_classifier(dir.path(), encoder);
    let classifier = HybridClassifier::new(config(), Some(embedding)).unwrap();

    let mut message = newsletter_blast();
    message.html_body.push_str(" zebra zebra");
    let result = classifier.classify(&message);

    assert!(result.is_promotional);
    assert!(result.embedding_promo_probability > 0.7);
    assert!((0.0..=1.0).contains(&result.combined_promo_score));
}

#[test]
fn combined_scores_and_thresholds_stay_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let encoder = Arc::new(KeywordEncoder::new());
    let embedding = embedding_classifier(dir.path(), encoder);
    let classifier = HybridClassifier::new(config(), Some(embedding)).unwrap();
    let base = config().promo_threshold;

    let corpus = vec![
        newsletter_blast(),
        record("alice@example.com", "lunch on friday?", "zebra quokka maybe thursday works too"),
        record("noreply@service.example", "your invoice is ready", "invoice #442 attached, quokka"),
        record("deals@store.example", "flash sale zebra zebra", "70% off everything, shop now zebra"),
        MessageRecord::from_raw(&RawMessage::default()),
    ];

    for message in &corpus {
        let result = classifier.classify(message);
        assert!(
            (0.0..=1.0).contains(&result.combined_promo_score),
            "combined score out of range: {}",
            result.combined_promo_score
        );
        assert!(result.promo_score >= 0.0);
        assert!(result.importance_score >= 0.0);
        // Confidence may move the threshold by at most the configured cap;
        // disagreement may only raise it further, never past 0.75.
        assert!(result.effective_threshold >= base - 0.10 - 1e-9);
        assert!(result.effective_threshold <= 0.75 + 1e-9);
        assert!(result.reasons.len() <= 6);
    }
}

#[test]
fn classification_is_deterministic_for_a_fixed_instant() {
    let classifier = HybridClassifier::rules_only(config()).unwrap();
    let message = newsletter_blast();
    let now = Utc::now();

    let first = classifier.classify_at(&message, now, None);
    let second = classifier.classify_at(&message, now, None);
    assert_eq!(first.is_promotional, second.is_promotional);
    assert_eq!(first.combined_promo_score, second.combined_promo_score);
    assert_eq!(first.effective_threshold, second.effective_threshold);
    assert_eq!(first.reasons, second.reasons);
}

#[test]
fn degenerate_message_never_fails() {
    let classifier = HybridClassifier::rules_only(config()).unwrap();
    let result = classifier.classify(&MessageRecord::from_raw(&RawMessage::default()));
    assert!(!result.reasons.is_empty());
    assert!((0.0..=1.0).contains(&result.combined_promo_score));
}

#[test]
fn batch_stats_over_a_mixed_mailbox() {
    let classifier = HybridClassifier::rules_only(config()).unwrap();
    let mailbox = vec![
        newsletter_blast(),
        record(
            "alerts@mybank.example",
            "security alert: new sign-in detected",
            "",
        ),
        record("alice@example.com", "quick question", "do you have the figures from tuesday?"),
    ];

    let mut stats = BatchStats::new();
    for message in &mailbox {
        stats.record(&classifier.classify(message));
    }

    assert_eq!(stats.total, 3);
    assert!(stats.promotional >= 1);
    assert!(stats.important >= 1);
    assert!((0.0..=1.0).contains(&stats.promotional_rate()));
}
