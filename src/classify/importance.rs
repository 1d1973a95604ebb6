//! Rule-based importance scorer.
//!
//! Accumulates weighted evidence that a message needs the user's attention:
//! sender reputation, subject and content keywords, headers, structure,
//! personal-data detection, recency and read state. Promotional evidence
//! found along the way subtracts a bounded penalty. The acceptance threshold
//! is dynamic: it drops as more distinct reason categories fire and drops
//! further when strong indicators are present.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::debug;

use crate::classify::score::{ScoreBreakdown, count_emoji};
use crate::config::{TriageConfig, compile_pattern};
use crate::error::Result;
use crate::message::MessageRecord;

/// Sentinel score for whitelisted senders.
pub const WHITELIST_SCORE: f64 = 10.0;
/// Score for the critical-sender plus critical-keyword early exit.
pub const CRITICAL_EARLY_EXIT_SCORE: f64 = 9.5;

/// Reasons that count as strong indicators for threshold adaptation.
const STRONG_INDICATORS: &[&str] = &[
    "Reply to previous email",
    "Critical keywords in content",
    "High priority header",
    "High importance header",
    "Reply/Forward subject",
];

/// False-urgency table: an alert term plus the marketing context terms that
/// turn it into a promotional signal. An empty context list means the term
/// is marketing bait on its own.
const MARKETING_ALERTS: &[(&str, &[&str])] = &[
    ("action required", &["confirm", "marketing", "preferences", "subscription", "newsletter"]),
    ("urgent", &["offer", "discount", "promo", "deal", "sale"]),
    ("important", &["offer", "news", "information", "update", "newsletter"]),
    ("last chance", &[]),
    ("ne manquez pas", &[]),
    ("limited time", &[]),
    ("expires", &["offer", "promotion", "discount"]),
];

/// Outcome of rule-based importance scoring.
#[derive(Debug, Clone)]
pub struct ImportanceVerdict {
    pub is_important: bool,
    /// Rounded rule score. May be negative internally; clamp for display.
    pub score: f64,
    /// Dynamic threshold the score was compared against.
    pub threshold: f64,
    pub reasons: Vec<String>,
}

impl ImportanceVerdict {
    /// Externally visible score, clamped to zero.
    pub fn displayed_score(&self) -> f64 {
        self.score.max(0.0)
    }

    /// Whether the personal-data heuristics fired. Consulted by the
    /// promotional decision policy.
    pub fn has_personal_data_evidence(&self) -> bool {
        self.reasons
            .iter()
            .any(|r| r.to_lowercase().contains("personal"))
    }
}

/// Rule-based importance scorer. Construct once per config; `score` is pure
/// per call.
pub struct ImportanceScorer {
    config: Arc<TriageConfig>,
    promotional_patterns: Vec<Regex>,
    unsubscribe_patterns: Vec<Regex>,
    tracking_patterns: Vec<Regex>,
    high_sensitivity: Vec<Regex>,
    medium_sensitivity: Vec<Regex>,
    low_sensitivity: Vec<Regex>,
    urgent_subject: Regex,
    content_promo_indicators: Vec<Regex>,
}

impl ImportanceScorer {
    pub fn new(config: Arc<TriageConfig>) -> Result<Self> {
        let promotional_patterns = config
            .promotional_patterns
            .iter()
            .map(|p| compile_pattern(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            config,
            promotional_patterns,
            unsubscribe_patterns: compile_static(&[
                r"(?i)(unsubscribe|désabonner|désinscrire|opt[- ]?out)",
                r"(?i)(manage|gérer).*(subscriptions|preferences|abonnements|préférences)",
                r"(?i)(view|voir).*(browser|navigateur)",
            ]),
            tracking_patterns: compile_static(&[
                r"(?i)(track|clic|click)\.[a-z0-9-]+\.[a-z]{2,}",
                r"(?i)(marketing|campaign|promo)[a-z0-9-]*\.[a-z]{2,}",
                r"(?i)(mailer|mailchimp|sendgrid|mailjet|newsletter)",
                r"(?i)utm_(source|medium|campaign|content|term)",
            ]),
            high_sensitivity: compile_static(&[
                r"(?i)\bnum[ée]ro\s+(de\s+)?(client|adh[ée]rent|s[ée]curit[ée]\s+sociale|ss|compte)\s*:?\s*\w+",
                r"(?i)\bclient\s+(id|number|num[ée]ro)\s*:?\s*\w+",
                r"(?i)\bid\s+(client|adh[ée]rent|utilisateur)\s*:?\s*\w+",
                r"(?i)\b(votre|your)\s+num[ée]ro\s+(est|is|:)",
                r"(?i)\biban\s*:?\s*\w+",
                r"(?i)\bcarte\s+bancaire",
                r"(?i)\bcredit\s+card",
                r"(?i)\bpaiement\s+de\s+\d+[,.]\d+\s*(€|\$)",
                r"(?i)\bfacture\s+(de|du|d')\s+\d+[,.]\d+\s*(€|\$)",
                r"(?i)\bnum[ée]ro\s+(fiscal|de\s+s[ée]curit[ée]\s+sociale)",
            ]),
            medium_sensitivity: compile_static(&[
                r"(?i)\bcode\s*:?\s*[a-z0-9]{4,}",
                r"(?i)\br[ée]f[ée]rence\s*:?\s*[a-z0-9]{4,}",
                r"(?i)\bdossier\s+(num[ée]ro|n[°o])\s*:?\s*[a-z0-9]+",
                r"(?i)\bcontrat\s+(num[ée]ro|n[°o])\s*:?\s*[a-z0-9]+",
                r"(?i)\bt[ée]l[ée]phone\s*(fixe|mobile|portable)?\s*:?\s*(\+\d{1,4}[\s.-]?)?(\(0\)|0)[1-9][\s.-]?\d{2}[\s.-]?\d{2}[\s.-]?\d{2}[\s.-]?\d{2}",
                r"(?i)\b(date\s+(de|du|d')\s+naissance|birth\s+date)\s*:?\s*\d{1,2}[/-]\d{1,2}[/-]\d{2,4}",
                r"(?i)\b(expiration|expiry|validité)\s*:?\s*\d{1,2}[/-]\d{2,4}",
            ]),
            low_sensitivity: compile_static(&[
                r"\b\d{6,}\b",
                r"(?i)\b[a-z]{2,}\d{4,}\b",
                r"(?i)\bvos\s+(donn[ée]es|informations)\s+(personnelles|confidentielles)",
                r"(?i)\b(confidentiel|personnel)\b",
                r"(?i)\b(mise\s+[àa]\s+jour|update)\s+(de\s+vos|your)\s+(donn[ée]es|informations|coordonn[ée]es)",
            ]),
            urgent_subject: Regex::new(r"(?i)(action|urgent|important|required|nécessaire)")
                .unwrap(),
            content_promo_indicators: compile_static(&[
                r"(?i)(discount|sale|promo|offer|deal|remise|solde|promotion)",
                r"(?i)(buy|purchase|acheter|buy now)",
                r"(?i)(new collection|nouvelle collection|new arrival|nouveauté)",
                r"(?i)(limited time|édition limitée|offre limitée|limited offer)",
            ]),
        })
    }

    /// Score a message, evaluating age-sensitive factors against `now`.
    pub fn score(&self, record: &MessageRecord, now: DateTime<Utc>) -> ImportanceVerdict {
        // Whitelisted senders bypass all scoring.
        if self
            .config
            .whitelist
            .iter()
            .any(|w| record.sender.contains(w.as_str()))
        {
            return ImportanceVerdict {
                is_important: true,
                score: WHITELIST_SCORE,
                threshold: self.config.importance_threshold,
                reasons: vec!["Whitelisted sender".to_string()],
            };
        }

        // Critical sender plus critical subject keyword: unambiguous.
        let critical_sender = self
            .config
            .critical_senders
            .iter()
            .any(|c| record.sender.contains(c.as_str()));
        if critical_sender
            && self
                .config
                .critical_keywords
                .iter()
                .any(|k| record.subject.contains(k.as_str()))
        {
            return ImportanceVerdict {
                is_important: true,
                score: CRITICAL_EARLY_EXIT_SCORE,
                threshold: self.config.importance_threshold,
                reasons: vec!["Critical security email - early skip".to_string()],
            };
        }

        let mut breakdown = ScoreBreakdown::new();
        self.analyze_sender(record, &mut breakdown);
        self.analyze_subject(record, &mut breakdown);
        self.analyze_recipients(record, &mut breakdown);

        if record.has_attachments {
            breakdown.add(3.0, "Email has attachments");
        }
        if record.is_provider_important() {
            breakdown.add(5.0, "Provider labeled as IMPORTANT");
        }

        self.analyze_headers(record, &mut breakdown);

        if !record.html_body.is_empty() {
            self.analyze_subject_body_mismatch(record, &mut breakdown);
            self.analyze_content(record, &mut breakdown);
        }

        self.analyze_time_factors(record, now, &mut breakdown);
        self.analyze_read_status(record, now, &mut breakdown);

        // Promotional counter-evidence, bounded.
        let (indicators, promo_reasons) = self.promotional_indicators(record);
        if indicators > 0 {
            let penalty = (indicators as f64 * self.config.promotional_penalty).min(5.0);
            breakdown.add(
                -penalty,
                format!("Promotional indicators detected: -{penalty:.1} points"),
            );
            breakdown.reasons.extend(promo_reasons.into_iter().take(2));
        }

        let threshold = self.dynamic_threshold(&breakdown.reasons);
        let score = breakdown.rounded();
        let is_important = score >= threshold;

        debug!(
            sender = %record.normalized_sender,
            score,
            threshold,
            is_important,
            "Importance scoring complete"
        );

        ImportanceVerdict {
            is_important,
            score,
            threshold,
            reasons: breakdown.reasons,
        }
    }

    fn analyze_sender(&self, record: &MessageRecord, breakdown: &mut ScoreBreakdown) {
        for critical in &self.config.critical_senders {
            if record.sender.contains(critical.as_str()) {
                breakdown.add(3.0, format!("Critical sender: {critical}"));
                return;
            }
        }

        // A display name in front of the address is a weak personal signal.
        if let Some(name) = record.sender.split('<').next()
            && record.sender.contains('>')
            && !name.trim().is_empty()
        {
            breakdown.adjust(0.5);
        }
    }

    fn analyze_subject(&self, record: &MessageRecord, breakdown: &mut ScoreBreakdown) {
        let subject = &record.subject;

        let mut matched = Vec::new();
        for keyword in &self.config.critical_keywords {
            if subject.contains(keyword.as_str()) {
                matched.push(keyword.as_str());
                breakdown.adjust(3.5);
                if matched.len() >= 3 {
                    break;
                }
            }
        }
        if !matched.is_empty() {
            breakdown.reasons.push(format!(
                "Critical keywords in subject: {}",
                matched[..matched.len().min(2)].join(", ")
            ));
        }

        if self
            .config
            .response_patterns
            .iter()
            .any(|p| subject.contains(p.as_str()))
        {
            breakdown.add(2.0, "Reply/Forward subject");
        }

        // Short subjects with importance terms carry weight, unless promo
        // phrasing co-occurs.
        if subject.len() < 50 && !matched.is_empty() {
            if self
                .config
                .promotional_subjects
                .iter()
                .any(|t| subject.contains(t.as_str()))
            {
                breakdown.add(-1.0, "Marketing subject disguised as important message");
            } else {
                breakdown.add(2.0, "Short subject with importance indicators");
            }
        }

        for (alert_term, marketing_terms) in MARKETING_ALERTS {
            if !subject.contains(alert_term) {
                continue;
            }
            if !marketing_terms.is_empty() {
                if marketing_terms.iter().any(|t| subject.contains(t)) {
                    breakdown.add(
                        -3.0,
                        format!("False importance signal: '{alert_term}' in marketing context"),
                    );
                    break;
                }
            } else {
                breakdown.add(-2.0, format!("Marketing urgency trigger: '{alert_term}'"));
                break;
            }
        }
    }

    fn analyze_recipients(&self, record: &MessageRecord, breakdown: &mut ScoreBreakdown) {
        let to = &record.to;
        if to.contains('@')
            && !["undisclosed", "multiple", "recipients"]
                .iter()
                .any(|b| to.contains(b))
        {
            breakdown.add(0.5, "Directly addressed to user");
        }
    }

    fn analyze_headers(&self, record: &MessageRecord, breakdown: &mut ScoreBreakdown) {
        let headers = &record.headers;

        let priority = headers.get("x-priority").map(String::as_str);
        let importance = headers.get("importance").map(String::as_str);
        if matches!(priority, Some("1" | "high" | "urgent")) {
            breakdown.add(1.5, "High priority header");
        } else if matches!(importance, Some("high" | "urgent")) {
            breakdown.add(1.5, "High importance header");
        }

        if headers.contains_key("in-reply-to") || headers.contains_key("references") {
            breakdown.add(5.0, "Reply to previous email");
        }
    }

    /// Urgent-sounding subject over a promotional body is itself a signal
    /// that the message deserves scrutiny.
    fn analyze_subject_body_mismatch(&self, record: &MessageRecord, breakdown: &mut ScoreBreakdown) {
        if !self.urgent_subject.is_match(&record.subject) {
            return;
        }
        let promo_hits = self
            .content_promo_indicators
            .iter()
            .filter(|p| p.is_match(&record.html_body))
            .count();
        if promo_hits >= 2 {
            breakdown.add(2.0, "Misleading urgent subject with promotional content");
        }
    }

    fn analyze_content(&self, record: &MessageRecord, breakdown: &mut ScoreBreakdown) {
        let content = truncate(&record.html_body, self.config.max_content_analysis_len);

        let mut matched = 0usize;
        for keyword in &self.config.critical_keywords {
            if content.contains(keyword.as_str()) {
                matched += 1;
                breakdown.adjust(2.0);
                if matched >= 3 {
                    break;
                }
            }
        }
        if matched > 0 {
            breakdown.reasons.push("Critical keywords in content".to_string());
        }

        let img_count = content.matches("<img").count();
        let link_count = content.matches("href=").count();
        if img_count <= 2 && link_count <= 5 {
            breakdown.add(1.0, "Simple content structure");
        }

        let sample = truncate(content, (content.len() / 2).min(1000));
        let emoji_count = count_emoji(sample);
        if emoji_count > 3 {
            breakdown.add(-2.0, "Multiple emojis detected (likely promotional)");
        } else if emoji_count > 0 {
            breakdown.adjust(-1.5);
        }

        self.analyze_personal_info(content, breakdown);
    }

    /// Personal-data detection in three sensitivity tiers; only the first
    /// match per tier scores, only the highest tier is surfaced as a reason.
    fn analyze_personal_info(&self, content: &str, breakdown: &mut ScoreBreakdown) {
        let high = self.high_sensitivity.iter().any(|p| p.is_match(content));
        let medium = self.medium_sensitivity.iter().any(|p| p.is_match(content));
        let low = self.low_sensitivity.iter().any(|p| p.is_match(content));

        if high {
            breakdown.adjust(1.5);
        }
        if medium {
            breakdown.adjust(1.0);
        }
        if low {
            breakdown.adjust(0.5);
        }

        if high {
            breakdown
                .reasons
                .push("May contain highly sensitive personal information".to_string());
        } else if medium || low {
            breakdown
                .reasons
                .push("May contain personal information".to_string());
        }
    }

    fn analyze_time_factors(
        &self,
        record: &MessageRecord,
        now: DateTime<Utc>,
        breakdown: &mut ScoreBreakdown,
    ) {
        if record.age_hours(now) < 24.0 {
            breakdown.add(1.0, "Recent email (<24h)");
        } else {
            breakdown.adjust(-1.0);
        }
    }

    fn analyze_read_status(
        &self,
        record: &MessageRecord,
        now: DateTime<Utc>,
        breakdown: &mut ScoreBreakdown,
    ) {
        if record.is_unread() {
            breakdown.add(1.5, "Email is unread");

            let age = record.age_hours(now);
            if age < 1.0 {
                breakdown.add(1.0, "Very recent unread email (<1h)");
            } else if age < 6.0 {
                breakdown.add(0.5, "Recent unread email (<6h)");
            } else if age > 168.0 {
                // Week-old unread mail is most often neglected promotional mail.
                breakdown.add(-2.0, "Old unread email (>1 week)");
            }
        } else {
            breakdown.add(-0.5, "Email has been read");
        }
    }

    /// Count bounded promotional counter-evidence across subject, sender and
    /// body. Returns (indicator count capped at 5, reasons).
    fn promotional_indicators(&self, record: &MessageRecord) -> (usize, Vec<String>) {
        let mut count = 0usize;
        let mut reasons = Vec::new();

        let matched_keywords: Vec<&str> = self
            .config
            .promotional_subjects
            .iter()
            .filter(|k| record.subject.contains(k.as_str()))
            .map(String::as_str)
            .collect();
        if !matched_keywords.is_empty() {
            count += matched_keywords.len();
            reasons.push(format!(
                "Promotional keywords in subject: {}",
                matched_keywords[..matched_keywords.len().min(3)].join(", ")
            ));
        }

        for promo_sender in &self.config.promotional_senders {
            if record.sender.contains(promo_sender.as_str()) {
                count += 1;
                reasons.push(format!("Promotional sender detected: {promo_sender}"));
                break;
            }
        }

        if !record.html_body.is_empty() {
            let pattern_matches = self
                .promotional_patterns
                .iter()
                .filter(|p| p.is_match(&record.html_body))
                .take(3)
                .count();
            if pattern_matches > 0 {
                count += pattern_matches;
                reasons.push(format!(
                    "Promotional patterns detected in content: {pattern_matches} matches"
                ));
            }

            if self
                .unsubscribe_patterns
                .iter()
                .any(|p| p.is_match(&record.html_body))
            {
                count += 1;
                reasons.push("Unsubscribe link detected".to_string());
            }

            if self
                .tracking_patterns
                .iter()
                .any(|p| p.is_match(&record.html_body))
            {
                count += 1;
                reasons.push("Email tracking elements detected".to_string());
            }
        }

        (count.min(5), reasons)
    }

    /// Base threshold, lowered by reason diversity and by strong indicators,
    /// floored at 2.0.
    fn dynamic_threshold(&self, reasons: &[String]) -> f64 {
        let distinct: std::collections::HashSet<&String> = reasons.iter().collect();
        let mut adjustment = (distinct.len() as f64 * 0.25).min(1.0);

        let strong_count = STRONG_INDICATORS
            .iter()
            .filter(|indicator| reasons.iter().any(|r| r.contains(*indicator)))
            .count();
        if strong_count >= 2 {
            adjustment += 1.0;
        } else if strong_count == 1 {
            adjustment += 0.5;
        }

        (self.config.importance_threshold - adjustment).max(2.0)
    }
}

fn compile_static(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().map(|p| Regex::new(p).unwrap()).collect()
}

/// Truncate at a char boundary at or below `max_bytes`.
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
