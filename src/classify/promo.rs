//! Rule-based promotional scorer.
//!
//! Accumulates promotional evidence (sender/subject keywords, regex pattern
//! matches, unsubscribe and tracking detection, marketing headers, HTML
//! structure, emoji and price/urgency phrasing) against strong negative
//! adjustments for auto-generated, transactional, reply and conversational
//! mail. The final call goes through an ordered decision policy that
//! reconciles promotional evidence with the importance verdict; earlier
//! rules always win.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::debug;

use crate::classify::importance::ImportanceVerdict;
use crate::classify::score::{ScoreBreakdown, count_emoji, text_to_html_ratio};
use crate::config::{TriageConfig, compile_pattern};
use crate::error::Result;
use crate::message::MessageRecord;

/// Reasons that count as strong promotional indicators when adapting the
/// threshold.
const STRONG_INDICATORS: &[&str] = &[
    "Unsubscribe link detected",
    "Email tracking detected",
    "Promotional sender",
    "Newsletter/digest detected",
];

const CTA_PHRASES: &[&str] = &[
    "click here",
    "cliquez ici",
    "buy now",
    "achetez maintenant",
    "shop now",
    "order now",
    "commandez maintenant",
    "learn more",
    "en savoir plus",
    "sign up",
    "inscrivez-vous",
    "subscribe",
    "abonnez-vous",
    "download",
    "télécharger",
];

const URGENCY_PHRASES: &[&str] = &[
    "limited time",
    "temps limité",
    "hurry",
    "dépêchez-vous",
    "expires",
    "expire",
    "last chance",
    "dernière chance",
    "only",
    "seulement",
    "today only",
    "aujourd'hui seulement",
];

const CONVERSATION_INDICATORS: &[&str] = &[
    "as discussed",
    "as mentioned",
    "as requested",
    "following up",
    "thank you for",
    "thanks for",
    "in response to",
    "comme convenu",
    "comme mentionné",
    "suite à notre",
    "merci pour",
    "en réponse à",
];

const PROFESSIONAL_TERMS: &[&str] = &[
    "job",
    "career",
    "employment",
    "interview",
    "position",
    "application",
    "resume",
    "cv",
    "hiring",
    "recruitment",
    "salary",
    "benefits",
];

const PROMOTIONAL_WORDS: &[&str] = &[
    "sale",
    "discount",
    "offer",
    "deal",
    "promotion",
    "special",
    "limited",
    "exclusive",
    "free",
    "save",
    "buy now",
    "shop now",
];

const TRANSACTIONAL_KEYWORDS: &[&str] = &[
    "confirmation",
    "confirmed",
    "receipt",
    "invoice",
    "order #",
    "shipping",
    "delivery",
    "delivered",
    "tracking",
    "payment",
    "transaction",
    "facture",
    "reçu",
    "livraison",
    "votre commande",
    "your order",
    "order status",
    "payment received",
    "reservation",
    "booking",
    "appointment",
    "rendez-vous",
];

// ── Verdict ─────────────────────────────────────────────────────────

/// Outcome of promotional scoring plus the decision policy.
#[derive(Debug, Clone)]
pub struct PromoVerdict {
    pub is_promotional: bool,
    /// Rounded rule score. May be negative internally; clamp for display.
    pub score: f64,
    /// Dynamic threshold the score was compared against.
    pub threshold: f64,
    /// Name of the policy rule that decided.
    pub decided_by: &'static str,
    pub reasons: Vec<String>,
}

impl PromoVerdict {
    pub fn displayed_score(&self) -> f64 {
        self.score.max(0.0)
    }
}

// ── Decision policy ─────────────────────────────────────────────────

/// Inputs to the ordered decision policy, precomputed by the scorer.
#[derive(Debug, Clone)]
pub struct PolicyInputs {
    pub importance_score: f64,
    pub has_personal_data: bool,
    pub is_reply: bool,
    pub has_recent_interaction: bool,
    pub is_transactional: bool,
    pub promo_score: f64,
    pub threshold: f64,
}

/// One named entry of the decision policy.
pub struct PolicyRule {
    pub name: &'static str,
    applies: fn(&PolicyInputs) -> bool,
    decide: fn(&PolicyInputs) -> (bool, String),
}

/// The conflict-resolution policy between importance and promotional
/// evidence, evaluated in order; the first rule that applies decides and
/// later rules never override it.
pub const DECISION_POLICY: &[PolicyRule] = &[
    PolicyRule {
        name: "high-importance-override",
        applies: |i| i.importance_score >= 6.0,
        decide: |_| {
            (
                false,
                "High importance score overrides promotional detection".to_string(),
            )
        },
    },
    PolicyRule {
        name: "personal-data",
        applies: |i| i.importance_score >= 3.0 && i.has_personal_data && i.promo_score < 8.0,
        decide: |_| {
            (
                false,
                "Contains personal information (likely important)".to_string(),
            )
        },
    },
    PolicyRule {
        name: "reply-to-previous",
        applies: |i| i.is_reply && i.promo_score < 7.5,
        decide: |_| (false, "Reply to previous email (likely important)".to_string()),
    },
    PolicyRule {
        name: "recent-interaction",
        applies: |i| i.has_recent_interaction && i.promo_score < 7.0,
        decide: |_| (false, "Recent interaction with sender".to_string()),
    },
    PolicyRule {
        name: "overwhelming-promo",
        applies: |i| i.importance_score >= 3.0 && i.promo_score >= i.threshold + 3.0,
        decide: |_| {
            (
                true,
                "Strong promotional indicators despite moderate importance".to_string(),
            )
        },
    },
    PolicyRule {
        name: "transactional",
        applies: |i| i.is_transactional && i.promo_score < 7.0,
        decide: |_| (false, "Transactional email detected".to_string()),
    },
    PolicyRule {
        name: "promo-importance-ratio",
        applies: |i| i.importance_score > 0.0,
        decide: |i| {
            let ratio = i.promo_score / i.importance_score;
            (
                ratio >= 2.0 && i.promo_score >= i.threshold,
                format!("Promo/importance ratio: {:.1}", ratio),
            )
        },
    },
    PolicyRule {
        name: "score-vs-threshold",
        applies: |_| true,
        decide: |i| {
            let promotional = i.promo_score >= i.threshold;
            (
                promotional,
                format!(
                    "Score {:.1} {} threshold {:.1}",
                    i.promo_score,
                    if promotional { ">=" } else { "<" },
                    i.threshold
                ),
            )
        },
    },
];

/// Run the decision policy, first match wins. The final rule always applies.
pub fn evaluate_policy(inputs: &PolicyInputs) -> (bool, &'static str, String) {
    for rule in DECISION_POLICY {
        if (rule.applies)(inputs) {
            let (is_promotional, reason) = (rule.decide)(inputs);
            return (is_promotional, rule.name, reason);
        }
    }
    unreachable!("final policy rule applies unconditionally")
}

// ── Scorer ──────────────────────────────────────────────────────────

/// Rule-based promotional scorer. The importance verdict is supplied by the
/// caller so it is computed once per message.
pub struct PromoScorer {
    config: Arc<TriageConfig>,
    promotional_patterns: Vec<Regex>,
    transactional_patterns: Vec<Regex>,
    tracking_patterns: Vec<Regex>,
    tracking_pixel_patterns: Vec<Regex>,
    button_patterns: Vec<Regex>,
    auto_sender_patterns: Vec<Regex>,
    auto_subject_patterns: Vec<Regex>,
    order_number_pattern: Regex,
    price_patterns: Vec<Regex>,
    invocations: AtomicU64,
}

impl PromoScorer {
    pub fn new(config: Arc<TriageConfig>) -> Result<Self> {
        let promotional_patterns = config
            .promotional_patterns
            .iter()
            .map(|p| compile_pattern(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let transactional_patterns = config
            .transactional_patterns
            .iter()
            .map(|p| compile_pattern(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            config,
            promotional_patterns,
            transactional_patterns,
            tracking_patterns: compile_static(&[
                r"(?i)utm_source",
                r"(?i)utm_medium",
                r"(?i)utm_campaign",
                r"(?i)mailchimp",
                r"(?i)sendgrid",
                r"(?i)mailjet",
                r"(?i)constant.contact",
            ]),
            tracking_pixel_patterns: compile_static(&[
                r#"(?i)width="1".*height="1""#,
                r#"(?i)height="1".*width="1""#,
                r"(?i)1x1\.gif",
                r"(?i)pixel\.gif",
                r"(?i)tracking\.gif",
            ]),
            button_patterns: compile_static(&[
                r#"(?i)<(button|input)[^>]*type=["']?(button|submit)["']?[^>]*>"#,
                r#"(?i)<a[^>]*class=["'][^"']*(button|btn)[^"']*["'][^>]*>"#,
                r"(?i)<[^>]*(shop|buy|purchase|order)\s+now[^>]*>",
            ]),
            auto_sender_patterns: compile_static(&[
                r"(?i)no-?reply",
                r"(?i)donotreply",
                r"(?i)\bauto\b",
                r"(?i)\bsystem\b",
                r"(?i)notification",
                r"(?i)\balert\b",
                r"(?i)daemon",
                r"(?i)mailer",
            ]),
            auto_subject_patterns: compile_static(&[
                r"(?i)automatic",
                r"(?i)auto-?generated",
                r"(?i)system notification",
                r"(?i)delivery status",
                r"(?i)out of office",
                r"(?i)vacation reply",
            ]),
            order_number_pattern: Regex::new(
                r"(?i)(order|commande|ref|reference|référence|transaction|invoice|facture|ticket|billet)[-\s]*(#|n[o°]|:|\s)[-\s]*[a-z0-9]{3,}",
            )
            .unwrap(),
            price_patterns: compile_static(&[
                r"(?i)\d+%\s*off",
                r"(?i)\d+%\s*de\s*remise",
                r"(?i)save\s+\$?\d+",
                r"(?i)économisez\s+\d+",
                r"(?i)free\s+shipping",
                r"(?i)livraison\s+gratuite",
                r"\$\d+",
                r"\d+\s*€",
                r"(?i)\bprice\b",
                r"(?i)\bprix\b",
            ]),
            invocations: AtomicU64::new(0),
        })
    }

    /// Number of times `score` has been called. Used to verify skip paths.
    pub fn invocation_count(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Score a message against the supplied importance verdict and run the
    /// decision policy.
    pub fn score(
        &self,
        record: &MessageRecord,
        importance: &ImportanceVerdict,
        now: DateTime<Utc>,
    ) -> PromoVerdict {
        self.invocations.fetch_add(1, Ordering::Relaxed);

        let breakdown = self.raw_score(record, now);
        let threshold = self.dynamic_threshold(&breakdown.reasons);
        let promo_score = breakdown.rounded();

        let inputs = PolicyInputs {
            importance_score: importance.score,
            has_personal_data: importance.has_personal_data_evidence(),
            is_reply: self.is_reply(record),
            has_recent_interaction: self.recent_interaction(record).is_some(),
            is_transactional: !self.transactional_evidence(record).is_empty(),
            promo_score,
            threshold,
        };
        let (is_promotional, decided_by, decision_reason) = evaluate_policy(&inputs);

        let mut reasons = vec![
            format!("Importance score : {:.1}", importance.score),
            format!("Promo score : {:.1}", promo_score),
            decision_reason,
        ];
        // Strong indicators stand alone so downstream reason capping can
        // keep them ahead of the folded factor summaries.
        reasons.extend(
            breakdown
                .reasons
                .iter()
                .filter(|r| STRONG_INDICATORS.iter().any(|s| r.contains(s)))
                .cloned(),
        );
        if !importance.reasons.is_empty() {
            reasons.push(format!(
                "Importance factors : {}",
                importance.reasons[..importance.reasons.len().min(2)].join(", ")
            ));
        }
        if !breakdown.reasons.is_empty() {
            reasons.push(format!(
                "Promo factors : {}",
                breakdown.reasons[..breakdown.reasons.len().min(2)].join(", ")
            ));
        }

        debug!(
            sender = %record.normalized_sender,
            promo_score,
            threshold,
            decided_by,
            is_promotional,
            "Promotional scoring complete"
        );

        PromoVerdict {
            is_promotional,
            score: promo_score,
            threshold,
            decided_by,
            reasons,
        }
    }

    /// Raw promotional evidence accumulation, before the decision policy.
    pub fn raw_score(&self, record: &MessageRecord, now: DateTime<Utc>) -> ScoreBreakdown {
        let mut breakdown = ScoreBreakdown::new();

        if self.is_auto_generated(record) {
            breakdown.add(-2.0, "Auto-generated email detected");
        }

        let transactional = self.transactional_evidence(record);
        if !transactional.is_empty() {
            breakdown.adjust(-2.0);
            breakdown.reasons.extend(transactional);
        }

        if self.is_reply(record) {
            breakdown.add(-2.5, "Reply to previous email");
        }

        if let Some(reason) = self.recent_interaction(record) {
            breakdown.add(-1.5, reason);
        }

        self.analyze_basic_factors(record, &mut breakdown);
        self.analyze_headers(record, &mut breakdown);
        self.analyze_patterns(record, &mut breakdown);
        self.analyze_keyword_density(record, &mut breakdown);
        self.analyze_emojis(record, &mut breakdown);
        self.analyze_interaction(record, now, &mut breakdown);

        // HTML block, capped.
        let mut html = ScoreBreakdown::new();
        self.analyze_html(&record.html_body, &mut html);
        breakdown.adjust(html.score.min(3.0));
        breakdown.reasons.extend(html.reasons.into_iter().take(2));

        if self
            .config
            .critical_senders
            .iter()
            .any(|t| record.subject.contains(t.as_str()) || record.html_body.contains(t.as_str()))
        {
            breakdown.add(-1.0, "Contains critical service terms");
        }

        // Rescue obvious promotional subjects that scored low.
        if breakdown.score < 3.0
            && ["sale", "offer", "discount", "promo", "deal"]
                .iter()
                .any(|w| record.subject.contains(w))
        {
            breakdown.add(1.5, "Strong promotional terms in subject despite low score");
        }

        if PROFESSIONAL_TERMS
            .iter()
            .any(|t| record.subject.contains(t) || record.html_body.contains(t))
        {
            breakdown.add(-1.5, "Professional/employment related content");
        }

        match self.priority(record) {
            Priority::High => breakdown.add(-2.0, "High priority email"),
            Priority::Low => breakdown.add(0.5, "Low priority email"),
            Priority::Normal => {}
        }

        breakdown
    }

    fn analyze_basic_factors(&self, record: &MessageRecord, breakdown: &mut ScoreBreakdown) {
        for promo_sender in &self.config.promotional_senders {
            if record.sender.contains(promo_sender.as_str()) {
                breakdown.add(2.0, format!("Promotional sender: {promo_sender}"));
                break;
            }
        }

        if self
            .config
            .no_reply_patterns
            .iter()
            .any(|p| record.sender.contains(p.as_str()))
        {
            breakdown.add(1.5, "No-reply sender address");
        }

        let mut found = Vec::new();
        let mut subject_score: f64 = 0.0;
        for keyword in &self.config.promotional_subjects {
            if record.subject.contains(keyword.as_str()) {
                subject_score += 1.5;
                found.push(keyword.as_str());
                if found.len() >= 3 {
                    break;
                }
            }
        }
        if !found.is_empty() {
            breakdown.reasons.push(format!(
                "Promotional keywords in subject: {}",
                found.join(", ")
            ));
        }
        breakdown.adjust(subject_score.min(4.5));

        if self
            .promotional_patterns
            .iter()
            .any(|p| p.is_match(&record.subject))
        {
            breakdown.add(1.0, "Promotional pattern in subject");
        }

        if record.html_body.contains("unsubscribe") || record.html_body.contains("désabonner") {
            breakdown.add(2.0, "Unsubscribe link detected");
        }

        if self
            .tracking_patterns
            .iter()
            .any(|p| p.is_match(&record.html_body))
        {
            breakdown.add(1.5, "Email tracking detected");
        }
    }

    fn analyze_headers(&self, record: &MessageRecord, breakdown: &mut ScoreBreakdown) {
        const MARKETING_HEADERS: &[&str] = &[
            "list-unsubscribe",
            "list-id",
            "precedence",
            "x-mailer",
            "x-campaign",
            "x-mailgun",
            "x-sendgrid",
            "x-mailchimp",
        ];

        let found = MARKETING_HEADERS
            .iter()
            .filter(|h| record.headers.contains_key(**h))
            .count();
        if found >= 2 {
            breakdown.add(2.0, format!("Multiple marketing headers: {found}"));
        } else if found == 1 {
            breakdown.add(1.0, "Marketing headers detected");
        }

        if record.headers.get("precedence").map(String::as_str) == Some("bulk") {
            breakdown.add(1.5, "Bulk mail precedence");
        }
    }

    fn analyze_patterns(&self, record: &MessageRecord, breakdown: &mut ScoreBreakdown) {
        let combined = format!("{} {}", record.subject, record.html_body);
        let matches = self
            .promotional_patterns
            .iter()
            .filter(|p| p.is_match(&combined))
            .count();

        if matches >= 3 {
            breakdown.adjust(3.0);
        } else if matches == 2 {
            breakdown.adjust(2.0);
        } else if matches == 1 {
            breakdown.adjust(1.0);
        }
        if matches > 0 {
            breakdown
                .reasons
                .push(format!("{matches} promotional patterns found"));
        }
    }

    fn analyze_keyword_density(&self, record: &MessageRecord, breakdown: &mut ScoreBreakdown) {
        let combined = format!("{} {}", record.subject, record.html_body);

        let keyword_count = self
            .config
            .promotional_subjects
            .iter()
            .filter(|k| combined.contains(k.as_str()))
            .take(5)
            .count();
        match keyword_count {
            5.. => breakdown.add(
                3.0,
                format!("High promotional keyword density: {keyword_count} keywords"),
            ),
            3..=4 => breakdown.add(
                2.0,
                format!("Moderate promotional keyword density: {keyword_count} keywords"),
            ),
            1..=2 => breakdown.add(
                1.0,
                format!("Some promotional keywords found: {keyword_count} keywords"),
            ),
            _ => {}
        }

        let cta_count = CTA_PHRASES.iter().filter(|p| combined.contains(**p)).count();
        if cta_count >= 2 {
            breakdown.add(2.0, format!("Multiple call-to-action phrases: {cta_count}"));
        } else if cta_count == 1 {
            breakdown.add(1.0, "Call-to-action phrases detected");
        }

        let urgency_count = URGENCY_PHRASES
            .iter()
            .filter(|p| combined.contains(**p))
            .count();
        if urgency_count >= 2 {
            breakdown.add(1.5, "Multiple urgency indicators");
        } else if urgency_count == 1 {
            breakdown.add(1.0, "Urgency language detected");
        }

        let price_mentions = self
            .price_patterns
            .iter()
            .filter(|p| p.is_match(&combined))
            .count();
        if price_mentions >= 2 {
            breakdown.add(2.0, "Multiple price/discount mentions");
        } else if price_mentions == 1 {
            breakdown.add(1.0, "Price/discount mentions detected");
        }
    }

    fn analyze_emojis(&self, record: &MessageRecord, breakdown: &mut ScoreBreakdown) {
        let sample_end = record.html_body.len().min(1000);
        let sample = truncate(&record.html_body, sample_end);
        let total = count_emoji(&record.subject) + count_emoji(sample);

        if total >= 3 {
            breakdown.add(2.0, format!("Multiple emojis detected: {total}"));
        } else if total >= 1 {
            breakdown.add(1.0, format!("Emojis detected: {total}"));
        }
    }

    /// Read-state and age, at reduced weight since conversational signals
    /// were already checked.
    fn analyze_interaction(
        &self,
        record: &MessageRecord,
        now: DateTime<Utc>,
        breakdown: &mut ScoreBreakdown,
    ) {
        let mut inner = ScoreBreakdown::new();
        if record.is_unread() {
            inner.add(0.5, "Email is unread");
        }
        if record.age_hours(now) > 168.0 {
            inner.add(-0.5, "Email is more than a week old");
        }
        breakdown.adjust(inner.score * 0.7);
        breakdown.reasons.extend(inner.reasons);
    }

    fn analyze_html(&self, html: &str, breakdown: &mut ScoreBreakdown) {
        if html.is_empty() {
            return;
        }

        let ratio = text_to_html_ratio(html);
        if ratio < 0.3 {
            breakdown.add(
                2.5,
                format!("Low text-to-HTML ratio ({ratio:.2}) - heavily formatted"),
            );
        } else if ratio < 0.5 {
            breakdown.add(1.5, format!("Low text-to-HTML ratio ({ratio:.2})"));
        } else if ratio > 0.8 {
            breakdown.add(-1.0, format!("High text-to-HTML ratio ({ratio:.2}) - mostly text"));
        }

        let promo_words: usize = PROMOTIONAL_WORDS.iter().map(|w| html.matches(w).count()).sum();
        if promo_words >= 10 {
            breakdown.add(2.0, format!("Many promotional words ({promo_words})"));
        } else if promo_words >= 5 {
            breakdown.add(1.0, format!("Multiple promotional words ({promo_words})"));
        }

        let buttons: usize = self
            .button_patterns
            .iter()
            .map(|p| p.find_iter(html).count())
            .sum();
        if buttons >= 3 {
            breakdown.add(2.0, format!("Multiple promotional buttons ({buttons})"));
        } else if buttons >= 1 {
            breakdown.add(1.0, format!("Promotional buttons detected ({buttons})"));
        }

        let img_count = html.matches("<img").count();
        if img_count >= 5 {
            breakdown.add(2.0, format!("Many images: {img_count}"));
        } else if img_count >= 2 {
            breakdown.add(1.0, format!("Multiple images: {img_count}"));
        }

        let link_count = html.matches("href=").count();
        if link_count >= 10 {
            breakdown.add(2.0, format!("Many links: {link_count}"));
        } else if link_count >= 5 {
            breakdown.add(1.0, format!("Multiple links: {link_count}"));
        }

        let table_count = html.matches("<table").count();
        if table_count >= 3 {
            breakdown.add(1.5, "Complex table layout");
        } else if table_count >= 1 {
            breakdown.add(0.5, "Table layout detected");
        }

        const STYLE_INDICATORS: &[&str] =
            &["style=", "<style", "background-color", "font-family", "text-align"];
        let style_count: usize = STYLE_INDICATORS.iter().map(|s| html.matches(s).count()).sum();
        if style_count >= 10 {
            breakdown.add(1.5, "Heavy styling detected");
        } else if style_count >= 5 {
            breakdown.add(1.0, "Moderate styling detected");
        }

        if self.tracking_pixel_patterns.iter().any(|p| p.is_match(html)) {
            breakdown.add(1.5, "Tracking pixel detected");
        }

        const SOCIAL_PATTERNS: &[&str] = &[
            "facebook",
            "twitter",
            "instagram",
            "linkedin",
            "youtube",
            "social",
            "follow us",
            "suivez-nous",
        ];
        let social_count = SOCIAL_PATTERNS.iter().filter(|p| html.contains(**p)).count();
        if social_count >= 3 {
            breakdown.add(1.0, "Social media integration");
        }
    }

    /// Base threshold, lowered by reason diversity and strong indicators,
    /// floored at 3.0.
    fn dynamic_threshold(&self, reasons: &[String]) -> f64 {
        let distinct: std::collections::HashSet<&String> = reasons.iter().collect();
        let mut adjustment = (distinct.len() as f64 * 0.2).min(1.0);

        let strong_count = STRONG_INDICATORS
            .iter()
            .filter(|indicator| reasons.iter().any(|r| r.contains(*indicator)))
            .count();
        if strong_count >= 2 {
            adjustment += 1.0;
        } else if strong_count == 1 {
            adjustment += 0.5;
        }

        (self.config.promo_base_threshold - adjustment).max(3.0)
    }

    fn is_reply(&self, record: &MessageRecord) -> bool {
        const REPLY_PREFIXES: &[&str] = &["re:", "fwd:", "fw:", "tr:", "réf:", "rép:"];
        if REPLY_PREFIXES.iter().any(|p| record.subject.starts_with(p)) {
            return true;
        }
        record.headers.contains_key("in-reply-to") || record.headers.contains_key("references")
    }

    fn recent_interaction(&self, record: &MessageRecord) -> Option<String> {
        for indicator in CONVERSATION_INDICATORS {
            if record.html_body.contains(indicator) {
                return Some(format!("Conversation indicator in content: {indicator}"));
            }
            if record.subject.contains(indicator) {
                return Some(format!("Conversation indicator in subject: {indicator}"));
            }
        }
        None
    }

    /// Transactional-mail evidence: protected-service sender, transactional
    /// subject/content patterns, order or reference numbers.
    fn transactional_evidence(&self, record: &MessageRecord) -> Vec<String> {
        let mut reasons = Vec::new();

        for service in &self.config.protected_services {
            if record.normalized_sender.contains(service.as_str()) {
                reasons.push(format!("Protected service detected in sender: {service}"));
                break;
            }
        }

        if self
            .transactional_patterns
            .iter()
            .any(|p| p.is_match(&record.subject))
        {
            reasons.push("Transactional email pattern detected in subject".to_string());
        }

        if !record.html_body.is_empty() {
            let content = truncate(&record.html_body, 5000);
            for keyword in TRANSACTIONAL_KEYWORDS {
                if content.contains(keyword) {
                    reasons.push(format!("Transactional keyword detected in content: {keyword}"));
                    break;
                }
            }
        }

        let body_head = truncate(&record.html_body, 1000);
        if self.order_number_pattern.is_match(&record.subject)
            || self.order_number_pattern.is_match(body_head)
        {
            reasons.push("Order/reference number detected".to_string());
        }

        reasons
    }

    fn is_auto_generated(&self, record: &MessageRecord) -> bool {
        const AUTO_HEADERS: &[&str] = &[
            "auto-submitted",
            "x-auto-response-suppress",
            "precedence",
            "x-autoreply",
            "x-autorespond",
        ];
        for header in AUTO_HEADERS {
            if let Some(value) = record.headers.get(*header) {
                let value = value.to_lowercase();
                if value.contains("auto") || value.contains("generated") {
                    return true;
                }
            }
        }

        self.auto_sender_patterns
            .iter()
            .any(|p| p.is_match(&record.sender))
            || self
                .auto_subject_patterns
                .iter()
                .any(|p| p.is_match(&record.subject))
    }

    fn priority(&self, record: &MessageRecord) -> Priority {
        const PRIORITY_HEADERS: &[&str] =
            &["x-priority", "priority", "importance", "x-msmail-priority"];
        for header in PRIORITY_HEADERS {
            if let Some(value) = record.headers.get(*header) {
                let value = value.to_lowercase();
                if ["high", "urgent", "1", "important"]
                    .iter()
                    .any(|v| value.contains(v))
                {
                    return Priority::High;
                }
                if ["low", "5", "non-urgent"].iter().any(|v| value.contains(v)) {
                    return Priority::Low;
                }
            }
        }
        Priority::Normal
    }
}

enum Priority {
    High,
    Normal,
    Low,
}

fn compile_static(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().map(|p| Regex::new(p).unwrap()).collect()
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::importance::ImportanceScorer;
    use crate::message::RawMessage;

    fn config() -> Arc<TriageConfig> {
        Arc::new(TriageConfig::default())
    }

    fn make_record(sender: &str, subject: &str, body: &str) -> MessageRecord {
        MessageRecord::from_raw(&RawMessage {
            sender: sender.to_string(),
            to: "me@example.com".to_string(),
            subject: subject.to_string(),
            html_body: body.to_string(),
            internal_date: Utc::now().timestamp_millis(),
            ..RawMessage::default()
        })
    }

    fn score(record: &MessageRecord) -> PromoVerdict {
        let config = config();
        let importance = ImportanceScorer::new(config.clone()).unwrap();
        let promo = PromoScorer::new(config).unwrap();
        let now = Utc::now();
        promo.score(record, &importance.score(record, now), now)
    }

    #[test]
    fn newsletter_blast_is_promotional() {
        let record = make_record(
            "newsletter@shop.example",
            "50% off today only! unsubscribe here",
            &format!(
                "{}<a href=\"https://shop.example/unsubscribe\">unsubscribe</a> shop now",
                "<img src=\"x.png\">".repeat(8)
            ),
        );
        let verdict = score(&record);
        assert!(verdict.is_promotional);
        assert!(verdict.score > 7.0);
    }

    #[test]
    fn strong_indicators_surface_as_standalone_reasons() {
        let record = make_record(
            "newsletter@shop.example",
            "50% off today only!",
            "<a href=\"https://shop.example/unsubscribe?utm_campaign=blast\">unsubscribe</a> shop now",
        );
        let verdict = score(&record);
        assert!(verdict.reasons.iter().any(|r| r == "Unsubscribe link detected"));
        assert!(verdict.reasons.iter().any(|r| r == "Email tracking detected"));
        assert!(
            verdict
                .reasons
                .iter()
                .any(|r| r.starts_with("Promotional sender:"))
        );
    }

    #[test]
    fn subject_keyword_evidence_is_capped_at_three() {
        let config = config();
        let scorer = PromoScorer::new(config).unwrap();
        let record = make_record(
            "shop@store.example",
            "sale offer discount deal promo free",
            "",
        );
        let breakdown = scorer.raw_score(&record, Utc::now());
        let keyword_reason = breakdown
            .reasons
            .iter()
            .find(|r| r.starts_with("Promotional keywords in subject:"))
            .expect("subject keywords should be reported");
        // Scoring stops after three matches even when more are present.
        assert_eq!(keyword_reason.matches(',').count(), 2);
    }

    #[test]
    fn reply_is_kept_regardless_of_moderate_promo_score() {
        let mut record = make_record(
            "colleague@example.com",
            "re: those discount figures",
            "thanks for the numbers, sale projections attached",
        );
        record
            .headers
            .insert("in-reply-to".to_string(), "<prev@example.com>".to_string());

        let verdict = score(&record);
        assert!(!verdict.is_promotional);
        assert!(matches!(
            verdict.decided_by,
            "reply-to-previous" | "high-importance-override"
        ));
    }

    #[test]
    fn transactional_order_confirmation_is_kept() {
        let record = make_record(
            "orders@store.example",
            "order confirmation #ab1234",
            "your order has shipped. tracking number: 99887766.",
        );
        let verdict = score(&record);
        assert!(!verdict.is_promotional);
    }

    #[test]
    fn policy_rules_evaluate_in_order() {
        // High importance wins even with an enormous promo score.
        let inputs = PolicyInputs {
            importance_score: 6.5,
            has_personal_data: false,
            is_reply: false,
            has_recent_interaction: false,
            is_transactional: true,
            promo_score: 12.0,
            threshold: 4.0,
        };
        let (promotional, rule, _) = evaluate_policy(&inputs);
        assert!(!promotional);
        assert_eq!(rule, "high-importance-override");
    }

    #[test]
    fn policy_overwhelming_promo_beats_transactional() {
        let inputs = PolicyInputs {
            importance_score: 3.5,
            has_personal_data: false,
            is_reply: false,
            has_recent_interaction: false,
            is_transactional: true,
            promo_score: 9.0,
            threshold: 4.0,
        };
        let (promotional, rule, _) = evaluate_policy(&inputs);
        assert!(promotional);
        assert_eq!(rule, "overwhelming-promo");
    }

    #[test]
    fn policy_ratio_requires_both_conditions() {
        let base = PolicyInputs {
            importance_score: 4.0,
            has_personal_data: false,
            is_reply: false,
            has_recent_interaction: false,
            is_transactional: false,
            promo_score: 6.0,
            threshold: 4.0,
        };
        // Ratio 1.5 < 2.0: kept despite clearing the threshold.
        let (promotional, rule, _) = evaluate_policy(&base);
        assert!(!promotional);
        assert_eq!(rule, "promo-importance-ratio");

        // Ratio >= 2.0 and above threshold: promotional.
        let inputs = PolicyInputs {
            importance_score: 2.5,
            promo_score: 6.0,
            ..base
        };
        let (promotional, _, _) = evaluate_policy(&inputs);
        assert!(promotional);
    }

    #[test]
    fn policy_falls_through_to_threshold() {
        let inputs = PolicyInputs {
            importance_score: 0.0,
            has_personal_data: false,
            is_reply: false,
            has_recent_interaction: false,
            is_transactional: false,
            promo_score: 3.0,
            threshold: 5.0,
        };
        let (promotional, rule, reason) = evaluate_policy(&inputs);
        assert!(!promotional);
        assert_eq!(rule, "score-vs-threshold");
        assert!(reason.contains("< threshold"));
    }

    #[test]
    fn strong_indicators_lower_threshold() {
        let config = config();
        let scorer = PromoScorer::new(config).unwrap();
        let plain = scorer.dynamic_threshold(&["Multiple images: 6".to_string()]);
        let strong = scorer.dynamic_threshold(&[
            "Unsubscribe link detected".to_string(),
            "Email tracking detected".to_string(),
        ]);
        assert!(strong < plain);
        assert!(strong >= 3.0);
    }

    #[test]
    fn invocation_counter_increments() {
        let config = config();
        let importance = ImportanceScorer::new(config.clone()).unwrap();
        let scorer = PromoScorer::new(config).unwrap();
        let record = make_record("a@b.example", "hello", "");
        let now = Utc::now();
        let verdict = importance.score(&record, now);

        assert_eq!(scorer.invocation_count(), 0);
        scorer.score(&record, &verdict, now);
        scorer.score(&record, &verdict, now);
        assert_eq!(scorer.invocation_count(), 2);
    }

    #[test]
    fn auto_generated_detection() {
        let config = config();
        let scorer = PromoScorer::new(config).unwrap();

        let record = make_record("mailer-daemon@provider.example", "delivery status", "");
        assert!(scorer.is_auto_generated(&record));

        let record = make_record("alice@example.com", "lunch?", "");
        assert!(!scorer.is_auto_generated(&record));
    }
}
