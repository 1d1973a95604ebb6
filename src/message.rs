//! Message input types and feature extraction.
//!
//! Callers hand the engine a `RawMessage` in provider shape; `MessageRecord`
//! is the canonical form every scorer works on. Extraction is infallible:
//! missing fields become empty defaults, never errors.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider label marking a message the provider itself flagged as important.
pub const LABEL_IMPORTANT: &str = "IMPORTANT";
/// Provider label marking an unread message.
pub const LABEL_UNREAD: &str = "UNREAD";

// ── Raw input ───────────────────────────────────────────────────────

/// Raw message metadata as supplied by the mail-retrieval layer.
///
/// Every field is optional in spirit: defaults stand in for anything the
/// provider did not supply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMessage {
    /// Provider message id.
    #[serde(default)]
    pub id: String,
    /// Sender, possibly in `Name <addr>` form.
    #[serde(default)]
    pub sender: String,
    /// Primary recipient.
    #[serde(default)]
    pub to: String,
    /// Carbon-copy recipients.
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub subject: String,
    /// HTML body, already decoded by the retrieval layer.
    #[serde(default)]
    pub html_body: String,
    /// Header map; keys are normalized to lowercase during extraction.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Provider label ids (e.g. `IMPORTANT`, `UNREAD`).
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub has_attachments: bool,
    #[serde(default)]
    pub thread_id: String,
    /// Receipt timestamp in epoch milliseconds.
    #[serde(default)]
    pub internal_date: i64,
}

impl RawMessage {
    /// Best-effort parse of an RFC 822 message into a `RawMessage`.
    ///
    /// Returns `None` when the bytes are not parseable as a message at all.
    /// Convenience path for callers holding raw mail instead of provider
    /// metadata; the provider path does not go through here.
    pub fn from_rfc822(bytes: &[u8]) -> Option<Self> {
        let parsed = mail_parser::MessageParser::default().parse(bytes)?;

        let sender = parsed
            .from()
            .and_then(|a| a.first())
            .map(|addr| match (addr.name(), addr.address()) {
                (Some(name), Some(email)) => format!("{name} <{email}>"),
                (None, Some(email)) => email.to_string(),
                _ => String::new(),
            })
            .unwrap_or_default();

        let to = parsed
            .to()
            .and_then(|a| a.first())
            .and_then(|addr| addr.address())
            .unwrap_or_default()
            .to_string();

        let mut headers = HashMap::new();
        for header in parsed.headers() {
            headers.insert(
                header.name().to_lowercase(),
                header.value().as_text().unwrap_or_default().to_string(),
            );
        }

        let html_body = parsed
            .body_html(0)
            .map(|b| b.to_string())
            .or_else(|| parsed.body_text(0).map(|b| b.to_string()))
            .unwrap_or_default();

        let internal_date = parsed
            .date()
            .map(|d| d.to_timestamp() * 1000)
            .unwrap_or_default();

        let has_attachments = parsed.attachment_count() > 0;

        Some(Self {
            id: parsed
                .message_id()
                .map(str::to_string)
                .unwrap_or_default(),
            sender,
            to,
            cc: Vec::new(),
            subject: parsed.subject().unwrap_or_default().to_string(),
            html_body,
            headers,
            label_ids: Vec::new(),
            has_attachments,
            thread_id: String::new(),
            internal_date,
        })
    }
}

// ── Canonical record ────────────────────────────────────────────────

/// Canonical per-message record consumed by the scorers.
///
/// Immutable per classification call; the engine never mutates it.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: String,
    /// Sender as supplied, lowercased.
    pub sender: String,
    /// Bare address, lowercased and trimmed. Cache key for sender state.
    pub normalized_sender: String,
    /// Domain part of the sender address, empty when unparseable.
    pub domain: String,
    pub to: String,
    pub cc: Vec<String>,
    /// Subject, lowercased for matching. Original casing is not needed by
    /// any scorer.
    pub subject: String,
    /// HTML body, lowercased.
    pub html_body: String,
    /// Headers with lowercased keys.
    pub headers: HashMap<String, String>,
    pub labels: Vec<String>,
    pub has_attachments: bool,
    pub thread_id: String,
    /// Receipt timestamp, epoch milliseconds.
    pub internal_date: i64,
}

impl MessageRecord {
    /// Build the canonical record from raw provider metadata. Infallible.
    pub fn from_raw(raw: &RawMessage) -> Self {
        let headers = raw
            .headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.clone()))
            .collect();

        Self {
            id: raw.id.clone(),
            sender: raw.sender.to_lowercase(),
            normalized_sender: normalize_sender(&raw.sender),
            domain: extract_domain(&raw.sender),
            to: raw.to.to_lowercase(),
            cc: raw.cc.clone(),
            subject: raw.subject.to_lowercase(),
            html_body: raw.html_body.to_lowercase(),
            headers,
            labels: raw.label_ids.clone(),
            has_attachments: raw.has_attachments,
            thread_id: raw.thread_id.clone(),
            internal_date: raw.internal_date,
        }
    }

    pub fn is_unread(&self) -> bool {
        self.labels.iter().any(|l| l == LABEL_UNREAD)
    }

    pub fn is_provider_important(&self) -> bool {
        self.labels.iter().any(|l| l == LABEL_IMPORTANT)
    }

    /// Age of the message in hours relative to `now`.
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        let age_ms = now.timestamp_millis().saturating_sub(self.internal_date);
        age_ms as f64 / (60.0 * 60.0 * 1000.0)
    }
}

/// Strip a `Name <addr>` wrapper and lowercase the bare address.
pub fn normalize_sender(sender: &str) -> String {
    let addr = match (sender.find('<'), sender.find('>')) {
        (Some(start), Some(end)) if start < end => &sender[start + 1..end],
        _ => sender,
    };
    addr.trim().to_lowercase()
}

/// Domain part of an address, empty when there is none.
pub fn extract_domain(sender: &str) -> String {
    let normalized = normalize_sender(sender);
    match normalized.rsplit_once('@') {
        Some((_, domain)) => domain.trim().to_string(),
        None => String::new(),
    }
}
