//! Hybrid email triage engine.
//!
//! Separates promotional mail from mail that needs attention by combining
//! a deterministic rule layer (sender, subject, header, structure and
//! recency evidence) with a sentence-embedding classifier. Rules run first
//! and can settle obviously important mail on their own; everything else
//! goes through score fusion with a confidence-adjusted threshold and a
//! borderline band biased toward keeping mail. Classification never fails:
//! a missing or broken embedding model degrades the engine to rules-only.
//!
//! Typical flow:
//!
//! ```no_run
//! use std::sync::Arc;
//! use mail_triage::classify::HybridClassifier;
//! use mail_triage::config::TriageConfig;
//! use mail_triage::message::{MessageRecord, RawMessage};
//!
//! # fn main() -> mail_triage::error::Result<()> {
//! let config = Arc::new(TriageConfig::default());
//! let classifier = HybridClassifier::rules_only(config)?;
//!
//! let raw = RawMessage {
//!     sender: "newsletter@shop.example".to_string(),
//!     subject: "Flash sale: 50% off everything".to_string(),
//!     ..RawMessage::default()
//! };
//! let result = classifier.classify(&MessageRecord::from_raw(&raw));
//! println!("promotional: {}", result.is_promotional);
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod cache;
pub mod classify;
pub mod config;
pub mod embedding;
pub mod error;
pub mod message;

pub use classify::{ClassificationResult, Confidence, HybridClassifier};
pub use config::TriageConfig;
pub use error::{Error, Result};
pub use message::{MessageRecord, RawMessage};
