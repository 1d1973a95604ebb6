//! Longitudinal analysis: thread context and sender cadence.

pub mod context;
pub mod temporal;

pub use context::{ContextAnalyzer, ContextVerdict, ThreadMessage, ThreadSource};
pub use temporal::{CadenceVerdict, SenderProfile, TemporalAnalyzer};
