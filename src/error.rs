//! Error types for the triage engine.
//!
//! Classification itself is infallible: every call produces a
//! `ClassificationResult`, degrading to rules-only or neutral signals when a
//! component is unavailable. These errors cover the fallible edges:
//! configuration loading, model training/persistence, and cache I/O.

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// Embedding model errors.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model artifact not found: {path}")]
    NotFound { path: String },

    #[error("Failed to load model from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    #[error("Failed to save model to {path}: {reason}")]
    SaveFailed { path: String, reason: String },

    #[error("Encoder failure: {0}")]
    Encoder(String),

    #[error("Training failed: {0}")]
    Training(String),
}

/// Persistent cache errors (sender profiles, thread contexts).
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Failed to write cache file {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("Cache lock poisoned")]
    Poisoned,
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
