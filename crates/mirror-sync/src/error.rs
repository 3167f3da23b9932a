//! Error types for the synchronization engine
//!
//! Only construction and configuration can fail. Everything that goes wrong
//! while mirroring (untracked targets, unbuildable nodes) is a benign skip.

use mirror_model::{NodeKey, StoreError};
use std::path::PathBuf;

/// Errors raised while connecting an engine
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The tree builder produced nothing for the live root
    #[error("live root cannot be built into a mirror tree")]
    UnbuildableRoot,

    /// The store rejected the initial root
    #[error("store rejected root registration: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Engine was asked to connect outside a tokio runtime
    #[error("no tokio runtime available to drive the engine")]
    NoRuntime,
}

impl SyncError {
    /// Root key mentioned by the error, if any
    #[must_use]
    pub fn root_key(&self) -> Option<&NodeKey> {
        match self {
            Self::Store(StoreError::AlreadyRegistered(key) | StoreError::DuplicateKey(key)) => Some(key),
            _ => None,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A value is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// TOML could not be parsed
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Configuration file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Create invalid-value error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}
