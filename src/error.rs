//! Error handling for the camnode application
//!
//! This module defines the crate-level error type and a Result alias used
//! by configuration loading and the binary. Node-level failures live in
//! [`crate::pipeline::error`].

use crate::pipeline::error::NodeError;
use thiserror::Error;

/// Main error type for camnode operations
#[derive(Error, Debug)]
pub enum CamNodeError {
    /// Errors raised by a node or the node factory
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<CamNodeError>,
    },
}

impl CamNodeError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        CamNodeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<serde_json::Error> for CamNodeError {
    fn from(err: serde_json::Error) -> Self {
        CamNodeError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for CamNodeError {
    fn from(err: toml::de::Error) -> Self {
        CamNodeError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for CamNodeError {
    fn from(err: toml::ser::Error) -> Self {
        CamNodeError::Serialization(err.to_string())
    }
}

/// Result type alias for camnode operations
pub type Result<T> = std::result::Result<T, CamNodeError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
