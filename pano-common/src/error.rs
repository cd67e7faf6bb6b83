//! Error types for PanoBot services.

use thiserror::Error;

/// Result type alias using the PanoBot error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for PanoBot services.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session store unreachable or rejected a command
    #[error("Session store error: {0}")]
    Store(String),

    /// Chat transport error (download, send)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Other error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an error with additional context.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Check if this error originates from the session store.
    pub fn is_store(&self) -> bool {
        match self {
            Self::Store(_) => true,
            Self::WithContext { source, .. } => source.is_store(),
            _ => false,
        }
    }
}

/// Extension trait for adding context to any error type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }
}
