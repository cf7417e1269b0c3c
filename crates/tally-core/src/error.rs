//! Core error types

use thiserror::Error;

/// Boxed error produced by a concrete statistic source.
pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Statistic source error: {0}")]
    Source(#[source] SourceError),

    #[error("Invalid statistic definition: {0}")]
    InvalidDefinition(String),
}

impl CoreError {
    /// Wrap an arbitrary source-side failure.
    pub fn source(err: impl Into<SourceError>) -> Self {
        CoreError::Source(err.into())
    }
}
