//! Error types for the alerting pipeline

use thiserror::Error;

/// Errors raised by alerting operations
#[derive(Debug, Error)]
pub enum AlertError {
    /// A notification transport failed
    #[error("notification channel failed: {0}")]
    ChannelFailed(String),

    /// An operation crossed an organisation boundary
    #[error(transparent)]
    Scope(#[from] courier_core::ScopeError),
}
