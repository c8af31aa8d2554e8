use thiserror::Error;

/// Crate-wide result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Startup refusal or an operation against a session that is not
    /// running. Not recoverable; surfaced to the operator.
    #[error("fatal session error: {message}")]
    Fatal { message: String },

    /// A remote call within an operation failed. The whole operation fails;
    /// nothing is retried automatically.
    #[error(transparent)]
    Platform(#[from] relaygram_platform::Error),

    /// Signed-link verification or media path resolution failed.
    #[error(transparent)]
    Media(#[from] relaygram_media::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }
}
