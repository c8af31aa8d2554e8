use std::time::Duration;

/// Crate-wide result type for media operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Signature mismatch, malformed encoding, or missing claims.
    #[error("invalid media token: {reason}")]
    Invalid { reason: String },

    /// The token's max age has elapsed (strict policy only).
    #[error("media token expired {age:?} past its max age")]
    Expired { age: Duration },

    /// The decoded path would resolve outside the media root.
    #[error("media path escapes the media root: {path}")]
    PathTraversal { path: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn traversal(path: impl Into<String>) -> Self {
        Self::PathTraversal { path: path.into() }
    }
}
