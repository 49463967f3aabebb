use thiserror::Error;

/// Canonical error type for control-plane operations.
///
/// `NotFound` is a distinguished sentinel: get-family operations return it
/// verbatim when an expected key is absent, and the wire layer maps it to a
/// dedicated status code. Every other variant carries a stage-prefixed
/// message assembled with [`BackendError::context`].
#[derive(Debug, Error)]
pub enum BackendError {
    /// A get-family primitive observed an absent key.
    #[error("not found")]
    NotFound,

    /// Any non-NotFound failure from the backing store.
    #[error("{0}")]
    Storage(String),

    /// A payload did not conform to the binary encoding.
    #[error("{0}")]
    Decode(String),

    /// An external launch/stop/inspect failed. Preceding store mutations
    /// are not rolled back.
    #[error("{0}")]
    Runner(String),
}

impl BackendError {
    /// Creates a `Storage` variant.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Creates a `Decode` variant.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Creates a `Runner` variant.
    #[must_use]
    pub fn runner(message: impl Into<String>) -> Self {
        Self::Runner(message.into())
    }

    /// Returns true for the `NotFound` sentinel.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Prefixes the error message with the failing stage, passing
    /// `NotFound` through untouched so callers can match on it.
    #[must_use]
    pub fn context(self, stage: &str) -> Self {
        match self {
            Self::NotFound => Self::NotFound,
            Self::Storage(message) => Self::Storage(format!("{stage}: {message}")),
            Self::Decode(message) => Self::Decode(format!("{stage}: {message}")),
            Self::Runner(message) => Self::Runner(format!("{stage}: {message}")),
        }
    }
}

/// Convenient result alias for control-plane operations.
pub type BackendResult<T> = Result<T, BackendError>;
