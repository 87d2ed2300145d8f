//! State backend error types.

/// Errors produced by [`StateBackend`](crate::StateBackend) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Backend(#[source] rusqlite::Error),

    /// Underlying `SQLite` failure, tagged with the failing operation.
    #[error("sqlite error in {context}: {source}")]
    BackendContext {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("state backend lock poisoned")]
    LockPoisoned,
}

impl StateError {
    /// Wrap a `SQLite` error.
    #[must_use]
    pub fn backend(err: rusqlite::Error) -> Self {
        Self::Backend(err)
    }

    /// Wrap a `SQLite` error with the name of the failing operation.
    #[must_use]
    pub fn backend_context(context: &'static str, err: rusqlite::Error) -> Self {
        Self::BackendContext {
            context,
            source: err,
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;
