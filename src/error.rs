use thiserror::Error;

/// Result type alias using this crate's error taxonomy.
pub type Result<T> = std::result::Result<T, ExportError>;

/// Everything that can end a sync run.
///
/// Rate limiting (HTTP 429) is deliberately absent: the client absorbs it
/// with a cooldown wait and callers never observe it.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Missing or invalid configuration. Fatal before any network activity.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The remote response did not match the documented shape. Not retried;
    /// a schema mismatch is a contract break, not transient trouble.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Transient failures exhausted the retry ceiling, or the remote
    /// rejected the request outright.
    #[error("Fetch failed after {attempts} attempt(s): {last_error}")]
    Fetch { attempts: u32, last_error: String },

    /// An archive file could not be written.
    #[error("Failed to write {path}: {message}")]
    Write { path: String, message: String },

    /// The sync state file could not be persisted.
    #[error("Failed to persist sync state: {0}")]
    State(String),
}
