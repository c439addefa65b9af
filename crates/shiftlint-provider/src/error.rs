use std::fmt;

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can surface from a provider, in-process or remote
#[derive(Debug)]
pub enum Error {
    /// Provider settings file unreadable or malformed
    Config(String),
    /// Provider failed to come up; fatal for that provider only
    Init(String),
    /// Capability not advertised by the dispatched provider
    UnknownCapability(String),
    /// Provider returned an error for a specific evaluate call
    Evaluate(String),
    /// Connection-level failure; the session is dead
    Transport(String),
    /// Bearer token missing, malformed, or failed verification
    Unauthenticated(String),
    /// Session ID unknown or already stopped
    StaleSession(i64),
    /// Provider does not implement the requested operation
    Unsupported,
    /// Propagated context cancellation, not a diagnostic
    Cancelled,
    Io(std::io::Error),
    Serde(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "provider config error: {}", msg),
            Error::Init(msg) => write!(f, "provider init failed: {}", msg),
            Error::UnknownCapability(name) => write!(f, "unknown capability: {}", name),
            Error::Evaluate(msg) => write!(f, "evaluate failed: {}", msg),
            Error::Transport(msg) => write!(f, "transport error: {}", msg),
            Error::Unauthenticated(msg) => write!(f, "unauthenticated: {}", msg),
            Error::StaleSession(id) => write!(f, "stale session id: {}", id),
            Error::Unsupported => write!(f, "operation not supported by provider"),
            Error::Cancelled => write!(f, "cancelled"),
            Error::Io(err) => write!(f, "io error: {}", err),
            Error::Serde(msg) => write!(f, "serialization error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl Error {
    /// True when the error is a cancellation, which callers must not report
    /// as a diagnostic.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serde(err.to_string())
    }
}
