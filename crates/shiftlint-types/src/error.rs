use std::fmt;

/// Result type for shiftlint-types operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the types layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A label string that is not `key` or `key=value`
    InvalidLabel(String),
    /// Selector expression rejected at a byte offset
    Selector { pos: usize, message: String },
    /// A version string that does not parse as a (padded) semantic version
    InvalidVersion(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidLabel(label) => write!(f, "invalid label: {:?}", label),
            Error::Selector { pos, message } => {
                write!(f, "selector error at offset {}: {}", pos, message)
            }
            Error::InvalidVersion(version) => write!(f, "invalid version: {:?}", version),
        }
    }
}

impl std::error::Error for Error {}
