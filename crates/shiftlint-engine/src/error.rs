use std::fmt;
use std::path::PathBuf;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types raised while parsing rules or running the engine
#[derive(Debug)]
pub enum Error {
    /// A rule or rule file rejected during parsing
    Parse {
        file: Option<PathBuf>,
        rule_id: Option<String>,
        message: String,
    },
    /// Several parse/validation failures joined into one
    Aggregate(Vec<Error>),
    /// A provider call failed during evaluation
    Provider(shiftlint_provider::Error),
    /// Propagated context cancellation
    Cancelled,
    /// The run itself cannot continue
    Fatal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Parse {
                file,
                rule_id,
                message,
            } => {
                match (file, rule_id) {
                    (Some(file), Some(id)) => {
                        write!(f, "{}: rule {}: {}", file.display(), id, message)
                    }
                    (Some(file), None) => write!(f, "{}: {}", file.display(), message),
                    (None, Some(id)) => write!(f, "rule {}: {}", id, message),
                    (None, None) => write!(f, "{}", message),
                }
            }
            Error::Aggregate(errors) => {
                let joined: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
                write!(f, "{}", joined.join("; "))
            }
            Error::Provider(err) => write!(f, "{}", err),
            Error::Cancelled => write!(f, "cancelled"),
            Error::Fatal(msg) => write!(f, "fatal: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<shiftlint_provider::Error> for Error {
    fn from(err: shiftlint_provider::Error) -> Self {
        if err.is_cancelled() {
            Error::Cancelled
        } else {
            Error::Provider(err)
        }
    }
}

impl Error {
    pub fn parse(message: impl Into<String>) -> Self {
        Error::Parse {
            file: None,
            rule_id: None,
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Collapse a batch of errors into none, one, or an aggregate.
    pub fn join(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Aggregate(errors)),
        }
    }
}
