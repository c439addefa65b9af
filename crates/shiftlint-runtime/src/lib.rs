// Internal modules (not exposed to external crates)
pub(crate) mod analyzer;
pub(crate) mod options;
pub(crate) mod progress;

// Main facade and its options
pub use analyzer::Analyzer;
pub use options::{AnalyzerOptions, PROVIDER_START_TIMEOUT, ValidatedOptions};

// Progress pipeline
pub use progress::{
    ProgressBus, ProgressEvent, ProgressReporter, Stage, SubscriptionId, Throttled,
};
