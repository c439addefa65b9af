// Error types
pub mod error;

// Provider contract (public API)
pub mod traits;

// Provider settings file
pub mod config;

// Session lifecycle
pub mod session;

// Per-session dependency cache
pub mod cache;

// Contract
pub use traits::{
    CodeSnippetResolver, ConditionsByCapability, DepDagsByFile, DependencyLocationResolver,
    DepsByFile, EvaluateResponse, IncidentContext, InitOutcome, Provider, ProviderContext,
};

// Settings
pub use config::{InitConfig, Proxy, ProviderConfig, load_settings, yaml_to_json};

// Session and caching
pub use cache::DependencyCache;
pub use session::SessionState;

// Error types
pub use error::{Error, Result};
