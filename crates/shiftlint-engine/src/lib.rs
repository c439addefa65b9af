// Error types
pub mod error;

// Rule parsing and provider binding
pub mod parse;

// Condition trees and evaluation
pub mod condition;

// Per-rule evaluation context and templating
pub mod context;

// Worker-pool scheduler
pub mod scheduler;

// Dependency fanout, dedup, and labeling
pub mod deps;

// Parsing
pub use parse::{ParseOutput, Rule, RuleParser, RuleSet};

// Evaluation
pub use condition::{
    ChainNode, CollectedIncident, Condition, DependencyCall, EvalOutcome, EvalSettings,
    ProviderCall, evaluate,
};
pub use context::{ConditionContext, RunTags, render_message, render_payload};

// Scheduling
pub use scheduler::{DEFAULT_WORKERS, RuleEngine, RunConfig};

// Dependencies
pub use deps::{
    DepLabelIndex, DepLabelRules, DependencyResolver, EXCLUDED_LABEL, LANGUAGE_LABEL_KEY,
    OPEN_SOURCE_LABEL, dedup_in_place,
};

// Error types
pub use error::{Error, Result};
