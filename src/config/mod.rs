//! Runtime configuration
//!
//! `keywords.yaml` controls the dispatcher command name, record shape and
//! grammar path conventions. Grammar files live in `grammars/`.

pub mod loader;
pub mod types;

pub use loader::{ConfigLoader, GrammarSource};
pub use types::{DispatcherConfig, GrammarConfig, KeywordConfig, OutputConfig};
