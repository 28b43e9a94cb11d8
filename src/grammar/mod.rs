//! Grammar compilation
//!
//! A grammar declaration goes through three stages:
//!
//! 1. [`classify`] sorts each statement into a keyword or property shape
//! 2. [`validator`] enforces the declaration rules and yields a [`GrammarBlock`]
//! 3. [`builder`] walks the validated tree and registers keyword definitions

pub mod builder;
pub mod classify;
pub mod validator;

pub use builder::KeywordTreeBuilder;
pub use classify::{GrammarBlock, GrammarStatement, KeywordDecl, PropertyDecl};
pub use validator::GrammarValidator;
