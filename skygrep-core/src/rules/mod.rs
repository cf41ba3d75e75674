//! Matching rules.
//!
//! A [`RuleSet`] is built once from validated configuration and never
//! changes afterwards. Patterns are compiled when a [`PatternRule`] is
//! constructed, so matching itself cannot fail.

mod matcher;
mod types;

pub use matcher::{RuleMatch, RuleSet};
pub use types::{CollectionRule, PatternRule, Rule, RuleError, RuleKind, Topic};
