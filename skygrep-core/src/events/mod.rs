//! Event types flowing through the forwarding pipeline.
//!
//! # Event Flow
//!
//! 1. The event source yields a `CommitEvent` per repository commit
//! 2. The `CommitForwarder` matches it against the `RuleSet`
//! 3. Every match is published to its topic through the `BrokerPublisher`

pub mod types;

pub use types::{BASELINE_COLLECTION, CommitEvent, CommitOperation};

#[cfg(test)]
pub(crate) use types::fixtures;
