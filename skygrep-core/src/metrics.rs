//! Per-topic match counters.

use crate::rules::{RuleSet, Topic};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// One monotonically increasing counter per distinct topic of a
/// [`RuleSet`], initialised to zero.
///
/// Cheap to clone; all clones share the same counters. Counters are only
/// incremented by the commit forwarder and never reset.
#[derive(Debug, Clone)]
pub struct RuleMetrics {
    counters: Arc<[(Topic, AtomicU64)]>,
}

impl RuleMetrics {
    pub fn new(rules: &RuleSet) -> Self {
        let counters: Vec<(Topic, AtomicU64)> = rules
            .topics()
            .into_iter()
            .map(|topic| (topic.clone(), AtomicU64::new(0)))
            .collect();
        Self {
            counters: counters.into(),
        }
    }

    /// Increment the counter of `topic`.
    ///
    /// Returns the new value, or `None` if the topic is not referenced by
    /// the rule set.
    pub fn increment(&self, topic: &Topic) -> Option<u64> {
        self.counter(topic)
            .map(|counter| counter.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn get(&self, topic: &Topic) -> Option<u64> {
        self.counter(topic)
            .map(|counter| counter.load(Ordering::Relaxed))
    }

    /// Current counts in topic declaration order.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        self.counters
            .iter()
            .map(|(topic, counter)| (topic.to_string(), counter.load(Ordering::Relaxed)))
            .collect()
    }

    fn counter(&self, topic: &Topic) -> Option<&AtomicU64> {
        self.counters
            .iter()
            .find(|(t, _)| t == topic)
            .map(|(_, counter)| counter)
    }
}
