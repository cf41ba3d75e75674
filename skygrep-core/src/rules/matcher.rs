//! Rule evaluation.
//!
//! Every rule is evaluated independently in declaration order; an event
//! may produce zero, one or many matches, including several for the same
//! topic. Evaluation is pure and performs no I/O.

use super::types::{Rule, RuleKind, Topic};
use crate::events::{BASELINE_COLLECTION, CommitEvent};

/// An ordered, immutable collection of rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

/// One rule that matched an event.
#[derive(Debug, Clone, Copy)]
pub struct RuleMatch<'a> {
    /// Position of the rule in declaration order.
    pub index: usize,
    pub rule: &'a Rule,
}

impl<'a> RuleMatch<'a> {
    pub fn topic(&self) -> &'a Topic {
        self.rule.topic()
    }
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    /// Distinct topics in order of first reference.
    pub fn topics(&self) -> Vec<&Topic> {
        let mut topics: Vec<&Topic> = Vec::new();
        for rule in &self.rules {
            if !topics.contains(&rule.topic()) {
                topics.push(rule.topic());
            }
        }
        topics
    }

    /// Collections to subscribe to: the baseline collection followed by
    /// every collection referenced by a collection rule, deduplicated.
    pub fn wanted_collections(&self) -> Vec<String> {
        let mut wanted = vec![BASELINE_COLLECTION.to_string()];
        for rule in &self.rules {
            if let Rule::Collection(rule) = rule {
                for collection in rule.collections() {
                    if !wanted.contains(collection) {
                        wanted.push(collection.clone());
                    }
                }
            }
        }
        wanted
    }

    /// Evaluate every rule against `event`.
    pub fn match_event(&self, event: &CommitEvent) -> Vec<RuleMatch<'_>> {
        self.matching(event, |_| true)
    }

    /// Evaluate only the rules of one kind against `event`.
    pub fn match_kind(&self, event: &CommitEvent, kind: RuleKind) -> Vec<RuleMatch<'_>> {
        self.matching(event, |rule| rule.kind() == kind)
    }

    fn matching(&self, event: &CommitEvent, include: impl Fn(&Rule) -> bool) -> Vec<RuleMatch<'_>> {
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| include(rule))
            .filter(|(_, rule)| Self::rule_matches(rule, event))
            .map(|(index, rule)| RuleMatch { index, rule })
            .collect()
    }

    fn rule_matches(rule: &Rule, event: &CommitEvent) -> bool {
        match rule {
            Rule::Pattern(rule) => rule.matches(&event.payload),
            Rule::Collection(rule) => rule.matches(&event.collection),
        }
    }
}

impl FromIterator<Rule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = Rule>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
