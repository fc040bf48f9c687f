//! Trace predicates over dotted tensor identifiers.
//!
//! A [`TraceSet`] is an ordered list evaluated first-match-wins: for each
//! identifier only the first matching trace applies, so more specific traces
//! must be added before more general ones when they overlap.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Pure filter over a tensor identifier such as `layer1.0.conv1.weight`.
pub trait TracePredicate {
    /// Returns true if the identifier is selected.
    fn matches(&self, ident: &str) -> bool;
}

/// Built-in traces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trace {
    /// Identifier contains `weight`.
    Weight,
    /// Identifier contains `bias`.
    Bias,
    /// Identifier contains a caller-supplied substring.
    Contains(String),
}

impl Trace {
    /// Factory for caller-defined substring traces.
    pub fn contains(substring: impl Into<String>) -> Self {
        Trace::Contains(substring.into())
    }

    /// Parses a CLI spelling: `weight`, `bias`, or any other substring.
    pub fn parse(text: &str) -> Self {
        match text {
            "weight" => Trace::Weight,
            "bias" => Trace::Bias,
            other => Trace::Contains(other.to_string()),
        }
    }
}

impl TracePredicate for Trace {
    fn matches(&self, ident: &str) -> bool {
        match self {
            Trace::Weight => ident.contains("weight"),
            Trace::Bias => ident.contains("bias"),
            Trace::Contains(sub) => ident.contains(sub.as_str()),
        }
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trace::Weight => write!(f, "weight"),
            Trace::Bias => write!(f, "bias"),
            Trace::Contains(sub) => write!(f, "contains({sub})"),
        }
    }
}

/// Ordered, duplicate-free trace list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceSet {
    traces: Vec<Trace>,
}

impl TraceSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a trace. Returns false if it was already present.
    pub fn add(&mut self, trace: Trace) -> bool {
        if self.traces.contains(&trace) {
            return false;
        }
        self.traces.push(trace);
        true
    }

    /// Removes a trace. Returns false if it was not present.
    pub fn remove(&mut self, trace: &Trace) -> bool {
        let before = self.traces.len();
        self.traces.retain(|t| t != trace);
        self.traces.len() != before
    }

    /// Index of the first trace matching `ident`.
    #[must_use]
    pub fn first_match(&self, ident: &str) -> Option<usize> {
        self.traces.iter().position(|t| t.matches(ident))
    }

    /// Traces in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = &Trace> {
        self.traces.iter()
    }

    /// Number of traces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.traces.len()
    }

    /// Returns true if no trace is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// Drops every trace.
    pub fn clear(&mut self) {
        self.traces.clear();
    }
}

impl FromIterator<Trace> for TraceSet {
    fn from_iter<I: IntoIterator<Item = Trace>>(iter: I) -> Self {
        let mut set = TraceSet::new();
        for trace in iter {
            set.add(trace);
        }
        set
    }
}

impl TracePredicate for TraceSet {
    fn matches(&self, ident: &str) -> bool {
        self.first_match(ident).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_traces() {
        assert!(Trace::Weight.matches("features.0.weight"));
        assert!(!Trace::Weight.matches("features.0.bias"));
        assert!(Trace::Bias.matches("fc.bias"));
        assert!(Trace::contains("bn").matches("layer1.0.bn1.running_mean"));
    }

    #[test]
    fn test_first_match_wins() {
        let set: TraceSet = [Trace::Weight, Trace::Bias].into_iter().collect();
        assert_eq!(set.first_match("layer.weight_bias"), Some(0));
        assert_eq!(set.first_match("layer.bias"), Some(1));
        assert_eq!(set.first_match("layer.running_var"), None);
    }

    #[test]
    fn test_add_ignores_duplicates() {
        let mut set = TraceSet::new();
        assert!(set.add(Trace::Weight));
        assert!(!set.add(Trace::Weight));
        assert!(set.add(Trace::contains("conv")));
        assert_eq!(set.len(), 2);

        assert!(set.remove(&Trace::Weight));
        assert!(!set.remove(&Trace::Weight));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![&Trace::contains("conv")]);
    }

    #[test]
    fn test_parse_cli_spelling() {
        assert_eq!(Trace::parse("weight"), Trace::Weight);
        assert_eq!(Trace::parse("bias"), Trace::Bias);
        assert_eq!(Trace::parse("downsample"), Trace::contains("downsample"));
    }
}
