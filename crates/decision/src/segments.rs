//! Segment membership
//!
//! Segment criteria are opaque to the registry; deciding whether a subject
//! belongs to a segment is delegated to a [`SegmentMembership`] collaborator.

use abtest_types::Segment;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// The entity being bucketed, with the attributes segment predicates read
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Subject {
    pub id: String,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl Subject {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Decides whether a subject matches a segment's criteria
pub trait SegmentMembership: Send + Sync {
    fn is_member(&self, segment: &Segment, subject: &Subject) -> bool;
}

/// Matches criteria written as a JSON object of attribute constraints
///
/// Each key must be present on the subject. A scalar value must equal the
/// attribute; an array value matches when the attribute equals any element.
/// `null` criteria match every subject.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttributeMatcher;

impl SegmentMembership for AttributeMatcher {
    fn is_member(&self, segment: &Segment, subject: &Subject) -> bool {
        match &segment.criteria {
            Value::Null => true,
            Value::Object(constraints) => constraints.iter().all(|(key, expected)| {
                match subject.attributes.get(key) {
                    Some(actual) => match expected {
                        Value::Array(options) => options.contains(actual),
                        other => other == actual,
                    },
                    None => false,
                }
            }),
            _ => false,
        }
    }
}

/// Explicit membership lists, e.g. precomputed by an upstream audience service
#[derive(Default)]
pub struct StaticMembership {
    members: DashMap<String, HashSet<String>>,
}

impl StaticMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, segment_id: impl Into<String>, subject_id: impl Into<String>) {
        self.members
            .entry(segment_id.into())
            .or_default()
            .insert(subject_id.into());
    }
}

impl SegmentMembership for StaticMembership {
    fn is_member(&self, segment: &Segment, subject: &Subject) -> bool {
        self.members
            .get(&segment.id)
            .map(|members| members.contains(&subject.id))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attribute_matcher_equality() {
        let segment = Segment::new("mobile-us", "Mobile US", json!({"platform": "ios", "country": "US"}));
        let matcher = AttributeMatcher;

        let member = Subject::new("u1")
            .with_attribute("platform", "ios")
            .with_attribute("country", "US");
        let wrong_country = Subject::new("u2")
            .with_attribute("platform", "ios")
            .with_attribute("country", "DE");
        let missing = Subject::new("u3").with_attribute("platform", "ios");

        assert!(matcher.is_member(&segment, &member));
        assert!(!matcher.is_member(&segment, &wrong_country));
        assert!(!matcher.is_member(&segment, &missing));
    }

    #[test]
    fn test_attribute_matcher_any_of() {
        let segment = Segment::new("paid", "Paid tiers", json!({"tier": ["pro", "enterprise"]}));
        let matcher = AttributeMatcher;

        assert!(matcher.is_member(&segment, &Subject::new("a").with_attribute("tier", "pro")));
        assert!(!matcher.is_member(&segment, &Subject::new("b").with_attribute("tier", "free")));
    }

    #[test]
    fn test_null_criteria_match_everyone() {
        let segment = Segment::new("all", "Everyone", Value::Null);
        assert!(AttributeMatcher.is_member(&segment, &Subject::new("anyone")));
    }

    #[test]
    fn test_static_membership() {
        let membership = StaticMembership::new();
        membership.add_member("beta", "u1");
        let segment = Segment::new("beta", "Beta testers", Value::Null);

        assert!(membership.is_member(&segment, &Subject::new("u1")));
        assert!(!membership.is_member(&segment, &Subject::new("u2")));
    }
}
