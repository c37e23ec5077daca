//! Per-variant metrics derived from recorded events

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Aggregated counters and rates for one variant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariantMetrics {
    pub variant_id: Uuid,
    /// Unique exposed subjects
    pub users_exposed: u64,
    /// Unique engaged subjects
    pub users_engaged: u64,
    /// Unique converting subjects
    pub conversions: u64,
    /// Raw engagement events, including repeats
    pub engagement_events: u64,
    /// Raw conversion events, including repeats
    pub conversion_events: u64,
    /// Sum of every conversion event's value
    pub revenue_impact: f64,
    pub engagement_rate: f64,
    pub conversion_rate: f64,
}

impl VariantMetrics {
    /// Metrics for a variant that has not seen any events
    pub fn empty(variant_id: Uuid) -> Self {
        Self::from_counts(variant_id, 0, 0, 0).with_event_totals(0, 0, 0.0)
    }

    /// Build metrics from unique-subject counts; rates are 0 without exposures
    pub fn from_counts(
        variant_id: Uuid,
        users_exposed: u64,
        users_engaged: u64,
        conversions: u64,
    ) -> Self {
        let rate = |n: u64| {
            if users_exposed > 0 {
                n as f64 / users_exposed as f64
            } else {
                0.0
            }
        };

        Self {
            variant_id,
            users_exposed,
            users_engaged,
            conversions,
            engagement_events: users_engaged,
            conversion_events: conversions,
            revenue_impact: 0.0,
            engagement_rate: rate(users_engaged),
            conversion_rate: rate(conversions),
        }
    }

    pub fn with_event_totals(
        mut self,
        engagement_events: u64,
        conversion_events: u64,
        revenue_impact: f64,
    ) -> Self {
        self.engagement_events = engagement_events;
        self.conversion_events = conversion_events;
        self.revenue_impact = revenue_impact;
        self
    }

    pub fn has_exposures(&self) -> bool {
        self.users_exposed > 0
    }
}
