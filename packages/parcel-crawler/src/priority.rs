//! Task priority computation.
//!
//! ```text
//! priority = base
//!          + relationship delta      (owner 5, county 3, parcel 2, neighbor 1)
//!          + min(hours since created, 10)
//!          + retry_count * 2
//!          + custom boost
//! ```

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::warn;

use crate::config::PriorityConfig;
use crate::types::RelationshipType;

const MAX_AGE_BOOST: i64 = 10;
const RETRY_WEIGHT: i64 = 2;

pub const DEFAULT_BOOST_FACTOR: f64 = 1.5;
pub const DEFAULT_MAX_BOOST: i64 = 20;
pub const DEFAULT_DECAY_FACTOR: f64 = 0.9;

/// Default weight for a relationship type
pub fn default_delta(relationship: RelationshipType) -> i64 {
    match relationship {
        RelationshipType::Owner => 5,
        RelationshipType::County => 3,
        RelationshipType::Parcel => 2,
        RelationshipType::Neighbor => 1,
        RelationshipType::Related | RelationshipType::Unknown => 0,
    }
}

/// Stateless priority calculator. Higher values are claimed first.
#[derive(Debug, Clone)]
pub struct PriorityCalculator {
    base_priority: i64,
    deltas: HashMap<RelationshipType, i64>,
}

impl Default for PriorityCalculator {
    fn default() -> Self {
        Self::new(&PriorityConfig::default())
    }
}

impl PriorityCalculator {
    /// Build from platform settings. Override keys are matched
    /// case-insensitively; unrecognized keys are ignored.
    pub fn new(config: &PriorityConfig) -> Self {
        let mut deltas: HashMap<RelationshipType, i64> = RelationshipType::ALL
            .iter()
            .map(|rel| (*rel, default_delta(*rel)))
            .collect();

        for (key, delta) in &config.relationship_deltas {
            match key.parse::<RelationshipType>() {
                Ok(rel) => {
                    deltas.insert(rel, *delta);
                }
                Err(_) => warn!(relationship = %key, "ignoring unknown relationship delta"),
            }
        }

        Self {
            base_priority: config.base_priority,
            deltas,
        }
    }

    pub fn base_priority(&self) -> i64 {
        self.base_priority
    }

    pub fn relationship_delta(&self, relationship: RelationshipType) -> i64 {
        self.deltas.get(&relationship).copied().unwrap_or(0)
    }

    pub fn calculate(
        &self,
        relationship: Option<RelationshipType>,
        created_at: Option<DateTime<Utc>>,
        retry_count: u32,
        custom_boost: i64,
    ) -> i64 {
        self.calculate_at(Utc::now(), relationship, created_at, retry_count, custom_boost)
    }

    /// `calculate` against an explicit clock.
    pub fn calculate_at(
        &self,
        now: DateTime<Utc>,
        relationship: Option<RelationshipType>,
        created_at: Option<DateTime<Utc>>,
        retry_count: u32,
        custom_boost: i64,
    ) -> i64 {
        let mut priority = self.base_priority;

        if let Some(rel) = relationship {
            priority += self.relationship_delta(rel);
        }

        if let Some(created) = created_at {
            priority += age_boost(now, created);
        }

        priority += i64::from(retry_count) * RETRY_WEIGHT;
        priority + custom_boost
    }

    /// `current + min(floor(current * (factor - 1)), max_boost)`
    pub fn boost_priority(&self, current: i64, factor: f64, max_boost: i64) -> i64 {
        let boost = (current as f64 * (factor - 1.0)).floor() as i64;
        current + boost.min(max_boost)
    }

    /// `max(floor(current * factor), min_priority)`
    pub fn decay_priority(&self, current: i64, factor: f64, min_priority: i64) -> i64 {
        let decayed = (current as f64 * factor).floor() as i64;
        decayed.max(min_priority)
    }
}

fn age_boost(now: DateTime<Utc>, created_at: DateTime<Utc>) -> i64 {
    let hours = now.signed_duration_since(created_at).num_hours();
    hours.clamp(0, MAX_AGE_BOOST)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn owner_link_at_base_zero_is_five() {
        let calc = PriorityCalculator::default();
        assert_eq!(calc.calculate(Some(RelationshipType::Owner), None, 0, 0), 5);
    }

    #[test]
    fn default_deltas() {
        let calc = PriorityCalculator::default();
        assert_eq!(calc.relationship_delta(RelationshipType::County), 3);
        assert_eq!(calc.relationship_delta(RelationshipType::Parcel), 2);
        assert_eq!(calc.relationship_delta(RelationshipType::Neighbor), 1);
        assert_eq!(calc.relationship_delta(RelationshipType::Related), 0);
        assert_eq!(calc.relationship_delta(RelationshipType::Unknown), 0);
        assert_eq!(calc.calculate(None, None, 0, 0), 0);
    }

    #[test]
    fn age_boost_floors_hours_and_caps_at_ten() {
        let calc = PriorityCalculator::default();
        let now = Utc::now();

        let fresh = now - Duration::minutes(59);
        assert_eq!(calc.calculate_at(now, None, Some(fresh), 0, 0), 0);

        let three_and_a_half = now - Duration::minutes(210);
        assert_eq!(calc.calculate_at(now, None, Some(three_and_a_half), 0, 0), 3);

        let ancient = now - Duration::days(30);
        assert_eq!(calc.calculate_at(now, None, Some(ancient), 0, 0), 10);

        let future = now + Duration::hours(2);
        assert_eq!(calc.calculate_at(now, None, Some(future), 0, 0), 0);
    }

    #[test]
    fn all_terms_add_up() {
        let config = PriorityConfig::default().with_base_priority(10);
        let calc = PriorityCalculator::new(&config);
        let now = Utc::now();

        let priority = calc.calculate_at(
            now,
            Some(RelationshipType::County),
            Some(now - Duration::hours(2)),
            3,
            4,
        );
        assert_eq!(priority, 10 + 3 + 2 + 6 + 4);
    }

    #[test]
    fn overrides_match_case_insensitively() {
        let mut config = PriorityConfig::default();
        config.relationship_deltas.insert("OWNER".to_string(), 8);
        config.relationship_deltas.insert("landlord".to_string(), 99);
        let calc = PriorityCalculator::new(&config);

        assert_eq!(calc.relationship_delta(RelationshipType::Owner), 8);
        assert_eq!(calc.relationship_delta(RelationshipType::County), 3);
    }

    #[test]
    fn boost_and_decay() {
        let calc = PriorityCalculator::default();

        assert_eq!(calc.boost_priority(10, DEFAULT_BOOST_FACTOR, DEFAULT_MAX_BOOST), 15);
        assert_eq!(calc.boost_priority(100, 1.5, 20), 120);
        assert_eq!(calc.boost_priority(0, 1.5, 20), 0);

        assert_eq!(calc.decay_priority(10, DEFAULT_DECAY_FACTOR, 0), 9);
        assert_eq!(calc.decay_priority(1, 0.9, 0), 0);
        assert_eq!(calc.decay_priority(10, 0.1, 5), 5);
    }
}
