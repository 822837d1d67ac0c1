//! Cache statistics, recomputed on demand and never persisted

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Statistics reported by a single tier.
///
/// Producing these never fails: a tier that cannot compute its numbers
/// returns a value with `error` set instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierStats {
    pub tier: String,
    pub available: bool,
    pub sessions: u64,
    pub turns: u64,
    pub estimated_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Tier specific extras (TTL, key prefix, table name, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TierStats {
    pub fn new(tier: impl Into<String>) -> Self {
        Self {
            tier: tier.into(),
            available: true,
            ..Default::default()
        }
    }

    /// Stats for a tier whose backing store could not be inspected.
    pub fn failed(tier: impl Into<String>, error: impl ToString) -> Self {
        Self {
            tier: tier.into(),
            available: false,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Aggregate view over every configured tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStatistics {
    /// Per tier stats in read order
    pub tiers: Vec<TierStats>,
    /// Summed over tiers; a conversation held by two tiers counts twice
    pub sessions: u64,
    pub turns: u64,
    pub estimated_bytes: u64,
    pub total_requests: u64,
    pub new_conversations: u64,
    /// Reads answered by each tier, keyed by tier name
    pub tier_hits: BTreeMap<String, u64>,
}

impl CacheStatistics {
    /// Merge per-tier stats with the orchestrator's request counters.
    pub fn merge(
        tiers: Vec<TierStats>,
        tier_hits: BTreeMap<String, u64>,
        total_requests: u64,
        new_conversations: u64,
    ) -> Self {
        let sessions = tiers.iter().map(|t| t.sessions).sum();
        let turns = tiers.iter().map(|t| t.turns).sum();
        let estimated_bytes = tiers.iter().map(|t| t.estimated_bytes).sum();
        Self {
            tiers,
            sessions,
            turns,
            estimated_bytes,
            total_requests,
            new_conversations,
            tier_hits,
        }
    }

    /// Share of requests answered by some tier rather than treated as new.
    pub fn overall_hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        let hits: u64 = self.tier_hits.values().sum();
        hits as f64 / self.total_requests as f64
    }

    pub fn tier(&self, name: &str) -> Option<&TierStats> {
        self.tiers.iter().find(|t| t.tier == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_empty_is_zero() {
        assert_eq!(TierStats::new("memory").hit_rate(), 0.0);
    }

    #[test]
    fn test_failed_stats_carry_error() {
        let stats = TierStats::failed("shared", "connection refused");
        assert!(!stats.available);
        assert_eq!(stats.error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_merge_sums_tiers() {
        let memory = TierStats {
            sessions: 2,
            turns: 5,
            estimated_bytes: 100,
            ..TierStats::new("memory")
        };
        let log = TierStats {
            sessions: 3,
            turns: 9,
            estimated_bytes: 400,
            ..TierStats::new("durable_log")
        };
        let mut hits = BTreeMap::new();
        hits.insert("memory".to_string(), 3);
        hits.insert("durable_log".to_string(), 1);

        let merged = CacheStatistics::merge(vec![memory, log], hits, 5, 1);
        assert_eq!(merged.sessions, 5);
        assert_eq!(merged.turns, 14);
        assert_eq!(merged.estimated_bytes, 500);
        assert!((merged.overall_hit_rate() - 0.8).abs() < f64::EPSILON);
        assert_eq!(merged.tier("durable_log").map(|t| t.turns), Some(9));
    }
}
