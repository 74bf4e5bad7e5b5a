//! Confidence Assessor
//!
//! Метка доверия checkpoint по числу участников и регионов. Только
//! advisory: checkpoint с Low выпускается и встраивается в цепь как обычно.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::FinalityConfig;
use crate::types::{ParticipantId, RegionId};

/// Источник регионов участников (внешний collaborator)
pub trait RegionMap: Send + Sync {
    fn region_of(&self, participant_id: &[u8]) -> Option<RegionId>;
}

/// Регионы неизвестны: все checkpoint получают region_count = 0
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRegions;

impl RegionMap for NoRegions {
    fn region_of(&self, _participant_id: &[u8]) -> Option<RegionId> {
        None
    }
}

/// Фиксированная таблица participant → region
#[derive(Debug, Default, Clone)]
pub struct StaticRegionMap {
    regions: HashMap<ParticipantId, RegionId>,
}

impl StaticRegionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, participant_id: ParticipantId, region: RegionId) {
        self.regions.insert(participant_id, region);
    }
}

impl FromIterator<(ParticipantId, RegionId)> for StaticRegionMap {
    fn from_iter<T: IntoIterator<Item = (ParticipantId, RegionId)>>(iter: T) -> Self {
        Self { regions: iter.into_iter().collect() }
    }
}

impl RegionMap for StaticRegionMap {
    fn region_of(&self, participant_id: &[u8]) -> Option<RegionId> {
        self.regions.get(participant_id).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConfidenceTier {
    Low,
    High,
    Full,
}

impl std::fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConfidenceTier::Full => "full",
            ConfidenceTier::High => "high",
            ConfidenceTier::Low => "low",
        };
        f.write_str(s)
    }
}

/// Сколько византийских участников выдерживает n: ⌊(n−1)/3⌋
pub fn byzantine_tolerance(n: u64) -> u64 {
    n.saturating_sub(1) / 3
}

/// Пороги Full / High
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfidenceAssessor {
    full_participants: u64,
    full_regions: u64,
    high_participants: u64,
    high_regions: u64,
}

impl Default for ConfidenceAssessor {
    fn default() -> Self {
        Self::new(&FinalityConfig::default())
    }
}

impl ConfidenceAssessor {
    pub fn new(config: &FinalityConfig) -> Self {
        Self {
            full_participants: config.full_min_participants,
            full_regions: config.full_min_regions,
            high_participants: config.high_min_participants,
            high_regions: config.high_min_regions,
        }
    }

    pub fn assess(&self, participant_count: u64, region_count: u64) -> ConfidenceTier {
        if participant_count >= self.full_participants && region_count >= self.full_regions {
            ConfidenceTier::Full
        } else if participant_count >= self.high_participants && region_count >= self.high_regions {
            ConfidenceTier::High
        } else {
            ConfidenceTier::Low
        }
    }
}

/// Оценка с порогами по умолчанию (21/3, 7/2)
pub fn assess(participant_count: u64, region_count: u64) -> ConfidenceTier {
    ConfidenceAssessor::default().assess(participant_count, region_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiers() {
        assert_eq!(assess(21, 3), ConfidenceTier::Full);
        assert_eq!(assess(7, 2), ConfidenceTier::High);
        assert_eq!(assess(5, 1), ConfidenceTier::Low);
    }

    #[test]
    fn test_both_thresholds_required() {
        // Много участников, но один регион
        assert_eq!(assess(100, 1), ConfidenceTier::Low);
        assert_eq!(assess(21, 2), ConfidenceTier::High);
        assert_eq!(assess(20, 3), ConfidenceTier::High);
        assert_eq!(assess(6, 5), ConfidenceTier::Low);
        assert_eq!(assess(0, 0), ConfidenceTier::Low);
    }

    #[test]
    fn test_custom_thresholds() {
        let mut cfg = FinalityConfig::default();
        cfg.high_min_participants = 3;
        cfg.high_min_regions = 1;
        let a = ConfidenceAssessor::new(&cfg);
        assert_eq!(a.assess(3, 1), ConfidenceTier::High);
        assert_eq!(a.assess(2, 1), ConfidenceTier::Low);
    }

    #[test]
    fn test_byzantine_tolerance() {
        assert_eq!(byzantine_tolerance(0), 0);
        assert_eq!(byzantine_tolerance(1), 0);
        assert_eq!(byzantine_tolerance(4), 1);
        assert_eq!(byzantine_tolerance(7), 2);
        assert_eq!(byzantine_tolerance(21), 6);
        assert_eq!(byzantine_tolerance(22), 7);
    }

    #[test]
    fn test_region_maps() {
        let mut map: StaticRegionMap = vec![(vec![1u8], 7u16)].into_iter().collect();
        map.assign(vec![2u8], 9);
        assert_eq!(map.region_of(&[1u8]), Some(7));
        assert_eq!(map.region_of(&[2u8]), Some(9));
        assert_eq!(map.region_of(&[3u8]), None);
        assert_eq!(NoRegions.region_of(&[1u8]), None);
    }

    #[test]
    fn test_ordering() {
        assert!(ConfidenceTier::Full > ConfidenceTier::High);
        assert!(ConfidenceTier::High > ConfidenceTier::Low);
        assert_eq!(ConfidenceTier::Full.to_string(), "full");
    }
}
