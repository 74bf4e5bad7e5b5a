//! Checkpoint chain: append-only журнал кандидатов
//!
//! Вместо одного изменяемого tip храним все когда-либо увиденные checkpoint
//! в плотном векторе (индекс = позиция) плюс hash → index. Для каждого
//! boundary: слот со списком кандидатов и канонической позицией.
//! Кандидат появляется как Pending, после resolve_boundary ровно один
//! становится Canonical, остальные: Superseded. Проигравшие не удаляются:
//! их блоки должны остаться доступными для следующих окон.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::checkpoint::FinalityCheckpoint;
use crate::fork_choice::ordering_key;
use crate::types::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointStatus {
    Pending,
    Canonical,
    Superseded,
}

/// Откуда пришёл кандидат
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEntry {
    pub checkpoint: FinalityCheckpoint,
    pub hash: Hash,
    pub status: CheckpointStatus,
    pub origin: Origin,
}

#[derive(Debug, Clone, Default)]
struct BoundarySlot {
    canonical: Option<usize>,
    candidates: Vec<usize>,
}

/// Итог разрешения одного boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryResolution {
    pub boundary: u64,
    pub canonical: usize,
    /// Прежний канонический, если он сменился
    pub replaced: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct CheckpointChain {
    entries: Vec<ChainEntry>,
    by_hash: HashMap<Hash, usize>,
    slots: BTreeMap<u64, BoundarySlot>,
}

impl CheckpointChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ChainEntry> {
        self.entries.get(index)
    }

    pub fn index_of(&self, hash: &Hash) -> Option<usize> {
        self.by_hash.get(hash).copied()
    }

    pub fn status(&self, hash: &Hash) -> Option<CheckpointStatus> {
        self.index_of(hash).map(|i| self.entries[i].status)
    }

    /// Добавить кандидата как Pending. Повтор по хешу → (index, false).
    pub fn push_candidate(&mut self, checkpoint: FinalityCheckpoint, origin: Origin) -> (usize, bool) {
        let hash = checkpoint.hash();
        if let Some(&index) = self.by_hash.get(&hash) {
            return (index, false);
        }
        let index = self.entries.len();
        let boundary = checkpoint.boundary_timestamp;
        self.entries.push(ChainEntry {
            checkpoint,
            hash,
            status: CheckpointStatus::Pending,
            origin,
        });
        self.by_hash.insert(hash, index);
        self.slots.entry(boundary).or_default().candidates.push(index);
        (index, true)
    }

    /// Выбрать канонического кандидата boundary через fork choice
    pub fn resolve_boundary(&mut self, boundary: u64) -> Option<BoundaryResolution> {
        let slot = self.slots.get_mut(&boundary)?;
        let entries = &mut self.entries;
        let winner = *slot
            .candidates
            .iter()
            .max_by_key(|&&i| ordering_key(&entries[i].checkpoint))?;

        let previous = slot.canonical.replace(winner);
        for &i in &slot.candidates {
            entries[i].status = if i == winner {
                CheckpointStatus::Canonical
            } else {
                CheckpointStatus::Superseded
            };
        }

        Some(BoundaryResolution {
            boundary,
            canonical: winner,
            replaced: previous.filter(|&p| p != winner),
        })
    }

    /// push_candidate + resolve_boundary
    pub fn insert(&mut self, checkpoint: FinalityCheckpoint, origin: Origin) -> Option<BoundaryResolution> {
        let boundary = checkpoint.boundary_timestamp;
        self.push_candidate(checkpoint, origin);
        self.resolve_boundary(boundary)
    }

    pub fn canonical(&self, boundary: u64) -> Option<&FinalityCheckpoint> {
        let index = self.slots.get(&boundary)?.canonical?;
        Some(&self.entries[index].checkpoint)
    }

    pub fn canonical_entry(&self, boundary: u64) -> Option<&ChainEntry> {
        let index = self.slots.get(&boundary)?.canonical?;
        self.entries.get(index)
    }

    /// Все проигравшие кандидаты boundary
    pub fn superseded(&self, boundary: u64) -> Vec<&ChainEntry> {
        self.slots
            .get(&boundary)
            .map(|slot| {
                slot.candidates
                    .iter()
                    .map(|&i| &self.entries[i])
                    .filter(|e| e.status == CheckpointStatus::Superseded)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn canonical_iter(&self) -> impl DoubleEndedIterator<Item = &FinalityCheckpoint> + '_ {
        self.slots
            .values()
            .filter_map(|slot| slot.canonical)
            .map(|i| &self.entries[i].checkpoint)
    }

    /// Канонические checkpoint по возрастанию boundary
    pub fn canonical_sequence(&self) -> Vec<FinalityCheckpoint> {
        self.canonical_iter().cloned().collect()
    }

    pub fn tip(&self) -> Option<&FinalityCheckpoint> {
        self.canonical_iter().next_back()
    }

    /// Последний канонический checkpoint строго до `boundary`
    pub fn canonical_before(&self, boundary: u64) -> Option<&FinalityCheckpoint> {
        self.slots
            .range(..boundary)
            .rev()
            .find_map(|(_, slot)| slot.canonical)
            .map(|i| &self.entries[i].checkpoint)
    }

    /// Сколько канонических checkpoint после `boundary`
    pub fn canonical_after(&self, boundary: u64) -> usize {
        self.slots
            .range(boundary.saturating_add(1)..)
            .filter(|(_, slot)| slot.canonical.is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::tests::checkpoint;

    const B: u64 = 1_735_862_460_000;
    const I: u64 = 60_000;

    #[test]
    fn test_pending_until_resolved() {
        let mut chain = CheckpointChain::new();
        let cp = checkpoint(B, 5, 1, 1, 1);
        let (index, fresh) = chain.push_candidate(cp.clone(), Origin::Local);
        assert!(fresh);
        assert_eq!(chain.status(&cp.hash()), Some(CheckpointStatus::Pending));
        assert!(chain.canonical(B).is_none());

        let r = chain.resolve_boundary(B).unwrap();
        assert_eq!(r.canonical, index);
        assert_eq!(r.replaced, None);
        assert_eq!(chain.canonical(B), Some(&cp));
    }

    #[test]
    fn test_duplicate_ignored() {
        let mut chain = CheckpointChain::new();
        let cp = checkpoint(B, 5, 1, 1, 1);
        chain.insert(cp.clone(), Origin::Local);
        let (index, fresh) = chain.push_candidate(cp, Origin::Remote);
        assert!(!fresh);
        assert_eq!(index, 0);
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_better_candidate_replaces_and_loser_retained() {
        let mut chain = CheckpointChain::new();
        let local = checkpoint(B, 40, 1, 1, 1);
        let remote = checkpoint(B, 60, 1, 1, 2);

        chain.insert(local.clone(), Origin::Local);
        let r = chain.insert(remote.clone(), Origin::Remote).unwrap();
        assert_eq!(r.replaced, Some(0));
        assert_eq!(chain.canonical(B), Some(&remote));
        assert_eq!(chain.status(&local.hash()), Some(CheckpointStatus::Superseded));

        let losers = chain.superseded(B);
        assert_eq!(losers.len(), 1);
        assert_eq!(losers[0].checkpoint, local);
        assert_eq!(losers[0].origin, Origin::Local);

        // Худший кандидат не меняет канонический
        let r = chain.insert(checkpoint(B, 10, 1, 1, 3), Origin::Remote).unwrap();
        assert_eq!(r.replaced, None);
        assert_eq!(chain.canonical(B), Some(&remote));
    }

    #[test]
    fn test_sequence_queries() {
        let mut chain = CheckpointChain::new();
        for k in [2u64, 0, 1, 4] {
            chain.insert(checkpoint(B + k * I, 1, 1, 1, k as u8), Origin::Local);
        }
        let seq = chain.canonical_sequence();
        let boundaries: Vec<u64> = seq.iter().map(|c| c.boundary_timestamp).collect();
        assert_eq!(boundaries, vec![B, B + I, B + 2 * I, B + 4 * I]);

        assert_eq!(chain.tip().unwrap().boundary_timestamp, B + 4 * I);
        assert_eq!(chain.canonical_before(B + 4 * I).unwrap().boundary_timestamp, B + 2 * I);
        assert!(chain.canonical_before(B).is_none());
        assert_eq!(chain.canonical_after(B), 3);
        assert_eq!(chain.canonical_after(B + 4 * I), 0);
    }
}
