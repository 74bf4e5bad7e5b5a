//! Partition Merge Engine
//!
//! Две истории checkpoint расходятся после общего предка (совпадение
//! хеша). Для boundary, который есть в обеих, победителя выбирает fork
//! choice; boundary из одной истории переносится как есть. Результат:
//! строго возрастающая по boundary последовательность, один checkpoint на
//! boundary. Проигравшие не удаляются, а возвращаются в `retained`.
//!
//! Функция тотальна: merge(X, Y) == merge(Y, X), merge(M, M) == M.

use std::collections::{BTreeMap, HashMap};

use crate::checkpoint::FinalityCheckpoint;
use crate::fork_choice::{self, Resolution, ordering_key};
use crate::types::Hash;

/// Общий предок: позиции в обеих последовательностях
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonAncestor {
    pub hash: Hash,
    pub local_index: usize,
    pub remote_index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub fork_point: Option<CommonAncestor>,
    /// Итоговая последовательность
    pub canonical: Vec<FinalityCheckpoint>,
    /// Проигравшие кандидаты на спорных boundary
    pub retained: Vec<FinalityCheckpoint>,
    pub resolutions: Vec<Resolution>,
}

/// Самый поздний checkpoint, присутствующий в обеих последовательностях
pub fn common_ancestor(local: &[FinalityCheckpoint], remote: &[FinalityCheckpoint]) -> Option<CommonAncestor> {
    let remote_index: HashMap<Hash, usize> = remote
        .iter()
        .enumerate()
        .map(|(i, cp)| (cp.hash(), i))
        .collect();

    local.iter().enumerate().rev().find_map(|(i, cp)| {
        let hash = cp.hash();
        remote_index.get(&hash).map(|&j| CommonAncestor {
            hash,
            local_index: i,
            remote_index: j,
        })
    })
}

pub fn merge(local: &[FinalityCheckpoint], remote: &[FinalityCheckpoint]) -> MergeOutcome {
    let fork_point = common_ancestor(local, remote);

    // boundary → уникальные по хешу кандидаты
    let mut slots: BTreeMap<u64, Vec<(Hash, &FinalityCheckpoint)>> = BTreeMap::new();
    for cp in local.iter().chain(remote) {
        let hash = cp.hash();
        let slot = slots.entry(cp.boundary_timestamp).or_default();
        if !slot.iter().any(|(h, _)| *h == hash) {
            slot.push((hash, cp));
        }
    }

    let mut outcome = MergeOutcome {
        fork_point,
        ..Default::default()
    };

    for candidates in slots.into_values() {
        let Some(&(winner_hash, winner)) = candidates
            .iter()
            .max_by_key(|(_, cp)| ordering_key(cp))
        else {
            continue;
        };
        for &(hash, loser) in &candidates {
            if hash == winner_hash {
                continue;
            }
            if let Ok(resolution) = fork_choice::explain(winner, loser) {
                outcome.resolutions.push(resolution);
            }
            outcome.retained.push(loser.clone());
        }
        outcome.canonical.push(winner.clone());
    }

    // Детерминированный порядок независимо от того, кто local, кто remote
    outcome.retained.sort_by_key(|cp| (cp.boundary_timestamp, cp.hash()));
    outcome
        .resolutions
        .sort_by_key(|r| (r.winner, r.loser));
    outcome
}
