//! Merkle roots для checkpoint
//!
//! Checkpoint коммитит два множества:
//! 1. `blocks_merkle_root`: блоки, замеченные в окне
//! 2. `proofs_merkle_root`: хеши delay proof принятых heartbeat
//!
//! Оба множества неупорядочены, поэтому листья сортируются и
//! дедуплицируются перед построением: порядок прихода heartbeat не влияет
//! на root. Light client по `MerkleProof` проверяет "мой heartbeat вошёл
//! в checkpoint".

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use crate::types::{EMPTY_HASH, Hash};

/// Максимальная глубина proof
pub const MAX_PROOF_DEPTH: usize = 32;

/// Domain separation для Merkle
pub const MERKLE_PREFIX: &[u8] = b"MONTANA_MERKLE_V1:";

/// Какой root доказывается
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofType {
    Block,
    DelayProof,
}

/// Merkle proof для включения в дерево
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_index: u64,
    pub siblings: Vec<Hash>,
}

/// Дерево над отсортированным множеством листьев
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<Hash>>,
}

impl MerkleTree {
    /// Построить дерево; листья сортируются, дубликаты выбрасываются
    pub fn from_set<I: IntoIterator<Item = Hash>>(leaves: I) -> Self {
        let mut leaves: Vec<Hash> = leaves.into_iter().collect();
        leaves.sort_unstable();
        leaves.dedup();

        let mut levels = vec![leaves];
        while levels.last().is_some_and(|l| l.len() > 1) {
            let next = levels.last().map(|l| next_level(l)).unwrap_or_default();
            levels.push(next);
        }
        Self { levels }
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    /// Root; пустое дерево → EMPTY_HASH
    pub fn root(&self) -> Hash {
        match self.levels.last() {
            Some(top) if top.len() == 1 => top[0],
            _ => EMPTY_HASH,
        }
    }

    pub fn proof(&self, leaf: &Hash) -> Option<MerkleProof> {
        let leaf_index = self.levels.first()?.binary_search(leaf).ok()?;
        let mut siblings = Vec::new();
        let mut index = leaf_index;

        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = index ^ 1;
            // Одинокий узел поднимается без хеширования
            if let Some(h) = level.get(sibling) {
                siblings.push(*h);
            }
            index /= 2;
        }

        Some(MerkleProof { leaf_index: leaf_index as u64, siblings })
    }
}

fn next_level(level: &[Hash]) -> Vec<Hash> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => hash_pair(left, right),
            [single] => *single,
            _ => EMPTY_HASH,
        })
        .collect()
}

impl MerkleProof {
    pub fn verify(&self, leaf: Hash, root: Hash) -> bool {
        if self.siblings.len() > MAX_PROOF_DEPTH {
            return false;
        }
        let computed = self
            .siblings
            .iter()
            .fold(leaf, |acc, sibling| hash_pair(&acc, sibling));
        computed == root
    }

    /// Размер proof в байтах
    pub fn size(&self) -> usize {
        8 + self.siblings.len() * 32
    }
}

/// Hash двух узлов (canonical ordering: меньший слева)
fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let (lo, hi) = if left <= right { (left, right) } else { (right, left) };
    let mut hasher = Sha3_256::new();
    hasher.update(MERKLE_PREFIX);
    hasher.update(lo);
    hasher.update(hi);
    hasher.finalize().into()
}

/// Root множества листьев
pub fn merkle_root<I: IntoIterator<Item = Hash>>(leaves: I) -> Hash {
    MerkleTree::from_set(leaves).root()
}
