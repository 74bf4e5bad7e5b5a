//! Finality checkpoints и Checkpoint Builder
//!
//! Окно проходит Open → Closing → Closed:
//! - Open: [W, W + interval): heartbeat принимаются
//! - Closing: boundary пройден, но идёт grace period ±tolerance
//! - Closed: checkpoint выпущен; поздние heartbeat уходят в следующее окно
//!
//! Checkpoint строится чистой функцией от содержимого окна и previous_hash,
//! поэтому повторное закрытие того же окна даёт побайтно тот же checkpoint.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::crypto::sha3;
use crate::merkle::{MerkleProof, MerkleTree, ProofType};
use crate::types::{Hash, ParticipantId, RegionId, window_boundary};

/// Размер canonical encoding checkpoint
pub const CHECKPOINT_ENCODED_LEN: usize = 8 + 32 + 32 + 4 + 8 + 8 + 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FinalityCheckpoint {
    /// Кратно interval; окно [boundary − interval, boundary)
    pub boundary_timestamp: u64,
    pub blocks_merkle_root: Hash,
    pub proofs_merkle_root: Hash,
    pub participant_count: u32,
    pub total_iterations: u64,
    /// Σ вкладов, fixed-point (× SCORE_PRECISION)
    pub aggregate_score: u64,
    pub previous_hash: Hash,
}

impl FinalityCheckpoint {
    /// boundary ‖ blocks_root ‖ proofs_root ‖ count ‖ iterations ‖ score ‖ prev
    pub fn to_bytes(&self) -> [u8; CHECKPOINT_ENCODED_LEN] {
        let mut out = [0u8; CHECKPOINT_ENCODED_LEN];
        let mut pos = 0;
        let mut put = |bytes: &[u8]| {
            out[pos..pos + bytes.len()].copy_from_slice(bytes);
            pos += bytes.len();
        };
        put(&self.boundary_timestamp.to_be_bytes());
        put(&self.blocks_merkle_root);
        put(&self.proofs_merkle_root);
        put(&self.participant_count.to_be_bytes());
        put(&self.total_iterations.to_be_bytes());
        put(&self.aggregate_score.to_be_bytes());
        put(&self.previous_hash);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != CHECKPOINT_ENCODED_LEN {
            return None;
        }
        let hash_at = |at: usize| -> Option<Hash> { bytes.get(at..at + 32)?.try_into().ok() };
        let u64_at = |at: usize| -> Option<u64> { Some(u64::from_be_bytes(bytes.get(at..at + 8)?.try_into().ok()?)) };
        Some(Self {
            boundary_timestamp: u64_at(0)?,
            blocks_merkle_root: hash_at(8)?,
            proofs_merkle_root: hash_at(40)?,
            participant_count: u32::from_be_bytes(bytes.get(72..76)?.try_into().ok()?),
            total_iterations: u64_at(76)?,
            aggregate_score: u64_at(84)?,
            previous_hash: hash_at(92)?,
        })
    }

    /// SHA3-256 от canonical encoding
    pub fn hash(&self) -> Hash {
        sha3(&self.to_bytes())
    }
}

/// Состояние окна
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowState {
    Open,
    Closing,
    Closed,
}

/// Принятый heartbeat внутри окна
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowEntry {
    pub participant_id: ParticipantId,
    /// Окно, для которого heartbeat был вычислен
    pub source_window: u64,
    pub proof_hash: Hash,
    pub iterations: u64,
    pub contribution: u64,
    pub region: Option<RegionId>,
}

/// Содержимое одного окна до закрытия
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowBook {
    pub window: u64,
    pub state: WindowState,
    entries: BTreeMap<(ParticipantId, u64), WindowEntry>,
    blocks: BTreeSet<Hash>,
}

impl WindowBook {
    pub fn new(window: u64) -> Self {
        Self {
            window,
            state: WindowState::Open,
            entries: BTreeMap::new(),
            blocks: BTreeSet::new(),
        }
    }

    /// false если окно уже Closed или запись уже есть
    pub fn insert(&mut self, entry: WindowEntry) -> bool {
        if self.state == WindowState::Closed {
            return false;
        }
        let key = (entry.participant_id.clone(), entry.source_window);
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, entry);
        true
    }

    pub fn add_block(&mut self, block: Hash) -> bool {
        self.state != WindowState::Closed && self.blocks.insert(block)
    }

    pub fn entries(&self) -> impl Iterator<Item = &WindowEntry> {
        self.entries.values()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Hash> {
        self.blocks.iter()
    }

    pub fn participant_count(&self) -> usize {
        self.entries
            .keys()
            .map(|(p, _)| p)
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn region_count(&self) -> usize {
        self.entries
            .values()
            .filter_map(|e| e.region)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Open → Closing после boundary. Closed не трогаем.
    pub fn observe_time(&mut self, now_ms: u64, interval_ms: u64) -> WindowState {
        if self.state == WindowState::Open && now_ms >= window_boundary(self.window, interval_ms) {
            self.state = WindowState::Closing;
        }
        self.state
    }

    pub fn mark_closed(&mut self) {
        self.state = WindowState::Closed;
    }
}

/// Листья, из которых собраны roots; нужны для inclusion proofs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowContents {
    pub blocks: Vec<Hash>,
    pub proofs: Vec<Hash>,
    pub region_count: u32,
}

impl WindowContents {
    pub fn inclusion_proof(&self, leaf: &Hash, proof_type: ProofType) -> Option<MerkleProof> {
        let leaves = match proof_type {
            ProofType::Block => &self.blocks,
            ProofType::DelayProof => &self.proofs,
        };
        MerkleTree::from_set(leaves.iter().copied()).proof(leaf)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltCheckpoint {
    pub checkpoint: FinalityCheckpoint,
    pub contents: WindowContents,
}

/// Собирает checkpoint из содержимого окна
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointBuilder {
    interval_ms: u64,
}

impl CheckpointBuilder {
    pub fn new(interval_ms: u64) -> Self {
        Self { interval_ms }
    }

    pub fn build(&self, book: &WindowBook, previous_hash: Hash) -> BuiltCheckpoint {
        let blocks = MerkleTree::from_set(book.blocks().copied());
        let proofs = MerkleTree::from_set(book.entries().map(|e| e.proof_hash));

        let total_iterations = book
            .entries()
            .fold(0u64, |acc, e| acc.saturating_add(e.iterations));
        let aggregate_score = book
            .entries()
            .fold(0u64, |acc, e| acc.saturating_add(e.contribution));

        let checkpoint = FinalityCheckpoint {
            boundary_timestamp: window_boundary(book.window, self.interval_ms),
            blocks_merkle_root: blocks.root(),
            proofs_merkle_root: proofs.root(),
            participant_count: u32::try_from(book.participant_count()).unwrap_or(u32::MAX),
            total_iterations,
            aggregate_score,
            previous_hash,
        };

        let mut block_leaves: Vec<Hash> = book.blocks().copied().collect();
        block_leaves.sort_unstable();
        let mut proof_leaves: Vec<Hash> = book.entries().map(|e| e.proof_hash).collect();
        proof_leaves.sort_unstable();
        proof_leaves.dedup();

        BuiltCheckpoint {
            checkpoint,
            contents: WindowContents {
                blocks: block_leaves,
                proofs: proof_leaves,
                region_count: u32::try_from(book.region_count()).unwrap_or(u32::MAX),
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{EMPTY_HASH, SCORE_PRECISION};

    const W0: u64 = 1_735_862_400_000;
    const INTERVAL: u64 = 60_000;

    pub(crate) fn checkpoint(boundary: u64, count: u32, iterations: u64, score: u64, salt: u8) -> FinalityCheckpoint {
        FinalityCheckpoint {
            boundary_timestamp: boundary,
            blocks_merkle_root: [salt; 32],
            proofs_merkle_root: [salt.wrapping_add(1); 32],
            participant_count: count,
            total_iterations: iterations,
            aggregate_score: score,
            previous_hash: EMPTY_HASH,
        }
    }

    fn entry(p: u8, source: u64, region: Option<RegionId>) -> WindowEntry {
        WindowEntry {
            participant_id: vec![p; 4],
            source_window: source,
            proof_hash: sha3(&[p, source as u8]),
            iterations: 1_000,
            contribution: SCORE_PRECISION,
            region,
        }
    }

    #[test]
    fn test_encoding_layout() {
        let cp = checkpoint(W0 + INTERVAL, 3, 3_000, 3 * SCORE_PRECISION, 7);
        let bytes = cp.to_bytes();
        assert_eq!(bytes.len(), 124);
        assert_eq!(&bytes[..8], &(W0 + INTERVAL).to_be_bytes());
        assert_eq!(&bytes[72..76], &3u32.to_be_bytes());
        assert_eq!(FinalityCheckpoint::from_bytes(&bytes).unwrap(), cp);
        assert!(FinalityCheckpoint::from_bytes(&bytes[1..]).is_none());
        assert_eq!(cp.hash(), sha3(&bytes));
    }

    #[test]
    fn test_hash_covers_every_field() {
        let base = checkpoint(W0, 1, 1, 1, 1);
        let mut variants = vec![base.clone(); 7];
        variants[0].boundary_timestamp += INTERVAL;
        variants[1].blocks_merkle_root[0] ^= 1;
        variants[2].proofs_merkle_root[0] ^= 1;
        variants[3].participant_count += 1;
        variants[4].total_iterations += 1;
        variants[5].aggregate_score += 1;
        variants[6].previous_hash[0] ^= 1;
        for v in variants {
            assert_ne!(v.hash(), base.hash());
        }
    }

    #[test]
    fn test_build_aggregates() {
        let mut book = WindowBook::new(W0);
        assert!(book.insert(entry(1, W0, Some(1))));
        assert!(book.insert(entry(2, W0, Some(2))));
        // Перенесённый heartbeat того же участника из прошлого окна
        assert!(book.insert(entry(1, W0 - INTERVAL, Some(1))));
        assert!(!book.insert(entry(1, W0, Some(1))));
        book.add_block([9u8; 32]);

        let built = CheckpointBuilder::new(INTERVAL).build(&book, [5u8; 32]);
        let cp = &built.checkpoint;
        assert_eq!(cp.boundary_timestamp, W0 + INTERVAL);
        assert_eq!(cp.participant_count, 2);
        assert_eq!(cp.total_iterations, 3_000);
        assert_eq!(cp.aggregate_score, 3 * SCORE_PRECISION);
        assert_eq!(cp.previous_hash, [5u8; 32]);
        assert_eq!(cp.blocks_merkle_root, [9u8; 32]);
        assert_eq!(built.contents.region_count, 2);
    }

    #[test]
    fn test_build_is_idempotent_and_order_free() {
        let mut a = WindowBook::new(W0);
        let mut b = WindowBook::new(W0);
        for p in 0..5u8 {
            a.insert(entry(p, W0, None));
            b.insert(entry(4 - p, W0, None));
        }
        let builder = CheckpointBuilder::new(INTERVAL);
        let first = builder.build(&a, EMPTY_HASH);
        let again = builder.build(&a, EMPTY_HASH);
        assert_eq!(first.checkpoint.to_bytes(), again.checkpoint.to_bytes());
        assert_eq!(first, builder.build(&b, EMPTY_HASH));
    }

    #[test]
    fn test_empty_window() {
        let built = CheckpointBuilder::new(INTERVAL).build(&WindowBook::new(W0), EMPTY_HASH);
        assert_eq!(built.checkpoint.participant_count, 0);
        assert_eq!(built.checkpoint.proofs_merkle_root, EMPTY_HASH);
        assert_eq!(built.checkpoint.aggregate_score, 0);
    }

    #[test]
    fn test_window_states() {
        let mut book = WindowBook::new(W0);
        assert_eq!(book.observe_time(W0 + 59_999, INTERVAL), WindowState::Open);
        assert_eq!(book.observe_time(W0 + INTERVAL, INTERVAL), WindowState::Closing);
        assert!(book.insert(entry(1, W0, None)));

        book.mark_closed();
        assert_eq!(book.observe_time(W0, INTERVAL), WindowState::Closed);
        assert!(!book.insert(entry(2, W0, None)));
        assert!(!book.add_block([1u8; 32]));
    }

    #[test]
    fn test_inclusion_proofs() {
        let mut book = WindowBook::new(W0);
        for p in 0..3u8 {
            book.insert(entry(p, W0, None));
        }
        let built = CheckpointBuilder::new(INTERVAL).build(&book, EMPTY_HASH);
        let leaf = entry(1, W0, None).proof_hash;
        let proof = built.contents.inclusion_proof(&leaf, ProofType::DelayProof).unwrap();
        assert!(proof.verify(leaf, built.checkpoint.proofs_merkle_root));
        assert!(built.contents.inclusion_proof(&leaf, ProofType::Block).is_none());
    }
}
