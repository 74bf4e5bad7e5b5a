//! Хранилище checkpoint
//!
//! Ядро видит storage только через `CheckpointStore`. Канонический
//! checkpoint хранится по boundary (big-endian ключ, поэтому итерация sled
//! идёт по возрастанию boundary); при смене канонического запись
//! перезаписывается, а проигравший уходит в `superseded`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use sled::{Db, Tree};
use thiserror::Error;

use crate::checkpoint::FinalityCheckpoint;
use crate::types::Hash;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] bincode::Error),
    #[error("corrupted record under key {0}")]
    Corrupted(String),
    #[error("not found")]
    NotFound,
}

/// Storage collaborator
pub trait CheckpointStore: Send + Sync {
    /// Записать канонический checkpoint его boundary
    fn persist_checkpoint(&self, checkpoint: &FinalityCheckpoint) -> Result<(), DbError>;

    /// Каноническая цепь по возрастанию boundary
    fn load_checkpoint_chain(&self) -> Result<Vec<FinalityCheckpoint>, DbError>;

    /// Сохранить проигравшего кандидата
    fn persist_superseded(&self, _checkpoint: &FinalityCheckpoint) -> Result<(), DbError> {
        Ok(())
    }
}

pub struct Storage {
    db: Db,
    checkpoints: Tree,
    superseded: Tree,
}

impl Storage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let db = sled::open(path)?;
        let checkpoints = db.open_tree("checkpoints")?;
        let superseded = db.open_tree("superseded")?;
        Ok(Self { db, checkpoints, superseded })
    }

    pub fn get_checkpoint(&self, boundary: u64) -> Result<FinalityCheckpoint, DbError> {
        let value = self
            .checkpoints
            .get(boundary.to_be_bytes())?
            .ok_or(DbError::NotFound)?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Boundary последнего записанного checkpoint
    pub fn head(&self) -> Result<u64, DbError> {
        let value = self.db.get("head")?.ok_or(DbError::NotFound)?;
        let bytes: [u8; 8] = value
            .as_ref()
            .try_into()
            .map_err(|_| DbError::Corrupted("head".into()))?;
        Ok(u64::from_be_bytes(bytes))
    }

    pub fn get_superseded(&self, hash: &Hash) -> Result<FinalityCheckpoint, DbError> {
        let value = self.superseded.get(hash)?.ok_or(DbError::NotFound)?;
        Ok(bincode::deserialize(&value)?)
    }

    pub fn superseded_count(&self) -> usize {
        self.superseded.len()
    }
}

impl CheckpointStore for Storage {
    fn persist_checkpoint(&self, checkpoint: &FinalityCheckpoint) -> Result<(), DbError> {
        let boundary = checkpoint.boundary_timestamp;
        let value = bincode::serialize(checkpoint)?;
        self.checkpoints.insert(boundary.to_be_bytes(), value)?;

        let head = self.head().unwrap_or(0);
        if boundary >= head {
            self.db.insert("head", &boundary.to_be_bytes())?;
        }
        self.db.flush()?;
        Ok(())
    }

    fn load_checkpoint_chain(&self) -> Result<Vec<FinalityCheckpoint>, DbError> {
        let mut chain = Vec::new();
        for item in self.checkpoints.iter() {
            let (_, value) = item?;
            chain.push(bincode::deserialize(&value)?);
        }
        Ok(chain)
    }

    fn persist_superseded(&self, checkpoint: &FinalityCheckpoint) -> Result<(), DbError> {
        let value = bincode::serialize(checkpoint)?;
        self.superseded.insert(checkpoint.hash(), value)?;
        self.db.flush()?;
        Ok(())
    }
}

/// In-memory store для тестов и симуляции без диска
#[derive(Debug, Default)]
pub struct MemoryStore {
    checkpoints: Mutex<BTreeMap<u64, FinalityCheckpoint>>,
    superseded: Mutex<Vec<FinalityCheckpoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn superseded(&self) -> Vec<FinalityCheckpoint> {
        self.superseded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl CheckpointStore for MemoryStore {
    fn persist_checkpoint(&self, checkpoint: &FinalityCheckpoint) -> Result<(), DbError> {
        self.checkpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(checkpoint.boundary_timestamp, checkpoint.clone());
        Ok(())
    }

    fn load_checkpoint_chain(&self) -> Result<Vec<FinalityCheckpoint>, DbError> {
        Ok(self
            .checkpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect())
    }

    fn persist_superseded(&self, checkpoint: &FinalityCheckpoint) -> Result<(), DbError> {
        self.superseded
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(checkpoint.clone());
        Ok(())
    }
}
