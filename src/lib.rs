pub mod chain;
pub mod checkpoint;
pub mod clock;
pub mod confidence;
pub mod config;
pub mod crypto;
pub mod db;
pub mod engine;
pub mod finality;
pub mod fork_choice;
pub mod heartbeat;
pub mod merge;
pub mod merkle;
pub mod participant;
pub mod score;
pub mod types;
pub mod vdf;

pub use types::*;

// Delay proofs & heartbeats
pub use crypto::{DilithiumVerifier, Keypair, Signer, Verifier, sha3};
pub use heartbeat::{
    FailureClass, Heartbeat, HeartbeatValidator, ParticipantState, RejectReason, ValidationResult,
};
pub use vdf::{DelayProof, DelayProofEngine, VdfError};
pub use score::ScoreTracker;

// Checkpoints
pub use checkpoint::{CheckpointBuilder, FinalityCheckpoint, WindowState};
pub use chain::{CheckpointChain, CheckpointStatus};
pub use fork_choice::{ChainComparison, Resolution, ResolutionLevel};
pub use merge::{MergeOutcome, merge};
pub use merkle::{MerkleProof, MerkleTree, ProofType};

// Advisory labels
pub use confidence::{ConfidenceAssessor, ConfidenceTier, RegionMap, StaticRegionMap, byzantine_tolerance};
pub use finality::FinalityTier;

// Collaborators & engine
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, FinalityConfig};
pub use db::{CheckpointStore, DbError, MemoryStore, Storage};
pub use engine::{EngineError, FinalityEngine};
pub use participant::Participant;
