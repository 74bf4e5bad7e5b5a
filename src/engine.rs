//! Montana Finality Engine
//!
//! Связывает слои:
//! - heartbeat.rs: проверка heartbeat
//! - score.rs: вклад участника
//! - checkpoint.rs: окна и сборка checkpoint
//! - chain.rs / fork_choice.rs: канонический checkpoint boundary
//! - merge.rs: слияние после partition
//! - confidence.rs / finality.rs: advisory метки
//! - db.rs: storage collaborator
//!
//! Время берётся только из `Clock`, поэтому движок целиком детерминирован
//! под `ManualClock`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc, watch};
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::chain::{CheckpointChain, CheckpointStatus, Origin};
use crate::checkpoint::{CheckpointBuilder, FinalityCheckpoint, WindowBook, WindowContents, WindowEntry, WindowState};
use crate::clock::Clock;
use crate::confidence::{ConfidenceAssessor, ConfidenceTier, NoRegions, RegionMap};
use crate::config::{ConfigError, FinalityConfig};
use crate::crypto::Verifier;
use crate::db::{CheckpointStore, DbError};
use crate::finality::FinalityTier;
use crate::heartbeat::{Heartbeat, HeartbeatValidator, ParticipantState, RejectReason, ValidationResult};
use crate::merge::{MergeOutcome, merge};
use crate::merkle::{MerkleProof, ProofType};
use crate::score::ScoreTracker;
use crate::types::{
    EMPTY_HASH, Hash, ParticipantId, boundary_to_string, is_aligned, short_hex, window_boundary,
    window_start,
};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("boundary {boundary} is not closed yet")]
    NotYetClosed { boundary: u64 },
    #[error("timestamp {timestamp} is not aligned to the window interval")]
    Unaligned { timestamp: u64 },
    #[error("window {window} is still open")]
    WindowStillOpen { window: u64 },
    #[error("boundary {boundary} is in the future (now {now})")]
    FutureBoundary { boundary: u64, now: u64 },
    #[error("storage error: {0}")]
    Db(#[from] DbError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Default)]
struct EngineState {
    participants: HashMap<ParticipantId, ParticipantState>,
    /// Ещё не закрытые окна
    windows: BTreeMap<u64, WindowBook>,
    /// Первое не закрытое окно; всё раньше: Closed
    next_to_close: u64,
    chain: CheckpointChain,
    /// Листья локально собранных checkpoint (по хешу)
    contents: HashMap<Hash, WindowContents>,
    /// boundary → хеш checkpoint, собранного этим узлом
    local_built: BTreeMap<u64, Hash>,
}

impl EngineState {
    /// Вернуть блоки проигравшего локального checkpoint в первое открытое окно
    fn requeue_blocks(&mut self, checkpoint_hash: &Hash) {
        let Some(contents) = self.contents.get(checkpoint_hash) else {
            return;
        };
        if contents.blocks.is_empty() {
            return;
        }
        let target = self.next_to_close;
        let book = self.windows.entry(target).or_insert_with(|| WindowBook::new(target));
        let mut requeued = 0usize;
        for block in &contents.blocks {
            if book.add_block(*block) {
                requeued += 1;
            }
        }
        debug!("Re-queued {} blocks into window {}", requeued, target);
    }
}

pub struct FinalityEngine {
    config: FinalityConfig,
    clock: Arc<dyn Clock>,
    validator: Arc<HeartbeatValidator>,
    scores: ScoreTracker,
    builder: CheckpointBuilder,
    assessor: ConfidenceAssessor,
    store: Arc<dyn CheckpointStore>,
    regions: Arc<dyn RegionMap>,
    events: broadcast::Sender<FinalityCheckpoint>,
    state: RwLock<EngineState>,
}

impl FinalityEngine {
    pub fn new(
        config: FinalityConfig,
        clock: Arc<dyn Clock>,
        verifier: Arc<dyn Verifier>,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let now = clock.wall_clock_utc();
        let state = EngineState {
            next_to_close: window_start(now, config.interval_ms),
            ..Default::default()
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            validator: Arc::new(HeartbeatValidator::new(&config, verifier)),
            scores: ScoreTracker::new(&config),
            builder: CheckpointBuilder::new(config.interval_ms),
            assessor: ConfidenceAssessor::new(&config),
            regions: Arc::new(NoRegions),
            clock,
            store,
            events,
            state: RwLock::new(state),
            config,
        })
    }

    /// Поднять цепь из storage и продолжить с первого окна после tip
    pub fn restore(
        config: FinalityConfig,
        clock: Arc<dyn Clock>,
        verifier: Arc<dyn Verifier>,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<Self, EngineError> {
        let stored = store.load_checkpoint_chain()?;
        let mut engine = Self::new(config, clock, verifier, store)?;
        let interval = engine.config.interval_ms;

        let now = engine.clock.wall_clock_utc();
        let horizon = now.saturating_add(engine.config.tolerance_ms);
        let state = engine.state.get_mut();
        let mut restored = 0usize;
        for checkpoint in stored {
            if !is_aligned(checkpoint.boundary_timestamp, interval) {
                warn!("Skipping stored checkpoint at unaligned {}", checkpoint.boundary_timestamp);
                continue;
            }
            if checkpoint.boundary_timestamp > horizon {
                warn!(
                    "Skipping stored checkpoint at future boundary {}",
                    boundary_to_string(checkpoint.boundary_timestamp)
                );
                continue;
            }
            state.chain.insert(checkpoint, Origin::Local);
            restored += 1;
        }
        if let Some(tip) = state.chain.tip() {
            state.next_to_close = state.next_to_close.max(tip.boundary_timestamp);
            info!(
                "Restored {} checkpoints, tip at {}",
                restored,
                boundary_to_string(tip.boundary_timestamp)
            );
        }
        Ok(engine)
    }

    pub fn with_regions(mut self, regions: Arc<dyn RegionMap>) -> Self {
        self.regions = regions;
        self
    }

    pub fn config(&self) -> &FinalityConfig {
        &self.config
    }

    /// Поток выпущенных локально checkpoint
    pub fn subscribe(&self) -> broadcast::Receiver<FinalityCheckpoint> {
        self.events.subscribe()
    }

    // =========================================================================
    // HEARTBEATS
    // =========================================================================

    pub async fn submit_heartbeat(&self, heartbeat: Heartbeat) -> ValidationResult {
        // Подпись и delay proof не зависят от состояния: проверяем вне lock
        let validator = Arc::clone(&self.validator);
        let checked = tokio::task::spawn_blocking(move || {
            let result = validator.check_cryptography(&heartbeat);
            (heartbeat, result)
        })
        .await;

        let heartbeat = match checked {
            Ok((hb, Ok(()))) => hb,
            Ok((hb, Err(reason))) => return rejected(&hb, reason),
            Err(e) => {
                warn!("Heartbeat verification task failed: {}", e);
                return ValidationResult::Rejected(RejectReason::InvalidTemporalProof);
            }
        };

        let now = self.clock.wall_clock_utc();
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let mut participant = state
            .participants
            .get(&heartbeat.participant_id)
            .cloned()
            .unwrap_or_else(|| ParticipantState::new(heartbeat.participant_id.clone()));

        if let Err(reason) = self.validator.check_temporal(&heartbeat, &participant, now) {
            return rejected(&heartbeat, reason);
        }

        let acceptance = self.validator.apply(&heartbeat, &mut participant);
        let contribution = self.scores.record(&mut participant, &acceptance);

        // Окно уже Closed → первое не закрытое
        let target = acceptance.window.max(state.next_to_close);
        let deferred = target != acceptance.window;
        let entry = WindowEntry {
            participant_id: heartbeat.participant_id.clone(),
            source_window: acceptance.window,
            proof_hash: heartbeat.delay_proof.hash(),
            iterations: heartbeat.delay_proof.iterations,
            contribution,
            region: self.regions.region_of(&heartbeat.participant_id),
        };
        let booked = state
            .windows
            .entry(target)
            .or_insert_with(|| WindowBook::new(target))
            .insert(entry);
        // Состояние участника меняется только вместе с записью в окне
        if !booked {
            warn!(
                "Window {} refused entry from {} for window {}",
                target,
                short_hex(&heartbeat.participant_id),
                acceptance.window
            );
            return ValidationResult::Rejected(RejectReason::ReplayOrOutOfOrder);
        }
        state.participants.insert(heartbeat.participant_id.clone(), participant);

        if deferred {
            info!(
                "Heartbeat from {} for closed window {} deferred to {}",
                short_hex(&heartbeat.participant_id),
                acceptance.window,
                target
            );
        } else {
            debug!(
                "Heartbeat from {} accepted for window {}",
                short_hex(&heartbeat.participant_id),
                target
            );
        }

        ValidationResult::Accepted { window: target, deferred, contribution }
    }

    /// Блок, замеченный в текущем окне
    pub async fn note_block(&self, block: Hash) -> bool {
        let now = self.clock.wall_clock_utc();
        let mut state = self.state.write().await;
        let target = window_start(now, self.config.interval_ms).max(state.next_to_close);
        state
            .windows
            .entry(target)
            .or_insert_with(|| WindowBook::new(target))
            .add_block(block)
    }

    // =========================================================================
    // WINDOW LIFECYCLE
    // =========================================================================

    pub async fn window_state(&self, window: u64) -> WindowState {
        let now = self.clock.wall_clock_utc();
        let state = self.state.read().await;
        if window < state.next_to_close {
            WindowState::Closed
        } else if now >= window_boundary(window, self.config.interval_ms) {
            WindowState::Closing
        } else {
            WindowState::Open
        }
    }

    /// Продвинуть окна по часам; закрыть всё, чей grace period истёк
    pub async fn tick(&self) -> Vec<FinalityCheckpoint> {
        let now = self.clock.wall_clock_utc();
        let interval = self.config.interval_ms;
        let mut state = self.state.write().await;

        for book in state.windows.values_mut() {
            book.observe_time(now, interval);
        }

        let mut closed = Vec::new();
        loop {
            let window = state.next_to_close;
            let boundary = window_boundary(window, interval);
            if now < boundary.saturating_add(self.config.tolerance_ms) {
                break;
            }
            closed.push(self.close_locked(&mut state, window));
        }
        closed
    }

    /// Закрыть окно (и все более ранние). Повторный вызов возвращает тот же
    /// checkpoint побайтно.
    pub async fn close_window(&self, window: u64) -> Result<FinalityCheckpoint, EngineError> {
        let interval = self.config.interval_ms;
        if !is_aligned(window, interval) {
            return Err(EngineError::Unaligned { timestamp: window });
        }
        let boundary = window_boundary(window, interval);
        let now = self.clock.wall_clock_utc();
        let mut state = self.state.write().await;

        if window < state.next_to_close {
            let local = state
                .local_built
                .get(&boundary)
                .and_then(|h| state.chain.index_of(h))
                .and_then(|i| state.chain.get(i))
                .map(|e| e.checkpoint.clone());
            return local
                .or_else(|| state.chain.canonical(boundary).cloned())
                .ok_or(EngineError::NotYetClosed { boundary });
        }
        if now < boundary {
            return Err(EngineError::WindowStillOpen { window });
        }

        let mut last = None;
        while state.next_to_close <= window {
            let next = state.next_to_close;
            last = Some(self.close_locked(&mut state, next));
        }
        last.ok_or(EngineError::NotYetClosed { boundary })
    }

    fn close_locked(&self, state: &mut EngineState, window: u64) -> FinalityCheckpoint {
        let interval = self.config.interval_ms;
        let boundary = window_boundary(window, interval);
        let mut book = state.windows.remove(&window).unwrap_or_else(|| WindowBook::new(window));

        let previous_hash = state
            .chain
            .canonical_before(boundary)
            .map(FinalityCheckpoint::hash)
            .unwrap_or(EMPTY_HASH);
        let built = self.builder.build(&book, previous_hash);
        book.mark_closed();
        state.next_to_close = boundary;

        let checkpoint = built.checkpoint;
        let hash = checkpoint.hash();
        let confidence = self
            .assessor
            .assess(checkpoint.participant_count as u64, built.contents.region_count as u64);
        state.contents.insert(hash, built.contents);
        state.local_built.insert(boundary, hash);

        info!(
            "Checkpoint {} | participants {} | iterations {} | {} | confidence {}",
            boundary_to_string(boundary),
            checkpoint.participant_count,
            checkpoint.total_iterations,
            short_hex(&hash),
            confidence
        );

        self.adopt(state, checkpoint.clone(), Origin::Local);
        // Нет подписчиков: не ошибка
        let _ = self.events.send(checkpoint.clone());
        checkpoint
    }

    // =========================================================================
    // FORK CHOICE & MERGE
    // =========================================================================

    /// Добавить кандидата в цепь и разрешить его boundary.
    /// true если кандидат стал каноническим.
    fn adopt(&self, state: &mut EngineState, checkpoint: FinalityCheckpoint, origin: Origin) -> bool {
        let boundary = checkpoint.boundary_timestamp;
        let (index, fresh) = state.chain.push_candidate(checkpoint, origin);
        if !fresh {
            return state
                .chain
                .get(index)
                .is_some_and(|e| e.status == CheckpointStatus::Canonical);
        }
        let Some(resolution) = state.chain.resolve_boundary(boundary) else {
            return false;
        };

        if let Some(old) = resolution.replaced {
            if let Some(loser) = state.chain.get(old).cloned() {
                warn!(
                    "Canonical checkpoint at {} replaced: {} -> {}",
                    boundary_to_string(boundary),
                    short_hex(&loser.hash),
                    state
                        .chain
                        .get(resolution.canonical)
                        .map(|e| short_hex(&e.hash))
                        .unwrap_or_default()
                );
                self.persist_superseded(&loser.checkpoint);
                if loser.origin == Origin::Local {
                    state.requeue_blocks(&loser.hash);
                }
            }
        }

        let won = resolution.canonical == index;
        if let Some(entry) = state.chain.get(index).cloned() {
            if won {
                if let Err(e) = self.store.persist_checkpoint(&entry.checkpoint) {
                    warn!("Failed to persist checkpoint at {}: {}", boundary_to_string(boundary), e);
                }
            } else {
                debug!("Candidate {} at {} lost fork choice", short_hex(&entry.hash), boundary);
                self.persist_superseded(&entry.checkpoint);
                if entry.origin == Origin::Local {
                    state.requeue_blocks(&entry.hash);
                }
            }
        }
        won
    }

    fn persist_superseded(&self, checkpoint: &FinalityCheckpoint) {
        if let Err(e) = self.store.persist_superseded(checkpoint) {
            warn!(
                "Failed to persist superseded checkpoint at {}: {}",
                boundary_to_string(checkpoint.boundary_timestamp),
                e
            );
        }
    }

    /// Boundary ещё не наступил даже с учётом допуска часов
    fn is_future(&self, boundary: u64, now: u64) -> bool {
        boundary > now.saturating_add(self.config.tolerance_ms)
    }

    /// Конкурирующий checkpoint от другого узла. true если он стал каноническим.
    pub async fn submit_remote_checkpoint(&self, checkpoint: FinalityCheckpoint) -> Result<bool, EngineError> {
        let boundary = checkpoint.boundary_timestamp;
        if !is_aligned(boundary, self.config.interval_ms) {
            return Err(EngineError::Unaligned { timestamp: boundary });
        }
        let now = self.clock.wall_clock_utc();
        if self.is_future(boundary, now) {
            return Err(EngineError::FutureBoundary { boundary, now });
        }
        let mut state = self.state.write().await;
        Ok(self.adopt(&mut state, checkpoint, Origin::Remote))
    }

    /// Слить удалённую историю после partition
    pub async fn merge_remote_chain(&self, remote: Vec<FinalityCheckpoint>) -> MergeOutcome {
        let interval = self.config.interval_ms;
        let now = self.clock.wall_clock_utc();
        let (remote, unaligned): (Vec<_>, Vec<_>) = remote
            .into_iter()
            .partition(|cp| is_aligned(cp.boundary_timestamp, interval));
        if !unaligned.is_empty() {
            warn!("Dropped {} remote checkpoints with unaligned boundaries", unaligned.len());
        }
        let (remote, future): (Vec<_>, Vec<_>) = remote
            .into_iter()
            .partition(|cp| !self.is_future(cp.boundary_timestamp, now));
        if !future.is_empty() {
            warn!("Dropped {} remote checkpoints with future boundaries", future.len());
        }

        let mut state = self.state.write().await;
        let local = state.chain.canonical_sequence();
        let outcome = merge(&local, &remote);

        for checkpoint in remote {
            self.adopt(&mut state, checkpoint, Origin::Remote);
        }

        info!(
            "Merged remote chain: fork point {}, {} canonical, {} retained, {} resolutions",
            outcome
                .fork_point
                .map(|a| short_hex(&a.hash))
                .unwrap_or_else(|| "none".into()),
            outcome.canonical.len(),
            outcome.retained.len(),
            outcome.resolutions.len()
        );
        outcome
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub async fn get_canonical_checkpoint(&self, boundary: u64) -> Result<FinalityCheckpoint, EngineError> {
        self.state
            .read()
            .await
            .chain
            .canonical(boundary)
            .cloned()
            .ok_or(EngineError::NotYetClosed { boundary })
    }

    /// Soft / Medium / Hard по числу канонических наследников boundary
    pub async fn get_finality_tier(&self, boundary: u64) -> Result<FinalityTier, EngineError> {
        let state = self.state.read().await;
        if state.chain.canonical(boundary).is_none() {
            return Err(EngineError::NotYetClosed { boundary });
        }
        Ok(FinalityTier::from_successors(state.chain.canonical_after(boundary)))
    }

    /// Регионы известны только для локально собранных checkpoint;
    /// для остальных region_count = 0
    pub async fn get_confidence(&self, checkpoint: &FinalityCheckpoint) -> ConfidenceTier {
        let regions = self
            .state
            .read()
            .await
            .contents
            .get(&checkpoint.hash())
            .map_or(0, |c| c.region_count);
        self.assessor
            .assess(checkpoint.participant_count as u64, regions as u64)
    }

    /// Merkle proof листа против канонического checkpoint boundary
    pub async fn inclusion_proof(&self, boundary: u64, leaf: &Hash, proof_type: ProofType) -> Option<MerkleProof> {
        let state = self.state.read().await;
        let hash = state.chain.canonical_entry(boundary)?.hash;
        state.contents.get(&hash)?.inclusion_proof(leaf, proof_type)
    }

    pub async fn canonical_chain(&self) -> Vec<FinalityCheckpoint> {
        self.state.read().await.chain.canonical_sequence()
    }

    pub async fn participant_state(&self, participant_id: &[u8]) -> Option<ParticipantState> {
        self.state.read().await.participants.get(participant_id).cloned()
    }

    pub async fn effective_score(&self, participant_id: &[u8]) -> Option<f64> {
        let now = self.clock.wall_clock_utc();
        let state = self.state.read().await;
        let participant = state.participants.get(participant_id)?;
        Some(self.scores.effective_score(participant, now))
    }

    /// Участники по убыванию effective score
    pub async fn ranking(&self) -> Vec<(ParticipantId, f64)> {
        let now = self.clock.wall_clock_utc();
        let state = self.state.read().await;
        self.scores.rank(state.participants.values(), now)
    }

    // =========================================================================
    // MAIN LOOP
    // =========================================================================

    /// Принимать heartbeat из transport и закрывать окна по часам
    pub async fn run(self: Arc<Self>, mut inbox: mpsc::Receiver<Heartbeat>, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_millis((self.config.tolerance_ms / 5).max(100));
        let mut ticker = tokio::time::interval(period);
        info!("Finality engine running, window {}ms, tolerance ±{}ms", self.config.interval_ms, self.config.tolerance_ms);

        loop {
            tokio::select! {
                Some(heartbeat) = inbox.recv() => {
                    self.submit_heartbeat(heartbeat).await;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    info!("Finality engine stopping");
                    break;
                }
            }
        }
    }
}

fn rejected(heartbeat: &Heartbeat, reason: RejectReason) -> ValidationResult {
    debug!(
        "Heartbeat from {} for window {} rejected: {} ({:?})",
        short_hex(&heartbeat.participant_id),
        heartbeat.window_reference,
        reason,
        reason.class()
    );
    ValidationResult::Rejected(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::tests::checkpoint;
    use crate::clock::ManualClock;
    use crate::confidence::StaticRegionMap;
    use crate::db::MemoryStore;
    use crate::heartbeat::tests::{MockCrypto, MockVerifier, W0, config};
    use crate::vdf::DelayProofEngine;

    const I: u64 = 60_000;

    struct Harness {
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        engine: FinalityEngine,
        proofs: DelayProofEngine,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(W0 + 1_000));
        let store = Arc::new(MemoryStore::new());
        let engine = FinalityEngine::new(config(), clock.clone(), Arc::new(MockVerifier), store.clone()).unwrap();
        Harness { clock, store, engine, proofs: DelayProofEngine::from_config(&config()) }
    }

    impl Harness {
        fn heartbeat(&self, p: &MockCrypto, window: u64, seq: u64) -> Heartbeat {
            Heartbeat::create(p, &self.proofs, window, seq, 16).unwrap()
        }
    }

    #[tokio::test]
    async fn test_heartbeat_to_checkpoint() {
        let h = harness();
        for seed in 1..=3u8 {
            let p = MockCrypto::new(seed);
            let r = h.engine.submit_heartbeat(h.heartbeat(&p, W0, 1)).await;
            assert!(r.is_accepted(), "{:?}", r);
        }
        assert_eq!(h.engine.window_state(W0).await, WindowState::Open);
        assert!(matches!(
            h.engine.get_canonical_checkpoint(W0 + I).await,
            Err(EngineError::NotYetClosed { .. })
        ));

        h.clock.set(W0 + I + 1_000);
        assert_eq!(h.engine.window_state(W0).await, WindowState::Closing);
        assert!(h.engine.tick().await.is_empty());

        h.clock.set(W0 + I + 5_000);
        let closed = h.engine.tick().await;
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].participant_count, 3);
        assert_eq!(closed[0].total_iterations, 48);
        assert_eq!(h.engine.window_state(W0).await, WindowState::Closed);
        assert_eq!(h.engine.get_canonical_checkpoint(W0 + I).await.unwrap(), closed[0]);
        assert_eq!(h.store.load_checkpoint_chain().unwrap(), closed);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let h = harness();
        h.engine.submit_heartbeat(h.heartbeat(&MockCrypto::new(1), W0, 1)).await;
        assert!(matches!(
            h.engine.close_window(W0).await,
            Err(EngineError::WindowStillOpen { .. })
        ));

        h.clock.set(W0 + I);
        let first = h.engine.close_window(W0).await.unwrap();
        let again = h.engine.close_window(W0).await.unwrap();
        assert_eq!(first.to_bytes(), again.to_bytes());
        assert!(matches!(
            h.engine.close_window(W0 + 1).await,
            Err(EngineError::Unaligned { .. })
        ));
    }

    #[tokio::test]
    async fn test_late_heartbeat_deferred() {
        let h = harness();
        let p = MockCrypto::new(1);
        let q = MockCrypto::new(2);
        h.engine.submit_heartbeat(h.heartbeat(&p, W0, 1)).await;

        h.clock.set(W0 + I);
        h.engine.close_window(W0).await.unwrap();

        // 4 секунды после boundary: в допуске, но окно уже Closed
        h.clock.set(W0 + I + 4_000);
        let r = h.engine.submit_heartbeat(h.heartbeat(&q, W0, 1)).await;
        match r {
            ValidationResult::Accepted { window, deferred, .. } => {
                assert_eq!(window, W0 + I);
                assert!(deferred);
            }
            other => panic!("expected acceptance, got {:?}", other),
        }

        // Тот же участник в своём следующем окне: отдельная запись
        let r = h.engine.submit_heartbeat(h.heartbeat(&q, W0 + I, 2)).await;
        assert!(r.is_accepted());

        h.clock.set(W0 + 2 * I + 5_000);
        let closed = h.engine.tick().await;
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].participant_count, 1);
        assert_eq!(closed[0].total_iterations, 32);
    }

    #[tokio::test]
    async fn test_rejection_leaves_state() {
        let h = harness();
        let p = MockCrypto::new(1);
        let mut hb = h.heartbeat(&p, W0, 1);
        hb.signature[0] ^= 1;
        assert_eq!(
            h.engine.submit_heartbeat(hb).await,
            ValidationResult::Rejected(RejectReason::BadSignature)
        );
        assert!(h.engine.participant_state(&p.key).await.is_none());

        h.clock.set(W0 + I + 6_000);
        assert_eq!(
            h.engine.submit_heartbeat(h.heartbeat(&p, W0, 1)).await,
            ValidationResult::Rejected(RejectReason::StaleOrFutureWindow)
        );
        assert!(h.engine.participant_state(&p.key).await.is_none());
    }

    #[tokio::test]
    async fn test_empty_windows_and_finality_tiers() {
        let h = harness();
        h.clock.set(W0 + 3 * I + 5_000);
        let closed = h.engine.tick().await;
        assert_eq!(closed.len(), 3);
        assert_eq!(closed[1].previous_hash, closed[0].hash());
        assert_eq!(closed[2].previous_hash, closed[1].hash());

        assert_eq!(h.engine.get_finality_tier(W0 + I).await.unwrap(), FinalityTier::Hard);
        assert_eq!(h.engine.get_finality_tier(W0 + 2 * I).await.unwrap(), FinalityTier::Medium);
        assert_eq!(h.engine.get_finality_tier(W0 + 3 * I).await.unwrap(), FinalityTier::Soft);
        assert!(h.engine.get_finality_tier(W0 + 4 * I).await.is_err());
        assert_eq!(h.engine.get_confidence(&closed[0]).await, ConfidenceTier::Low);
    }

    #[tokio::test]
    async fn test_remote_checkpoint_replaces_and_requeues_blocks() {
        let h = harness();
        h.engine.submit_heartbeat(h.heartbeat(&MockCrypto::new(1), W0, 1)).await;
        assert!(h.engine.note_block([9u8; 32]).await);

        h.clock.set(W0 + I);
        let local = h.engine.close_window(W0).await.unwrap();
        assert!(h.engine.inclusion_proof(W0 + I, &[9u8; 32], ProofType::Block).await.is_some());

        let remote = checkpoint(W0 + I, 50, 1, 1, 3);
        assert!(h.engine.submit_remote_checkpoint(remote.clone()).await.unwrap());
        assert_eq!(h.engine.get_canonical_checkpoint(W0 + I).await.unwrap(), remote);
        assert_eq!(h.store.superseded(), vec![local.clone()]);
        // Идемпотентно: повторное закрытие всё ещё отдаёт локальный
        assert_eq!(h.engine.close_window(W0).await.unwrap(), local);

        // Блок проигравшего уходит в следующее окно
        h.clock.set(W0 + 2 * I);
        let next = h.engine.close_window(W0 + I).await.unwrap();
        assert_eq!(next.blocks_merkle_root, [9u8; 32]);
        assert_eq!(next.previous_hash, remote.hash());

        // Худший удалённый кандидат не меняет канонический
        let weak = checkpoint(W0 + I, 0, 0, 0, 4);
        assert!(!h.engine.submit_remote_checkpoint(weak).await.unwrap());
        assert_eq!(h.engine.get_canonical_checkpoint(W0 + I).await.unwrap(), remote);
    }

    #[tokio::test]
    async fn test_confidence_from_regions() {
        let clock = Arc::new(ManualClock::new(W0 + 1_000));
        let regions: StaticRegionMap = (1..=7u8).map(|s| (vec![s; 32], (s % 2) as u16)).collect();
        let engine = FinalityEngine::new(config(), clock.clone(), Arc::new(MockVerifier), Arc::new(MemoryStore::new()))
            .unwrap()
            .with_regions(Arc::new(regions));
        let proofs = DelayProofEngine::from_config(&config());

        for seed in 1..=7u8 {
            let hb = Heartbeat::create(&MockCrypto::new(seed), &proofs, W0, 1, 16).unwrap();
            assert!(engine.submit_heartbeat(hb).await.is_accepted());
        }
        clock.set(W0 + I);
        let cp = engine.close_window(W0).await.unwrap();
        assert_eq!(engine.get_confidence(&cp).await, ConfidenceTier::High);
    }
}
