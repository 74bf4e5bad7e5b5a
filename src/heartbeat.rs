//! Heartbeat Validator
//!
//! Heartbeat: доказательство присутствия участника в окне:
//! delay proof над seed(participant, window), подписанный участником.
//!
//! Порядок проверок фиксирован:
//! 1. подпись            → BadSignature
//! 2. delay proof        → InvalidTemporalProof
//! 3. sequence / window  → ReplayOrOutOfOrder
//! 4. окно ±tolerance    → StaleOrFutureWindow
//!
//! Отказ не меняет ParticipantState.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use crate::config::FinalityConfig;
use crate::crypto::{Signer, Verifier};
use crate::types::{
    HEARTBEAT_SEED_PREFIX, HEARTBEAT_SIGN_PREFIX, Hash, ParticipantId, Signature, is_aligned,
};
use crate::vdf::{DelayProof, DelayProofEngine, VdfError};

/// Seed delay proof: sha3(prefix ‖ participant ‖ window)
pub fn heartbeat_seed(participant_id: &[u8], window_reference: u64) -> Hash {
    let mut hasher = Sha3_256::new();
    hasher.update(HEARTBEAT_SEED_PREFIX);
    hasher.update((participant_id.len() as u32).to_be_bytes());
    hasher.update(participant_id);
    hasher.update(window_reference.to_be_bytes());
    hasher.finalize().into()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub participant_id: ParticipantId,
    pub delay_proof: DelayProof,
    /// Начало окна (ms, кратно interval)
    pub window_reference: u64,
    pub sequence_number: u64,
    pub signature: Signature,
}

impl Heartbeat {
    /// Вычислить proof для окна и подписать
    pub fn create(
        signer: &dyn Signer,
        engine: &DelayProofEngine,
        window_reference: u64,
        sequence_number: u64,
        iterations: u64,
    ) -> Result<Self, VdfError> {
        let participant_id = signer.public_key();
        let seed = heartbeat_seed(&participant_id, window_reference);
        let delay_proof = engine.compute(&seed, iterations)?;
        Ok(Self::sign(signer, delay_proof, window_reference, sequence_number))
    }

    pub fn sign(
        signer: &dyn Signer,
        delay_proof: DelayProof,
        window_reference: u64,
        sequence_number: u64,
    ) -> Self {
        let mut hb = Self {
            participant_id: signer.public_key(),
            delay_proof,
            window_reference,
            sequence_number,
            signature: Vec::new(),
        };
        hb.signature = signer.sign(&hb.signing_bytes());
        hb
    }

    /// Подписываемое сообщение
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut msg = Vec::with_capacity(HEARTBEAT_SIGN_PREFIX.len() + self.participant_id.len() + 52);
        msg.extend_from_slice(HEARTBEAT_SIGN_PREFIX);
        msg.extend_from_slice(&(self.participant_id.len() as u32).to_be_bytes());
        msg.extend_from_slice(&self.participant_id);
        msg.extend_from_slice(&self.window_reference.to_be_bytes());
        msg.extend_from_slice(&self.sequence_number.to_be_bytes());
        msg.extend_from_slice(&self.delay_proof.hash());
        msg
    }

    pub fn seed(&self) -> Hash {
        heartbeat_seed(&self.participant_id, self.window_reference)
    }
}

/// Состояние участника; меняется только принятыми heartbeat
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantState {
    pub participant_id: ParticipantId,
    pub epoch_heartbeat_count: u64,
    pub last_sequence: Option<u64>,
    pub last_window: Option<u64>,
    /// Сумма вкладов всех принятых heartbeat (fixed-point)
    pub historical_score: u64,
}

impl ParticipantState {
    pub fn new(participant_id: ParticipantId) -> Self {
        Self { participant_id, ..Default::default() }
    }
}

/// Причина отказа
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    BadSignature,
    InvalidTemporalProof,
    ReplayOrOutOfOrder,
    StaleOrFutureWindow,
}

/// Класс отказа: криптографические не повторяются, временные
/// можно отправить снова в следующем окне
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Cryptographic,
    Temporal,
}

impl RejectReason {
    pub fn class(&self) -> FailureClass {
        match self {
            RejectReason::BadSignature | RejectReason::InvalidTemporalProof => FailureClass::Cryptographic,
            RejectReason::ReplayOrOutOfOrder | RejectReason::StaleOrFutureWindow => FailureClass::Temporal,
        }
    }

    pub fn is_resubmittable(&self) -> bool {
        self.class() == FailureClass::Temporal
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::BadSignature => write!(f, "bad signature"),
            RejectReason::InvalidTemporalProof => write!(f, "invalid temporal proof"),
            RejectReason::ReplayOrOutOfOrder => write!(f, "replayed or out-of-order heartbeat"),
            RejectReason::StaleOrFutureWindow => write!(f, "stale or future window"),
        }
    }
}

/// Результат submit_heartbeat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Accepted {
        /// Окно, в которое heartbeat фактически попал
        window: u64,
        /// true если исходное окно уже Closed и heartbeat перенесён
        deferred: bool,
        /// Вклад в aggregate_score (fixed-point)
        contribution: u64,
    },
    Rejected(RejectReason),
}

impl ValidationResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationResult::Accepted { .. })
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            ValidationResult::Rejected(r) => Some(*r),
            ValidationResult::Accepted { .. } => None,
        }
    }
}

/// Что изменилось в состоянии при приёме
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acceptance {
    pub window: u64,
    pub previous_window: Option<u64>,
}

pub struct HeartbeatValidator {
    engine: DelayProofEngine,
    verifier: Arc<dyn Verifier>,
    interval_ms: u64,
    tolerance_ms: u64,
    /// Расписание обязательных iterations и границы эпох
    schedule: FinalityConfig,
}

impl HeartbeatValidator {
    pub fn new(config: &FinalityConfig, verifier: Arc<dyn Verifier>) -> Self {
        Self {
            engine: DelayProofEngine::from_config(config),
            verifier,
            interval_ms: config.interval_ms,
            tolerance_ms: config.tolerance_ms,
            schedule: config.clone(),
        }
    }

    pub fn engine(&self) -> &DelayProofEngine {
        &self.engine
    }

    /// Шаги 1–2: не зависят от состояния, можно выполнять параллельно
    pub fn check_cryptography(&self, hb: &Heartbeat) -> Result<(), RejectReason> {
        if !self.verifier.verify(&hb.participant_id, &hb.signing_bytes(), &hb.signature) {
            return Err(RejectReason::BadSignature);
        }
        // Ниже base не пройдёт ни при каком состоянии
        if hb.delay_proof.iterations < self.schedule.base_iterations
            || !self.engine.verify_for_input(&hb.seed(), &hb.delay_proof)
        {
            return Err(RejectReason::InvalidTemporalProof);
        }
        Ok(())
    }

    /// Шаги 3–4 против текущего состояния
    pub fn check_temporal(&self, hb: &Heartbeat, state: &ParticipantState, now_ms: u64) -> Result<(), RejectReason> {
        if hb.delay_proof.iterations < self.required_iterations(state, hb.window_reference) {
            return Err(RejectReason::InvalidTemporalProof);
        }
        if let Some(last) = state.last_sequence {
            if hb.sequence_number <= last {
                return Err(RejectReason::ReplayOrOutOfOrder);
            }
        }
        // Один heartbeat на окно
        if let Some(last) = state.last_window {
            if hb.window_reference <= last {
                return Err(RejectReason::ReplayOrOutOfOrder);
            }
        }
        if !self.window_is_current(hb.window_reference, now_ms) {
            return Err(RejectReason::StaleOrFutureWindow);
        }
        Ok(())
    }

    /// Heartbeats участника, уже принятые в эпохе окна `window`
    pub fn epoch_heartbeats_before(&self, state: &ParticipantState, window: u64) -> u64 {
        let epoch = self.schedule.epoch_of(window);
        if state.last_window.is_some_and(|w| self.schedule.epoch_of(w) == epoch) {
            state.epoch_heartbeat_count
        } else {
            0
        }
    }

    /// Сколько squarings должен сделать следующий heartbeat участника
    pub fn required_iterations(&self, state: &ParticipantState, window: u64) -> u64 {
        self.schedule.required_iterations(self.epoch_heartbeats_before(state, window))
    }

    /// Окно W открыто для `now` с допуском: W − tol ≤ now ≤ W + interval + tol
    pub fn window_is_current(&self, window: u64, now_ms: u64) -> bool {
        if !is_aligned(window, self.interval_ms) {
            return false;
        }
        let earliest = window.saturating_sub(self.tolerance_ms);
        let latest = window
            .saturating_add(self.interval_ms)
            .saturating_add(self.tolerance_ms);
        (earliest..=latest).contains(&now_ms)
    }

    /// Полная проверка; при успехе обновляет `state`
    pub fn validate(
        &self,
        hb: &Heartbeat,
        state: &mut ParticipantState,
        now_ms: u64,
    ) -> Result<Acceptance, RejectReason> {
        self.check_cryptography(hb)?;
        self.check_temporal(hb, state, now_ms)?;
        Ok(self.apply(hb, state))
    }

    /// Применить уже проверенный heartbeat к состоянию
    pub fn apply(&self, hb: &Heartbeat, state: &mut ParticipantState) -> Acceptance {
        let previous_window = state.last_window;
        let before = self.epoch_heartbeats_before(state, hb.window_reference);
        if state.participant_id.is_empty() {
            state.participant_id = hb.participant_id.clone();
        }
        state.epoch_heartbeat_count = before + 1;
        state.last_sequence = Some(hb.sequence_number);
        state.last_window = Some(hb.window_reference);
        Acceptance { window: hb.window_reference, previous_window }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crypto::sha3;

    /// Подпись = sha3(pubkey ‖ message): детерминированно и быстро
    pub(crate) struct MockCrypto {
        pub key: Vec<u8>,
    }

    impl MockCrypto {
        pub(crate) fn new(seed: u8) -> Self {
            Self { key: vec![seed; 32] }
        }
    }

    fn mock_signature(key: &[u8], message: &[u8]) -> Vec<u8> {
        let mut data = key.to_vec();
        data.extend_from_slice(message);
        sha3(&data).to_vec()
    }

    impl Signer for MockCrypto {
        fn sign(&self, message: &[u8]) -> Vec<u8> {
            mock_signature(&self.key, message)
        }

        fn public_key(&self) -> Vec<u8> {
            self.key.clone()
        }
    }

    pub(crate) struct MockVerifier;

    impl Verifier for MockVerifier {
        fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
            mock_signature(public_key, message) == signature
        }
    }

    pub(crate) const W0: u64 = 1_735_862_400_000;

    pub(crate) fn config() -> FinalityConfig {
        FinalityConfig::for_testing()
    }

    fn validator() -> HeartbeatValidator {
        HeartbeatValidator::new(&config(), Arc::new(MockVerifier))
    }

    fn heartbeat(signer: &MockCrypto, window: u64, seq: u64) -> Heartbeat {
        let engine = DelayProofEngine::from_config(&config());
        Heartbeat::create(signer, &engine, window, seq, 16).unwrap()
    }

    #[test]
    fn test_accepts_valid_heartbeat() {
        let v = validator();
        let p = MockCrypto::new(1);
        let hb = heartbeat(&p, W0, 1);
        let mut state = ParticipantState::new(p.key.clone());

        let acc = v.validate(&hb, &mut state, W0 + 1_000).unwrap();
        assert_eq!(acc, Acceptance { window: W0, previous_window: None });
        assert_eq!(state.last_sequence, Some(1));
        assert_eq!(state.last_window, Some(W0));
        assert_eq!(state.epoch_heartbeat_count, 1);
    }

    #[test]
    fn test_bad_signature_checked_first() {
        let v = validator();
        let p = MockCrypto::new(2);
        let mut hb = heartbeat(&p, W0, 1);
        hb.signature[0] ^= 0xff;
        // Даже устаревшее окно: первой срабатывает подпись
        let mut state = ParticipantState::new(p.key.clone());
        assert_eq!(v.validate(&hb, &mut state, W0 * 2), Err(RejectReason::BadSignature));
        assert_eq!(state, ParticipantState::new(p.key.clone()));
    }

    #[test]
    fn test_proof_for_other_window_rejected() {
        let v = validator();
        let p = MockCrypto::new(3);
        let engine = DelayProofEngine::from_config(&config());
        let other = heartbeat_seed(&p.key, W0 + 60_000);
        let proof = engine.compute(&other, 16).unwrap();
        let hb = Heartbeat::sign(&p, proof, W0, 1);

        let mut state = ParticipantState::default();
        assert_eq!(
            v.validate(&hb, &mut state, W0),
            Err(RejectReason::InvalidTemporalProof)
        );
        assert_eq!(state, ParticipantState::default());
    }

    #[test]
    fn test_too_few_iterations_rejected() {
        let cfg = FinalityConfig { base_iterations: 32, ..config() };
        let v = HeartbeatValidator::new(&cfg, Arc::new(MockVerifier));
        let p = MockCrypto::new(4);
        let hb = heartbeat(&p, W0, 1);
        let mut state = ParticipantState::default();
        assert_eq!(v.validate(&hb, &mut state, W0), Err(RejectReason::InvalidTemporalProof));
        assert_eq!(state, ParticipantState::default());
    }

    #[test]
    fn test_single_squaring_rejected_by_default() {
        let v = HeartbeatValidator::new(&FinalityConfig::default(), Arc::new(MockVerifier));
        let p = MockCrypto::new(4);
        let engine = DelayProofEngine::from_config(&config());
        let hb = Heartbeat::create(&p, &engine, W0, 1, 1).unwrap();
        let mut state = ParticipantState::default();
        assert_eq!(v.validate(&hb, &mut state, W0), Err(RejectReason::InvalidTemporalProof));
    }

    #[test]
    fn test_required_iterations_double_within_epoch() {
        // base 8, удвоение после каждого heartbeat
        let cfg = FinalityConfig { difficulty_scale: 1, ..config() };
        let v = HeartbeatValidator::new(&cfg, Arc::new(MockVerifier));
        let p = MockCrypto::new(6);
        let engine = DelayProofEngine::from_config(&cfg);
        let mut state = ParticipantState::default();

        assert_eq!(v.required_iterations(&state, W0), 8);
        let first = Heartbeat::create(&p, &engine, W0, 1, 8).unwrap();
        v.validate(&first, &mut state, W0).unwrap();

        let w1 = W0 + 60_000;
        assert_eq!(v.required_iterations(&state, w1), 16);
        let short = Heartbeat::create(&p, &engine, w1, 2, 8).unwrap();
        assert_eq!(v.validate(&short, &mut state, w1), Err(RejectReason::InvalidTemporalProof));
        let enough = Heartbeat::create(&p, &engine, w1, 2, 16).unwrap();
        v.validate(&enough, &mut state, w1).unwrap();
        assert_eq!(state.epoch_heartbeat_count, 2);

        // Новая эпоха: снова base
        let next_epoch = W0 + cfg.epoch_windows * 60_000;
        assert_eq!(v.required_iterations(&state, next_epoch), 8);
    }

    #[test]
    fn test_sequence_replay_rejected() {
        let v = validator();
        let p = MockCrypto::new(5);
        let mut state = ParticipantState::new(p.key.clone());

        let first = heartbeat(&p, W0, 10);
        v.validate(&first, &mut state, W0).unwrap();

        // Тот же номер в следующем окне
        let replay = heartbeat(&p, W0 + 60_000, 10);
        let before = state.clone();
        assert_eq!(
            v.validate(&replay, &mut state, W0 + 60_000),
            Err(RejectReason::ReplayOrOutOfOrder)
        );
        // Меньший номер
        let lower = heartbeat(&p, W0 + 60_000, 9);
        assert_eq!(
            v.validate(&lower, &mut state, W0 + 60_000),
            Err(RejectReason::ReplayOrOutOfOrder)
        );
        assert_eq!(state, before);

        let next = heartbeat(&p, W0 + 60_000, 11);
        assert!(v.validate(&next, &mut state, W0 + 60_000).is_ok());
    }

    #[test]
    fn test_second_heartbeat_same_window_rejected() {
        let v = validator();
        let p = MockCrypto::new(6);
        let mut state = ParticipantState::default();
        v.validate(&heartbeat(&p, W0, 1), &mut state, W0).unwrap();
        assert_eq!(
            v.validate(&heartbeat(&p, W0, 2), &mut state, W0 + 10),
            Err(RejectReason::ReplayOrOutOfOrder)
        );
    }

    #[test]
    fn test_window_tolerance() {
        let v = validator();
        let p = MockCrypto::new(7);
        let end = W0 + 60_000;

        // 4 секунды после закрытия окна: принят
        let mut state = ParticipantState::default();
        assert!(v.validate(&heartbeat(&p, W0, 1), &mut state, end + 4_000).is_ok());

        // 6 секунд: отклонён
        let mut state = ParticipantState::default();
        assert_eq!(
            v.validate(&heartbeat(&p, W0, 1), &mut state, end + 6_000),
            Err(RejectReason::StaleOrFutureWindow)
        );

        // Будущее окно: 4с раньше начала: ок, 6с: нет
        let next = W0 + 60_000;
        let mut state = ParticipantState::default();
        assert!(v.validate(&heartbeat(&p, next, 1), &mut state, next - 4_000).is_ok());
        let mut state = ParticipantState::default();
        assert_eq!(
            v.validate(&heartbeat(&p, next, 1), &mut state, next - 6_000),
            Err(RejectReason::StaleOrFutureWindow)
        );
    }

    #[test]
    fn test_unaligned_window_rejected() {
        let v = validator();
        assert!(!v.window_is_current(W0 + 1, W0 + 1));
        assert!(v.window_is_current(W0, W0));
    }

    #[test]
    fn test_epoch_rollover() {
        let mut cfg = config();
        cfg.epoch_windows = 2;
        let v = HeartbeatValidator::new(&cfg, Arc::new(MockVerifier));
        let p = MockCrypto::new(8);
        let mut state = ParticipantState::default();

        // base: начало эпохи из двух окон
        let base = W0 - W0 % (2 * 60_000);
        v.apply(&heartbeat(&p, base, 1), &mut state);
        v.apply(&heartbeat(&p, base + 60_000, 2), &mut state);
        assert_eq!(state.epoch_heartbeat_count, 2);
        v.apply(&heartbeat(&p, base + 120_000, 3), &mut state);
        assert_eq!(state.epoch_heartbeat_count, 1);
    }

    #[test]
    fn test_reject_classes() {
        assert_eq!(RejectReason::BadSignature.class(), FailureClass::Cryptographic);
        assert_eq!(RejectReason::InvalidTemporalProof.class(), FailureClass::Cryptographic);
        assert!(RejectReason::StaleOrFutureWindow.is_resubmittable());
        assert!(RejectReason::ReplayOrOutOfOrder.is_resubmittable());
        assert!(!RejectReason::BadSignature.is_resubmittable());
    }
}
