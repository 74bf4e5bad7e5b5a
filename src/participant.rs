//! Участник: один heartbeat на окно
//!
//! Delay proof считается на blocking-потоке. Дедлайн: конец окна плюс
//! tolerance: после него heartbeat всё равно будет отклонён как stale,
//! поэтому опоздавший результат просто выбрасывается.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, sleep, timeout};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::FinalityConfig;
use crate::crypto::Signer;
use crate::heartbeat::Heartbeat;
use crate::types::{ParticipantId, short_hex, window_boundary, window_start};
use crate::vdf::{DelayProofEngine, VdfError};

pub struct Participant {
    signer: Arc<dyn Signer>,
    engine: DelayProofEngine,
    /// Нижняя граница; реальное число не меньше требуемого расписанием
    iterations: u64,
    sequence: u64,
    interval_ms: u64,
    tolerance_ms: u64,
    schedule: FinalityConfig,
    epoch_heartbeats: u64,
    last_window: Option<u64>,
}

impl Participant {
    pub fn new(signer: Arc<dyn Signer>, config: &FinalityConfig, iterations: u64) -> Self {
        Self {
            signer,
            engine: DelayProofEngine::from_config(config),
            iterations,
            sequence: 0,
            interval_ms: config.interval_ms,
            tolerance_ms: config.tolerance_ms,
            schedule: config.clone(),
            epoch_heartbeats: 0,
            last_window: None,
        }
    }

    pub fn id(&self) -> ParticipantId {
        self.signer.public_key()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Heartbeats этого участника, уже принятые в эпохе окна
    fn epoch_heartbeats_before(&self, window: u64) -> u64 {
        let epoch = self.schedule.epoch_of(window);
        match self.last_window {
            Some(last) if self.schedule.epoch_of(last) == epoch => self.epoch_heartbeats,
            _ => 0,
        }
    }

    /// Сколько squarings сделает heartbeat окна
    pub fn iterations_for(&self, window: u64) -> u64 {
        let required = self.schedule.required_iterations(self.epoch_heartbeats_before(window));
        self.iterations.max(required)
    }

    fn record(&mut self, window: u64, sequence: u64) {
        self.epoch_heartbeats = self.epoch_heartbeats_before(window) + 1;
        self.last_window = Some(window);
        self.sequence = sequence;
    }

    /// Последний момент, когда heartbeat окна ещё примут
    pub fn deadline(&self, window: u64) -> u64 {
        window_boundary(window, self.interval_ms).saturating_add(self.tolerance_ms)
    }

    /// Синхронно: вычислить proof, подписать, сдвинуть sequence
    pub fn heartbeat_for(&mut self, window: u64) -> Result<Heartbeat, VdfError> {
        let next = self.sequence + 1;
        let iterations = self.iterations_for(window);
        let hb = Heartbeat::create(self.signer.as_ref(), &self.engine, window, next, iterations)?;
        self.record(window, next);
        Ok(hb)
    }

    /// Heartbeat окна под дедлайном; None если не успели
    pub async fn produce(&mut self, window: u64, clock: &dyn Clock) -> Option<Heartbeat> {
        let deadline = self.deadline(window);
        let now = clock.wall_clock_utc();
        if now > deadline {
            return None;
        }

        let signer = Arc::clone(&self.signer);
        let engine = self.engine.clone();
        let (sequence, iterations) = (self.sequence + 1, self.iterations_for(window));
        let task = tokio::task::spawn_blocking(move || {
            Heartbeat::create(signer.as_ref(), &engine, window, sequence, iterations)
        });

        let heartbeat = match timeout(Duration::from_millis(deadline - now), task).await {
            Ok(Ok(Ok(hb))) => hb,
            Ok(Ok(Err(e))) => {
                warn!("Delay proof for window {} failed: {}", window, e);
                return None;
            }
            Ok(Err(e)) => {
                warn!("Delay proof task for window {} failed: {}", window, e);
                return None;
            }
            Err(_) => {
                warn!("Missed deadline for window {}, dropping heartbeat", window);
                return None;
            }
        };

        if clock.wall_clock_utc() > deadline {
            warn!("Heartbeat for window {} finished after deadline, dropping", window);
            return None;
        }
        self.record(window, sequence);
        Some(heartbeat)
    }
}

/// Цикл участника до shutdown или закрытия outbox
pub async fn run(
    mut participant: Participant,
    clock: Arc<dyn Clock>,
    outbox: mpsc::Sender<Heartbeat>,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = participant.interval_ms;
    let id = short_hex(&participant.id());
    let mut last_window = None;
    info!("Participant {} started", id);

    loop {
        let window = window_start(clock.wall_clock_utc(), interval);
        if last_window != Some(window) {
            last_window = Some(window);
            if let Some(hb) = participant.produce(window, clock.as_ref()).await {
                debug!("Participant {} heartbeat #{} for window {}", id, hb.sequence_number, window);
                if outbox.send(hb).await.is_err() {
                    break;
                }
            }
        }

        let next = window_boundary(window, interval);
        let wait = next.saturating_sub(clock.wall_clock_utc()).max(1);
        tokio::select! {
            _ = sleep(Duration::from_millis(wait)) => {}
            _ = shutdown.changed() => break,
        }
    }
    info!("Participant {} stopped", id);
}
