//! Score Tracker
//!
//! Score(p) = √(epoch_heartbeat_count). Квадратный корень делает
//! дробление одной личности на N выгодным лишь на 1/√N: каждая личность
//! платит полную цену delay proof за окно, а score растёт медленнее.
//!
//! Effective score = score × activity_multiplier:
//! - 1.0 пока с последнего heartbeat прошло не больше activity_window окон
//! - дальше линейно падает на decay за окно
//! - не ниже floor (одно отключение не обнуляет участника)
//!
//! В checkpoint попадает fixed-point значение (× SCORE_PRECISION),
//! посчитанное целочисленно: одинаково на всех узлах.

use num_integer::Roots;

use crate::config::FinalityConfig;
use crate::heartbeat::{Acceptance, ParticipantState};
use crate::types::{ParticipantId, SCORE_PRECISION, window_start};

const PPM: u64 = 1_000_000;

/// √count как f64
pub fn compute_score(epoch_heartbeats: u64) -> f64 {
    (epoch_heartbeats as f64).sqrt()
}

/// ⌊√count × 10⁶⌋ без плавающей точки
pub fn compute_score_fixed(epoch_heartbeats: u64) -> u64 {
    let scaled = epoch_heartbeats as u128 * (SCORE_PRECISION as u128) * (SCORE_PRECISION as u128);
    scaled.sqrt() as u64
}

pub fn score_from_fixed(score_fixed: u64) -> f64 {
    score_fixed as f64 / SCORE_PRECISION as f64
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreTracker {
    interval_ms: u64,
    activity_window: u64,
    decay_ppm: u64,
    floor_ppm: u64,
}

impl ScoreTracker {
    pub fn new(config: &FinalityConfig) -> Self {
        Self {
            interval_ms: config.interval_ms,
            activity_window: config.activity_window,
            decay_ppm: config.activity_decay_ppm,
            floor_ppm: config.activity_floor_ppm,
        }
    }

    pub fn score(&self, state: &ParticipantState) -> f64 {
        compute_score(state.epoch_heartbeat_count)
    }

    pub fn score_fixed(&self, state: &ParticipantState) -> u64 {
        compute_score_fixed(state.epoch_heartbeat_count)
    }

    /// Множитель активности в ppm; окна считаются по началу окна
    pub fn activity_multiplier_ppm(&self, last_window: Option<u64>, now_window: u64) -> u64 {
        let Some(last) = last_window else {
            return PPM;
        };
        let windows_since = now_window.saturating_sub(last) / self.interval_ms;
        if windows_since <= self.activity_window {
            return PPM;
        }
        let inactive = windows_since - self.activity_window;
        let decay = inactive.saturating_mul(self.decay_ppm);
        PPM.saturating_sub(decay).max(self.floor_ppm)
    }

    pub fn activity_multiplier(&self, last_window: Option<u64>, now_ms: u64) -> f64 {
        let now_window = window_start(now_ms, self.interval_ms);
        self.activity_multiplier_ppm(last_window, now_window) as f64 / PPM as f64
    }

    pub fn effective_score(&self, state: &ParticipantState, now_ms: u64) -> f64 {
        self.score(state) * self.activity_multiplier(state.last_window, now_ms)
    }

    pub fn effective_score_fixed(&self, state: &ParticipantState, now_ms: u64) -> u64 {
        let now_window = window_start(now_ms, self.interval_ms);
        let multiplier = self.activity_multiplier_ppm(state.last_window, now_window);
        scale_ppm(self.score_fixed(state), multiplier)
    }

    /// Вклад только что принятого heartbeat в aggregate_score.
    ///
    /// Множитель берётся от предыдущего окна участника: вернувшийся после
    /// долгого отсутствия вносит меньше.
    pub fn contribution(&self, state: &ParticipantState, acceptance: &Acceptance) -> u64 {
        let multiplier = self.activity_multiplier_ppm(acceptance.previous_window, acceptance.window);
        scale_ppm(self.score_fixed(state), multiplier)
    }

    /// Посчитать вклад и добавить его в historical_score
    pub fn record(&self, state: &mut ParticipantState, acceptance: &Acceptance) -> u64 {
        let contribution = self.contribution(state, acceptance);
        state.historical_score = state.historical_score.saturating_add(contribution);
        contribution
    }

    /// Участники по убыванию effective score (нулевые отбрасываются)
    pub fn rank<'a, I>(&self, states: I, now_ms: u64) -> Vec<(ParticipantId, f64)>
    where
        I: IntoIterator<Item = &'a ParticipantState>,
    {
        let mut ranked: Vec<_> = states
            .into_iter()
            .map(|s| (s.participant_id.clone(), self.effective_score(s, now_ms)))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }
}

fn scale_ppm(value: u64, ppm: u64) -> u64 {
    ((value as u128 * ppm as u128) / PPM as u128) as u64
}
