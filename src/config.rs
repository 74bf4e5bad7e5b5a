//! Конфигурация finality core

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{DEFAULT_INTERVAL_MS, DEFAULT_TOLERANCE_MS, window_index};

/// Минимальный размер дискриминанта (бит)
pub const MIN_DISCRIMINANT_BITS: u32 = 64;

/// Iterations ceiling: 2^28 (как VDF_MAX_ITERATIONS)
pub const DEFAULT_MAX_ITERATIONS: u64 = 1 << 28;

/// Обязательный минимум squarings на heartbeat (2^20)
pub const DEFAULT_BASE_ITERATIONS: u64 = 1 << 20;

/// Heartbeats в эпохе на одно удвоение сложности
pub const DEFAULT_DIFFICULTY_SCALE: u64 = 1_000;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("interval must be non-zero")]
    ZeroInterval,
    #[error("tolerance {tolerance_ms}ms must be below interval {interval_ms}ms")]
    ToleranceTooWide { tolerance_ms: u64, interval_ms: u64 },
    #[error("discriminant of {0} bits is below the 64-bit minimum")]
    DiscriminantTooSmall(u32),
    #[error("challenge of {0} bits is out of range 16..=256")]
    ChallengeBits(u32),
    #[error("base_iterations {base} is out of range 1..={max}")]
    IterationRange { base: u64, max: u64 },
    #[error("difficulty_scale must be non-zero")]
    ZeroDifficultyScale,
    #[error("epoch_windows must be non-zero")]
    ZeroEpoch,
    #[error("activity floor {0} ppm exceeds 1_000_000")]
    ActivityFloor(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalityConfig {
    /// Длина окна (ms); boundary кратен ему
    pub interval_ms: u64,
    /// ±допуск UTC часов (ms)
    pub tolerance_ms: u64,

    /// Security parameter дискриминанта class group
    pub discriminant_bits: u32,
    /// Размер challenge prime в Wesolowski proof
    pub challenge_bits: u32,
    /// Сколько squarings обязан сделать первый heartbeat эпохи
    pub base_iterations: u64,
    /// Требование удваивается каждые `difficulty_scale` heartbeats эпохи
    pub difficulty_scale: u64,
    pub max_iterations: u64,

    /// Окна без штрафа после последнего heartbeat
    pub activity_window: u64,
    /// Штраф за каждое лишнее окно (parts per million)
    pub activity_decay_ppm: u64,
    /// Нижняя граница activity multiplier (ppm)
    pub activity_floor_ppm: u64,
    /// Длина эпохи в окнах (epoch_heartbeat_count обнуляется)
    pub epoch_windows: u64,

    pub full_min_participants: u64,
    pub full_min_regions: u64,
    pub high_min_participants: u64,
    pub high_min_regions: u64,
}

impl Default for FinalityConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            tolerance_ms: DEFAULT_TOLERANCE_MS,
            discriminant_bits: 1024,
            challenge_bits: 128,
            base_iterations: DEFAULT_BASE_ITERATIONS,
            difficulty_scale: DEFAULT_DIFFICULTY_SCALE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            activity_window: 2_016,
            activity_decay_ppm: 1_000,
            activity_floor_ppm: 100_000,
            epoch_windows: 1_440,
            full_min_participants: 21,
            full_min_regions: 3,
            high_min_participants: 7,
            high_min_regions: 2,
        }
    }
}

impl FinalityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.tolerance_ms >= self.interval_ms {
            return Err(ConfigError::ToleranceTooWide {
                tolerance_ms: self.tolerance_ms,
                interval_ms: self.interval_ms,
            });
        }
        if self.discriminant_bits < MIN_DISCRIMINANT_BITS {
            return Err(ConfigError::DiscriminantTooSmall(self.discriminant_bits));
        }
        if !(16..=256).contains(&self.challenge_bits) {
            return Err(ConfigError::ChallengeBits(self.challenge_bits));
        }
        if self.base_iterations == 0 || self.base_iterations > self.max_iterations {
            return Err(ConfigError::IterationRange {
                base: self.base_iterations,
                max: self.max_iterations,
            });
        }
        if self.difficulty_scale == 0 {
            return Err(ConfigError::ZeroDifficultyScale);
        }
        if self.epoch_windows == 0 {
            return Err(ConfigError::ZeroEpoch);
        }
        if self.activity_floor_ppm > 1_000_000 {
            return Err(ConfigError::ActivityFloor(self.activity_floor_ppm));
        }
        Ok(())
    }

    /// Маленькие параметры для тестов и локальной симуляции
    pub fn for_testing() -> Self {
        Self {
            discriminant_bits: 128,
            challenge_bits: 64,
            base_iterations: 8,
            ..Self::default()
        }
    }

    /// Номер эпохи, в которую попадает окно
    pub fn epoch_of(&self, window: u64) -> u64 {
        window_index(window, self.interval_ms) / self.epoch_windows.max(1)
    }

    /// Требуемые iterations при `epoch_heartbeats` уже принятых в эпохе:
    /// base · 2^(epoch_heartbeats / difficulty_scale), не больше max_iterations
    pub fn required_iterations(&self, epoch_heartbeats: u64) -> u64 {
        let doublings = epoch_heartbeats / self.difficulty_scale.max(1);
        if doublings >= u64::from(u64::BITS) {
            return self.max_iterations;
        }
        self.base_iterations
            .checked_mul(1u64 << doublings)
            .unwrap_or(u64::MAX)
            .min(self.max_iterations)
    }
}
