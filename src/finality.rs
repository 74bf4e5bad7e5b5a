//! Уровни финальности
//!
//! Checkpoint boundary B становится тем надёжнее, чем больше канонических
//! checkpoint построено поверх него в сошедшейся цепи:
//! - Soft:   B закрыт (1 boundary)
//! - Medium: есть следующий (2 boundary)
//! - Hard:   есть ещё два следующих (3 boundary)

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FinalityTier {
    Soft,
    Medium,
    Hard,
}

impl FinalityTier {
    /// Уровень по числу канонических наследников
    pub fn from_successors(successors: usize) -> Self {
        match successors {
            0 => FinalityTier::Soft,
            1 => FinalityTier::Medium,
            _ => FinalityTier::Hard,
        }
    }

    /// Сколько boundary должно пройти
    pub fn elapsed_boundaries(&self) -> u64 {
        match self {
            FinalityTier::Soft => 1,
            FinalityTier::Medium => 2,
            FinalityTier::Hard => 3,
        }
    }
}

impl std::fmt::Display for FinalityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FinalityTier::Soft => "soft",
            FinalityTier::Medium => "medium",
            FinalityTier::Hard => "hard",
        };
        f.write_str(s)
    }
}
