//! Montana Fork Choice Rule
//!
//! Полный порядок над checkpoint с одним boundary_timestamp. Каскад:
//! 1. больше participant_count
//! 2. при равенстве: больше total_iterations
//! 3. при равенстве: больше aggregate_score
//! 4. при равенстве: меньший hash checkpoint
//!
//! Реализовано как ключ `(count, iterations, score, Reverse(hash))` и
//! стандартное лексикографическое сравнение кортежей: без ветвлений,
//! которые легко сделать несимметричными. Функция чистая и не зависит от
//! локального состояния узла: все честные узлы выбирают одного победителя.

use std::cmp::{Ordering, Reverse};

use crate::checkpoint::FinalityCheckpoint;
use crate::types::Hash;

/// Ключ сравнения: больше: лучше
pub type OrderingKey = (u32, u64, u64, Reverse<Hash>);

/// Результат сравнения двух checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainComparison {
    /// Первый лучше
    First,
    /// Второй лучше
    Second,
    /// Идентичны
    Equal,
}

/// Уровень каскада, на котором решился спор
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResolutionLevel {
    ParticipantCount,
    TotalIterations,
    AggregateScore,
    HashTiebreak,
    Identical,
}

/// Объяснение выбора
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub winner: Hash,
    pub loser: Hash,
    pub level: ResolutionLevel,
}

/// Ошибки fork choice
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ForkChoiceError {
    #[error("checkpoints at different boundaries: {left} vs {right}")]
    BoundaryMismatch { left: u64, right: u64 },
}

pub fn ordering_key(cp: &FinalityCheckpoint) -> OrderingKey {
    (
        cp.participant_count,
        cp.total_iterations,
        cp.aggregate_score,
        Reverse(cp.hash()),
    )
}

pub fn compare(a: &FinalityCheckpoint, b: &FinalityCheckpoint) -> ChainComparison {
    match ordering_key(a).cmp(&ordering_key(b)) {
        Ordering::Greater => ChainComparison::First,
        Ordering::Less => ChainComparison::Second,
        Ordering::Equal => ChainComparison::Equal,
    }
}

fn same_boundary(a: &FinalityCheckpoint, b: &FinalityCheckpoint) -> Result<(), ForkChoiceError> {
    if a.boundary_timestamp != b.boundary_timestamp {
        return Err(ForkChoiceError::BoundaryMismatch {
            left: a.boundary_timestamp,
            right: b.boundary_timestamp,
        });
    }
    Ok(())
}

/// Победитель из двух кандидатов. Коммутативно: resolve(a, b) == resolve(b, a).
pub fn resolve<'a>(
    a: &'a FinalityCheckpoint,
    b: &'a FinalityCheckpoint,
) -> Result<&'a FinalityCheckpoint, ForkChoiceError> {
    same_boundary(a, b)?;
    Ok(match compare(a, b) {
        ChainComparison::Second => b,
        ChainComparison::First | ChainComparison::Equal => a,
    })
}

/// Лучший из набора кандидатов одного boundary
pub fn resolve_all<'a, I>(candidates: I) -> Result<Option<&'a FinalityCheckpoint>, ForkChoiceError>
where
    I: IntoIterator<Item = &'a FinalityCheckpoint>,
{
    let mut best: Option<&'a FinalityCheckpoint> = None;
    for cp in candidates {
        best = Some(match best {
            None => cp,
            Some(current) => resolve(current, cp)?,
        });
    }
    Ok(best)
}

/// Какой уровень каскада решил спор
pub fn explain(a: &FinalityCheckpoint, b: &FinalityCheckpoint) -> Result<Resolution, ForkChoiceError> {
    let winner = resolve(a, b)?;
    let loser = if std::ptr::eq(winner, a) { b } else { a };

    let level = if a.participant_count != b.participant_count {
        ResolutionLevel::ParticipantCount
    } else if a.total_iterations != b.total_iterations {
        ResolutionLevel::TotalIterations
    } else if a.aggregate_score != b.aggregate_score {
        ResolutionLevel::AggregateScore
    } else if a.hash() != b.hash() {
        ResolutionLevel::HashTiebreak
    } else {
        ResolutionLevel::Identical
    };

    Ok(Resolution {
        winner: winner.hash(),
        loser: loser.hash(),
        level,
    })
}
