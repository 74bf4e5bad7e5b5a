//! Delay-Proof Engine: Wesolowski VDF в class group
//!
//! Вход (seed) → дискриминант Δ и стартовый элемент x.
//! y = x^(2^T): T последовательных возведений в квадрат.
//! Proof π = x^⌊2^T / l⌋, где l = HashToPrime(Δ, x, y, T).
//! Verification: π^l · x^(2^T mod l) == y: O(log T) операций.
//!
//! Стойкость условная: предполагается, что порядок class group
//! вычислить эффективно нельзя.
//!
//! Движок не содержит примитивов параллелизма. Вызывающий код может
//! запускать разные вычисления на разных потоках, но одна цепочка
//! возведений в квадрат всегда выполняется строго последовательно.

pub mod class_group;
pub mod prime;

use std::time::Instant;

use num_bigint::{BigInt, BigUint};
use num_traits::{One, Signed};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::FinalityConfig;
use crate::types::Hash;

pub use class_group::{ClassGroup, GroupElement};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum VdfError {
    #[error("iterations must be positive")]
    ZeroIterations,
    #[error("too many iterations: requested={requested}, max={max}")]
    TooManyIterations { requested: u64, max: u64 },
    #[error("no discriminant found for seed")]
    DiscriminantNotFound,
    #[error("no generator found for seed")]
    GeneratorNotFound,
    #[error("no challenge prime found")]
    ChallengeNotFound,
    #[error("class group arithmetic failed")]
    Arithmetic,
}

/// Доказательство последовательного вычисления
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayProof {
    pub input_element: GroupElement,
    pub output_element: GroupElement,
    pub iterations: u64,
    pub proof_element: GroupElement,
    pub discriminant: BigInt,
}

impl DelayProof {
    /// Canonical encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        let disc = self.discriminant.magnitude().to_bytes_be();
        let mut out = Vec::new();
        out.extend_from_slice(&(disc.len() as u16).to_be_bytes());
        out.extend_from_slice(&disc);
        out.extend_from_slice(&self.iterations.to_be_bytes());
        for element in [&self.input_element, &self.output_element, &self.proof_element] {
            let bytes = element.to_bytes();
            out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
            out.extend_from_slice(&bytes);
        }
        out
    }

    /// Разбор canonical encoding; любые элементы вне группы → None
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (disc, rest) = take_prefixed(bytes)?;
        if disc.is_empty() {
            return None;
        }
        let discriminant = -BigInt::from(BigUint::from_bytes_be(disc));
        let group = ClassGroup::new(discriminant.clone())?;

        if rest.len() < 8 {
            return None;
        }
        let (iter_bytes, rest) = rest.split_at(8);
        let iterations = u64::from_be_bytes(iter_bytes.try_into().ok()?);

        let (input, rest) = take_prefixed(rest)?;
        let (output, rest) = take_prefixed(rest)?;
        let (proof, rest) = take_prefixed(rest)?;
        if !rest.is_empty() {
            return None;
        }

        Some(Self {
            input_element: group.from_bytes(input)?,
            output_element: group.from_bytes(output)?,
            iterations,
            proof_element: group.from_bytes(proof)?,
            discriminant,
        })
    }

    pub fn hash(&self) -> Hash {
        crate::crypto::sha3(&self.to_bytes())
    }
}

fn take_prefixed(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    if bytes.len() < 2 {
        return None;
    }
    let (len, rest) = bytes.split_at(2);
    let len = u16::from_be_bytes([len[0], len[1]]) as usize;
    if rest.len() < len {
        return None;
    }
    Some(rest.split_at(len))
}

/// Delay-Proof Engine
///
/// Параметры безопасности фиксированы при создании; engine не хранит
/// состояния между вызовами.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayProofEngine {
    discriminant_bits: u32,
    challenge_bits: u32,
    max_iterations: u64,
}

impl DelayProofEngine {
    pub fn new(discriminant_bits: u32, challenge_bits: u32, max_iterations: u64) -> Self {
        Self { discriminant_bits, challenge_bits, max_iterations }
    }

    pub fn from_config(config: &FinalityConfig) -> Self {
        Self::new(config.discriminant_bits, config.challenge_bits, config.max_iterations)
    }

    pub fn discriminant_bits(&self) -> u32 {
        self.discriminant_bits
    }

    /// Группа, выведенная из seed
    pub fn group_for(&self, input: &[u8]) -> Result<ClassGroup, VdfError> {
        let d = prime::generate_discriminant(input, self.discriminant_bits)
            .ok_or(VdfError::DiscriminantNotFound)?;
        ClassGroup::new(d).ok_or(VdfError::DiscriminantNotFound)
    }

    /// Стартовый элемент x = (a, b, c), где a простое и выведено из seed
    pub fn generator(&self, group: &ClassGroup, input: &[u8]) -> Result<GroupElement, VdfError> {
        let bits = (self.discriminant_bits / 4).clamp(16, 128);
        let (a, root) = prime::generator_prime(group.discriminant(), input, bits)
            .ok_or(VdfError::GeneratorNotFound)?;
        // b ≡ Δ (mod 2): выбираем нечётный корень
        let b = if root.bit(0) { root } else { &a - root };
        let x = group
            .form(BigInt::from(a), BigInt::from(b))
            .ok_or(VdfError::GeneratorNotFound)?;
        group.reduce(x).ok_or(VdfError::GeneratorNotFound)
    }

    /// Вычислить y = x^(2^T) и proof
    pub fn compute(&self, input: &[u8], iterations: u64) -> Result<DelayProof, VdfError> {
        self.check_iterations(iterations)?;

        let group = self.group_for(input)?;
        let x = self.generator(&group, input)?;
        let y = sequential_squarings(&group, &x, iterations)?;
        let l = challenge(&group, &x, &y, iterations, self.challenge_bits)
            .ok_or(VdfError::ChallengeNotFound)?;
        let proof_element = prove(&group, &x, iterations, &l)?;

        Ok(DelayProof {
            input_element: x,
            output_element: y,
            iterations,
            proof_element,
            discriminant: group.discriminant().clone(),
        })
    }

    /// Проверить proof сам по себе. Никогда не паникует на чужих данных.
    pub fn verify(&self, proof: &DelayProof) -> bool {
        if self.check_iterations(proof.iterations).is_err() {
            return false;
        }
        let Some(group) = self.accept_discriminant(&proof.discriminant) else {
            return false;
        };
        check_equation(&group, proof, self.challenge_bits)
    }

    /// Proof вычислен именно для `input` и корректен
    pub fn verify_for_input(&self, input: &[u8], proof: &DelayProof) -> bool {
        if self.check_iterations(proof.iterations).is_err() {
            return false;
        }
        let Ok(group) = self.group_for(input) else {
            return false;
        };
        if group.discriminant() != &proof.discriminant {
            return false;
        }
        match self.generator(&group, input) {
            Ok(x) if x == proof.input_element => check_equation(&group, proof, self.challenge_bits),
            _ => false,
        }
    }

    /// Скорость возведения в квадрат на этой машине (итераций/сек)
    pub fn calibrate(&self, sample_iterations: u64) -> Result<f64, VdfError> {
        self.check_iterations(sample_iterations)?;
        let group = self.group_for(b"MONTANA_CALIBRATION")?;
        let x = self.generator(&group, b"MONTANA_CALIBRATION")?;
        let started = Instant::now();
        sequential_squarings(&group, &x, sample_iterations)?;
        let secs = started.elapsed().as_secs_f64().max(1e-9);
        Ok(sample_iterations as f64 / secs)
    }

    fn check_iterations(&self, iterations: u64) -> Result<(), VdfError> {
        if iterations == 0 {
            return Err(VdfError::ZeroIterations);
        }
        if iterations > self.max_iterations {
            return Err(VdfError::TooManyIterations {
                requested: iterations,
                max: self.max_iterations,
            });
        }
        Ok(())
    }

    /// Δ < 0, нужной длины, −Δ ≡ 3 (mod 4) простое
    fn accept_discriminant(&self, d: &BigInt) -> Option<ClassGroup> {
        if !d.is_negative() || d.bits() != u64::from(self.discriminant_bits) {
            return None;
        }
        let group = ClassGroup::new(d.clone())?;
        let p = d.magnitude();
        prime::is_probable_prime(p).then_some(group)
    }
}

/// T последовательных возведений в квадрат.
///
/// Каждая итерация зависит от предыдущей: распараллелить нечего.
fn sequential_squarings(group: &ClassGroup, x: &GroupElement, iterations: u64) -> Result<GroupElement, VdfError> {
    let mut y = x.clone();
    for _ in 0..iterations {
        y = group.square(&y).ok_or(VdfError::Arithmetic)?;
    }
    Ok(y)
}

/// π = x^⌊2^T / l⌋: деление "в столбик" по битам 2^T
fn prove(group: &ClassGroup, x: &GroupElement, iterations: u64, l: &BigUint) -> Result<GroupElement, VdfError> {
    let mut pi = group.identity();
    let mut r = BigUint::one();
    for _ in 0..iterations {
        r <<= 1u32;
        let bit = &r >= l;
        if bit {
            r -= l;
        }
        pi = group.square(&pi).ok_or(VdfError::Arithmetic)?;
        if bit {
            pi = group.compose(&pi, x).ok_or(VdfError::Arithmetic)?;
        }
    }
    Ok(pi)
}

/// l = HashToPrime(Δ ‖ x ‖ y ‖ T)
fn challenge(group: &ClassGroup, x: &GroupElement, y: &GroupElement, iterations: u64, bits: u32) -> Option<BigUint> {
    let disc = group.discriminant().magnitude().to_bytes_be();
    let x = x.to_bytes();
    let y = y.to_bytes();
    let t = iterations.to_be_bytes();
    prime::hash_to_prime(prime::CHALLENGE_DOMAIN, &[&disc, &x, &y, &t], bits)
}

fn check_equation(group: &ClassGroup, proof: &DelayProof, challenge_bits: u32) -> bool {
    let x = &proof.input_element;
    let y = &proof.output_element;
    let pi = &proof.proof_element;
    if !(group.is_reduced(x) && group.is_reduced(y) && group.is_reduced(pi)) {
        return false;
    }
    let Some(l) = challenge(group, x, y, proof.iterations, challenge_bits) else {
        return false;
    };
    let r = BigUint::from(2u32).modpow(&BigUint::from(proof.iterations), &l);

    let lhs = group
        .pow(pi, &l)
        .zip(group.pow(x, &r))
        .and_then(|(pi_l, x_r)| group.compose(&pi_l, &x_r));
    lhs.as_ref() == Some(y)
}
