//! Hash-to-prime и генерация дискриминанта
//!
//! SHAKE-256 как XOF: домен ‖ части ‖ счётчик → кандидат нужной длины.
//! Простота проверяется решетом по малым простым и Miller–Rabin с
//! фиксированными базами плюс базами, выведенными из самого кандидата
//! (ChaCha20 с seed = sha3(n)), чтобы тест был детерминированным на всех узлах.

use num_bigint::{BigInt, BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use sha3::Shake256;
use sha3::digest::{ExtendableOutput, Update, XofReader};

pub const DISCRIMINANT_DOMAIN: &[u8] = b"MONTANA_DISCRIMINANT_V1";
pub const CHALLENGE_DOMAIN: &[u8] = b"MONTANA_VDF_CHALLENGE_V1";
pub const GENERATOR_DOMAIN: &[u8] = b"MONTANA_VDF_GENERATOR_V1";

/// Сколько кандидатов перебирать до отказа
pub const MAX_PRIME_ATTEMPTS: u32 = 1 << 20;

const SMALL_PRIMES: [u32; 54] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
    101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191, 193,
    197, 199, 211, 223, 227, 229, 233, 239, 241, 251,
];

/// Фиксированные базы: детерминированный MR для n < 3.3·10²⁴
const FIXED_BASES: usize = 13;

/// Дополнительные базы, выведенные из кандидата
const DERIVED_BASES: usize = 16;

/// SHAKE-256(domain ‖ parts… ‖ counter) → `len` байт
pub fn shake(domain: &[u8], parts: &[&[u8]], counter: u32, len: usize) -> Vec<u8> {
    let mut hasher = Shake256::default();
    hasher.update(domain);
    for part in parts {
        hasher.update(&(part.len() as u32).to_be_bytes());
        hasher.update(part);
    }
    hasher.update(&counter.to_be_bytes());
    let mut out = vec![0u8; len];
    hasher.finalize_xof().read(&mut out);
    out
}

/// Кандидат ровно `bits` бит: старший бит выставлен
fn candidate(domain: &[u8], parts: &[&[u8]], counter: u32, bits: u32) -> BigUint {
    let len = bits.div_ceil(8) as usize;
    let bytes = shake(domain, parts, counter, len);
    let mut n = BigUint::from_bytes_be(&bytes);
    let excess = (len as u64 * 8) - bits as u64;
    n >>= excess;
    n.set_bit(bits as u64 - 1, true);
    n
}

pub fn is_probable_prime(n: &BigUint) -> bool {
    let two = BigUint::from(2u32);
    if n < &two {
        return false;
    }
    for &p in SMALL_PRIMES.iter() {
        let p = BigUint::from(p);
        if n == &p {
            return true;
        }
        if (n % &p).is_zero() {
            return false;
        }
    }

    // n − 1 = d·2^s
    let n_minus_one = n - 1u32;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    let witness = |a: &BigUint| -> bool {
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_one {
            return true;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                return true;
            }
        }
        false
    };

    for &p in SMALL_PRIMES.iter().take(FIXED_BASES) {
        if !witness(&BigUint::from(p)) {
            return false;
        }
    }

    // Для маленьких n фиксированных баз достаточно
    if n.bits() <= 64 {
        return true;
    }

    let mut rng = ChaCha20Rng::from_seed(crate::crypto::sha3(&n.to_bytes_be()));
    let upper = &n_minus_one - 1u32;
    for _ in 0..DERIVED_BASES {
        let a = rng.gen_biguint_range(&two, &upper);
        if !witness(&a) {
            return false;
        }
    }
    true
}

/// Дискриминант Δ = −p, p ≡ 3 (mod 4) простое ровно `bits` бит
pub fn generate_discriminant(seed: &[u8], bits: u32) -> Option<BigInt> {
    for counter in 0..MAX_PRIME_ATTEMPTS {
        let mut p = candidate(DISCRIMINANT_DOMAIN, &[seed], counter, bits);
        p |= BigUint::from(3u32);
        if is_probable_prime(&p) {
            return Some(-BigInt::from(p));
        }
    }
    None
}

/// Hash-to-prime: нечётное простое ровно `bits` бит
pub fn hash_to_prime(domain: &[u8], parts: &[&[u8]], bits: u32) -> Option<BigUint> {
    for counter in 0..MAX_PRIME_ATTEMPTS {
        let mut p = candidate(domain, parts, counter, bits);
        p.set_bit(0, true);
        if is_probable_prime(&p) {
            return Some(p);
        }
    }
    None
}

/// Простое a ≡ 3 (mod 4), для которого Δ: квадратичный вычет
///
/// Тогда √Δ mod a = Δ^((a+1)/4) и форма (a, b, ·) существует.
pub fn generator_prime(discriminant: &BigInt, seed: &[u8], bits: u32) -> Option<(BigUint, BigUint)> {
    let four = BigUint::from(4u32);
    let three = BigUint::from(3u32);
    for counter in 0..MAX_PRIME_ATTEMPTS {
        let mut a = candidate(GENERATOR_DOMAIN, &[seed], counter, bits);
        a |= &three;
        if !is_probable_prime(&a) {
            continue;
        }
        let a_int = BigInt::from(a.clone());
        let Some(d) = discriminant.mod_floor(&a_int).to_biguint() else {
            continue;
        };
        if d.is_zero() {
            continue;
        }
        // Критерий Эйлера
        let legendre = d.modpow(&((&a - 1u32) >> 1u32), &a);
        if !legendre.is_one() {
            continue;
        }
        debug_assert_eq!(&a % &four, three);
        let root = d.modpow(&((&a + 1u32) >> 2u32), &a);
        return Some((a, root));
    }
    None
}
