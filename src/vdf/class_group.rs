//! Class group мнимого квадратичного поля
//!
//! Элемент: приведённая бинарная квадратичная форма (a, b, c) с
//! b² − 4ac = Δ, Δ < 0, Δ ≡ 1 (mod 4). Порядок группы неизвестен, что и
//! делает последовательное возведение в квадрат "delay" функцией.
//!
//! Все операции над входом извне возвращают `Option`: некорректная форма
//! не должна приводить к панике или бесконечному циклу.

use num_bigint::{BigInt, BigUint, Sign};
use num_integer::Integer;
use num_traits::{One, Signed, Zero};
use serde::{Deserialize, Serialize};

/// Максимальная длина одного коэффициента в encoding (байт)
const MAX_COEFF_BYTES: usize = 1024;

/// Binary quadratic form (a, b, c)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupElement {
    pub a: BigInt,
    pub b: BigInt,
    pub c: BigInt,
}

impl GroupElement {
    /// Canonical encoding: len(a) ‖ a ‖ sign(b) ‖ len(b) ‖ |b|
    ///
    /// `c` не кодируется: восстанавливается из дискриминанта.
    pub fn to_bytes(&self) -> Vec<u8> {
        let a = self.a.magnitude().to_bytes_be();
        let b = self.b.magnitude().to_bytes_be();
        let mut out = Vec::with_capacity(5 + a.len() + b.len());
        out.extend_from_slice(&(a.len() as u16).to_be_bytes());
        out.extend_from_slice(&a);
        out.push(u8::from(self.b.sign() == Sign::Minus));
        out.extend_from_slice(&(b.len() as u16).to_be_bytes());
        out.extend_from_slice(&b);
        out
    }
}

/// Группа, заданная дискриминантом
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassGroup {
    discriminant: BigInt,
}

impl ClassGroup {
    /// Δ должен быть отрицательным и ≡ 1 (mod 4)
    pub fn new(discriminant: BigInt) -> Option<Self> {
        let four = BigInt::from(4);
        if !discriminant.is_negative() || !discriminant.mod_floor(&four).is_one() {
            return None;
        }
        Some(Self { discriminant })
    }

    pub fn discriminant(&self) -> &BigInt {
        &self.discriminant
    }

    /// Нейтральный элемент (1, 1, (1 − Δ)/4)
    pub fn identity(&self) -> GroupElement {
        let c = (BigInt::one() - &self.discriminant) / 4u32;
        GroupElement { a: BigInt::one(), b: BigInt::one(), c }
    }

    /// Построить форму по (a, b), вычислив c; None если c не целое
    pub fn form(&self, a: BigInt, b: BigInt) -> Option<GroupElement> {
        if !a.is_positive() {
            return None;
        }
        let num = &b * &b - &self.discriminant;
        let den = &a * 4u32;
        let (c, rem) = num.div_rem(&den);
        if !rem.is_zero() {
            return None;
        }
        Some(GroupElement { a, b, c })
    }

    /// Форма принадлежит группе: a > 0, b² − 4ac = Δ
    pub fn contains(&self, x: &GroupElement) -> bool {
        x.a.is_positive() && &x.b * &x.b - &x.a * &x.c * 4u32 == self.discriminant
    }

    /// |b| ≤ a ≤ c, и b ≥ 0 если |b| = a или a = c
    pub fn is_reduced(&self, x: &GroupElement) -> bool {
        if !self.contains(x) {
            return false;
        }
        let abs_b = x.b.abs();
        if abs_b > x.a || x.a > x.c {
            return false;
        }
        if (abs_b == x.a || x.a == x.c) && x.b.is_negative() {
            return false;
        }
        true
    }

    pub fn from_bytes(&self, bytes: &[u8]) -> Option<GroupElement> {
        let (a, rest) = read_coeff(bytes)?;
        let (&sign, rest) = rest.split_first()?;
        let (b_mag, rest) = read_coeff(rest)?;
        if !rest.is_empty() || sign > 1 || (sign == 1 && b_mag.is_zero()) {
            return None;
        }
        let b = match sign {
            1 => -BigInt::from(b_mag),
            _ => BigInt::from(b_mag),
        };
        let x = self.form(BigInt::from(a), b)?;
        self.is_reduced(&x).then_some(x)
    }

    /// Композиция форм (умножение в группе)
    pub fn compose(&self, x: &GroupElement, y: &GroupElement) -> Option<GroupElement> {
        let two = BigInt::from(2);
        let g = (&x.b + &y.b).div_floor(&two);
        let h = (&y.b - &x.b).div_floor(&two);
        let w = x.a.gcd(&y.a).gcd(&g);
        if w.is_zero() {
            return None;
        }
        let s = &x.a / &w;
        let t = &y.a / &w;
        let u = &g / &w;
        let st = &s * &t;

        // k·t·u ≡ h·u + s·c1 (mod s·t)
        let (k_temp, cf) = solve_mod(&(&t * &u), &(&h * &u + &s * &x.c), &st)?;
        let (n, _) = solve_mod(&(&t * &cf), &(&h - &t * &k_temp), &s)?;
        let k = &k_temp + &cf * &n;
        let l = exact_div(&(&t * &k - &h), &s)?;
        let m = exact_div(&(&t * &u * &k - &h * &u - &s * &x.c), &st)?;

        let a3 = st;
        let b3 = &w * &u - (&k * &t + &l * &s);
        let c3 = &k * &l - &w * &m;
        self.reduce(GroupElement { a: a3, b: b3, c: c3 })
    }

    /// Возведение в квадрат: одна итерация delay функции
    pub fn square(&self, x: &GroupElement) -> Option<GroupElement> {
        // b·μ ≡ c (mod a)
        let Some((mu, _)) = solve_mod(&x.b, &x.c, &x.a) else {
            return self.compose(x, x);
        };
        let a2 = &x.a * &x.a;
        let b2 = &x.b - &x.a * &mu * 2u32;
        let c2 = &mu * &mu - exact_div(&(&x.b * &mu - &x.c), &x.a)?;
        self.reduce(GroupElement { a: a2, b: b2, c: c2 })
    }

    /// x^e, square-and-multiply (только для verification)
    pub fn pow(&self, x: &GroupElement, e: &BigUint) -> Option<GroupElement> {
        let mut acc = self.identity();
        for i in (0..e.bits()).rev() {
            acc = self.square(&acc)?;
            if e.bit(i) {
                acc = self.compose(&acc, x)?;
            }
        }
        Some(acc)
    }

    /// Привести форму к каноническому представителю
    pub fn reduce(&self, x: GroupElement) -> Option<GroupElement> {
        if !self.contains(&x) {
            return None;
        }
        let GroupElement { mut a, mut b, mut c } = normalize(x)?;
        while a > c || (a == c && b.is_negative()) {
            if !c.is_positive() {
                return None;
            }
            let s = (&c + &b).div_floor(&(&c * 2u32));
            let next_b = &s * &c * 2u32 - &b;
            let next_c = &c * &s * &s - &b * &s + &a;
            a = std::mem::replace(&mut c, next_c);
            b = next_b;
        }
        normalize(GroupElement { a, b, c })
    }
}

/// b → (−a, a]
fn normalize(x: GroupElement) -> Option<GroupElement> {
    let GroupElement { a, b, c } = x;
    if !a.is_positive() {
        return None;
    }
    if -&a < b && b <= a {
        return Some(GroupElement { a, b, c });
    }
    let r = (&a - &b).div_floor(&(&a * 2u32));
    let nb = &b + &r * &a * 2u32;
    let nc = &a * &r * &r + &b * &r + &c;
    Some(GroupElement { a, b: nb, c: nc })
}

/// Решить a·x ≡ b (mod m): (x₀, шаг); None если решения нет
fn solve_mod(a: &BigInt, b: &BigInt, m: &BigInt) -> Option<(BigInt, BigInt)> {
    if !m.is_positive() {
        return None;
    }
    let e = a.extended_gcd(m);
    if e.gcd.is_zero() {
        return None;
    }
    let (q, r) = b.div_rem(&e.gcd);
    if !r.is_zero() {
        return None;
    }
    Some(((q * e.x).mod_floor(m), m / e.gcd.abs()))
}

fn exact_div(n: &BigInt, d: &BigInt) -> Option<BigInt> {
    if d.is_zero() {
        return None;
    }
    let (q, r) = n.div_rem(d);
    r.is_zero().then_some(q)
}

fn read_coeff(bytes: &[u8]) -> Option<(BigUint, &[u8])> {
    if bytes.len() < 2 {
        return None;
    }
    let (len, rest) = bytes.split_at(2);
    let len = u16::from_be_bytes([len[0], len[1]]) as usize;
    if len == 0 || len > MAX_COEFF_BYTES || rest.len() < len {
        return None;
    }
    let (value, rest) = rest.split_at(len);
    // без ведущих нулей: одно значение: одно encoding
    if len > 1 && value[0] == 0 {
        return None;
    }
    Some((BigUint::from_bytes_be(value), rest))
}
