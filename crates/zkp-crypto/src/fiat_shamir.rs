//! Fiat-Shamir identification arithmetic.
//!
//! The prover knows `s` and publishes `v = s^2 mod n` where `n = p * q`.
//! One round: commit `x = r^2 mod n`, receive challenge `c`, answer
//! `y = r * s^c mod n`. The verifier accepts when `y^2 == x * v^c (mod n)`.

use num_bigint::{BigUint, RandBigInt};
use num_traits::One;
use rand::Rng;

use crate::prime::generate_prime;

/// Smallest prime width that can produce a usable modulus.
pub const MIN_COPRIME_WIDTH: u64 = 2;

/// Width below which a modulus is considered weak (RSA-style minimum).
pub const RECOMMENDED_COPRIME_WIDTH: u64 = 1024;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("coprime width {0} is below the minimum of 2 bits")]
    InvalidWidth(u64),
    #[error("modulus must be greater than one")]
    DegenerateModulus,
}

/// The two secret primes and their product.
pub struct Modulus {
    pub p: BigUint,
    pub q: BigUint,
    pub n: BigUint,
}

impl std::fmt::Debug for Modulus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Modulus")
            .field("n_bits", &self.n.bits())
            .finish_non_exhaustive()
    }
}

impl Modulus {
    /// Generate two independent primes of `coprime_width` bits each.
    pub fn generate<R: Rng + ?Sized>(coprime_width: u64, rng: &mut R) -> Result<Self, KeyError> {
        if coprime_width < MIN_COPRIME_WIDTH {
            return Err(KeyError::InvalidWidth(coprime_width));
        }
        let p = generate_prime(coprime_width, rng);
        let q = generate_prime(coprime_width, rng);
        let n = &p * &q;
        Ok(Self { p, q, n })
    }
}

fn check_modulus(n: &BigUint) -> Result<(), KeyError> {
    if *n <= BigUint::one() {
        return Err(KeyError::DegenerateModulus);
    }
    Ok(())
}

/// `v = s^2 mod n`
pub fn witness(s: &BigUint, n: &BigUint) -> Result<BigUint, KeyError> {
    check_modulus(n)?;
    Ok(s.modpow(&BigUint::from(2u32), n))
}

/// Draw the per-round secret `r` uniformly from `[1, n)`.
pub fn random_exponent<R: Rng + ?Sized>(n: &BigUint, rng: &mut R) -> Result<BigUint, KeyError> {
    check_modulus(n)?;
    Ok(rng.gen_biguint_range(&BigUint::one(), n))
}

/// `x = r^2 mod n`
pub fn commitment(r: &BigUint, n: &BigUint) -> Result<BigUint, KeyError> {
    witness(r, n)
}

/// `y = r * s^c mod n`
pub fn challenge_response(
    r: &BigUint,
    s: &BigUint,
    challenge: &BigUint,
    n: &BigUint,
) -> Result<BigUint, KeyError> {
    check_modulus(n)?;
    let s_pow = s.modpow(challenge, n);
    Ok((r * s_pow) % n)
}

/// Verifier side: `y^2 mod n == x * v^c mod n`.
///
/// Only the identity is checked. A zero `y` passes when `x * v^c` is zero
/// mod `n`, which needs a secret or commitment sharing a factor with `n`.
pub fn verify_response(
    y: &BigUint,
    x: &BigUint,
    v: &BigUint,
    challenge: &BigUint,
    n: &BigUint,
) -> bool {
    if check_modulus(n).is_err() {
        return false;
    }
    let lhs = y.modpow(&BigUint::from(2u32), n);
    let rhs = (x * v.modpow(challenge, n)) % n;
    lhs == rhs
}

/// Big-endian unsigned encoding.
pub fn to_bytes(value: &BigUint) -> Vec<u8> {
    value.to_bytes_be()
}

pub fn from_bytes(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_be(bytes)
}
