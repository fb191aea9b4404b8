//! Random prime generation over `num-bigint`.
//!
//! Candidates are drawn with an exact bit width, forced odd, and tested with
//! trial division followed by Miller-Rabin over fixed bases. Generation loops
//! until a candidate passes; there is no iteration cap.

use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::Rng;

/// Small primes used for trial division before Miller-Rabin.
const SMALL_PRIMES: [u32; 25] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89,
    97,
];

/// Miller-Rabin witnesses. Deterministic below 3.3 * 10^24, probabilistic above.
const MILLER_RABIN_BASES: [u32; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

/// Returns true if `candidate` passes trial division and Miller-Rabin.
pub fn is_probable_prime(candidate: &BigUint) -> bool {
    let one = BigUint::one();
    let two = BigUint::from(2u32);
    if *candidate < two {
        return false;
    }

    for &p in SMALL_PRIMES.iter() {
        let p = BigUint::from(p);
        if *candidate == p {
            return true;
        }
        if (candidate % &p).is_zero() {
            return false;
        }
    }

    // candidate - 1 = d * 2^s with d odd
    let n_minus_one = candidate - &one;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    'witness: for &base in MILLER_RABIN_BASES.iter() {
        let a = BigUint::from(base);
        let mut x = a.modpow(&d, candidate);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, candidate);
            if x == n_minus_one {
                continue 'witness;
            }
            if x == one {
                return false;
            }
        }
        return false;
    }

    true
}

/// Draw a uniformly random odd integer of exactly `bits` bits.
///
/// `bits` must be at least 2; callers validate the width.
pub fn random_odd_with_exact_width<R: Rng + ?Sized>(bits: u64, rng: &mut R) -> BigUint {
    let mut candidate = rng.gen_biguint(bits);
    candidate |= BigUint::one() << (bits - 1);
    candidate |= BigUint::one();
    candidate
}

/// Generate a prime of exactly `bits` bits, retrying until one is found.
pub fn generate_prime<R: Rng + ?Sized>(bits: u64, rng: &mut R) -> BigUint {
    loop {
        let candidate = random_odd_with_exact_width(bits, rng);
        if is_probable_prime(&candidate) {
            return candidate;
        }
    }
}
