
#[cfg(test)]
mod tests {
    use num_bigint::BigUint;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::fiat_shamir::{challenge_response, commitment, random_exponent, verify_response, witness, Modulus};
    use crate::pairing::PairingKey;
    use crate::prime::is_probable_prime;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        // Honest prover always passes for any challenge
        #[test]
        fn test_honest_round_verifies(
            seed in any::<u64>(),
            width in 8u64..48,
            secret in 1u64..,
            challenge in any::<u32>(),
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let modulus = Modulus::generate(width, &mut rng).unwrap();
            let n = &modulus.n;
            let s = BigUint::from(secret) % n;
            prop_assume!(s != BigUint::from(0u32));
            let v = witness(&s, n).unwrap();
            let r = random_exponent(n, &mut rng).unwrap();
            let x = commitment(&r, n).unwrap();
            let c = BigUint::from(challenge);
            let y = challenge_response(&r, &s, &c, n).unwrap();
            prop_assert!(verify_response(&y, &x, &v, &c, n));
        }

        #[test]
        fn test_generated_primes_have_exact_width(seed in any::<u64>(), width in 2u64..40) {
            let mut rng = StdRng::seed_from_u64(seed);
            let p = crate::prime::generate_prime(width, &mut rng);
            prop_assert_eq!(p.bits(), width);
            prop_assert!(is_probable_prime(&p));
        }

        #[test]
        fn test_sealed_payload_round_trip(
            ikm in any::<[u8; 32]>(),
            msg in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let key = PairingKey::derive(&ikm).unwrap();
            let sealed = key.seal(&msg).unwrap();
            prop_assert_eq!(sealed.len(), msg.len() + 12 + 16);
            prop_assert_eq!(key.open(&sealed).unwrap(), msg);
        }
    }
}
