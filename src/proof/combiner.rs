//! Combiner
//!
//! Folds a set of revealed secrets into one [`CombinedSeed`].
//!
//! The secrets are sorted bytewise and hashed as
//! `SHA-256(COMBINE_DOMAIN || count_le32 || s_1 || ... || s_n)`, so arrival
//! order never changes the output and no strict subset can steer it: the
//! final hash is not invertible even when all but one input is known.
//! Duplicate secrets are kept (multiset semantics).
//!
//! Event-derived entropy is absorbed after a separator so it can never be
//! mistaken for a committed secret.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::hash::{Digest, DomainHasher, COMBINE_DOMAIN};
use crate::core::rng::DeterministicRng;
use crate::core::secret::Secret;
use crate::ledger::entropy::EventEntropy;

/// Separator between committed secrets and external entropy.
const EXTERNAL_SEPARATOR: &[u8] = b"EXTERNAL";

/// Combined randomness produced by a round.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CombinedSeed(pub Digest);

impl CombinedSeed {
    /// Raw seed bytes.
    pub fn as_bytes(&self) -> &Digest {
        &self.0
    }

    /// Expand into a deterministic PRNG.
    pub fn rng(&self) -> DeterministicRng {
        DeterministicRng::from_seed_bytes(&self.0)
    }

    /// Draw stream reserved for one use of the seed.
    pub fn rng_for(&self, purpose: &[u8]) -> DeterministicRng {
        DeterministicRng::for_purpose(&self.0, purpose)
    }
}

impl fmt::Debug for CombinedSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CombinedSeed({})", hex::encode(self.0))
    }
}

impl fmt::Display for CombinedSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Combine revealed secrets.
pub fn combine<'a, I>(secrets: I) -> CombinedSeed
where
    I: IntoIterator<Item = &'a Secret>,
{
    combine_with_entropy(secrets, &[])
}

/// Combine revealed secrets together with external event entropy.
///
/// With an empty `external` slice this is identical to [`combine`].
pub fn combine_with_entropy<'a, I>(secrets: I, external: &[EventEntropy]) -> CombinedSeed
where
    I: IntoIterator<Item = &'a Secret>,
{
    let mut sorted: Vec<&[u8; 32]> = secrets.into_iter().map(Secret::as_bytes).collect();
    sorted.sort_unstable();

    let mut hasher = DomainHasher::new(COMBINE_DOMAIN);
    hasher.update_u32(sorted.len() as u32);
    for secret in &sorted {
        hasher.update_bytes(*secret);
    }

    if !external.is_empty() {
        let mut extra: Vec<&Digest> = external.iter().map(EventEntropy::as_bytes).collect();
        extra.sort_unstable();

        hasher.update_bytes(EXTERNAL_SEPARATOR);
        hasher.update_u32(extra.len() as u32);
        for value in extra {
            hasher.update_bytes(value);
        }
    }

    CombinedSeed(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::secret::SECRET_LEN;
    use proptest::prelude::*;

    fn secret(byte: u8) -> Secret {
        Secret::from_bytes([byte; SECRET_LEN])
    }

    #[test]
    fn test_order_independent() {
        let a = [secret(1), secret(2), secret(3)];
        let b = [secret(3), secret(1), secret(2)];
        assert_eq!(combine(&a), combine(&b));
    }

    #[test]
    fn test_single_secret_changes_output() {
        let a = [secret(1), secret(2)];
        let b = [secret(1), secret(3)];
        assert_ne!(combine(&a), combine(&b));
    }

    #[test]
    fn test_not_plain_xor() {
        // XOR of two equal secrets would be zero; the combiner must hash.
        let seed = combine(&[secret(7), secret(7)]);
        assert_ne!(seed.0, [0u8; 32]);
        assert_ne!(seed, combine(&[secret(7)]));
    }

    #[test]
    fn test_external_entropy() {
        let secrets = [secret(1), secret(2)];
        let e1 = EventEntropy([9; 32]);
        let e2 = EventEntropy([8; 32]);

        assert_eq!(combine_with_entropy(&secrets, &[]), combine(&secrets));
        assert_ne!(combine_with_entropy(&secrets, &[e1]), combine(&secrets));
        assert_eq!(
            combine_with_entropy(&secrets, &[e1, e2]),
            combine_with_entropy(&secrets, &[e2, e1]),
        );
    }

    #[test]
    fn test_seed_rng_is_reproducible() {
        let seed = combine(&[secret(4)]);
        assert_eq!(seed.rng().next_u64(), seed.rng().next_u64());
    }

    proptest! {
        #[test]
        fn prop_permutation_invariant(
            raw in prop::collection::vec(any::<[u8; 32]>(), 1..12),
            rotate in any::<prop::sample::Index>(),
        ) {
            let secrets: Vec<Secret> = raw.iter().copied().map(Secret::from_bytes).collect();
            let mut shuffled = secrets.clone();
            shuffled.reverse();
            let k = rotate.index(shuffled.len());
            shuffled.rotate_left(k);

            prop_assert_eq!(combine(&secrets), combine(&shuffled));
        }
    }
}
