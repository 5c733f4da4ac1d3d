//! Secrets and Their Generation
//!
//! A [`Secret`] is 32 bytes drawn from a cryptographically secure source.
//! It is wiped from memory on drop and never printed.

use std::fmt;
use rand::{CryptoRng, RngCore};
use rand::rngs::OsRng;
use serde::{Serialize, Deserialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of every secret in bytes (256 bits of entropy).
pub const SECRET_LEN: usize = 32;

/// Fixed-length random byte string owned by the party that generated it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Secret([u8; SECRET_LEN]);

impl Secret {
    /// Wrap raw bytes.
    pub const fn from_bytes(bytes: [u8; SECRET_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse from a byte slice of exactly [`SECRET_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; SECRET_LEN] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// The secure source could not be sampled.
#[derive(Debug, Clone, thiserror::Error)]
#[error("entropy unavailable: {reason}")]
pub struct EntropyUnavailable {
    /// Underlying failure reported by the source.
    pub reason: String,
}

/// Produces secrets on demand.
pub trait SecretGenerator: Send {
    /// Draw `count` fresh secrets.
    fn generate(&mut self, count: usize) -> Result<Vec<Secret>, EntropyUnavailable>;

    /// Draw a single secret.
    fn generate_one(&mut self) -> Result<Secret, EntropyUnavailable> {
        self.generate(1)?
            .pop()
            .ok_or_else(|| EntropyUnavailable { reason: "generator returned no secret".into() })
    }
}

/// Secret generator over any cryptographically secure RNG.
///
/// The `CryptoRng` bound keeps non-cryptographic generators out.
#[derive(Debug, Clone, Default)]
pub struct CryptoSecretGenerator<R> {
    rng: R,
}

/// Generator backed by the operating system CSPRNG.
pub type OsSecretGenerator = CryptoSecretGenerator<OsRng>;

impl OsSecretGenerator {
    /// Create a generator reading from the OS.
    pub fn os() -> Self {
        Self { rng: OsRng }
    }
}

impl<R: RngCore + CryptoRng> CryptoSecretGenerator<R> {
    /// Wrap a secure RNG.
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: RngCore + CryptoRng + Send> SecretGenerator for CryptoSecretGenerator<R> {
    fn generate(&mut self, count: usize) -> Result<Vec<Secret>, EntropyUnavailable> {
        let mut secrets = Vec::with_capacity(count);
        for _ in 0..count {
            let mut bytes = [0u8; SECRET_LEN];
            if let Err(e) = self.rng.try_fill_bytes(&mut bytes) {
                bytes.zeroize();
                return Err(EntropyUnavailable { reason: e.to_string() });
            }
            secrets.push(Secret(bytes));
            bytes.zeroize();
        }
        Ok(secrets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Secure-marked RNG whose source is permanently broken.
    struct BrokenRng;

    impl RngCore for BrokenRng {
        fn next_u32(&mut self) -> u32 {
            unreachable!("only try_fill_bytes is used")
        }

        fn next_u64(&mut self) -> u64 {
            unreachable!("only try_fill_bytes is used")
        }

        fn fill_bytes(&mut self, _dest: &mut [u8]) {
            unreachable!("only try_fill_bytes is used")
        }

        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand::Error> {
            Err(rand::Error::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                "device unavailable",
            )))
        }
    }

    impl CryptoRng for BrokenRng {}

    #[test]
    fn test_generates_requested_count() {
        let mut gen = OsSecretGenerator::os();
        let secrets = gen.generate(16).unwrap();
        assert_eq!(secrets.len(), 16);
    }

    #[test]
    fn test_secrets_are_distinct() {
        let mut gen = OsSecretGenerator::os();
        let secrets = gen.generate(64).unwrap();
        for (i, a) in secrets.iter().enumerate() {
            for b in &secrets[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_broken_source_propagates() {
        let mut gen = CryptoSecretGenerator::new(BrokenRng);
        let err = gen.generate(4).unwrap_err();
        assert!(err.reason.contains("device unavailable"));
        assert!(gen.generate_one().is_err());
    }

    #[test]
    fn test_zero_count() {
        let mut gen = OsSecretGenerator::os();
        assert!(gen.generate(0).unwrap().is_empty());
    }

    #[test]
    fn test_debug_redacts() {
        let secret = Secret::from_bytes([7; SECRET_LEN]);
        assert_eq!(format!("{:?}", secret), "Secret(<redacted>)");
    }

    #[test]
    fn test_from_slice_length() {
        assert!(Secret::from_slice(&[1; 31]).is_none());
        assert!(Secret::from_slice(&[1; 32]).is_some());
    }
}
