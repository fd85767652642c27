// Shared Cryptographic Primitives
// Hashing and secure-randomness helpers shared across the securelog crates.

//! # Crypto Primitives
//!
//! Small, dependency-light building blocks re-used by the masking, integrity,
//! and envelope-encryption crates: domain-agnostic hashing and a wrapper
//! around a CSPRNG. Nothing here is aware of log records or the pipeline.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use blake3::Hasher as Blake3Hasher;
use ring::rand as ring_rand;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    #[error("random generation failed: {0}")]
    RandomGenerationFailed(String),
    #[error("hash computation failed: {0}")]
    HashFailed(String),
}

/// Hash algorithms supported by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
    Blake3,
}

/// Cryptographic hash result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hash {
    pub algorithm: HashAlgorithm,
    pub bytes: Vec<u8>,
}

impl Hash {
    pub fn new(algorithm: HashAlgorithm, bytes: Vec<u8>) -> Self {
        Hash { algorithm, bytes }
    }

    /// Get hash as hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// Create hash from a hex string.
    pub fn from_hex(algorithm: HashAlgorithm, hex_str: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| CryptoError::HashFailed(format!("invalid hex: {}", e)))?;
        Ok(Hash::new(algorithm, bytes))
    }
}

/// Hash data using the specified algorithm.
pub fn hash_data(data: &[u8], algorithm: HashAlgorithm) -> Hash {
    let bytes = match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(data);
            hasher.finalize().to_vec()
        }
        HashAlgorithm::Sha512 => {
            let mut hasher = Sha512::new();
            hasher.update(data);
            hasher.finalize().to_vec()
        }
        HashAlgorithm::Blake3 => {
            let mut hasher = Blake3Hasher::new();
            hasher.update(data);
            hasher.finalize().as_bytes().to_vec()
        }
    };

    Hash::new(algorithm, bytes)
}

/// Compute SHA-256 directly into a fixed-size array; the hot path used by the
/// integrity chain, which always wants exactly 32 bytes and never wants to
/// allocate a `Hash` wrapper for it.
pub fn sha256_fixed(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Secure random number generation, backed by `ring`'s system RNG.
pub struct SecureRandom {
    rng: ring_rand::SystemRandom,
}

impl SecureRandom {
    pub fn new() -> Self {
        SecureRandom {
            rng: ring_rand::SystemRandom::new(),
        }
    }

    /// Fill a buffer with random bytes.
    pub fn fill(&self, dest: &mut [u8]) -> Result<(), CryptoError> {
        ring_rand::SecureRandom::fill(&self.rng, dest)
            .map_err(|e| CryptoError::RandomGenerationFailed(format!("{:?}", e)))
    }

    /// Generate a vector of random bytes.
    pub fn generate_bytes(&self, len: usize) -> Result<Vec<u8>, CryptoError> {
        let mut bytes = vec![0u8; len];
        self.fill(&mut bytes)?;
        Ok(bytes)
    }

    /// Generate a fixed-size array of random bytes.
    pub fn generate_array<const N: usize>(&self) -> Result<[u8; N], CryptoError> {
        let mut bytes = [0u8; N];
        self.fill(&mut bytes)?;
        Ok(bytes)
    }
}

impl Default for SecureRandom {
    fn default() -> Self {
        Self::new()
    }
}
