//! The Key Manager (spec.md §4.4): a cached symmetric KEK, backed either by
//! a real KMS capability or — when KMS is absent and fallback is explicitly
//! permitted — a dev-only seeded key persisted on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use prometheus::Counter;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::capability::{DataKeySpec, KmsClient, KmsError};
use crypto_primitives::SecureRandom;

pub const FALLBACK_KEY_LEN: usize = 32;
const FALLBACK_SEED_FILE: &str = "fallback.seed";
const FALLBACK_KEY_FILE: &str = "fallback.key";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("KMS error: {0}")]
    Kms(#[from] KmsError),
    #[error("I/O error persisting fallback key material: {0}")]
    Io(String),
    #[error("ciphertext failed authentication (tamper or corruption)")]
    TamperDetected,
    #[error("encryption failure: {0}")]
    EncryptionFailed(String),
}

/// `(key_material, acquired_at)` cached as a single value behind one lock so
/// a reader can never observe a key paired with a stale timestamp.
struct CachedKek {
    key: Zeroizing<Vec<u8>>,
    acquired_at: Instant,
}

pub struct KeyManager {
    cache: Mutex<Option<CachedKek>>,
    kms: Option<Arc<dyn KmsClient>>,
    key_id: String,
    ttl: Duration,
    fallback_enabled: bool,
    fallback_dir: PathBuf,
    rng: SecureRandom,
    kms_failure_counter: Option<Counter>,
}

impl KeyManager {
    pub fn new(
        kms: Option<Arc<dyn KmsClient>>,
        key_id: impl Into<String>,
        ttl: Duration,
        fallback_enabled: bool,
        fallback_dir: impl Into<PathBuf>,
    ) -> Result<Self, CryptoError> {
        if kms.is_none() && !fallback_enabled {
            return Err(CryptoError::Configuration(
                "KMS is not configured and fallback is disabled".to_string(),
            ));
        }
        Ok(Self {
            cache: Mutex::new(None),
            kms,
            key_id: key_id.into(),
            ttl,
            fallback_enabled,
            fallback_dir: fallback_dir.into(),
            rng: SecureRandom::new(),
            kms_failure_counter: None,
        })
    }

    /// Attach a counter incremented whenever a KMS call fails, for
    /// operators wiring this key manager into a metrics registry.
    pub fn with_kms_failure_counter(mut self, counter: Counter) -> Self {
        self.kms_failure_counter = Some(counter);
        self
    }

    fn note_kms_failure(&self) {
        if let Some(counter) = &self.kms_failure_counter {
            counter.inc();
        }
    }

    /// Return the cached KEK if within TTL; otherwise acquire the process
    /// lock, re-check (another thread may have refreshed it already), and
    /// either pull a fresh data key from KMS or fall back to the seeded dev
    /// key.
    pub fn get_kek(&self) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        {
            let cache = self.cache.lock();
            if let Some(cached) = cache.as_ref() {
                if cached.acquired_at.elapsed() < self.ttl {
                    return Ok(cached.key.clone());
                }
            }
        }

        let mut cache = self.cache.lock();
        if let Some(cached) = cache.as_ref() {
            if cached.acquired_at.elapsed() < self.ttl {
                return Ok(cached.key.clone());
            }
        }

        let key = match &self.kms {
            Some(kms) => {
                let spec = DataKeySpec { key_id: self.key_id.clone(), key_length_bytes: FALLBACK_KEY_LEN };
                let (plaintext, _wrapped) = kms.generate_data_key(&spec).map_err(|e| {
                    self.note_kms_failure();
                    e
                })?;
                Zeroizing::new(plaintext)
            }
            None if self.fallback_enabled => self.load_or_create_fallback_kek()?,
            None => {
                return Err(CryptoError::Configuration(
                    "KMS unavailable and fallback disabled".to_string(),
                ))
            }
        };

        *cache = Some(CachedKek { key: key.clone(), acquired_at: Instant::now() });
        Ok(key)
    }

    /// Wrap a per-record DEK. Delegates to the KMS capability; in fallback
    /// mode (no KMS configured) this is a no-op pass-through, consistent
    /// with the fallback KEK being a dev-only, explicitly non-production
    /// key — never used unless `fallback_enabled` was set at construction.
    pub fn wrap(&self, dek: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match &self.kms {
            Some(kms) => Ok(kms.encrypt(&self.key_id, dek).map_err(|e| {
                self.note_kms_failure();
                e
            })?),
            None => Ok(dek.to_vec()),
        }
    }

    pub fn unwrap(&self, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        match &self.kms {
            Some(kms) => Ok(Zeroizing::new(kms.decrypt(&self.key_id, wrapped).map_err(|e| {
                self.note_kms_failure();
                e
            })?)),
            None => Ok(Zeroizing::new(wrapped.to_vec())),
        }
    }

    /// Invalidate the cache; the next `get_kek()` call re-acquires.
    pub fn rotate(&self) {
        let mut cache = self.cache.lock();
        *cache = None;
        tracing::info!("KEK cache invalidated by rotate()");
    }

    fn load_or_create_fallback_kek(&self) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        tracing::warn!(
            directory = %self.fallback_dir.display(),
            "using seeded fallback KEK — this mode is NOT production-safe"
        );

        fs::create_dir_all(&self.fallback_dir).map_err(|e| CryptoError::Io(e.to_string()))?;

        let seed_path = self.fallback_dir.join(FALLBACK_SEED_FILE);
        let key_path = self.fallback_dir.join(FALLBACK_KEY_FILE);

        if let (Ok(seed), Ok(key)) = (fs::read(&seed_path), fs::read(&key_path)) {
            if seed.len() == FALLBACK_KEY_LEN && key.len() == FALLBACK_KEY_LEN {
                return Ok(Zeroizing::new(key));
            }
            tracing::warn!("fallback key material has the wrong size, regenerating");
            let _ = fs::remove_file(&seed_path);
            let _ = fs::remove_file(&key_path);
        }

        let seed: [u8; FALLBACK_KEY_LEN] = self
            .rng
            .generate_array()
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        let derived = crypto_primitives::sha256_fixed(&seed);

        write_owner_only(&seed_path, &seed)?;
        write_owner_only(&key_path, &derived)?;

        Ok(Zeroizing::new(derived.to_vec()))
    }
}

#[cfg(unix)]
fn write_owner_only(path: &Path, bytes: &[u8]) -> Result<(), CryptoError> {
    use std::os::unix::fs::PermissionsExt;
    fs::write(path, bytes).map_err(|e| CryptoError::Io(e.to_string()))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| CryptoError::Io(e.to_string()))
}

#[cfg(not(unix))]
fn write_owner_only(path: &Path, bytes: &[u8]) -> Result<(), CryptoError> {
    tracing::warn!(
        path = %path.display(),
        "platform cannot enforce owner-only file permissions on fallback key material"
    );
    fs::write(path, bytes).map_err(|e| CryptoError::Io(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{DataKeySpec, KmsClient, KmsError, NoopKmsClient};

    struct FailingKmsClient;

    impl KmsClient for FailingKmsClient {
        fn generate_data_key(&self, _spec: &DataKeySpec) -> Result<(Vec<u8>, Vec<u8>), KmsError> {
            Err(KmsError::RequestFailed("always fails".to_string()))
        }
        fn encrypt(&self, _key_id: &str, _bytes: &[u8]) -> Result<Vec<u8>, KmsError> {
            Err(KmsError::RequestFailed("always fails".to_string()))
        }
        fn decrypt(&self, _key_id: &str, _wrapped: &[u8]) -> Result<Vec<u8>, KmsError> {
            Err(KmsError::RequestFailed("always fails".to_string()))
        }
    }

    #[test]
    fn attached_counter_increments_on_kms_failure() {
        let counter = prometheus::Counter::new("test_kms_failures", "test").unwrap();
        let manager = KeyManager::new(Some(Arc::new(FailingKmsClient)), "key-1", Duration::from_secs(300), false, "/unused")
            .unwrap()
            .with_kms_failure_counter(counter.clone());

        assert!(manager.get_kek().is_err());
        assert_eq!(counter.get(), 1.0);
        assert!(manager.wrap(b"dek").is_err());
        assert_eq!(counter.get(), 2.0);
    }

    #[test]
    fn kms_path_caches_within_ttl() {
        let manager = KeyManager::new(
            Some(Arc::new(NoopKmsClient)),
            "key-1",
            Duration::from_secs(300),
            false,
            "/unused",
        )
        .unwrap();
        let k1 = manager.get_kek().unwrap();
        let k2 = manager.get_kek().unwrap();
        assert_eq!(*k1, *k2);
    }

    #[test]
    fn rotate_forces_refresh() {
        let manager = KeyManager::new(
            Some(Arc::new(NoopKmsClient)),
            "key-1",
            Duration::from_secs(300),
            false,
            "/unused",
        )
        .unwrap();
        manager.get_kek().unwrap();
        manager.rotate();
        let k2 = manager.get_kek().unwrap();
        assert_eq!(k2.len(), FALLBACK_KEY_LEN);
    }

    #[test]
    fn fallback_kek_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let m1 = KeyManager::new(None, "unused", Duration::from_secs(1), true, dir.path()).unwrap();
        let key1 = m1.get_kek().unwrap();

        let m2 = KeyManager::new(None, "unused", Duration::from_secs(1), true, dir.path()).unwrap();
        let key2 = m2.get_kek().unwrap();

        assert_eq!(*key1, *key2);
    }

    #[test]
    fn fallback_disabled_without_kms_is_a_configuration_error() {
        let result = KeyManager::new(None, "unused", Duration::from_secs(1), false, "/unused");
        assert!(matches!(result, Err(CryptoError::Configuration(_))));
    }

    #[test]
    fn corrupt_fallback_file_is_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(FALLBACK_SEED_FILE), [1u8; 10]).unwrap();
        fs::write(dir.path().join(FALLBACK_KEY_FILE), [2u8; FALLBACK_KEY_LEN]).unwrap();

        let manager = KeyManager::new(None, "unused", Duration::from_secs(1), true, dir.path()).unwrap();
        let key = manager.get_kek().unwrap();
        assert_eq!(key.len(), FALLBACK_KEY_LEN);
    }
}
