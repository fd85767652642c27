//! The KMS capability surface (spec.md §6): a narrow interface the Key
//! Manager consumes. The concrete cloud KMS client is an external
//! collaborator and out of scope; this crate only defines the contract plus
//! a local no-op double used in tests.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KmsError {
    #[error("KMS call timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("KMS request failed: {0}")]
    RequestFailed(String),
}

#[derive(Debug, Clone)]
pub struct DataKeySpec {
    pub key_id: String,
    pub key_length_bytes: usize,
}

/// `generate_data_key`, `encrypt`, `decrypt` — all three may fail with a
/// KMS-specific error kind. Synchronous, RPC-style: the Key Manager holds a
/// lock around the cache while calling through this trait (spec.md §5).
pub trait KmsClient: Send + Sync {
    fn generate_data_key(&self, spec: &DataKeySpec) -> Result<(Vec<u8>, Vec<u8>), KmsError>;
    fn encrypt(&self, key_id: &str, bytes: &[u8]) -> Result<Vec<u8>, KmsError>;
    fn decrypt(&self, key_id: &str, wrapped: &[u8]) -> Result<Vec<u8>, KmsError>;
}

/// A local test double that "wraps" by returning the bytes unchanged. Never
/// used in production; only for integration tests that want a `KmsClient`
/// without a real cloud dependency.
#[derive(Debug, Default)]
pub struct NoopKmsClient;

impl KmsClient for NoopKmsClient {
    fn generate_data_key(&self, spec: &DataKeySpec) -> Result<(Vec<u8>, Vec<u8>), KmsError> {
        let plaintext = vec![0x42u8; spec.key_length_bytes];
        let wrapped = plaintext.clone();
        Ok((plaintext, wrapped))
    }

    fn encrypt(&self, _key_id: &str, bytes: &[u8]) -> Result<Vec<u8>, KmsError> {
        Ok(bytes.to_vec())
    }

    fn decrypt(&self, _key_id: &str, wrapped: &[u8]) -> Result<Vec<u8>, KmsError> {
        Ok(wrapped.to_vec())
    }
}
