//! Envelope Encryption (spec.md §4.3): a fresh 32-byte DEK and 12-byte nonce
//! per record, AES-256-GCM over the canonicalized payload, DEK wrapped via
//! the Key Manager.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use zeroize::Zeroizing;

use crate::key_manager::{CryptoError, KeyManager};
use crypto_primitives::SecureRandom;

pub const DEK_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

/// What leaves the pipeline after envelope encryption: a record whose
/// payload is `{"encrypted": base64(nonce || ciphertext || tag)}` and whose
/// wrapped DEK is `base64(KMS-wrap(DEK))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    pub encrypted_payload_b64: String,
    pub wrapped_dek_b64: String,
}

/// Encrypt `plaintext` (the canonicalized payload bytes) under a fresh DEK,
/// wrapping the DEK with the key manager's current KEK-backed capability.
/// `aad` may include timestamp/trace-id per spec.md §4.3 step 3.
pub fn encrypt(
    key_manager: &KeyManager,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<EncryptedEnvelope, CryptoError> {
    let rng = SecureRandom::new();
    let dek: Zeroizing<[u8; DEK_LEN]> = Zeroizing::new(
        rng.generate_array()
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?,
    );
    let nonce_bytes: [u8; NONCE_LEN] = rng
        .generate_array()
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let cipher = Aes256Gcm::new_from_slice(dek.as_slice())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);

    let wrapped_dek = key_manager.wrap(dek.as_slice())?;

    // `dek` is `Zeroizing` and is zeroed here when it drops at scope end.
    Ok(EncryptedEnvelope {
        encrypted_payload_b64: BASE64.encode(combined),
        wrapped_dek_b64: BASE64.encode(wrapped_dek),
    })
}

/// Reverse of `encrypt`. A GCM tag failure surfaces as
/// `CryptoError::TamperDetected`, distinct from any other decrypt failure.
pub fn decrypt(
    key_manager: &KeyManager,
    envelope: &EncryptedEnvelope,
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let wrapped_dek = BASE64
        .decode(&envelope.wrapped_dek_b64)
        .map_err(|e| CryptoError::EncryptionFailed(format!("invalid base64 wrapped_dek: {e}")))?;
    let dek = key_manager.unwrap(&wrapped_dek)?;

    let combined = BASE64
        .decode(&envelope.encrypted_payload_b64)
        .map_err(|e| CryptoError::EncryptionFailed(format!("invalid base64 payload: {e}")))?;
    if combined.len() < NONCE_LEN {
        return Err(CryptoError::EncryptionFailed("ciphertext shorter than nonce".to_string()));
    }
    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new_from_slice(dek.as_slice())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::TamperDetected)?;

    Ok(Zeroizing::new(plaintext))
}
