//! The Integrity Chain: `chain(record) -> record'` where
//! `record'.integrity = "sha256:" + hex(SHA-256(prev || canon(record)))`.
//!
//! `canon()` picks a single, documented key-ordering contract rather than
//! leaving it implementation-defined (spec.md §9 open question): payload
//! maps preserve insertion order (via `serde_json`'s `preserve_order`
//! feature, enabled workspace-wide); the context map is sorted by key
//! (`BTreeMap`). Both are internally deterministic, which is what the
//! invariant actually requires.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub const ZERO_SEED: [u8; 32] = [0u8; 32];

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("canonicalization failed: {0}")]
    CanonicalizationFailed(String),
    #[error("integrity field has unexpected prefix (expected \"sha256:\")")]
    BadPrefix,
    #[error("integrity field is not valid hex: {0}")]
    BadHex(String),
}

/// Borrowed view over the stable fields of a log record that participate in
/// canonicalization. Owned by the caller (`securelog-core::LogRecord`); this
/// crate never needs to know about the rest of the record.
pub struct ChainInput<'a> {
    pub timestamp_ms: i64,
    pub level: &'a str,
    pub trace_id: Option<&'a str>,
    pub span_id: Option<&'a str>,
    pub message: &'a str,
    pub payload: &'a Map<String, Value>,
    pub context: &'a BTreeMap<String, String>,
    pub exception: Option<ExceptionRef<'a>>,
}

pub struct ExceptionRef<'a> {
    pub class_name: &'a str,
    pub message: &'a str,
}

#[derive(Serialize)]
struct CanonicalRecord<'a> {
    timestamp_ms: i64,
    level: &'a str,
    trace_id: Option<&'a str>,
    span_id: Option<&'a str>,
    message: &'a str,
    payload: &'a Map<String, Value>,
    context: &'a BTreeMap<String, String>,
    exception: Option<CanonicalException<'a>>,
}

#[derive(Serialize)]
struct CanonicalException<'a> {
    class_name: &'a str,
    message: &'a str,
}

/// Deterministically encode the stable fields of a record. The sequence
/// number is metadata, not part of `canon()`.
pub fn canon(input: &ChainInput<'_>) -> Result<Vec<u8>, IntegrityError> {
    let canonical = CanonicalRecord {
        timestamp_ms: input.timestamp_ms,
        level: input.level,
        trace_id: input.trace_id,
        span_id: input.span_id,
        message: input.message,
        payload: input.payload,
        context: input.context,
        exception: input
            .exception
            .as_ref()
            .map(|e| CanonicalException { class_name: e.class_name, message: e.message }),
    };
    serde_json::to_vec(&canonical).map_err(|e| IntegrityError::CanonicalizationFailed(e.to_string()))
}

/// The result of chaining one record: its textual integrity field and the
/// sequence number assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainedHash {
    pub integrity_field: String,
    pub sequence: u64,
}

struct ChainRegister {
    prev_hash: [u8; 32],
}

/// Single per-process mutable chain state: the 32-byte previous-hash
/// register plus a monotonic sequence, guarded by a short critical section.
/// Canonicalization happens outside the lock; only the hash-combine and
/// register swap are serialized.
pub struct IntegrityChain {
    register: Mutex<ChainRegister>,
    sequence: AtomicU64,
}

impl IntegrityChain {
    pub fn new() -> Self {
        Self {
            register: Mutex::new(ChainRegister { prev_hash: ZERO_SEED }),
            sequence: AtomicU64::new(0),
        }
    }

    /// Chain a pre-canonicalized record onto the register, returning its
    /// textual integrity field. This is the only operation that takes the
    /// lock; callers should canonicalize before calling this.
    pub fn chain(&self, canon_bytes: &[u8]) -> ChainedHash {
        let mut register = self.register.lock();
        let mut combined = Vec::with_capacity(32 + canon_bytes.len());
        combined.extend_from_slice(&register.prev_hash);
        combined.extend_from_slice(canon_bytes);
        let new_hash = crypto_primitives::sha256_fixed(&combined);
        register.prev_hash = new_hash;
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        drop(register);

        ChainedHash {
            integrity_field: format!("sha256:{}", hex::encode(new_hash)),
            sequence,
        }
    }

    /// Current chain head, for diagnostics or admin inspection.
    pub fn head(&self) -> [u8; 32] {
        self.register.lock().prev_hash
    }

    /// Administrative reset: clear the register to the zero seed. The
    /// post-reset chain is independent of everything chained before it;
    /// downstream verifiers must be told out of band.
    pub fn reset(&self) {
        let mut register = self.register.lock();
        register.prev_hash = ZERO_SEED;
        self.sequence.store(0, Ordering::SeqCst);
        tracing::warn!("integrity chain reset to zero seed");
    }
}

impl Default for IntegrityChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse an integrity field of the form `sha256:<hex>` back into raw bytes.
pub fn parse_integrity_field(field: &str) -> Result<[u8; 32], IntegrityError> {
    let hex_part = field.strip_prefix("sha256:").ok_or(IntegrityError::BadPrefix)?;
    let bytes = hex::decode(hex_part).map_err(|e| IntegrityError::BadHex(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| IntegrityError::BadHex("expected 32 bytes".to_string()))
}

/// Walk records in order, recomputing the chain from `seed`, and compare
/// against each record's claimed integrity field. Returns `false` on the
/// first mismatch (including reordering, which changes what `canon()`
/// hashes against).
pub fn verify_chain(seed: [u8; 32], records: &[(Vec<u8>, String)]) -> bool {
    let mut prev = seed;
    for (canon_bytes, claimed) in records {
        let mut combined = Vec::with_capacity(32 + canon_bytes.len());
        combined.extend_from_slice(&prev);
        combined.extend_from_slice(canon_bytes);
        let computed = crypto_primitives::sha256_fixed(&combined);
        let expected = format!("sha256:{}", hex::encode(computed));
        if &expected != claimed {
            return false;
        }
        prev = computed;
    }
    true
}
