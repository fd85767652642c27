//! The Serializer (spec.md §4.5): canonical-JSON encode, bounded-size
//! Zstandard compression, and a small self-describing frame header so
//! deserialization can validate the declared size before allocating.
//!
//! Frame layout: `b"SLF1"` (4 bytes) + declared plaintext length as a
//! little-endian `u64` (8 bytes) + the Zstandard-compressed plaintext.
//! Framing the declared length ourselves, rather than relying on the
//! Zstandard frame header's optional content-size field, keeps the size
//! check independent of the compression backend's internals.

use serde_json::Value;
use thiserror::Error;

const MAGIC: &[u8; 4] = b"SLF1";
const HEADER_LEN: usize = 4 + 8;

/// Default bound from spec.md §4.5: 100 MiB.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 100 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum SerializerError {
    #[error("compression level {0} is outside the valid range 1..=22")]
    InvalidCompressionLevel(i32),
    #[error("canonical size {actual} exceeds the configured limit of {limit} bytes")]
    SizeExceeded { actual: usize, limit: usize },
    #[error("encoder error: {0}")]
    EncodeFailed(String),
    #[error("frame is truncated or missing its header")]
    TruncatedFrame,
    #[error("frame magic does not match this serializer")]
    BadMagic,
    #[error("declared decompressed size ({declared}) exceeds the configured limit of {limit} bytes")]
    DeclaredSizeExceedsLimit { declared: u64, limit: usize },
    #[error("declared decompressed size does not fit in memory on this platform")]
    DeclaredSizeOverflow,
    #[error("decompressed size ({actual}) does not match the declared size ({declared})")]
    SizeMismatch { declared: u64, actual: usize },
    #[error("decoder error: {0}")]
    DecodeFailed(String),
}

#[derive(Debug, Clone)]
pub struct SerializerConfig {
    pub compression_level: i32,
    pub max_payload_size: usize,
}

impl SerializerConfig {
    pub fn new(compression_level: i32, max_payload_size: usize) -> Result<Self, SerializerError> {
        if !(1..=22).contains(&compression_level) {
            return Err(SerializerError::InvalidCompressionLevel(compression_level));
        }
        Ok(Self { compression_level, max_payload_size })
    }
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self { compression_level: 3, max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE }
    }
}

/// Encode `value` to canonical JSON, enforce the size bound, then compress.
pub fn serialize(value: &Value, config: &SerializerConfig) -> Result<Vec<u8>, SerializerError> {
    let plaintext = serde_json::to_vec(value).map_err(|e| SerializerError::EncodeFailed(e.to_string()))?;
    if plaintext.len() > config.max_payload_size {
        return Err(SerializerError::SizeExceeded { actual: plaintext.len(), limit: config.max_payload_size });
    }

    let compressed = zstd::stream::encode_all(&plaintext[..], config.compression_level)
        .map_err(|e| SerializerError::EncodeFailed(e.to_string()))?;

    let mut frame = Vec::with_capacity(HEADER_LEN + compressed.len());
    frame.extend_from_slice(MAGIC);
    frame.extend_from_slice(&(plaintext.len() as u64).to_le_bytes());
    frame.extend_from_slice(&compressed);
    Ok(frame)
}

/// Decompress and parse a frame produced by `serialize`, bounded by
/// `config.max_payload_size`. Aborts before decompressing if the declared
/// size is negative (not representable — `u64` already excludes this),
/// overflows `usize`, or exceeds the configured limit.
pub fn deserialize(frame: &[u8], config: &SerializerConfig) -> Result<Value, SerializerError> {
    if frame.len() < HEADER_LEN {
        return Err(SerializerError::TruncatedFrame);
    }
    if &frame[0..4] != MAGIC {
        return Err(SerializerError::BadMagic);
    }

    let declared_len = u64::from_le_bytes(frame[4..12].try_into().unwrap());
    let declared_usize: usize = declared_len.try_into().map_err(|_| SerializerError::DeclaredSizeOverflow)?;
    if declared_usize > config.max_payload_size {
        return Err(SerializerError::DeclaredSizeExceedsLimit { declared: declared_len, limit: config.max_payload_size });
    }

    let compressed = &frame[HEADER_LEN..];
    let plaintext = zstd::bulk::decompress(compressed, declared_usize)
        .map_err(|e| SerializerError::DecodeFailed(e.to_string()))?;

    if plaintext.len() != declared_usize {
        return Err(SerializerError::SizeMismatch { declared: declared_len, actual: plaintext.len() });
    }

    serde_json::from_slice(&plaintext).map_err(|e| SerializerError::DecodeFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn round_trip() {
        let config = SerializerConfig::default();
        let value = json!({"a": 1, "b": [1,2,3], "c": {"nested": true}});
        let frame = serialize(&value, &config).unwrap();
        let decoded = deserialize(&frame, &config).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn rejects_invalid_compression_level() {
        assert!(SerializerConfig::new(0, DEFAULT_MAX_PAYLOAD_SIZE).is_err());
        assert!(SerializerConfig::new(23, DEFAULT_MAX_PAYLOAD_SIZE).is_err());
        assert!(SerializerConfig::new(1, DEFAULT_MAX_PAYLOAD_SIZE).is_ok());
        assert!(SerializerConfig::new(22, DEFAULT_MAX_PAYLOAD_SIZE).is_ok());
    }

    #[test]
    fn rejects_payload_over_limit_before_compressing() {
        let config = SerializerConfig::new(3, 8).unwrap();
        let value = json!({"message": "this is far longer than eight bytes of canonical JSON"});
        let result = serialize(&value, &config);
        assert!(matches!(result, Err(SerializerError::SizeExceeded { .. })));
    }

    #[test]
    fn accepts_payload_at_exactly_the_limit() {
        // `"x"` -> canonical JSON `"x"` is 3 bytes; size the limit to match exactly.
        let value = json!("x");
        let plaintext_len = serde_json::to_vec(&value).unwrap().len();
        let config = SerializerConfig::new(3, plaintext_len).unwrap();
        assert!(serialize(&value, &config).is_ok());

        let config_too_small = SerializerConfig::new(3, plaintext_len - 1).unwrap();
        assert!(serialize(&value, &config_too_small).is_err());
    }

    #[test]
    fn rejects_frame_whose_declared_size_exceeds_limit() {
        let generous = SerializerConfig::new(3, DEFAULT_MAX_PAYLOAD_SIZE).unwrap();
        let value = json!({"k": "v".repeat(1000)});
        let frame = serialize(&value, &generous).unwrap();

        let strict = SerializerConfig::new(3, 4).unwrap();
        let result = deserialize(&frame, &strict);
        assert!(matches!(result, Err(SerializerError::DeclaredSizeExceedsLimit { .. })));
    }

    #[test]
    fn rejects_truncated_and_bad_magic_frames() {
        let config = SerializerConfig::default();
        assert!(matches!(deserialize(&[1, 2, 3], &config), Err(SerializerError::TruncatedFrame)));

        let mut bad_magic = vec![0u8; HEADER_LEN + 4];
        bad_magic[0..4].copy_from_slice(b"XXXX");
        assert!(matches!(deserialize(&bad_magic, &config), Err(SerializerError::BadMagic)));
    }

    proptest! {
        #[test]
        fn serialize_deserialize_is_identity(s in "[A-Za-z0-9 ]{0,200}", n in 0i64..1_000_000) {
            let config = SerializerConfig::default();
            let value = json!({"message": s, "count": n});
            let frame = serialize(&value, &config).unwrap();
            let decoded = deserialize(&frame, &config).unwrap();
            prop_assert_eq!(value, decoded);
        }
    }
}
