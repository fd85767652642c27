//! `PipelineError` (spec.md §7): the umbrella error type at the public API
//! boundary. Per the propagation policy, only `Configuration` and
//! `Capacity` ever reach a producer; the rest are absorbed internally by
//! the orchestrator and reported through `metrics`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("submission ring buffer is full")]
    Capacity,
    #[error(transparent)]
    Masking(#[from] securelog_masking::MaskingError),
    #[error(transparent)]
    Integrity(#[from] securelog_integrity::IntegrityError),
    #[error(transparent)]
    Crypto(#[from] securelog_crypto::CryptoError),
    #[error(transparent)]
    Serializer(#[from] securelog_serializer::SerializerError),
    #[error(transparent)]
    Transport(#[from] securelog_transport::TransportError),
}
