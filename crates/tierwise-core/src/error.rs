//! Crate-wide error type.

use crate::capability::CapabilityError;
use crate::chain::ChainError;
use crate::config::ConfigError;
use crate::delegation::DelegationError;
use crate::escalation::ExhaustionError;
use crate::extract::ExtractionError;
use crate::invoke::InvocationError;

#[derive(Debug, thiserror::Error)]
pub enum TierwiseError {
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("invocation error: {0}")]
    Invocation(#[from] InvocationError),

    #[error("escalation exhausted: {0}")]
    Exhausted(#[from] ExhaustionError),

    #[error("delegation error: {0}")]
    Delegation(#[from] DelegationError),

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for tierwise operations.
pub type Result<T> = std::result::Result<T, TierwiseError>;
