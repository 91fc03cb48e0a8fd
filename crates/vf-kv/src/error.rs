use thiserror::Error;
use vf_core::errors::VfError;

/// KV Client (C1) error kinds (§4.1). `ConditionalCheckFailed` is listed
/// first deliberately -- it is the one callers are expected to match on
/// and treat as a correctness signal, not a failure.
#[derive(Debug, Clone, Error)]
pub enum KvError {
    #[error("conditional check failed")]
    ConditionalCheckFailed,

    #[error("provisioned throughput exceeded")]
    ProvisionedThroughputExceeded,

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("not found")]
    NotFound,

    #[error("kv error: {0}")]
    Other(String),
}

impl From<KvError> for VfError {
    fn from(e: KvError) -> Self {
        match e {
            KvError::ConditionalCheckFailed => VfError::ConditionalCheckFailed,
            KvError::ProvisionedThroughputExceeded => VfError::ThroughputExceeded,
            KvError::LimitExceeded(msg) => VfError::limit_exceeded("KV_LIMIT_EXCEEDED", msg),
            KvError::NotFound => VfError::not_found("KV_NOT_FOUND", "item not found"),
            KvError::Other(msg) => VfError::ServiceUnavailable(msg),
        }
    }
}
