//! Error taxonomy for the operation execution engine (see spec §7).
//!
//! Mirrors `backend/base/exceptions.py`'s category split: client errors are
//! caller-observable and never retried, transient infra errors and logical
//! retry signals are retried by the Scheduler, and failpoints are a
//! test-only synthetic abort. `StopOperation` is deliberately not a
//! `VfError` variant -- asking to run a nested operation is not a failure,
//! so it is threaded through as a distinct `Result` arm (see `vf-engine`).

use thiserror::Error;

/// Errors observable from the four-phase executor and its collaborators.
#[derive(Debug, Clone, Error)]
pub enum VfError {
    /// Caller lacks permission for the requested mutation. Carries a stable
    /// string id (e.g. `"INVALID_REMOVE_PHOTOS_VIEWPOINT"`) so clients can
    /// branch on it without parsing the message.
    #[error("permission denied ({id}): {message}")]
    Permission { id: &'static str, message: String },

    #[error("not found ({id}): {message}")]
    NotFound { id: &'static str, message: String },

    #[error("limit exceeded ({id}): {message}")]
    LimitExceeded { id: &'static str, message: String },

    #[error("invalid request ({id}): {message}")]
    InvalidRequest { id: &'static str, message: String },

    #[error("identity already linked: {message}")]
    AlreadyLinked { message: String },

    #[error("too many guesses")]
    TooManyGuesses,

    #[error("resource expired: {message}")]
    Expired { message: String },

    /// Transient: KV table throughput exceeded. Retried internally by the
    /// KV client with exponential backoff; surfaced to the Scheduler only
    /// if retries are exhausted.
    #[error("provisioned throughput exceeded")]
    ThroughputExceeded,

    /// Transient: backing store or a side-effect provider is down.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Transient: could not acquire a named lock (already held, not yet abandoned).
    #[error("lock failed for {resource}")]
    LockFailed { resource: String },

    /// Logical retry signal: conditional write lost a race. Not a failure of
    /// the operation, just a signal to re-read and retry the single step.
    #[error("conditional check failed")]
    ConditionalCheckFailed,

    /// Test-only: a synthetic abort triggered by the failpoint registry.
    #[error("failpoint triggered at {file}:{line}")]
    Failpoint { file: &'static str, line: u32 },

    /// Programming error: a mutation was observed during CHECK, a viewpoint
    /// lock ordering violation, or another invariant break. These abort the
    /// worker; they are not meant to be caught by callers.
    #[error("programming error: {0}")]
    Programming(String),
}

impl VfError {
    /// Client errors are caller-observable and must never be retried (§7).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            VfError::Permission { .. }
                | VfError::NotFound { .. }
                | VfError::LimitExceeded { .. }
                | VfError::InvalidRequest { .. }
                | VfError::AlreadyLinked { .. }
                | VfError::TooManyGuesses
                | VfError::Expired { .. }
        )
    }

    /// Transient infra errors and logical retry signals are retried by the
    /// Scheduler (transient) or by the local bounded-retry loop (logical).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VfError::ThroughputExceeded
                | VfError::ServiceUnavailable(_)
                | VfError::LockFailed { .. }
                | VfError::ConditionalCheckFailed
        )
    }

    pub fn is_failpoint(&self) -> bool {
        matches!(self, VfError::Failpoint { .. })
    }

    /// The stable string id, when this is a client error that carries one.
    pub fn client_id(&self) -> Option<&'static str> {
        match self {
            VfError::Permission { id, .. }
            | VfError::NotFound { id, .. }
            | VfError::LimitExceeded { id, .. }
            | VfError::InvalidRequest { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn permission(id: &'static str, message: impl Into<String>) -> Self {
        VfError::Permission { id, message: message.into() }
    }

    pub fn not_found(id: &'static str, message: impl Into<String>) -> Self {
        VfError::NotFound { id, message: message.into() }
    }

    pub fn limit_exceeded(id: &'static str, message: impl Into<String>) -> Self {
        VfError::LimitExceeded { id, message: message.into() }
    }

    pub fn invalid_request(id: &'static str, message: impl Into<String>) -> Self {
        VfError::InvalidRequest { id, message: message.into() }
    }

    pub fn lock_failed(resource: impl Into<String>) -> Self {
        VfError::LockFailed { resource: resource.into() }
    }
}

/// Stable error ids used across operation CHECK phases. Kept as constants
/// (rather than an enum) because clients match on the raw string over the
/// wire, per §7's "stable string `id`".
pub mod error_ids {
    pub const INVALID_REMOVE_PHOTOS_VIEWPOINT: &str = "INVALID_REMOVE_PHOTOS_VIEWPOINT";
    pub const NO_VIEWPOINT: &str = "NO_VIEWPOINT";
    pub const NO_FOLLOWER: &str = "NO_FOLLOWER";
    pub const NO_EPISODE: &str = "NO_EPISODE";
    pub const NO_POST: &str = "NO_POST";
    pub const NO_USER: &str = "NO_USER";
    pub const ALREADY_REGISTERED: &str = "ALREADY_REGISTERED";
    pub const FOLLOWER_MUST_HAVE_LABEL: &str = "FOLLOWER_MUST_HAVE_LABEL";
    pub const REMOVED_FOLLOWER_IMMUTABLE: &str = "REMOVED_FOLLOWER_IMMUTABLE";
    pub const TOO_MANY_ASSET_IDS: &str = "TOO_MANY_ASSET_IDS";
    pub const INVALID_SHARE_EPISODE_OWNER: &str = "INVALID_SHARE_EPISODE_OWNER";
    pub const FOLLOWER_UNREVIVABLE: &str = "FOLLOWER_UNREVIVABLE";
    pub const CONTACT_MISSING_IDENTIFIER: &str = "CONTACT_MISSING_IDENTIFIER";
    pub const VIEWPOINT_NOT_EDITABLE: &str = "VIEWPOINT_NOT_EDITABLE";
    pub const CANNOT_REMOVE_SELF: &str = "CANNOT_REMOVE_SELF";
    pub const UPLOAD_CONTACTS_EXCEEDS_LIMIT: &str = "UPLOAD_CONTACTS_EXCEEDS_LIMIT";
}
