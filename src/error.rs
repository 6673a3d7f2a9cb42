//! Error kinds for the box coordination service.
//!
//! Grounded on `knhk-workflow-engine/src/error.rs`: one flat `thiserror` enum,
//! a `Result` alias, and a handful of `From` impls for the I/O boundaries we
//! actually cross. The dispatcher (spec.md §4.C, §7) never lets one of these
//! escape as a panic — every command handler returns a `CoreResult` and the
//! API layer maps it onto the wire `{status, reason}` contract.

use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// `(sessionId, boxVersion)` did not match the box's current incarnation.
    #[error("stale session/version")]
    Stale,

    /// Box id not in the caller's allow-list.
    #[error("box not in allow-list")]
    Forbidden,

    /// Missing/expired credential.
    #[error("missing or expired credential")]
    Unauthenticated,

    /// Precondition failed (not initiated, half-hold used, hold overflow, ...).
    #[error("precondition failed: {0}")]
    Precondition(&'static str),

    /// Per-role token bucket exhausted.
    #[error("rate limited")]
    RateLimited,

    /// WebSocket writer could not keep up with the box's event rate.
    #[error("slow consumer")]
    SlowConsumer,

    /// Box id unknown to the registry.
    #[error("box {0} not found")]
    BoxNotFound(u32),

    /// Unexpected failure; logged and surfaced generically.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Internal(format!("serialization error: {err}"))
    }
}
