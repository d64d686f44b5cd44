// ── Core error types ──
//
// Errors surfaced by the gateway itself. Transient device and bus failures
// inside the running loops are logged, never returned; these types reach
// callers only from construction, start, and the adapters.

use thiserror::Error;

/// Failures of the message bus adapter.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Cannot connect to bus at {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("Publish to {subject} failed: {reason}")]
    Publish { subject: String, reason: String },

    #[error("Subscribe to {subject} failed: {reason}")]
    Subscribe { subject: String, reason: String },

    #[error("No reply on {subject} within {timeout_ms}ms")]
    RequestTimeout { subject: String, timeout_ms: u64 },

    #[error("Bus flush failed: {reason}")]
    Flush { reason: String },

    #[error("Bus connection closed")]
    Closed,
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Collaborator errors ──────────────────────────────────────────
    #[error(transparent)]
    Device(#[from] z21gw_api::Error),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Gateway already started")]
    AlreadyStarted,
}
