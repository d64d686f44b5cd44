use thiserror::Error;

/// Top-level error type for the `z21gw-api` crate.
///
/// Covers every failure mode of the UDP link: socket I/O, unanswered
/// requests, use after close, and undecodable packets.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// Socket error (bind, connect, send, address resolution).
    #[error("z21 I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No reply arrived within the request timeout.
    #[error("z21 request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The client was closed while the request was pending, or before it was sent.
    #[error("z21 connection closed")]
    Closed,

    // ── Data ────────────────────────────────────────────────────────
    /// A packet could not be decoded into a known message.
    #[error("cannot decode z21 packet 0x{header:02X}: {reason}")]
    Decode { header: u16, reason: String },
}

impl Error {
    /// Returns `true` if the next attempt might succeed without any change.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Timeout { .. })
    }
}
