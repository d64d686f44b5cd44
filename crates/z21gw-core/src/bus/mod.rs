//! Bus seam: publish/subscribe with bus-native reply addresses.
//!
//! [`NatsBus`] is the production adapter. [`MemoryBus`] delivers in-process
//! with the same subject semantics.

pub mod memory;
pub mod nats;

pub use memory::MemoryBus;
pub use nats::NatsBus;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::error::BusError;

/// A message delivered to a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Bytes,
    /// Caller-supplied address for the answer, if any.
    pub reply: Option<String>,
}

#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError>;

    /// Subscribe to `subject`, which may contain `*` and `>` wildcards.
    /// Dropping the stream unsubscribes.
    async fn subscribe(&self, subject: &str) -> Result<BoxStream<'static, BusMessage>, BusError>;

    /// Wait until everything published so far has left the process.
    async fn flush(&self) -> Result<(), BusError>;
}

/// NATS subject matching: `*` matches one token, a trailing `>` matches
/// one or more remaining tokens.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return pattern_tokens.next().is_none(),
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
