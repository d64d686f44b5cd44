// ── In-process bus ──
//
// Same subject and reply semantics as NATS, without a server. Delivery is
// unbounded and in publish order per subscriber.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{BusMessage, MessageBus, subject_matches};
use crate::error::BusError;

struct Subscription {
    pattern: String,
    tx: mpsc::UnboundedSender<BusMessage>,
}

#[derive(Default)]
struct MemoryInner {
    subscriptions: Mutex<Vec<Subscription>>,
    fail_publishes: AtomicBool,
    closed: AtomicBool,
    published: AtomicU64,
    next_inbox: AtomicU64,
}

/// Cloneable handle; clones share subscribers.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<MemoryInner>,
}

impl std::fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBus")
            .field("published", &self.published())
            .finish_non_exhaustive()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish with a reply address, as a requester would.
    pub fn publish_with_reply(
        &self,
        subject: &str,
        reply: &str,
        payload: impl Into<Bytes>,
    ) -> Result<(), BusError> {
        self.deliver(BusMessage {
            subject: subject.to_owned(),
            payload: payload.into(),
            reply: Some(reply.to_owned()),
        })
    }

    /// Publish to `subject` and wait for the first message on a fresh inbox.
    pub async fn request(
        &self,
        subject: &str,
        payload: impl Into<Bytes>,
        timeout: Duration,
    ) -> Result<BusMessage, BusError> {
        let inbox = format!(
            "_INBOX.{}",
            self.inner.next_inbox.fetch_add(1, Ordering::Relaxed)
        );
        let mut replies = self.subscribe_stream(&inbox)?;
        self.publish_with_reply(subject, &inbox, payload)?;

        match tokio::time::timeout(timeout, replies.next()).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(BusError::Closed),
            Err(_) => Err(BusError::RequestTimeout {
                subject: subject.to_owned(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Make every publish fail until switched back.
    pub fn set_fail_publishes(&self, fail: bool) {
        self.inner.fail_publishes.store(fail, Ordering::Release);
    }

    /// Number of successful publishes so far.
    pub fn published(&self) -> u64 {
        self.inner.published.load(Ordering::Acquire)
    }

    /// End every subscription and reject further use.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscription>> {
        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribe_stream(
        &self,
        subject: &str,
    ) -> Result<BoxStream<'static, BusMessage>, BusError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(Subscription {
            pattern: subject.to_owned(),
            tx,
        });
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    fn deliver(&self, message: BusMessage) -> Result<(), BusError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }
        if self.inner.fail_publishes.load(Ordering::Acquire) {
            return Err(BusError::Publish {
                subject: message.subject,
                reason: "publishing disabled".into(),
            });
        }

        let mut subscriptions = self.lock();
        subscriptions.retain(|s| !s.tx.is_closed());
        for subscription in subscriptions.iter() {
            if subject_matches(&subscription.pattern, &message.subject) {
                let _ = subscription.tx.send(message.clone());
            }
        }
        self.inner.published.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        self.deliver(BusMessage {
            subject: subject.to_owned(),
            payload,
            reply: None,
        })
    }

    async fn subscribe(&self, subject: &str) -> Result<BoxStream<'static, BusMessage>, BusError> {
        self.subscribe_stream(subject)
    }

    async fn flush(&self) -> Result<(), BusError> {
        Ok(())
    }
}
