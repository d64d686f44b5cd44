// ── NATS adapter ──

use async_nats::{Client, ConnectOptions, Event};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tracing::{debug, info, warn};

use super::{BusMessage, MessageBus};
use crate::error::BusError;

/// Client name announced to the NATS server.
pub const CLIENT_NAME: &str = "z21gw";

/// [`MessageBus`] over a NATS connection. Cheap to clone.
#[derive(Debug, Clone)]
pub struct NatsBus {
    client: Client,
}

impl NatsBus {
    /// Connect to `url`. Reconnects after the initial connection are
    /// handled by the client and only logged here.
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = ConnectOptions::new()
            .name(CLIENT_NAME)
            .event_callback(|event| async move {
                match event {
                    Event::Disconnected => warn!(status = "disconnected", "bus conn"),
                    Event::Connected => info!(status = "connected", "bus conn"),
                    other => debug!(event = %other, "bus conn"),
                }
            })
            .connect(url)
            .await
            .map_err(|e| BusError::Connect {
                url: url.to_owned(),
                reason: e.to_string(),
            })?;

        info!(url, "bus conn");
        Ok(Self { client })
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        self.client
            .publish(subject.to_owned(), payload)
            .await
            .map_err(|e| BusError::Publish {
                subject: subject.to_owned(),
                reason: e.to_string(),
            })
    }

    async fn subscribe(&self, subject: &str) -> Result<BoxStream<'static, BusMessage>, BusError> {
        let subscriber = self
            .client
            .subscribe(subject.to_owned())
            .await
            .map_err(|e| BusError::Subscribe {
                subject: subject.to_owned(),
                reason: e.to_string(),
            })?;

        Ok(subscriber
            .map(|message| BusMessage {
                subject: message.subject.to_string(),
                payload: message.payload,
                reply: message.reply.map(|reply| reply.to_string()),
            })
            .boxed())
    }

    async fn flush(&self) -> Result<(), BusError> {
        self.client.flush().await.map_err(|e| BusError::Flush {
            reason: e.to_string(),
        })
    }
}
