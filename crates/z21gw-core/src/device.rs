//! Device seam: what the gateway needs from a command station connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use z21gw_api::{Message, Request, Z21Client};

/// A shared connection to the command station.
///
/// Implementations must correlate concurrent request/reply pairs
/// themselves; the gateway calls `send_receive` from many tasks at once.
#[async_trait]
pub trait DeviceTransport: Send + Sync + 'static {
    /// Send `request`, waiting up to `timeout` for its reply. `Ok(None)`
    /// means the request has no reply.
    async fn send_receive(
        &self,
        request: &Request,
        timeout: Duration,
    ) -> Result<Option<Message>, z21gw_api::Error>;

    /// Unsolicited messages from the device. Ends when the transport closes.
    fn events(&self) -> BoxStream<'static, Message>;

    /// Release the connection. Ends every event stream.
    async fn close(&self);
}

#[async_trait]
impl DeviceTransport for Z21Client {
    async fn send_receive(
        &self,
        request: &Request,
        timeout: Duration,
    ) -> Result<Option<Message>, z21gw_api::Error> {
        Z21Client::send_receive(self, request, timeout).await
    }

    fn events(&self) -> BoxStream<'static, Message> {
        Z21Client::events(self).map(Arc::unwrap_or_clone).boxed()
    }

    async fn close(&self) {
        Z21Client::close(self).await;
    }
}
