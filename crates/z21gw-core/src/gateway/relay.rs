//! Event relay: republish every unsolicited device message under
//! `<ns>.event.<kind>`.

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use z21gw_api::Message;

use super::Gateway;

pub(super) async fn relay_task(
    gateway: Gateway,
    mut events: BoxStream<'static, Message>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.next() => event,
        };
        let Some(event) = event else {
            debug!("device event stream ended");
            break;
        };

        let subject = gateway.inner.identity.event_subject(event.kind());
        if gateway.publish_json(&subject, &event).await {
            info!(subject = %subject, "bus pub");
        }
    }

    debug!("event relay exiting");
}
