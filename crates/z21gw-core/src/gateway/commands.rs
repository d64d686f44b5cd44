//! Command dispatcher: one worker per inbound bus message, bounded by the
//! admission semaphore, each producing exactly one reply unless shutdown
//! intervenes.

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::Gateway;
use crate::bus::BusMessage;
use crate::model::{CommandKind, CommandReply, CommandRequest};

pub(super) async fn command_task(
    gateway: Gateway,
    mut commands: BoxStream<'static, BusMessage>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = commands.next() => message,
        };
        let Some(message) = message else {
            warn!("command subscription ended");
            break;
        };

        debug!(subject = %message.subject, "bus msg");
        let worker = handle_command(gateway.clone(), message, cancel.clone());
        gateway.inner.workers.spawn(worker);
    }

    debug!("command dispatcher exiting");
}

async fn handle_command(gateway: Gateway, message: BusMessage, cancel: CancellationToken) {
    let slots = Arc::clone(&gateway.inner.slots);
    let permit = tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        permit = slots.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
    };

    let Some(reply) = execute(&gateway, &message, &cancel).await else {
        debug!(subject = %message.subject, "command abandoned on shutdown");
        return;
    };

    let target = message
        .reply
        .clone()
        .unwrap_or_else(|| gateway.inner.identity.reply_subject());
    if gateway.publish_json(&target, &reply).await {
        info!(subject = %target, ok = reply.ok, "bus pub");
    }

    drop(permit);
}

/// Decode, forward and wrap the result. `None` only when cancelled while
/// waiting on the device.
async fn execute(
    gateway: &Gateway,
    message: &BusMessage,
    cancel: &CancellationToken,
) -> Option<CommandReply> {
    let suffix = gateway
        .inner
        .identity
        .command_suffix(&message.subject)
        .unwrap_or(&message.subject);

    let Ok(kind) = suffix.parse::<CommandKind>() else {
        warn!(subject = %message.subject, "unknown subject");
        let echoed = CommandRequest::parse(&message.payload, suffix)
            .map_or_else(|_| suffix.to_owned(), |envelope| envelope.kind);
        return Some(CommandReply::failure(
            echoed,
            format!("unknown command: {suffix}"),
        ));
    };

    let envelope = match CommandRequest::parse(&message.payload, suffix) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!(error = %e, subject = %message.subject, "invalid command payload");
            return Some(CommandReply::failure(suffix, format!("invalid message: {e}")));
        }
    };

    let request = match kind.to_request(envelope.request) {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, subject = %message.subject, "invalid command payload");
            return Some(CommandReply::failure(
                envelope.kind,
                format!("invalid message: {e}"),
            ));
        }
    };

    debug!(?request, "z21 tx");
    let timeout = gateway.inner.config.request_timeout;
    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => return None,
        result = gateway.inner.device.send_receive(&request, timeout) => result,
    };

    Some(match result {
        Ok(reply) => {
            debug!(reply = ?reply, "z21 rx");
            CommandReply::success(envelope.kind, reply)
        }
        Err(e) => {
            error!(error = %e, "z21 rx");
            CommandReply::failure(envelope.kind, e.to_string())
        }
    })
}
