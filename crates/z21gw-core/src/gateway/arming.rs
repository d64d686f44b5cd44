//! Subscription arming: ask the device for unsolicited updates every time
//! it comes online.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use z21gw_api::{BroadcastFlags, Request};

use super::Gateway;
use crate::model::Transition;

/// Event categories requested on every online edge.
pub const ARMED_CATEGORIES: BroadcastFlags =
    BroadcastFlags::SYSTEM_UPDATES.union(BroadcastFlags::CAN_DETECTOR_UPDATES);

pub(super) async fn arming_task(
    gateway: Gateway,
    mut transitions: mpsc::Receiver<Transition>,
    cancel: CancellationToken,
) {
    loop {
        let transition = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            transition = transitions.recv() => transition,
        };
        let Some(transition) = transition else { break };

        match transition {
            Transition::Online => {
                info!("z21 is online, arming broadcast subscriptions");
                arm(&gateway, &cancel).await;
            }
            Transition::Offline => warn!("z21 is offline"),
        }
    }

    debug!("arming monitor exiting");
}

async fn arm(gateway: &Gateway, cancel: &CancellationToken) {
    let request = Request::BroadcastFlags {
        flags: ARMED_CATEGORIES,
    };
    let timeout = gateway.inner.config.request_timeout;

    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        result = gateway.inner.device.send_receive(&request, timeout) => result,
    };

    match result {
        Ok(_) => debug!(flags = ARMED_CATEGORIES.bits(), "broadcast subscriptions armed"),
        Err(e) => error!(error = %e, "failed to arm broadcast subscriptions"),
    }
}
