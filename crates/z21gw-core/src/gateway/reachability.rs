//! Reachability monitor: probe the device on a fixed interval, publish the
//! result every time, and signal online/offline edges.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use z21gw_api::{Message, Request};

use super::Gateway;
use crate::model::{ReachabilityState, Transition};

/// Turns a stream of probe results into at most one pending transition.
///
/// The slot holds a single value; an edge observed while it is still full
/// is dropped.
pub(super) struct EdgeDetector {
    online: AtomicBool,
    tx: mpsc::Sender<Transition>,
}

impl EdgeDetector {
    pub(super) fn new(tx: mpsc::Sender<Transition>) -> Self {
        Self {
            online: AtomicBool::new(false),
            tx,
        }
    }

    /// Record a probe result. Returns the edge if `reachable` differs from
    /// the previous result.
    pub(super) fn observe(&self, reachable: bool) -> Option<Transition> {
        if self.online.swap(reachable, Ordering::AcqRel) == reachable {
            return None;
        }

        let transition = Transition::from_reachable(reachable);
        match self.tx.try_send(transition) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                debug!(%dropped, "transition slot full, dropping edge");
            }
            Err(TrySendError::Closed(_)) => {}
        }
        Some(transition)
    }
}

pub(super) async fn heartbeat_task(gateway: Gateway, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(gateway.inner.config.heartbeat_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // The first tick completes immediately.
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let Some(state) = probe(&gateway, &cancel).await else {
            break;
        };
        let state = Arc::new(state);
        gateway.inner.reachability.store(Arc::clone(&state));
        gateway.inner.edge.observe(state.online);

        let status = state.to_status();
        let subject = gateway.inner.identity.status_subject();
        if gateway.publish_json(&subject, &status).await {
            info!(
                subject = %subject,
                reachable = status.reachable,
                serial = %status.serial,
                "bus pub"
            );
        }
    }

    debug!("reachability monitor exiting");
}

/// Ask the device for its serial number. `None` if cancelled mid-probe.
async fn probe(gateway: &Gateway, cancel: &CancellationToken) -> Option<ReachabilityState> {
    debug!("sending heartbeat");
    let timeout = gateway.inner.config.request_timeout;

    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => return None,
        result = gateway.inner.device.send_receive(&Request::SerialNumber, timeout) => result,
    };

    let now = Utc::now();
    Some(match result {
        Ok(Some(Message::SerialNumber { serial_number })) => {
            ReachabilityState::online(serial_number.to_string(), now)
        }
        Ok(other) => {
            debug!(reply = ?other, "unexpected heartbeat reply");
            ReachabilityState::offline(now)
        }
        Err(e) if e.is_transient() => {
            debug!(error = %e, "heartbeat failed");
            ReachabilityState::offline(now)
        }
        Err(e) => {
            warn!(error = %e, "heartbeat failed");
            ReachabilityState::offline(now)
        }
    })
}
