// ── Gateway facade ──
//
// Owns the cancellation token and every background task. Three long-running
// tasks (reachability monitor, arming, event relay) plus the command
// subscription loop, which fans out one worker per inbound message.

mod arming;
mod commands;
mod reachability;
mod relay;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::bus::MessageBus;
use crate::config::GatewayConfig;
use crate::device::DeviceTransport;
use crate::error::CoreError;
use crate::identity::GatewayIdentity;
use crate::model::{ReachabilityState, Transition};

pub use arming::ARMED_CATEGORIES;
use reachability::EdgeDetector;

/// Bridges one device connection to the bus.
///
/// Cheaply cloneable via `Arc<GatewayInner>`. A gateway runs once:
/// [`start`](Self::start) launches the tasks, [`stop`](Self::stop) tears
/// them down for good.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    config: GatewayConfig,
    identity: GatewayIdentity,
    device: Arc<dyn DeviceTransport>,
    bus: Arc<dyn MessageBus>,
    cancel: CancellationToken,
    reachability: ArcSwap<ReachabilityState>,
    edge: EdgeDetector,
    transition_rx: Mutex<Option<mpsc::Receiver<Transition>>>,
    slots: Arc<Semaphore>,
    workers: TaskTracker,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("identity", &self.inner.identity)
            .field("started", &self.inner.started.load(Ordering::Relaxed))
            .field("stopped", &self.inner.stopped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Validate `config` and wire the gateway to already-connected
    /// collaborators. Nothing runs until [`start`](Self::start).
    pub fn new(
        config: GatewayConfig,
        device: Arc<dyn DeviceTransport>,
        bus: Arc<dyn MessageBus>,
    ) -> Result<Self, CoreError> {
        config.validate()?;

        let identity = GatewayIdentity::new(&config.subject_prefix, &config.name);
        let (transition_tx, transition_rx) = mpsc::channel(1);
        let slots = Arc::new(Semaphore::new(config.max_concurrent_commands));

        Ok(Self {
            inner: Arc::new(GatewayInner {
                identity,
                device,
                bus,
                cancel: CancellationToken::new(),
                reachability: ArcSwap::from_pointee(ReachabilityState::default()),
                edge: EdgeDetector::new(transition_tx),
                transition_rx: Mutex::new(Some(transition_rx)),
                slots,
                workers: TaskTracker::new(),
                task_handles: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                config,
            }),
        })
    }

    pub fn identity(&self) -> &GatewayIdentity {
        &self.inner.identity
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Latest probe result.
    pub fn reachability(&self) -> Arc<ReachabilityState> {
        self.inner.reachability.load_full()
    }

    /// Launch the background tasks and subscribe to commands.
    ///
    /// Fails with [`CoreError::AlreadyStarted`] on a second call, and with
    /// [`CoreError::Bus`] if the command subscription is refused. Call
    /// [`stop`](Self::stop) in either failure case to release resources.
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.inner.started.swap(true, Ordering::AcqRel) || self.inner.cancel.is_cancelled() {
            return Err(CoreError::AlreadyStarted);
        }

        let cancel = self.inner.cancel.clone();
        let mut handles = self.inner.task_handles.lock().await;

        debug!("starting reachability monitor");
        handles.push(tokio::spawn(reachability::heartbeat_task(
            self.clone(),
            cancel.clone(),
        )));

        if let Some(rx) = self.inner.transition_rx.lock().await.take() {
            debug!("starting arming monitor");
            handles.push(tokio::spawn(arming::arming_task(
                self.clone(),
                rx,
                cancel.clone(),
            )));
        }

        debug!("starting event relay");
        let events = self.inner.device.events();
        handles.push(tokio::spawn(relay::relay_task(
            self.clone(),
            events,
            cancel.clone(),
        )));

        let subject = self.inner.identity.commands_wildcard();
        let commands = self
            .inner
            .bus
            .subscribe(&subject)
            .await
            .inspect_err(|e| error!(error = %e, subject = %subject, "command subscription failed"))?;
        info!(subject = %subject, "bus sub");
        handles.push(tokio::spawn(commands::command_task(
            self.clone(),
            commands,
            cancel,
        )));

        info!(namespace = %self.inner.identity, "gateway started");
        Ok(())
    }

    /// Cancel every task, close the device, wait for all tasks and command
    /// workers to finish, then flush the bus. Nothing is published after
    /// this returns. Idempotent.
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        self.inner.cancel.cancel();
        self.inner.device.close().await;

        let handles: Vec<_> = self.inner.task_handles.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        self.inner.workers.close();
        self.inner.workers.wait().await;

        if let Err(e) = self.inner.bus.flush().await {
            error!(error = %e, "bus flush failed");
        }
        info!(namespace = %self.inner.identity, "gateway stopped");
    }

    // ── Shared helpers for the tasks ─────────────────────────────────

    /// Serialize `value` and publish it. Returns `false` on failure, which
    /// is logged here.
    async fn publish_json<T: Serialize + Sync>(&self, subject: &str, value: &T) -> bool {
        let payload = match serde_json::to_vec(value) {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                error!(error = %e, subject, "failed to serialize message");
                return false;
            }
        };

        match self.inner.bus.publish(subject, payload).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, subject, "failed to publish");
                false
            }
        }
    }
}
