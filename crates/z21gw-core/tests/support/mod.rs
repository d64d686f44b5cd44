// Shared fixtures for gateway integration tests.
#![allow(dead_code, clippy::unwrap_used)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use z21gw_api::{CanDetector, Error, Message, Request, SystemState};
use z21gw_core::{BusMessage, DeviceTransport, Gateway, GatewayConfig, MemoryBus, MessageBus};

/// Upper bound for any single wait. The clock is paused, so this is virtual time.
pub const WAIT: Duration = Duration::from_secs(300);

// ── Fake device ─────────────────────────────────────────────────────

/// Scripted command station.
///
/// Heartbeats answer with the configured serial or time out. Command
/// requests (`CanDetector`, `SystemState`, `HardwareInfo`) sleep for
/// `command_delay` and track how many are in flight.
pub struct FakeDevice {
    serial: Mutex<Option<u32>>,
    command_delay: Mutex<Duration>,
    fail_commands: AtomicBool,
    fail_arming: AtomicBool,
    requests: Mutex<Vec<Request>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: AtomicUsize,
    events: broadcast::Sender<Message>,
    events_ended: CancellationToken,
    closed: CancellationToken,
}

impl FakeDevice {
    pub fn online(serial: u32) -> Arc<Self> {
        Arc::new(Self::with_serial(Some(serial)))
    }

    pub fn offline() -> Arc<Self> {
        Arc::new(Self::with_serial(None))
    }

    fn with_serial(serial: Option<u32>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            serial: Mutex::new(serial),
            command_delay: Mutex::new(Duration::ZERO),
            fail_commands: AtomicBool::new(false),
            fail_arming: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: AtomicUsize::new(0),
            events,
            events_ended: CancellationToken::new(),
            closed: CancellationToken::new(),
        }
    }

    pub fn set_serial(&self, serial: Option<u32>) {
        *self.serial.lock().unwrap() = serial;
    }

    pub fn set_command_delay(&self, delay: Duration) {
        *self.command_delay.lock().unwrap() = delay;
    }

    pub fn set_fail_commands(&self, fail: bool) {
        self.fail_commands.store(fail, Ordering::SeqCst);
    }

    /// Make every `BroadcastFlags` request time out.
    pub fn set_fail_arming(&self, fail: bool) {
        self.fail_arming.store(fail, Ordering::SeqCst);
    }

    /// End every event stream while the device stays reachable.
    pub fn end_events(&self) {
        self.events_ended.cancel();
    }

    /// Push an unsolicited message to every event subscriber.
    pub fn emit(&self, message: Message) {
        let _ = self.events.send(message);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Request) -> bool) -> usize {
        self.requests.lock().unwrap().iter().filter(|r| matches(r)).count()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    async fn command(&self, request: &Request, timeout: Duration) -> Result<Option<Message>, Error> {
        let _guard = InFlight::enter(Arc::clone(&self.in_flight));
        self.max_in_flight
            .fetch_max(self.in_flight(), Ordering::SeqCst);

        let delay = *self.command_delay.lock().unwrap();
        tokio::time::sleep(delay).await;

        if self.fail_commands.load(Ordering::SeqCst) {
            return Err(timeout_error(timeout));
        }

        Ok(match request {
            Request::CanDetector { network_id } => Some(Message::CanDetector(CanDetector {
                network_id: *network_id,
                address: 1,
                port: 0,
                detector_type: 0x01,
                value1: 0x0100,
                value2: 0,
            })),
            Request::SystemState => Some(Message::SystemState(SystemState::default())),
            Request::HardwareInfo => Some(Message::HardwareInfo {
                hardware_type: 0x0211,
                firmware_version: "1.43".into(),
            }),
            _ => None,
        })
    }
}

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn timeout_error(timeout: Duration) -> Error {
    Error::Timeout {
        timeout_ms: u64::try_from(timeout.as_millis()).unwrap(),
    }
}

#[async_trait]
impl DeviceTransport for FakeDevice {
    async fn send_receive(
        &self,
        request: &Request,
        timeout: Duration,
    ) -> Result<Option<Message>, Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        self.requests.lock().unwrap().push(request.clone());

        match request {
            Request::SerialNumber => {
                let serial = *self.serial.lock().unwrap();
                match serial {
                    Some(serial_number) => Ok(Some(Message::SerialNumber { serial_number })),
                    None => {
                        tokio::time::sleep(timeout).await;
                        Err(timeout_error(timeout))
                    }
                }
            }
            Request::BroadcastFlags { .. } if self.fail_arming.load(Ordering::SeqCst) => {
                tokio::time::sleep(timeout).await;
                Err(timeout_error(timeout))
            }
            Request::BroadcastFlags { .. } | Request::Logoff => Ok(None),
            _ => self.command(request, timeout).await,
        }
    }

    fn events(&self) -> BoxStream<'static, Message> {
        let mut rx = self.events.subscribe();
        let closed = self.closed.clone();
        let ended = self.events_ended.clone();
        async_stream::stream! {
            loop {
                let next = tokio::select! {
                    biased;
                    () = closed.cancelled() => break,
                    () = ended.cancelled() => break,
                    next = rx.recv() => next,
                };
                match next {
                    Ok(message) => yield message,
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
        .boxed()
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}

// ── Harness ─────────────────────────────────────────────────────────

pub struct Harness {
    pub gateway: Gateway,
    pub device: Arc<FakeDevice>,
    pub bus: MemoryBus,
    /// Everything published on the bus, subscribed before start.
    pub observed: BoxStream<'static, BusMessage>,
}

impl Harness {
    pub async fn new(config: GatewayConfig, device: Arc<FakeDevice>) -> Self {
        let bus = MemoryBus::new();
        let observed = bus.subscribe(">").await.unwrap();
        let gateway = Gateway::new(config, device.clone(), Arc::new(bus.clone())).unwrap();
        Self {
            gateway,
            device,
            bus,
            observed,
        }
    }

    pub async fn started(device: Arc<FakeDevice>) -> Self {
        let harness = Self::new(GatewayConfig::default(), device).await;
        harness.gateway.start().await.unwrap();
        harness
    }

    /// Next message published on exactly `subject`; others are skipped.
    pub async fn next_on(&mut self, subject: &str) -> BusMessage {
        let wait = async {
            loop {
                let message = self.observed.next().await.expect("bus closed");
                if message.subject == subject {
                    return message;
                }
            }
        };
        tokio::time::timeout(WAIT, wait)
            .await
            .unwrap_or_else(|_| panic!("nothing published on {subject}"))
    }

    /// Next message published on a subject starting with `prefix`.
    pub async fn next_with_prefix(&mut self, prefix: &str) -> BusMessage {
        let wait = async {
            loop {
                let message = self.observed.next().await.expect("bus closed");
                if message.subject.starts_with(prefix) {
                    return message;
                }
            }
        };
        tokio::time::timeout(WAIT, wait)
            .await
            .unwrap_or_else(|_| panic!("nothing published under {prefix}"))
    }

    /// Drain already-delivered messages without waiting.
    pub fn drain(&mut self) -> Vec<BusMessage> {
        let mut drained = Vec::new();
        while let Some(Some(message)) = futures_util::FutureExt::now_or_never(self.observed.next()) {
            drained.push(message);
        }
        drained
    }
}

pub fn json(message: &BusMessage) -> serde_json::Value {
    serde_json::from_slice(&message.payload).unwrap()
}

/// Poll `condition` on the (paused) clock until it holds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition never became true");
}
