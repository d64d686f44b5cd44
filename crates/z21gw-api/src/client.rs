//! Async UDP client for a z21 command station.
//!
//! One background reader task owns the receive side of the socket. Packets
//! that answer an outstanding request are routed to its waiter; everything
//! else is fanned out as an event through a [`broadcast`] channel.
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use z21gw_api::{Request, Z21Client};
//!
//! let client = Z21Client::connect("192.168.0.111").await?;
//! let reply = client
//!     .send_receive(&Request::SerialNumber, Duration::from_millis(500))
//!     .await?;
//! client.close().await;
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::net::{Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::Stream;
use tokio::net::UdpSocket;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::message::{Message, Request, header, split_packets};

/// UDP port the z21 listens on.
pub const DEFAULT_PORT: u16 = 21105;

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const MAX_DATAGRAM: usize = 1500;

type Waiters = DashMap<u16, VecDeque<oneshot::Sender<Message>>>;

// ── Z21Client ────────────────────────────────────────────────────────

/// Handle to a z21 session. Cheap to clone; all clones share one socket.
#[derive(Clone)]
pub struct Z21Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    pending: Arc<Waiters>,
    event_tx: broadcast::Sender<Arc<Message>>,
    cancel: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for Z21Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Z21Client")
            .field("peer", &self.inner.peer)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Z21Client {
    /// Resolve `addr`, bind an ephemeral local port and start the reader task.
    ///
    /// `addr` may omit the port, in which case [`DEFAULT_PORT`] is used.
    /// UDP is connectionless, so success says nothing about whether the
    /// device is actually there.
    pub async fn connect(addr: &str) -> Result<Self, Error> {
        let target = with_default_port(addr);
        let peer = tokio::net::lookup_host(target.as_str())
            .await?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    format!("no address found for {target}"),
                )
            })?;

        let bind: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(peer).await?;
        debug!(%peer, local = ?socket.local_addr().ok(), "z21 socket ready");

        let socket = Arc::new(socket);
        let pending: Arc<Waiters> = Arc::new(DashMap::new());
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let reader = tokio::spawn(read_loop(
            Arc::clone(&socket),
            Arc::clone(&pending),
            event_tx.clone(),
            cancel.clone(),
        ));

        Ok(Self {
            inner: Arc::new(ClientInner {
                socket,
                peer,
                pending,
                event_tx,
                cancel,
                reader: Mutex::new(Some(reader)),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.inner.socket.local_addr()?)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Send `request` and wait up to `timeout` for the matching reply.
    ///
    /// Requests the device never acknowledges return `Ok(None)` as soon as
    /// the datagram is sent. Concurrent requests for the same reply type
    /// are answered in the order they were issued.
    pub async fn send_receive(
        &self,
        request: &Request,
        timeout: Duration,
    ) -> Result<Option<Message>, Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let Some(reply_header) = request.reply_header() else {
            self.send(request).await?;
            return Ok(None);
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.inner.pending.entry(reply_header).or_default();
            waiters.retain(|w| !w.is_closed());
            waiters.push_back(tx);
        }

        self.send(request).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(message)) => Ok(Some(message)),
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => Err(Error::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    async fn send(&self, request: &Request) -> Result<(), Error> {
        trace!(?request, "z21 send");
        self.inner.socket.send(&request.encode()).await?;
        Ok(())
    }

    /// Stream of unsolicited device messages.
    ///
    /// Each call creates an independent subscriber. The stream ends when the
    /// client is closed. Serial number and hardware info replies that arrive
    /// after their request timed out are dropped, never streamed. A subscriber that falls behind skips the messages it
    /// missed and logs how many.
    pub fn events(&self) -> impl Stream<Item = Arc<Message>> + Send + 'static {
        let mut rx = self.inner.event_tx.subscribe();
        let cancel = self.inner.cancel.clone();

        async_stream::stream! {
            loop {
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    next = rx.recv() => next,
                };
                match next {
                    Ok(message) => yield message,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "z21 event subscriber lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Log off from the device and stop the reader task.
    ///
    /// Pending requests fail with [`Error::Closed`]. Calling this more than
    /// once is a no-op.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Err(e) = self.send(&Request::Logoff).await {
            debug!(error = %e, "z21 logoff failed (non-fatal)");
        }

        self.inner.cancel.cancel();
        if let Some(handle) = self.inner.reader.lock().await.take() {
            let _ = handle.await;
        }
        debug!(peer = %self.inner.peer, "z21 client closed");
    }
}

// ── Reader task ──────────────────────────────────────────────────────

async fn read_loop(
    socket: Arc<UdpSocket>,
    pending: Arc<Waiters>,
    event_tx: broadcast::Sender<Arc<Message>>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let received = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            received = socket.recv(&mut buf) => received,
        };

        match received {
            Ok(len) => {
                let datagram = buf.get(..len).unwrap_or_default();
                for (packet_header, data) in split_packets(datagram) {
                    match Message::decode(packet_header, data) {
                        Ok(message) => deliver(&pending, &event_tx, packet_header, message),
                        Err(e) => debug!(error = %e, "ignoring z21 packet"),
                    }
                }
            }
            // ICMP port unreachable surfaces here on a connected socket.
            Err(e) => debug!(error = %e, "z21 recv failed"),
        }
    }

    // Dropping the senders wakes every waiter with `Closed`.
    pending.clear();
    debug!("z21 reader exiting");
}

/// Hand `message` to the oldest live waiter for `packet_header`, or
/// broadcast it. Unclaimed answers to request-only headers are dropped.
fn deliver(
    pending: &Waiters,
    event_tx: &broadcast::Sender<Arc<Message>>,
    packet_header: u16,
    mut message: Message,
) {
    if let Some(mut waiters) = pending.get_mut(&packet_header) {
        while let Some(waiter) = waiters.pop_front() {
            match waiter.send(message) {
                Ok(()) => return,
                Err(unclaimed) => message = unclaimed,
            }
        }
    }

    if is_reply_only(packet_header) {
        debug!(kind = message.kind(), "dropping late z21 reply");
        return;
    }

    trace!(kind = message.kind(), "z21 event");
    // No subscribers is fine.
    let _ = event_tx.send(Arc::new(message));
}

/// Headers the device only ever sends in answer to a request.
fn is_reply_only(packet_header: u16) -> bool {
    matches!(packet_header, header::SERIAL_NUMBER | header::HARDWARE_INFO)
}

/// Append [`DEFAULT_PORT`] when `addr` has no explicit port.
fn with_default_port(addr: &str) -> String {
    if addr.parse::<SocketAddr>().is_ok() {
        return addr.to_owned();
    }
    if let Ok(ip) = addr.parse::<Ipv6Addr>() {
        return format!("[{ip}]:{DEFAULT_PORT}");
    }
    match addr.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => addr.to_owned(),
        _ => format!("{addr}:{DEFAULT_PORT}"),
    }
}
