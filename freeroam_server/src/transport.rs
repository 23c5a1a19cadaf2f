//! Transport boundary.
//!
//! The transport owns the sockets and any reliability machinery; the core
//! only drains its inbound queue once per tick and pushes sends into its
//! outbound queue. Nothing here blocks the tick loop.
//!
//! Two implementations:
//! - [`UdpTransport`]: tokio UDP socket with a background pump task. A thin
//!   tagged-datagram envelope carries the connection lifecycle; per-channel
//!   reliability is the wire library's concern in a production deployment.
//! - [`LoopbackTransport`]: in-memory, for tests. Records everything sent and
//!   lets tests inject inbound events and simulate channel congestion.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Stable transport identity of one remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub i64);

/// Number of usable reliable sub-streams per connection.
pub const CHANNEL_CAP: u8 = 31;

/// Default maximum transmission unit when the transport reports none.
pub const DEFAULT_MTU: usize = 1408;

/// Delivery guarantees for one outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Every frame arrives, in order, on its channel.
    ReliableOrdered,
    /// Latest-wins with arrival guarantee; stale frames are dropped.
    ReliableSequenced,
    /// Latest-wins, loss tolerated.
    UnreliableSequenced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// One event drained from the transport's inbound queue.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// Out-of-band text from an unconnected endpoint (ping/query).
    Unconnected { endpoint: SocketAddr, text: String },
    /// LAN discovery probe.
    Discovery { endpoint: SocketAddr },
    /// A connection attempt carrying its framed descriptor.
    ApprovalRequest { connection: ConnectionId, frame: Bytes },
    StatusChanged {
        connection: ConnectionId,
        status: ConnectionStatus,
        reason: String,
    },
    LatencyUpdated { connection: ConnectionId, seconds: f32 },
    /// A framed application packet from a registered connection.
    Data { connection: ConnectionId, frame: Bytes },
}

/// The seam between the tick loop and the wire.
///
/// All sends are fire-and-forget into the transport's own queue; `drain`
/// never blocks.
pub trait Transport {
    fn drain(&mut self) -> Vec<InboundEvent>;
    fn send(&mut self, target: ConnectionId, frame: Bytes, delivery: Delivery, channel: u8);
    fn send_unconnected(&mut self, endpoint: SocketAddr, text: &str);
    fn send_discovery_response(&mut self, endpoint: SocketAddr, frame: Bytes);
    /// Completes a pending approval with hail data.
    fn approve(&mut self, connection: ConnectionId, hail: Bytes);
    /// Rejects a pending approval with a reason string.
    fn deny(&mut self, connection: ConnectionId, reason: &str);
    /// Whether the channel can take another reliable write this tick.
    fn can_send_now(&self, connection: ConnectionId, channel: u8) -> bool;
    fn mtu(&self) -> usize;
}

// ---------------------------------------------------------------------------
// Loopback transport
// ---------------------------------------------------------------------------

/// A frame recorded by the loopback transport.
#[derive(Debug, Clone)]
pub struct SentFrame {
    pub target: ConnectionId,
    pub frame: Bytes,
    pub delivery: Delivery,
    pub channel: u8,
}

/// In-memory transport for tests and local tooling.
#[derive(Default)]
pub struct LoopbackTransport {
    inbound: VecDeque<InboundEvent>,
    pub sent: Vec<SentFrame>,
    pub unconnected_sent: Vec<(SocketAddr, String)>,
    pub discovery_sent: Vec<(SocketAddr, Bytes)>,
    pub approvals: Vec<(ConnectionId, Bytes)>,
    pub denials: Vec<(ConnectionId, String)>,
    congested: HashSet<(ConnectionId, u8)>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an inbound event as if the wire had delivered it.
    pub fn inject(&mut self, event: InboundEvent) {
        self.inbound.push_back(event);
    }

    /// Marks a channel congested; reliable writes to it report not-ready.
    pub fn set_congested(&mut self, connection: ConnectionId, channel: u8, congested: bool) {
        if congested {
            self.congested.insert((connection, channel));
        } else {
            self.congested.remove(&(connection, channel));
        }
    }

    /// Sent frames addressed to one connection.
    pub fn frames_for(&self, connection: ConnectionId) -> Vec<&SentFrame> {
        self.sent.iter().filter(|f| f.target == connection).collect()
    }

    pub fn clear_sent(&mut self) {
        self.sent.clear();
    }
}

impl Transport for LoopbackTransport {
    fn drain(&mut self) -> Vec<InboundEvent> {
        self.inbound.drain(..).collect()
    }

    fn send(&mut self, target: ConnectionId, frame: Bytes, delivery: Delivery, channel: u8) {
        self.sent.push(SentFrame {
            target,
            frame,
            delivery,
            channel,
        });
    }

    fn send_unconnected(&mut self, endpoint: SocketAddr, text: &str) {
        self.unconnected_sent.push((endpoint, text.to_string()));
    }

    fn send_discovery_response(&mut self, endpoint: SocketAddr, frame: Bytes) {
        self.discovery_sent.push((endpoint, frame));
    }

    fn approve(&mut self, connection: ConnectionId, hail: Bytes) {
        self.approvals.push((connection, hail));
    }

    fn deny(&mut self, connection: ConnectionId, reason: &str) {
        self.denials.push((connection, reason.to_string()));
    }

    fn can_send_now(&self, connection: ConnectionId, channel: u8) -> bool {
        !self.congested.contains(&(connection, channel))
    }

    fn mtu(&self) -> usize {
        DEFAULT_MTU
    }
}

// ---------------------------------------------------------------------------
// UDP transport
// ---------------------------------------------------------------------------

/// Datagram tags for the UDP envelope.
mod tag {
    pub const UNCONNECTED: u8 = 0;
    pub const CONNECT: u8 = 1;
    pub const DATA: u8 = 2;
    pub const DISCONNECT: u8 = 3;
    pub const DISCOVERY: u8 = 4;
    pub const APPROVE: u8 = 5;
    pub const DENY: u8 = 6;
    pub const DISCOVERY_RESPONSE: u8 = 7;
}

enum Outbound {
    To(SocketAddr, Bytes),
}

/// UDP transport with a background socket pump.
///
/// Inbound datagrams are parsed on the pump task and pushed into an
/// unbounded channel the tick loop drains; outbound frames go the other way.
pub struct UdpTransport {
    inbound_rx: mpsc::UnboundedReceiver<(InboundEvent, SocketAddr)>,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    endpoints: HashMap<ConnectionId, SocketAddr>,
    local_addr: SocketAddr,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        use anyhow::Context;

        let socket = UdpSocket::bind(addr).await.context("udp bind")?;
        let local_addr = socket.local_addr().context("udp local addr")?;
        let socket = std::sync::Arc::new(socket);

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();

        let recv_socket = socket.clone();
        tokio::spawn(async move {
            let mut ids: HashMap<SocketAddr, ConnectionId> = HashMap::new();
            let mut next_id: i64 = 1;
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let (n, from) = match recv_socket.recv_from(&mut buf).await {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "udp recv failed");
                        continue;
                    }
                };
                let Some(event) = parse_datagram(&buf[..n], from, &mut ids, &mut next_id) else {
                    debug!(%from, len = n, "undecodable datagram dropped");
                    continue;
                };
                if inbound_tx.send((event, from)).is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(Outbound::To(addr, payload)) = outbound_rx.recv().await {
                if let Err(e) = socket.send_to(&payload, addr).await {
                    debug!(%addr, error = %e, "udp send failed");
                }
            }
        });

        Ok(Self {
            inbound_rx,
            outbound_tx,
            endpoints: HashMap::new(),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn push(&self, addr: SocketAddr, payload: Bytes) {
        // Receiver only drops at shutdown.
        let _ = self.outbound_tx.send(Outbound::To(addr, payload));
    }

    fn tagged(tag: u8, body: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + body.len());
        buf.put_u8(tag);
        buf.extend_from_slice(body);
        buf.freeze()
    }
}

fn parse_datagram(
    data: &[u8],
    from: SocketAddr,
    ids: &mut HashMap<SocketAddr, ConnectionId>,
    next_id: &mut i64,
) -> Option<InboundEvent> {
    let mut buf = data;
    if !buf.has_remaining() {
        return None;
    }
    let t = buf.get_u8();
    let id_for = |ids: &mut HashMap<SocketAddr, ConnectionId>, next_id: &mut i64| {
        *ids.entry(from).or_insert_with(|| {
            let id = ConnectionId(*next_id);
            *next_id += 1;
            id
        })
    };
    match t {
        tag::UNCONNECTED => Some(InboundEvent::Unconnected {
            endpoint: from,
            text: String::from_utf8_lossy(buf).into_owned(),
        }),
        tag::DISCOVERY => Some(InboundEvent::Discovery { endpoint: from }),
        tag::CONNECT => Some(InboundEvent::ApprovalRequest {
            connection: id_for(ids, next_id),
            frame: Bytes::copy_from_slice(buf),
        }),
        tag::DATA => Some(InboundEvent::Data {
            connection: id_for(ids, next_id),
            frame: Bytes::copy_from_slice(buf),
        }),
        tag::DISCONNECT => {
            let connection = ids.remove(&from)?;
            Some(InboundEvent::StatusChanged {
                connection,
                status: ConnectionStatus::Disconnected,
                reason: String::from_utf8_lossy(buf).into_owned(),
            })
        }
        _ => None,
    }
}

impl Transport for UdpTransport {
    fn drain(&mut self) -> Vec<InboundEvent> {
        let mut events = Vec::new();
        while let Ok((ev, from)) = self.inbound_rx.try_recv() {
            // Track endpoints so sends can be addressed.
            match &ev {
                InboundEvent::ApprovalRequest { connection, .. }
                | InboundEvent::Data { connection, .. } => {
                    self.endpoints.insert(*connection, from);
                }
                InboundEvent::StatusChanged { connection, .. } => {
                    self.endpoints.remove(connection);
                }
                _ => {}
            }
            events.push(ev);
        }
        events
    }

    fn send(&mut self, target: ConnectionId, frame: Bytes, _delivery: Delivery, _channel: u8) {
        if let Some(addr) = self.endpoints.get(&target) {
            self.push(*addr, Self::tagged(tag::DATA, &frame));
        }
    }

    fn send_unconnected(&mut self, endpoint: SocketAddr, text: &str) {
        self.push(endpoint, Self::tagged(tag::UNCONNECTED, text.as_bytes()));
    }

    fn send_discovery_response(&mut self, endpoint: SocketAddr, frame: Bytes) {
        self.push(endpoint, Self::tagged(tag::DISCOVERY_RESPONSE, &frame));
    }

    fn approve(&mut self, connection: ConnectionId, hail: Bytes) {
        if let Some(addr) = self.endpoints.get(&connection) {
            self.push(*addr, Self::tagged(tag::APPROVE, &hail));
        }
    }

    fn deny(&mut self, connection: ConnectionId, reason: &str) {
        if let Some(addr) = self.endpoints.get(&connection) {
            self.push(*addr, Self::tagged(tag::DENY, reason.as_bytes()));
        }
    }

    fn can_send_now(&self, _connection: ConnectionId, _channel: u8) -> bool {
        true
    }

    fn mtu(&self) -> usize {
        DEFAULT_MTU
    }
}
