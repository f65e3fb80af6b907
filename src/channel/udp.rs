//! UDP channel (spec.md §4.2): one socket per router, optionally joined to
//! a multicast group for discovery (`cloud_ep`). Outbound frames go through
//! a bounded queue with drop-on-full semantics; a dedicated writer task
//! owns the socket for sends so `transmit`/`multicast` never block on I/O
//! contention with the read loop.

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::{net::UdpSocket, sync::mpsc};

use super::{FaultInjector, InboundFrame, NetFailMode, SendAction, Transport};

const OUTBOUND_QUEUE_DEPTH: usize = 1024;

struct Outbound {
    to: SocketAddr,
    bytes: Bytes,
}

pub struct UdpChannel {
    local_addr: SocketAddr,
    cloud_ep: Option<SocketAddr>,
    outbound: mpsc::Sender<Outbound>,
    fault: FaultInjector,
}

impl UdpChannel {
    /// Binds `udp_ep`, joins the `cloud_ep` multicast group if it is one
    /// (non-loopback multicast address), and spawns the read and write
    /// loops. Inbound frames are delivered to `inbound`; `cloud_ep` sends
    /// loop back to this same socket when IP_MULTICAST_LOOP is enabled
    /// (the OS default), so a router observes its own advertisements.
    pub async fn bind(
        udp_ep: SocketAddr,
        cloud_ep: Option<SocketAddr>,
        inbound: mpsc::Sender<InboundFrame>,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(udp_ep)
            .await
            .with_context(|| format!("binding udp channel on {udp_ep}"))?;

        if let Some(group) = cloud_ep {
            if let std::net::IpAddr::V4(addr) = group.ip() {
                if addr.is_multicast() {
                    socket
                        .join_multicast_v4(addr, std::net::Ipv4Addr::UNSPECIFIED)
                        .with_context(|| format!("joining multicast group {group}"))?;
                }
            }
        }

        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);

        tokio::spawn(read_loop(socket.clone(), inbound));
        tokio::spawn(write_loop(socket, outbound_rx));

        Ok(Arc::new(Self {
            local_addr,
            cloud_ep,
            outbound: outbound_tx,
            fault: FaultInjector::default(),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn set_fail_mode(&self, mode: NetFailMode) {
        self.fault.set_mode(mode);
    }

    /// Enqueues a frame for unicast delivery. Drops silently when the
    /// outbound queue is full, per spec.md §4.2 "bounded outbound queue,
    /// drop-on-full".
    pub async fn transmit(&self, to: SocketAddr, bytes: Bytes) {
        self.send(to, bytes).await
    }

    /// Sends to the configured discovery group. A no-op if no `cloud_ep`
    /// was configured.
    pub async fn multicast(&self, bytes: Bytes) {
        if let Some(group) = self.cloud_ep {
            self.send(group, bytes).await;
        }
    }

    async fn send(&self, to: SocketAddr, bytes: Bytes) {
        match self.fault.decide() {
            SendAction::Drop => {}
            SendAction::Send => self.enqueue(to, bytes).await,
            SendAction::DelayThenSend(delay) => {
                tokio::time::sleep(delay).await;
                self.enqueue(to, bytes).await;
            }
            SendAction::SendTwice => {
                self.enqueue(to, bytes.clone()).await;
                self.enqueue(to, bytes).await;
            }
        }
    }

    async fn enqueue(&self, to: SocketAddr, bytes: Bytes) {
        if self.outbound.try_send(Outbound { to, bytes }).is_err() {
            log::trace!("udp outbound queue full, dropping frame to {to}");
        }
    }
}

async fn read_loop(socket: Arc<UdpSocket>, inbound: mpsc::Sender<InboundFrame>) {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(error) => {
                log::warn!("udp recv error: {error}");
                continue;
            }
        };
        let frame = InboundFrame {
            from,
            transport: Transport::Udp,
            bytes: Bytes::copy_from_slice(&buf[..len]),
        };
        if inbound.send(frame).await.is_err() {
            break;
        }
    }
}

async fn write_loop(socket: Arc<UdpSocket>, mut outbound: mpsc::Receiver<Outbound>) {
    while let Some(frame) = outbound.recv().await {
        if let Err(error) = socket.send_to(&frame.bytes, frame.to).await {
            log::trace!("udp send error to {}: {error}", frame.to);
        }
    }
}
