//! Channels (spec.md §4.2): `UdpChannel` and `TcpChannel`, the two
//! transports a [`crate::router::Router`] owns. Both accept an outbound
//! queue and raise inbound events through a shared [`InboundFrame`] stream;
//! [`NetFailMode`] wraps either at the send path for fault-injection tests
//! (spec.md §9).

pub mod tcp;
pub mod udp;

use std::{
    net::SocketAddr,
    sync::atomic::{AtomicU8, Ordering},
    time::Duration,
};

use bytes::Bytes;
use rand::Rng;

pub use tcp::TcpChannel;
pub use udp::UdpChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

/// A decoded-ready wire frame, plus the peer address and transport it
/// arrived on. The router decodes `bytes` into a [`codec::message::Message`]
/// (or a `RouterAdvertise`/`LogicalAdvertise` control frame) once it has
/// resolved the channel's [`crate::config::Router::shared_key`].
pub struct InboundFrame {
    pub from: SocketAddr,
    pub transport: Transport,
    pub bytes: Bytes,
}

/// First-class fault-injection mode (spec.md §9 `NetFailMode`), required so
/// the reliable-transfer and duplex test scenarios in spec.md §8 are
/// reproducible. Applied as a wrapper at the channel layer's send path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetFailMode {
    Normal,
    Disconnected,
    Intermittent,
    Delay,
    Duplicate,
}

impl NetFailMode {
    fn as_u8(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Disconnected => 1,
            Self::Intermittent => 2,
            Self::Delay => 3,
            Self::Duplicate => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Disconnected,
            2 => Self::Intermittent,
            3 => Self::Delay,
            4 => Self::Duplicate,
            _ => Self::Normal,
        }
    }
}

/// What a channel should do with one outbound datagram, decided by the
/// current [`NetFailMode`].
pub enum SendAction {
    Send,
    Drop,
    DelayThenSend(Duration),
    SendTwice,
}

/// Per-channel fault mode, swappable at runtime by tests.
#[derive(Default)]
pub struct FaultInjector(AtomicU8);

impl FaultInjector {
    pub fn set_mode(&self, mode: NetFailMode) {
        self.0.store(mode.as_u8(), Ordering::Relaxed);
    }

    pub fn mode(&self) -> NetFailMode {
        NetFailMode::from_u8(self.0.load(Ordering::Relaxed))
    }

    /// Decide what to do with one outbound datagram under the current mode.
    /// `Intermittent` drops roughly half of all sends; `Delay` adds a fixed
    /// 50ms hold; `Duplicate` retransmits the same datagram a second time.
    pub fn decide(&self) -> SendAction {
        match self.mode() {
            NetFailMode::Normal => SendAction::Send,
            NetFailMode::Disconnected => SendAction::Drop,
            NetFailMode::Intermittent => {
                if rand::rng().random_bool(0.5) {
                    SendAction::Send
                } else {
                    SendAction::Drop
                }
            }
            NetFailMode::Delay => SendAction::DelayThenSend(Duration::from_millis(50)),
            NetFailMode::Duplicate => SendAction::SendTwice,
        }
    }
}

