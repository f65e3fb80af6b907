//! The `Router` (spec.md §2, §4.5, §4.6): owns the channels, runs the
//! background tick and advertise loops, and implements the `SendTo` routing
//! policy over a [`service::Service`]'s routing tables.
//!
//! Grounded in the teacher's `server::run`/`server::tcp::Router` split: one
//! process owns its transports and a soft-state table, with a background
//! task keeping both fresh.

pub mod error;

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use codec::{
    advertise::{LogicalAdvertise, RouterAdvertise, shard_logical_endpoints},
    crypto::SharedKey,
    endpoint::{LogicalEp, MsgEp, PhysicalEp},
    message::{Flags, Message},
};
use parking_lot::Mutex;
use service::{
    Service, ServiceOptions,
    routing::{Distance, RouteTarget, SelectionPolicy},
    session::SessionManagerOptions,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    channel::{InboundFrame, NetFailMode, TcpChannel, Transport, UdpChannel},
    config::{Config, DiscoveryMode},
    observer::RouterEvents,
    statistics::Statistics,
};

use self::error::RouteError;

/// A frame's position on the wire, once the crypto envelope has been
/// stripped: which of the three frame families follows.
#[repr(u8)]
enum FrameKind {
    Message = 0,
    RouterAdvertise = 1,
    LogicalAdvertise = 2,
}

impl FrameKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Message),
            1 => Some(Self::RouterAdvertise),
            2 => Some(Self::LogicalAdvertise),
            _ => None,
        }
    }
}

/// Where this router sits in the Root/Hub/Leaf hierarchy (spec.md §4.5),
/// derived from the number of segments in its own `router_ep`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterTier {
    Root,
    Hub,
    LeafP2P,
    LeafNonP2P,
}

impl RouterTier {
    fn classify(ep: &PhysicalEp, enable_p2p: bool) -> Self {
        match ep.segments().len() {
            1 => Self::Root,
            2 => Self::Hub,
            _ if enable_p2p => Self::LeafP2P,
            _ => Self::LeafNonP2P,
        }
    }

    fn is_leaf(self) -> bool {
        matches!(self, Self::LeafP2P | Self::LeafNonP2P)
    }
}

/// Accumulator for a remote router's `LogicalAdvertise` shards, keyed by the
/// `endpoint_set_id` carried on its `RouterAdvertise`. Applied wholesale to
/// the logical table once the last shard arrives (spec.md §3: "a changed ID
/// means replace wholesale").
#[derive(Default)]
struct PendingLogicalSet {
    origin: HashMap<Uuid, PhysicalEp>,
    shards: HashMap<Uuid, Vec<Option<Vec<String>>>>,
}

pub struct Router {
    config: Arc<Config>,
    service: Service,
    observer: Arc<dyn RouterEvents>,
    statistics: Statistics,
    shared_key: SharedKey,
    self_ep: PhysicalEp,
    tier: RouterTier,
    udp: Option<Arc<UdpChannel>>,
    tcp: Option<Arc<TcpChannel>>,
    pending_logical: Mutex<PendingLogicalSet>,
    duplicate_leaf: AtomicBool,
}

impl Router {
    /// Binds channels, builds the [`Service`], and spawns the inbound,
    /// tick, and advertise background tasks. Returns an `Arc` since every
    /// background task and every handler closure registered through
    /// [`Self::dispatcher`] needs a cloneable handle.
    pub async fn start(config: Arc<Config>, observer: Arc<dyn RouterEvents>, statistics: Statistics) -> Result<Arc<Self>> {
        let router_cfg = &config.router;
        let self_ep: PhysicalEp = router_cfg.router_ep.parse().context("parsing router.router-ep")?;
        let tier = RouterTier::classify(&self_ep, router_cfg.enable_p2p);

        let shared_key = match &router_cfg.shared_key {
            Some(hex_key) => {
                let bytes = hex::decode(hex_key).context("router.shared-key is not valid hex")?;
                SharedKey::from_bytes(&bytes).context("router.shared-key must decode to 32 bytes")?
            }
            None => SharedKey::Plaintext,
        };

        let service = Service::new(ServiceOptions {
            physical_route_ttl_secs: router_cfg.dead_router_ttl,
            session: SessionManagerOptions {
                session_cache_time: Duration::from_secs(router_cfg.session_cache_time),
                default_retries: router_cfg.session_retries,
                default_timeout: Duration::from_secs(router_cfg.session_timeout),
            },
        });

        let (inbound_tx, inbound_rx) = mpsc::channel::<InboundFrame>(4096);

        let udp = Some(UdpChannel::bind(router_cfg.udp_ep, router_cfg.cloud_ep, inbound_tx.clone()).await?);
        let tcp = Some(TcpChannel::bind(router_cfg.tcp_ep, Duration::from_secs(router_cfg.max_idle as u64), inbound_tx).await?);

        let router = Arc::new(Self {
            config,
            service,
            observer,
            statistics,
            shared_key,
            self_ep,
            tier,
            udp,
            tcp,
            pending_logical: Mutex::new(PendingLogicalSet::default()),
            duplicate_leaf: AtomicBool::new(false),
        });

        tokio::spawn(router.clone().inbound_loop(inbound_rx));
        tokio::spawn(router.clone().tick_loop());
        tokio::spawn(router.clone().advertise_loop());

        Ok(router)
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn tier(&self) -> RouterTier {
        self.tier
    }

    pub fn self_ep(&self) -> &PhysicalEp {
        &self.self_ep
    }

    pub fn has_duplicate_leaf(&self) -> bool {
        self.duplicate_leaf.load(Ordering::Relaxed)
    }

    /// Test hook: force a fault-injection mode on both channels (spec.md §9
    /// `NetFailMode`).
    pub fn set_fail_mode(&self, mode: NetFailMode) {
        if let Some(udp) = &self.udp {
            udp.set_fail_mode(mode);
        }
        if let Some(tcp) = &self.tcp {
            tcp.set_fail_mode(mode);
        }
    }

    // ---- background tasks ----------------------------------------------

    async fn tick_loop(self: Arc<Self>) {
        let mut timer = tokio::time::interval(Duration::from_secs(self.config.router.bk_interval.max(1)));
        loop {
            timer.tick().await;
            self.service.tick();
        }
    }

    async fn advertise_loop(self: Arc<Self>) {
        let mut timer = tokio::time::interval(Duration::from_secs(self.config.router.advertise_time.max(1)));
        loop {
            timer.tick().await;
            if let Err(error) = self.send_advertisement().await {
                log::warn!("advertise failed: {error:#}");
            }
        }
    }

    async fn send_advertisement(&self) -> Result<()> {
        let endpoint_set_id = Uuid::new_v4();
        let advertise = RouterAdvertise {
            router_ep: self.self_ep.clone(),
            capabilities: if self.tier == RouterTier::LeafP2P { RouterAdvertise::CAP_P2P } else { 0 },
            endpoint_set_id,
            udp_ep: self.udp.as_ref().map(|c| c.local_addr()),
            tcp_ep: self.tcp.as_ref().map(|c| c.local_addr()),
            advertise_ttl: self.config.router.def_msg_ttl,
        };

        self.broadcast_frame(FrameKind::RouterAdvertise, &advertise.encode()).await;

        let endpoints: Vec<String> = self
            .service
            .logical_routes()
            .snapshot()
            .into_iter()
            .filter(|e| matches!(e.target, RouteTarget::Local(_)))
            .map(|e| e.pattern.to_string())
            .collect();

        for shard in shard_logical_endpoints(&endpoints, self.config.router.max_logical_advertise_eps, endpoint_set_id) {
            self.broadcast_frame(FrameKind::LogicalAdvertise, &shard.encode()?).await;
        }

        Ok(())
    }

    async fn broadcast_frame(&self, kind: FrameKind, body: &[u8]) {
        let wire = self.seal(kind, body);
        match &self.config.router.discovery {
            DiscoveryMode::Multicast => {
                if let Some(udp) = &self.udp {
                    udp.multicast(wire).await;
                }
            }
            DiscoveryMode::UdpBroadcast { servers } => {
                if let Some(udp) = &self.udp {
                    for server in servers {
                        udp.transmit(*server, wire.clone()).await;
                    }
                }
            }
        }
    }

    fn seal(&self, kind: FrameKind, body: &[u8]) -> Bytes {
        let mut plaintext = BytesMut::with_capacity(1 + body.len());
        plaintext.extend_from_slice(&[kind as u8]);
        plaintext.extend_from_slice(body);
        match codec::crypto::seal(&self.shared_key, &plaintext) {
            Ok(wire) => Bytes::from(wire),
            Err(_) => Bytes::new(),
        }
    }

    // ---- inbound ---------------------------------------------------------

    async fn inbound_loop(self: Arc<Self>, mut inbound: mpsc::Receiver<InboundFrame>) {
        while let Some(frame) = inbound.recv().await {
            let router = self.clone();
            tokio::spawn(async move { router.handle_inbound(frame).await });
        }
    }

    async fn handle_inbound(&self, frame: InboundFrame) {
        let plaintext = match codec::crypto::open(&self.shared_key, &frame.bytes) {
            Ok(bytes) => bytes,
            Err(error) => {
                log::trace!("dropping frame from {}: {error}", frame.from);
                return;
            }
        };

        let Some((kind, body)) = plaintext.split_first().and_then(|(tag, rest)| FrameKind::from_u8(*tag).map(|k| (k, rest))) else {
            log::trace!("dropping frame from {} with unknown frame kind", frame.from);
            return;
        };

        match kind {
            FrameKind::Message => match Message::decode(body) {
                Ok(message) => self.handle_message(message, frame.transport).await,
                Err(error) => log::trace!("malformed message frame from {}: {error}", frame.from),
            },
            FrameKind::RouterAdvertise => match RouterAdvertise::decode(body) {
                Ok(advertise) => self.handle_router_advertise(advertise, frame.from),
                Err(error) => log::trace!("malformed router-advertise from {}: {error}", frame.from),
            },
            FrameKind::LogicalAdvertise => match LogicalAdvertise::decode(body) {
                Ok(advertise) => self.handle_logical_advertise(advertise),
                Err(error) => log::trace!("malformed logical-advertise from {}: {error}", frame.from),
            },
        }
    }

    fn handle_router_advertise(&self, advertise: RouterAdvertise, from: SocketAddr) {
        if advertise.router_ep == self.self_ep {
            let is_self = self.udp.as_ref().map(|c| c.local_addr()) == Some(from) || self.tcp.as_ref().map(|c| c.local_addr()) == Some(from);
            if !is_self && !self.duplicate_leaf.swap(true, Ordering::Relaxed) {
                self.observer.on_duplicate_leaf_detected(&advertise.router_ep.to_string());
            }
            return;
        }

        self.pending_logical.lock().origin.insert(advertise.endpoint_set_id, advertise.router_ep.clone());

        self.service.physical_routes().upsert(service::routing::PhysicalRoute {
            router_ep: advertise.router_ep,
            capabilities: advertise.capabilities,
            logical_endpoint_set_id: advertise.endpoint_set_id,
            udp_ep: advertise.udp_ep,
            tcp_ep: advertise.tcp_ep,
            last_heard: 0,
            expires_at: 0,
        });
    }

    fn handle_logical_advertise(&self, advertise: LogicalAdvertise) {
        let mut pending = self.pending_logical.lock();
        let Some(origin) = pending.origin.get(&advertise.endpoint_set_id).cloned() else {
            return;
        };

        let shard_count = advertise.shard_count as usize;
        let shard_index = advertise.shard_index as usize;
        let is_last = advertise.is_last_shard();
        let entry = pending.shards.entry(advertise.endpoint_set_id).or_insert_with(|| vec![None; shard_count]);
        if shard_index < entry.len() {
            entry[shard_index] = Some(advertise.endpoints);
        }

        if !is_last || !entry.iter().all(Option::is_some) {
            return;
        }

        let endpoints: Vec<String> = pending
            .shards
            .remove(&advertise.endpoint_set_id)
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .flatten()
            .collect();
        pending.origin.remove(&advertise.endpoint_set_id);
        drop(pending);

        let distance = Self::distance_to(&origin, &self.self_ep);
        self.service.logical_routes().flush(|target| !matches!(target, RouteTarget::Physical(ep) if *ep == origin));
        for pattern in endpoints {
            if let Ok(pattern) = pattern.parse::<LogicalEp>() {
                self.service.logical_routes().insert(service::routing::LogicalRouteEntry {
                    pattern,
                    target: RouteTarget::Physical(origin.clone()),
                    distance,
                });
            }
        }
    }

    fn distance_to(origin: &PhysicalEp, local: &PhysicalEp) -> Distance {
        if origin.same_hub(local) {
            Distance::Subnet
        } else if origin.root() == local.root() {
            Distance::Machine
        } else {
            Distance::External
        }
    }

    async fn handle_message(&self, message: Message, _transport: Transport) {
        self.observer.on_receive(&message.from_ep, &message.to_ep, &message.type_tag);

        match &message.to_ep {
            MsgEp::Physical(ep) if *ep == self.self_ep => self.deliver_local(message).await,
            MsgEp::Physical(ep) => {
                let ep = ep.clone();
                if let Err(error) = self.forward_physical(ep, message).await {
                    log::trace!("forward failed: {error}");
                    self.statistics.record_dropped(1);
                }
            }
            MsgEp::Logical(_) => self.route_logical(message).await,
        }
    }

    async fn deliver_local(&self, message: Message) {
        if message.session_id != Uuid::nil() && self.service.sessions().complete(message.session_id, message.clone()) {
            self.observer.on_close(message.session_id, false);
            return;
        }
        log::trace!("dropping physical-self message with no matching session: {message}");
        self.statistics.record_dropped(1);
    }

    async fn route_logical(&self, message: Message) {
        let Some(pattern) = message.to_ep.as_logical().cloned() else {
            return;
        };

        let policy = if message.flags.contains(Flags::BROADCAST) {
            SelectionPolicy::BroadcastAll
        } else {
            SelectionPolicy::SingleRandom
        };

        let targets = self.service.logical_routes().resolve(&pattern, policy);
        if targets.is_empty() {
            if self.tier.is_leaf() {
                if let Err(error) = self.forward_to_parent(message).await {
                    log::trace!("no logical route and parent forward failed: {error}");
                    self.statistics.record_dropped(1);
                }
            } else {
                self.statistics.record_dropped(1);
            }
            return;
        }

        for target in targets {
            match target {
                RouteTarget::Local(_) => {
                    if let Some(reply) = self.service.dispatcher().dispatch(&pattern, message.clone()).await {
                        self.observer.on_send(message.msg_id, 0, reply.payload.len());
                        self.deliver_reply(reply).await;
                    }
                }
                RouteTarget::Physical(ep) => {
                    if let Err(error) = self.forward_physical(ep, message.clone()).await {
                        log::trace!("logical forward failed: {error}");
                        self.statistics.record_dropped(1);
                    }
                }
            }
        }
    }

    async fn deliver_reply(&self, reply: Message) {
        let to = reply.receipt_ep.clone().unwrap_or_else(|| reply.from_ep.clone());
        if let Err(error) = self.send_to(Message { to_ep: to, ..reply }).await {
            log::trace!("reply delivery failed: {error}");
            self.statistics.record_dropped(1);
        }
    }

    /// Entry point for client-originated sends (spec.md §4.6 `SendTo`).
    pub async fn send_to(&self, message: Message) -> Result<(), RouteError> {
        match message.to_ep.clone() {
            MsgEp::Physical(ep) if ep == self.self_ep => {
                self.deliver_local(message).await;
                Ok(())
            }
            MsgEp::Physical(ep) => self.forward_physical(ep, message).await,
            MsgEp::Logical(_) => {
                self.route_logical(message).await;
                Ok(())
            }
        }
    }

    async fn forward_physical(&self, to: PhysicalEp, message: Message) -> Result<(), RouteError> {
        let mut forwarded = message.forward(MsgEp::Physical(self.self_ep.clone()), message.flags.contains(Flags::KEEP_SESSION_ID));
        if forwarded.ttl == 0 {
            return Err(RouteError::TtlExceeded(MsgEp::Physical(to)));
        }

        if let Some(route) = self.service.physical_routes().get(&to) {
            let encoded = forwarded.encode().map_err(|_| RouteError::NoRoute(MsgEp::Physical(to.clone())))?;
            let wire = self.seal(FrameKind::Message, &encoded);

            if let (Some(tcp), Some(tcp_ep)) = (&self.tcp, route.tcp_ep) {
                if tcp.transmit(tcp_ep, wire.clone()).await.is_ok() {
                    self.statistics.record_sent(1);
                    return Ok(());
                }
            }
            if let (Some(udp), Some(udp_ep)) = (&self.udp, route.udp_ep) {
                udp.transmit(udp_ep, wire).await;
                self.statistics.record_sent(1);
                return Ok(());
            }
            return Err(RouteError::NoRoute(MsgEp::Physical(to)));
        }

        match self.tier {
            RouterTier::Root => Err(RouteError::NoRoute(MsgEp::Physical(to))),
            RouterTier::Hub => {
                self.broadcast_to_children(forwarded).await;
                Ok(())
            }
            RouterTier::LeafP2P | RouterTier::LeafNonP2P => {
                forwarded.to_ep = MsgEp::Physical(to.clone());
                self.forward_to_parent(forwarded).await
            }
        }
    }

    fn parent_ep(&self) -> Option<PhysicalEp> {
        let segments = self.self_ep.segments();
        if segments.len() <= 1 {
            None
        } else {
            Some(PhysicalEp::new(segments[..segments.len() - 1].to_vec()))
        }
    }

    async fn forward_to_parent(&self, message: Message) -> Result<(), RouteError> {
        let Some(parent) = self.parent_ep() else {
            return Err(RouteError::NoRoute(message.to_ep.clone()));
        };
        Box::pin(self.forward_physical(parent, message)).await
    }

    async fn broadcast_to_children(&self, message: Message) {
        let children: Vec<_> = self
            .service
            .physical_routes()
            .snapshot()
            .into_iter()
            .filter(|route| route.router_ep.same_hub(&self.self_ep))
            .collect();

        for child in children {
            let encoded = match message.encode() {
                Ok(b) => b,
                Err(_) => continue,
            };
            let wire = self.seal(FrameKind::Message, &encoded);
            if let (Some(tcp), Some(tcp_ep)) = (&self.tcp, child.tcp_ep) {
                if tcp.transmit(tcp_ep, wire.clone()).await.is_ok() {
                    continue;
                }
            }
            if let (Some(udp), Some(udp_ep)) = (&self.udp, child.udp_ep) {
                udp.transmit(udp_ep, wire).await;
            }
        }
    }
}
