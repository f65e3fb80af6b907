use std::{fs::read_to_string, net::SocketAddr};

use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};

/// SSL configuration, shared by the admin-plane rpc listener.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Ssl {
    pub private_key: String,
    pub certificate_chain: String,
}

/// How a router finds its peers before any physical route exists
/// (spec.md §6 `DiscoveryMode`).
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum DiscoveryMode {
    Multicast,
    ///
    /// Relay discovery frames via one or more broadcast servers instead of
    /// IP multicast, for networks where multicast is filtered.
    ///
    UdpBroadcast { servers: Vec<SocketAddr> },
}

impl Default for DiscoveryMode {
    fn default() -> Self {
        Self::Multicast
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct ReliableTransfer {
    ///
    /// block size negotiated for reliable-transfer sessions, in bytes.
    ///
    #[serde(default = "ReliableTransfer::def_block_size")]
    pub def_block_size: usize,
    ///
    /// maximum retransmit attempts for a single block before the transfer
    /// fails.
    ///
    #[serde(default = "ReliableTransfer::max_tries")]
    pub max_tries: u32,
}

impl ReliableTransfer {
    fn def_block_size() -> usize {
        64 * 1024
    }

    fn max_tries() -> u32 {
        10
    }
}

impl Default for ReliableTransfer {
    fn default() -> Self {
        Self {
            def_block_size: Self::def_block_size(),
            max_tries: Self::max_tries(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Router {
    ///
    /// this router's own physical endpoint, e.g. `physical://root/hub/leaf-1`.
    ///
    pub router_ep: String,
    ///
    /// multicast group:port used for discovery, when `discovery` is
    /// `multicast`.
    ///
    #[serde(default)]
    pub cloud_ep: Option<SocketAddr>,
    ///
    /// local UDP bind address. `0.0.0.0:0` binds an ephemeral port.
    ///
    #[serde(default = "Router::udp_ep")]
    pub udp_ep: SocketAddr,
    ///
    /// local TCP bind address.
    ///
    #[serde(default = "Router::tcp_ep")]
    pub tcp_ep: SocketAddr,
    #[serde(default)]
    pub discovery: DiscoveryMode,
    ///
    /// whether this leaf participates in leaf-to-leaf routing (spec.md
    /// §4.5 "Leaf (P2P)"). Ignored for hub/root tiers, which are
    /// determined by the number of segments in `router_ep`.
    ///
    #[serde(default)]
    pub enable_p2p: bool,
    ///
    /// seconds between `RouterAdvertise` emissions.
    ///
    #[serde(default = "Router::advertise_time")]
    pub advertise_time: u64,
    ///
    /// seconds between background sweeps of expired physical routes.
    ///
    #[serde(default = "Router::bk_interval")]
    pub bk_interval: u64,
    ///
    /// seconds a TCP connection may sit idle before the channel closes it.
    ///
    #[serde(default = "Router::max_idle")]
    pub max_idle: u32,
    ///
    /// default outbound message TTL, decremented on each hop.
    ///
    #[serde(default = "Router::def_msg_ttl")]
    pub def_msg_ttl: u8,
    ///
    /// 32-byte frame encryption key, hex-encoded. Absent means frames carry
    /// only a plaintext integrity fingerprint (spec.md §6 `PLAINTEXT`).
    ///
    #[serde(default)]
    pub shared_key: Option<String>,
    ///
    /// seconds an idempotent session's reply is retained for duplicate
    /// suppression.
    ///
    #[serde(default = "Router::session_cache_time")]
    pub session_cache_time: u64,
    #[serde(default = "Router::session_retries")]
    pub session_retries: u32,
    #[serde(default = "Router::session_timeout")]
    pub session_timeout: u64,
    ///
    /// maximum logical endpoints carried per `LogicalAdvertise` frame.
    ///
    #[serde(default = "Router::max_logical_advertise_eps")]
    pub max_logical_advertise_eps: usize,
    ///
    /// seconds an unresponsive physical route lingers before removal by
    /// the background sweep.
    ///
    #[serde(default = "Router::dead_router_ttl")]
    pub dead_router_ttl: u64,
    #[serde(default)]
    pub reliable_transfer: ReliableTransfer,
}

impl Router {
    fn udp_ep() -> SocketAddr {
        "0.0.0.0:0".parse().unwrap()
    }

    fn tcp_ep() -> SocketAddr {
        "0.0.0.0:0".parse().unwrap()
    }

    fn advertise_time() -> u64 {
        5
    }

    fn bk_interval() -> u64 {
        1
    }

    fn max_idle() -> u32 {
        300
    }

    fn def_msg_ttl() -> u8 {
        16
    }

    fn session_cache_time() -> u64 {
        60
    }

    fn session_retries() -> u32 {
        3
    }

    fn session_timeout() -> u64 {
        10
    }

    fn max_logical_advertise_eps() -> usize {
        64
    }

    fn dead_router_ttl() -> u64 {
        90
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Rpc {
    ///
    /// admin-plane gRPC listen address (`GetStatistics`/`ListPhysicalRoutes`/
    /// `ListLogicalRoutes`/`TriggerSweep`).
    ///
    #[serde(default = "Rpc::listen")]
    pub listen: SocketAddr,
    #[serde(default)]
    pub ssl: Option<Ssl>,
    #[serde(default = "Rpc::timeout")]
    pub timeout: u32,
}

impl Rpc {
    fn listen() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn timeout() -> u32 {
        5
    }
}

impl Default for Rpc {
    fn default() -> Self {
        Self {
            listen: Self::listen(),
            ssl: None,
            timeout: Self::timeout(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub router: Router,
    #[serde(default)]
    pub rpc: Option<Rpc>,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
)]
struct Cli {
    ///
    /// Specify the configuration file path
    ///
    /// Example: mesh-router --config /etc/mesh-router/config.json5
    ///
    #[arg(long, short)]
    config: String,
}

impl Config {
    ///
    /// Load configuration from the file passed with `--config`.
    ///
    pub fn load() -> Result<Self> {
        Ok(serde_json5::from_str::<Self>(&read_to_string(
            &Cli::parse().config,
        )?)?)
    }
}
