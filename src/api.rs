//! Admin-plane gRPC server (spec.md §2 "RouterAdmin"), modeled on the
//! teacher's `rpc.rs`: a tonic service that only introspects soft state the
//! router already owns — it never originates application traffic.

#![cfg(feature = "rpc")]

use std::{sync::Arc, time::Instant};

use anyhow::Result;
use tonic::{Request, Response, Status, transport::Server};

use crate::{config::Config, router::Router, statistics::Statistics};

pub mod proto {
    tonic::include_proto!("mesh_router");
}

use proto::{
    Empty, LogicalRoute, LogicalRouteList, PhysicalRoute, PhysicalRouteList, Statistics as StatisticsMessage,
    router_admin_server::{RouterAdmin, RouterAdminServer},
};

struct RpcService {
    router: Arc<Router>,
    statistics: Statistics,
    started_at: Instant,
}

#[tonic::async_trait]
impl RouterAdmin for RpcService {
    async fn get_statistics(&self, _request: Request<Empty>) -> Result<Response<StatisticsMessage>, Status> {
        let snapshot = self.statistics.snapshot(self.router.service());
        log::trace!("admin: get_statistics (uptime={:?})", self.started_at.elapsed());
        Ok(Response::new(StatisticsMessage {
            messages_sent: snapshot.messages_sent,
            messages_received: snapshot.messages_received,
            messages_dropped: snapshot.messages_dropped,
            active_sessions: snapshot.active_sessions,
            physical_routes: snapshot.physical_routes,
            logical_routes: snapshot.logical_routes,
            duplicate_leaf_detections: snapshot.duplicate_leaf_detections,
        }))
    }

    async fn list_physical_routes(&self, _request: Request<Empty>) -> Result<Response<PhysicalRouteList>, Status> {
        let now = self.router.service().physical_routes().now();
        let routes = self
            .router
            .service()
            .physical_routes()
            .snapshot()
            .into_iter()
            .map(|route| PhysicalRoute {
                router_ep: route.router_ep.to_string(),
                udp_ep: route.udp_ep.map(|a| a.to_string()).unwrap_or_default(),
                tcp_ep: route.tcp_ep.map(|a| a.to_string()).unwrap_or_default(),
                last_heard_secs: now.saturating_sub(route.last_heard),
                expires_in_secs: route.expires_at.saturating_sub(now),
            })
            .collect();
        Ok(Response::new(PhysicalRouteList { routes }))
    }

    async fn list_logical_routes(&self, _request: Request<Empty>) -> Result<Response<LogicalRouteList>, Status> {
        let routes = self
            .router
            .service()
            .logical_routes()
            .snapshot()
            .into_iter()
            .map(|entry| LogicalRoute {
                pattern: entry.pattern.to_string(),
                distance: format!("{:?}", entry.distance),
                target: match entry.target {
                    service::routing::RouteTarget::Local(id) => format!("local:{id}"),
                    service::routing::RouteTarget::Physical(ep) => ep.to_string(),
                },
            })
            .collect();
        Ok(Response::new(LogicalRouteList { routes }))
    }

    async fn trigger_sweep(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        self.router.service().tick();
        Ok(Response::new(Empty {}))
    }
}

/// Serves `RouterAdmin` on `config.rpc.listen` until the process exits.
/// Callers should only invoke this when `config.rpc` is `Some`.
pub async fn start_server(config: Arc<Config>, router: Arc<Router>, statistics: Statistics) -> Result<()> {
    let rpc = config.rpc.as_ref().expect("start_server requires config.rpc");

    let service = RpcService {
        router,
        statistics,
        started_at: Instant::now(),
    };

    let mut builder = Server::builder()
        .timeout(std::time::Duration::from_secs(rpc.timeout as u64))
        .accept_http1(false);

    #[cfg(feature = "ssl")]
    if let Some(ssl) = &rpc.ssl {
        use tonic::transport::{Identity, ServerTlsConfig};
        let identity = Identity::from_pem(
            std::fs::read_to_string(&ssl.certificate_chain)?,
            std::fs::read_to_string(&ssl.private_key)?,
        );
        builder = builder.tls_config(ServerTlsConfig::new().identity(identity))?;
    }

    log::info!("admin rpc listening on {}", rpc.listen);
    builder
        .add_service(RouterAdminServer::new(service))
        .serve(rpc.listen)
        .await?;

    Ok(())
}
