#[cfg(feature = "rpc")]
pub mod api;

pub mod channel;
pub mod config;
pub mod observer;
pub mod router;
pub mod statistics;

use std::sync::Arc;

use self::{config::Config, observer::LoggingObserver, router::Router, statistics::Statistics};

#[rustfmt::skip]
static SOFTWARE: &str = concat!(
    "mesh-router.",
    env!("CARGO_PKG_VERSION")
);

/// Starts one router process: binds its channels, spawns the tick and
/// advertise background tasks, and (when `config.rpc` is set) serves the
/// `RouterAdmin` introspection plane. Exposed as a library entry point so
/// integration tests can start a router without going through `main`.
pub async fn startup(config: Arc<Config>) -> anyhow::Result<()> {
    log::info!("starting {SOFTWARE}");

    let statistics = Statistics::default();
    let observer = Arc::new(LoggingObserver::new(config.clone(), statistics.clone()));
    let router = Router::start(config.clone(), observer, statistics.clone()).await?;

    #[cfg(feature = "rpc")]
    if config.rpc.is_some() {
        api::start_server(config, router, statistics).await?;
        return Ok(());
    }

    let _ = router;
    std::future::pending::<()>().await;
    Ok(())
}
