//! Routing tables, dispatcher, and session manager for the mesh-router
//! messaging fabric (spec.md §2-§4.7): the collaborators a `Router` wires
//! together, kept free of any transport or discovery concerns of their own.

pub mod dispatcher;
pub mod queue;
pub mod routing;
pub mod session;

use std::{sync::Arc, time::Duration};

use self::{
    dispatcher::Dispatcher,
    routing::{LogicalTable, PhysicalTable},
    session::{SessionManager, SessionManagerOptions},
};

pub struct ServiceOptions {
    pub physical_route_ttl_secs: u64,
    pub session: SessionManagerOptions,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            physical_route_ttl_secs: 90,
            session: SessionManagerOptions::default(),
        }
    }
}

/// The fabric's core soft state for one router process: physical and
/// logical routing tables, the handler dispatcher, and the session manager.
/// `Router` (in the root crate) owns one of these and layers discovery,
/// tiering, and channel I/O on top.
#[derive(Clone)]
pub struct Service {
    physical: Arc<PhysicalTable>,
    logical: Arc<LogicalTable>,
    dispatcher: Arc<Dispatcher>,
    sessions: Arc<SessionManager>,
}

impl Service {
    pub fn new(options: ServiceOptions) -> Self {
        let logical = Arc::new(LogicalTable::new());
        Self {
            physical: Arc::new(PhysicalTable::new(options.physical_route_ttl_secs)),
            dispatcher: Arc::new(Dispatcher::new(logical.clone())),
            logical,
            sessions: SessionManager::new(options.session),
        }
    }

    pub fn physical_routes(&self) -> &Arc<PhysicalTable> {
        &self.physical
    }

    pub fn logical_routes(&self) -> &Arc<LogicalTable> {
        &self.logical
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Background tick (spec.md §4.5): sweep expired physical routes and
    /// flush logical routes that now point nowhere. Called once per
    /// `BkInterval` by the owning router.
    pub fn tick(&self) -> Vec<routing::PhysicalRoute> {
        self.physical.tick();
        let expired = self.physical.sweep_expired();
        if !expired.is_empty() {
            let physical = self.physical.clone();
            self.logical.flush(move |target| match target {
                routing::RouteTarget::Local(_) => true,
                routing::RouteTarget::Physical(ep) => physical.contains(ep),
            });
        }
        expired
    }

    pub fn default_session_timeout(&self) -> Duration {
        self.sessions.default_timeout
    }
}
