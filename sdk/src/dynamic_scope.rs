//! `DynamicScope` (spec.md §4.8, §9): server-side registration helper that
//! exposes a handler under a cluster-public logical endpoint while keeping
//! its internal pattern addressable too. A handler declared
//! `logical://foo, DynamicScope="A"` is reachable both at `logical://foo`
//! and at the topology's public name `logical://A`, letting one process
//! host multiple cluster identities.

use codec::endpoint::LogicalEp;
use service::{Service, dispatcher::HandlerFn, session::SessionOptions};

/// Registers `handler` under its internal `pattern` and, additionally,
/// under `scope` — the cluster-public logical endpoint a topology targets
/// (e.g. `logical://A` for a `DynamicScope="A"` declaration). Both
/// registrations share the same handler, so either address reaches it and
/// `Dispatcher::deregister` on either pattern only removes that one route.
pub fn register_scoped(service: &Service, pattern: LogicalEp, scope: LogicalEp, options: SessionOptions, handler: HandlerFn) {
    service.dispatcher().register(pattern, options.clone(), handler.clone());
    service.dispatcher().register(scope, options, handler);
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::message::Message;
    use service::ServiceOptions;

    fn ep(s: &str) -> codec::endpoint::MsgEp {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn handler_is_reachable_under_both_internal_and_scoped_pattern() {
        let service = Service::new(ServiceOptions::default());
        register_scoped(
            &service,
            "logical://foo".parse().unwrap(),
            "logical://A".parse().unwrap(),
            SessionOptions::default(),
            std::sync::Arc::new(|_msg| Box::pin(async { Some(Message::new("reply", ep("physical://root"), ep("physical://root"))) })),
        );

        assert_eq!(service.logical_routes().len(), 2);

        let internal = service.dispatcher().dispatch(&"logical://foo".parse().unwrap(), Message::new("app.ping", ep("physical://root"), ep("physical://root"))).await;
        assert!(internal.is_some());

        let scoped = service.dispatcher().dispatch(&"logical://A".parse().unwrap(), Message::new("app.ping", ep("physical://root"), ep("physical://root"))).await;
        assert!(scoped.is_some());
    }
}
