//! End-to-end exercises across routing, the dispatcher, and the session
//! manager: the collaborators a `Router` wires together (spec.md §2-§4.7),
//! tested here without any transport beyond an in-process loopback.

use std::{sync::Arc, time::Duration};

use mesh_router_service::{
    Service, ServiceOptions,
    routing::{Distance, LogicalRouteEntry, RouteTarget, SelectionPolicy},
    session::{SessionKind, SessionOptions, query::query_with_retry},
};

fn ep(s: &str) -> codec::endpoint::MsgEp {
    s.parse().unwrap()
}

#[tokio::test]
async fn registered_handler_answers_a_client_query_over_a_loopback_dispatch() {
    let service = Service::new(ServiceOptions::default());

    service.dispatcher().register(
        "logical://accounts/billing".parse().unwrap(),
        SessionOptions {
            kind: SessionKind::Query,
            idempotent: true,
            ..SessionOptions::default()
        },
        Arc::new(|request| {
            Box::pin(async move {
                let mut reply = codec::message::Message::new("billing.reply", request.to_ep.clone(), request.from_ep.clone());
                reply.session_id = request.session_id;
                Some(reply)
            })
        }),
    );

    let dispatcher = service.dispatcher().clone();
    let sessions = service.sessions().clone();

    let result = query_with_retry(
        &sessions,
        move |msg| {
            let dispatcher = dispatcher.clone();
            let sessions = sessions.clone();
            tokio::spawn(async move {
                if let Some(reply) = dispatcher.dispatch(&"logical://accounts/billing".parse().unwrap(), msg).await {
                    sessions.complete(reply.session_id, reply);
                }
            });
        },
        |id, _retry| {
            let mut m = codec::message::Message::new("app.charge", ep("physical://root"), ep("logical://accounts/billing"));
            m.session_id = id;
            m
        },
        Duration::from_millis(200),
        2,
    )
    .await;

    let reply = result.expect("handler should answer before the timeout");
    assert_eq!(reply.type_tag, "billing.reply");
}

#[tokio::test]
async fn background_tick_sweeps_expired_physical_routes_and_flushes_dependent_logical_routes() {
    let service = Service::new(ServiceOptions {
        physical_route_ttl_secs: 0,
        ..ServiceOptions::default()
    });

    let leaf: codec::endpoint::PhysicalEp = "physical://root/hub/leaf-1".parse().unwrap();
    service.physical_routes().upsert(mesh_router_service::routing::PhysicalRoute {
        router_ep: leaf.clone(),
        capabilities: 0,
        logical_endpoint_set_id: uuid::Uuid::new_v4(),
        udp_ep: None,
        tcp_ep: None,
        last_heard: 0,
        expires_at: 0,
    });
    service.logical_routes().insert(LogicalRouteEntry {
        pattern: "logical://orders/*".parse().unwrap(),
        target: RouteTarget::Physical(leaf),
        distance: Distance::Subnet,
    });
    assert_eq!(service.logical_routes().len(), 1);

    service.physical_routes().tick();
    service.physical_routes().tick();
    let expired = service.tick();

    assert_eq!(expired.len(), 1);
    assert!(service.logical_routes().is_empty());
}

#[tokio::test]
async fn broadcast_selection_reaches_every_route_in_the_closest_tier() {
    let service = Service::new(ServiceOptions::default());
    for i in 0..3 {
        service.logical_routes().insert(LogicalRouteEntry {
            pattern: "logical://notify/*".parse().unwrap(),
            target: RouteTarget::Physical(format!("physical://root/hub/leaf-{i}").parse().unwrap()),
            distance: Distance::Subnet,
        });
    }

    let targets = service.logical_routes().resolve(&"logical://notify/inbox".parse().unwrap(), SelectionPolicy::BroadcastAll);
    assert_eq!(targets.len(), 3);
}
