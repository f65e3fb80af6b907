//! Dispatcher (spec.md §2, §9): resolves inbound messages to local handlers
//! registered against logical-endpoint patterns, replacing the source's
//! attribute-scanning discovery with an explicit `register(pattern,
//! session_options, handler)` call.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use codec::{endpoint::LogicalEp, message::Message};
use parking_lot::RwLock;

use crate::{
    routing::{Distance, LogicalTable, RouteTarget},
    session::SessionOptions,
};

pub type HandlerFuture = Pin<Box<dyn Future<Output = Option<Message>> + Send>>;
pub type HandlerFn = Arc<dyn Fn(Message) -> HandlerFuture + Send + Sync>;

struct Registration {
    options: SessionOptions,
    handler: HandlerFn,
}

/// Owns the process's local logical-endpoint registrations and the logical
/// routing table entries they install at `Distance::Process`.
pub struct Dispatcher {
    logical: Arc<LogicalTable>,
    handlers: RwLock<HashMap<String, Registration>>,
}

impl Dispatcher {
    pub fn new(logical: Arc<LogicalTable>) -> Self {
        Self {
            logical,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register `handler` against `pattern`. A topology with a `DynamicScope`
    /// rewrites `pattern` before calling this (spec.md §9) so the same
    /// handler can be exposed under a cluster-public name while remaining
    /// addressable under its internal one.
    pub fn register(&self, pattern: LogicalEp, options: SessionOptions, handler: HandlerFn) {
        let handler_id = pattern.to_string();
        self.handlers.write().insert(handler_id.clone(), Registration { options, handler });
        self.logical.insert(crate::routing::LogicalRouteEntry {
            pattern,
            target: RouteTarget::Local(handler_id),
            distance: Distance::Process,
        });
    }

    pub fn deregister(&self, pattern: &LogicalEp) {
        let handler_id = pattern.to_string();
        self.handlers.write().remove(&handler_id);
        self.logical.remove_target(&RouteTarget::Local(handler_id));
        self.flush();
    }

    /// Drop logical-table entries whose local handler is no longer
    /// registered (spec.md §4.4 `flush()`).
    pub fn flush(&self) {
        let handlers = self.handlers.read();
        self.logical.flush(|target| match target {
            RouteTarget::Local(id) => handlers.contains_key(id),
            RouteTarget::Physical(_) => true,
        });
    }

    pub fn session_options(&self, pattern: &str) -> Option<SessionOptions> {
        self.handlers.read().get(pattern).map(|r| r.options.clone())
    }

    /// Invoke the handler registered for `to_ep`, if any. Returns `None`
    /// both when no handler matches and when the handler itself returns no
    /// reply (one-way messages).
    pub async fn dispatch(&self, to_ep: &LogicalEp, request: Message) -> Option<Message> {
        let handler = {
            let handlers = self.handlers.read();
            handlers
                .iter()
                .find(|(pattern_str, _)| {
                    let pattern: LogicalEp = pattern_str.parse().expect("registered patterns always parse");
                    pattern.matches(to_ep)
                })
                .map(|(_, reg)| reg.handler.clone())
        }?;

        handler(request).await
    }

    pub fn is_registered(&self, pattern: &str) -> bool {
        self.handlers.read().contains_key(pattern)
    }

    pub fn registered_count(&self) -> usize {
        self.handlers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(s: &str) -> codec::endpoint::MsgEp {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn dispatches_to_matching_registered_handler() {
        let dispatcher = Dispatcher::new(Arc::new(LogicalTable::new()));
        dispatcher.register(
            "logical://accounts/billing".parse().unwrap(),
            SessionOptions::default(),
            Arc::new(|_msg| Box::pin(async { Some(Message::new("reply", ep("physical://root"), ep("physical://root"))) })),
        );

        let reply = dispatcher
            .dispatch(&"logical://accounts/billing".parse().unwrap(), Message::new("app.ping", ep("physical://root"), ep("physical://root")))
            .await;
        assert!(reply.is_some());
    }

    #[tokio::test]
    async fn deregister_removes_logical_table_entry() {
        let logical = Arc::new(LogicalTable::new());
        let dispatcher = Dispatcher::new(logical.clone());
        let pattern: LogicalEp = "logical://accounts/billing".parse().unwrap();
        dispatcher.register(pattern.clone(), SessionOptions::default(), Arc::new(|_| Box::pin(async { None })));
        assert_eq!(logical.len(), 1);

        dispatcher.deregister(&pattern);
        assert_eq!(logical.len(), 0);
    }
}
