//! `LazyMessenger` (spec.md §4.8): a reliable-delivery client that issues a
//! query through a [`Topology`] and, when a confirmation endpoint is
//! configured, reports a [`DeliveryConfirmation`] back to it after success
//! or failure.

use std::{sync::Arc, time::Duration};

use bytes::{Buf, BufMut, BytesMut};
use codec::{
    Error,
    endpoint::MsgEp,
    message::{Message, PropertyValue},
};
use uuid::Uuid;

use crate::{Instance, Topology, TopologyClient, TopologyError};

pub const CONFIRMATION_TYPE_TAG: &str = "topology.delivery_confirmation";

#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    Response(Message),
    Exception(String),
}

/// Reported to a messenger's `confirm-ep` after a query completes or fails
/// (spec.md §4.8).
#[derive(Debug, Clone)]
pub struct DeliveryConfirmation {
    pub timestamp: u64,
    pub target_ep: MsgEp,
    pub query: Message,
    pub outcome: DeliveryOutcome,
    pub topology_id: String,
    pub topology_info: String,
    pub topology_param: String,
}

impl DeliveryConfirmation {
    /// Encode as a wire `Message` addressed at `confirm_ep`. The query (and,
    /// on success, the response) are carried length-prefixed in the
    /// payload; everything else rides as properties.
    pub fn into_message(&self, from_ep: MsgEp, confirm_ep: MsgEp) -> Result<Message, Error> {
        let mut msg = Message::new(CONFIRMATION_TYPE_TAG, from_ep, confirm_ep);
        msg.set_property("timestamp", PropertyValue::Text(self.timestamp.to_string()));
        msg.set_property("target_ep", PropertyValue::Text(self.target_ep.to_string()));
        msg.set_property("topology_id", PropertyValue::Text(self.topology_id.clone()));
        msg.set_property("topology_info", PropertyValue::Text(self.topology_info.clone()));
        msg.set_property("topology_param", PropertyValue::Text(self.topology_param.clone()));

        let query_bytes = self.query.encode()?;
        let mut payload = BytesMut::with_capacity(query_bytes.len() + 8);
        payload.put_u32(query_bytes.len() as u32);
        payload.put_slice(&query_bytes);

        match &self.outcome {
            DeliveryOutcome::Response(reply) => {
                msg.set_property("outcome", PropertyValue::Text("response".into()));
                let reply_bytes = reply.encode()?;
                payload.put_u32(reply_bytes.len() as u32);
                payload.put_slice(&reply_bytes);
            }
            DeliveryOutcome::Exception(err) => {
                msg.set_property("outcome", PropertyValue::Text("exception".into()));
                msg.set_property("exception", PropertyValue::Text(err.clone()));
            }
        }

        msg.payload = payload.freeze();
        Ok(msg)
    }

    /// Decode the query (and, for a `"response"` outcome, the reply) back
    /// out of a confirmation message's payload.
    pub fn decode_payload(mut payload: bytes::Bytes) -> Result<(Message, Option<Message>), Error> {
        if payload.remaining() < 4 {
            return Err(Error::FrameFormat);
        }
        let query_len = payload.get_u32() as usize;
        if payload.remaining() < query_len {
            return Err(Error::FrameFormat);
        }
        let query = Message::decode(&payload.split_to(query_len))?;

        if payload.remaining() < 4 {
            return Ok((query, None));
        }
        let reply_len = payload.get_u32() as usize;
        if payload.remaining() < reply_len {
            return Err(Error::FrameFormat);
        }
        let reply = Message::decode(&payload.split_to(reply_len))?;
        Ok((query, Some(reply)))
    }
}

/// Wraps a [`TopologyClient`] with delivery-confirmation reporting.
pub struct LazyMessenger<T: Topology> {
    client: Arc<TopologyClient<T>>,
    from_ep: MsgEp,
    confirm_ep: Option<MsgEp>,
    confirm_required: bool,
    topology_id: String,
    topology_info: String,
    topology_param: String,
}

impl<T: Topology> LazyMessenger<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<TopologyClient<T>>,
        from_ep: MsgEp,
        confirm_ep: Option<MsgEp>,
        confirm_required: bool,
        topology_id: impl Into<String>,
        topology_info: impl Into<String>,
        topology_param: impl Into<String>,
    ) -> Self {
        Self {
            client,
            from_ep,
            confirm_ep,
            confirm_required,
            topology_id: topology_id.into(),
            topology_info: topology_info.into(),
            topology_param: topology_param.into(),
        }
    }

    /// Issue a query via the wrapped topology and report its outcome to
    /// `confirm-ep` if one is configured.
    ///
    /// In "confirm required" mode a timeout or handler exception surfaces as
    /// `Err` to the caller. In "no confirm" mode the same failures are
    /// swallowed — the caller gets `Ok(None)` instead (spec.md §4.8).
    #[allow(clippy::too_many_arguments)]
    pub async fn deliver(
        &self,
        key: Option<u64>,
        build: impl Fn(Uuid, bool) -> Message + Send + 'static,
        mut transport: impl FnMut(&Instance, Message) + Send + 'static,
        mut confirm_transport: impl FnMut(Message),
        now: u64,
        timeout: Duration,
        retries: u32,
    ) -> Result<Option<Message>, TopologyError> {
        let probe = build(Uuid::new_v4(), false);

        let instance = match self.client.topology.select(key) {
            Ok(instance) => instance,
            Err(err) => {
                self.report(&probe, probe.to_ep.clone(), DeliveryOutcome::Exception(format!("{err:?}")), now, &mut confirm_transport);
                return if self.confirm_required { Err(TopologyError::NoRoute(err)) } else { Ok(None) };
            }
        };

        let instance_for_send = instance.clone();
        let result = self
            .client
            .query_instance(&instance, build, move |msg| transport(&instance_for_send, msg), timeout, retries)
            .await;

        match &result {
            Ok(reply) => self.report(&probe, instance.ep.clone(), DeliveryOutcome::Response(reply.clone()), now, &mut confirm_transport),
            Err(TopologyError::Query(e)) => self.report(&probe, instance.ep.clone(), DeliveryOutcome::Exception(format!("{e:?}")), now, &mut confirm_transport),
            Err(TopologyError::NoRoute(_)) => {}
        }

        match result {
            Ok(reply) => Ok(Some(reply)),
            Err(e) if self.confirm_required => Err(e),
            Err(_) => Ok(None),
        }
    }

    fn report(&self, probe: &Message, target_ep: MsgEp, outcome: DeliveryOutcome, now: u64, confirm_transport: &mut impl FnMut(Message)) {
        let Some(confirm_ep) = self.confirm_ep.clone() else { return };
        let confirmation = DeliveryConfirmation {
            timestamp: now,
            target_ep,
            query: probe.clone(),
            outcome,
            topology_id: self.topology_id.clone(),
            topology_info: self.topology_info.clone(),
            topology_param: self.topology_param.clone(),
        };
        if let Ok(msg) = confirmation.into_message(self.from_ep.clone(), confirm_ep) {
            confirm_transport(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BasicTopology;
    use service::session::{SessionManager, SessionManagerOptions};

    fn ep(s: &str) -> MsgEp {
        s.parse().unwrap()
    }

    #[test]
    fn confirmation_round_trips_through_wire_encoding() {
        let confirmation = DeliveryConfirmation {
            timestamp: 12345,
            target_ep: ep("physical://root/hub/leaf-1"),
            query: Message::new("app.ping", ep("physical://root"), ep("physical://root/hub/leaf-1")),
            outcome: DeliveryOutcome::Response(Message::new("reply", ep("physical://root/hub/leaf-1"), ep("physical://root"))),
            topology_id: "A".into(),
            topology_info: "basic".into(),
            topology_param: "".into(),
        };

        let msg = confirmation.into_message(ep("physical://root"), ep("physical://root/confirm")).unwrap();
        assert_eq!(msg.type_tag, CONFIRMATION_TYPE_TAG);
        assert_eq!(msg.get_property("outcome").and_then(PropertyValue::as_text), Some("response"));

        let (query, reply) = DeliveryConfirmation::decode_payload(msg.payload).unwrap();
        assert_eq!(query.type_tag, "app.ping");
        assert_eq!(reply.unwrap().type_tag, "reply");
    }

    #[tokio::test]
    async fn confirm_required_mode_propagates_timeout_as_error() {
        let topology = Arc::new(BasicTopology::new());
        topology.set_instances(vec![Instance { key: None, ep: ep("physical://root/hub/leaf-1") }]);
        let sessions = SessionManager::new(SessionManagerOptions::default());
        let client = Arc::new(TopologyClient::new(topology, sessions));

        let messenger = LazyMessenger::new(client, ep("physical://root"), Some(ep("physical://root/confirm")), true, "A", "basic", "");

        let mut confirmations = Vec::new();
        let result = messenger
            .deliver(
                None,
                |id, _retry| {
                    let mut m = Message::new("app.ping", ep("physical://root"), ep("physical://root/hub/leaf-1"));
                    m.session_id = id;
                    m
                },
                |_instance, _msg| {
                    // dropped on the floor: nothing ever replies, so this query times out.
                },
                |msg| confirmations.push(msg),
                100,
                Duration::from_millis(10),
                0,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(confirmations.len(), 1);
        assert_eq!(confirmations[0].get_property("outcome").and_then(PropertyValue::as_text), Some("exception"));
    }

    #[tokio::test]
    async fn no_confirm_mode_swallows_timeout() {
        let topology = Arc::new(BasicTopology::new());
        topology.set_instances(vec![Instance { key: None, ep: ep("physical://root/hub/leaf-1") }]);
        let sessions = SessionManager::new(SessionManagerOptions::default());
        let client = Arc::new(TopologyClient::new(topology, sessions));

        let messenger = LazyMessenger::new(client, ep("physical://root"), None, false, "A", "basic", "");

        let result = messenger
            .deliver(
                None,
                |id, _retry| {
                    let mut m = Message::new("app.ping", ep("physical://root"), ep("physical://root/hub/leaf-1"));
                    m.session_id = id;
                    m
                },
                |_instance, _msg| {},
                |_msg| panic!("no confirm-ep configured, should never be called"),
                0,
                Duration::from_millis(10),
                0,
            )
            .await;

        assert!(matches!(result, Ok(None)));
    }
}
