use mesh_router_codec::{
    advertise::{LogicalAdvertise, RouterAdvertise},
    crypto::{self, SharedKey},
    message::{Message, PropertyValue},
};
use uuid::Uuid;

#[test]
fn message_survives_encode_seal_open_decode_over_plaintext_channel() {
    let from = "physical://root/hub/leaf-1".parse().unwrap();
    let to = "logical://orders/checkout".parse().unwrap();

    let mut msg = Message::new("app.order.created", from, to);
    msg.set_property("order_id", PropertyValue::Text("abc-123".into()));
    msg.payload = bytes::Bytes::from_static(b"{\"total\":4200}");

    let frame = msg.encode().unwrap();
    let wire = crypto::seal(&SharedKey::Plaintext, &frame).unwrap();
    let opened = crypto::open(&SharedKey::Plaintext, &wire).unwrap();
    let decoded = Message::decode(&opened).unwrap();

    assert_eq!(decoded.type_tag, "app.order.created");
    assert_eq!(decoded.payload, msg.payload);
    assert_eq!(decoded.get_property("order_id").unwrap().as_text(), Some("abc-123"));
}

#[test]
fn message_survives_encrypted_channel_round_trip() {
    let key = SharedKey::from_bytes(&[9u8; 32]).unwrap();
    let from = "physical://root/hub/leaf-2".parse().unwrap();
    let to = "physical://root/hub/leaf-1".parse().unwrap();
    let msg = Message::new("app.ping", from, to);

    let frame = msg.encode().unwrap();
    let wire = crypto::seal(&key, &frame).unwrap();
    let opened = crypto::open(&key, &wire).unwrap();
    let decoded = Message::decode(&opened).unwrap();

    assert_eq!(decoded.msg_id, msg.msg_id);
}

#[test]
fn router_advertise_and_logical_advertise_share_endpoint_set_id() {
    let set_id = Uuid::new_v4();
    let router_adv = RouterAdvertise {
        router_ep: "physical://root/hub1".parse().unwrap(),
        capabilities: RouterAdvertise::CAP_P2P,
        endpoint_set_id: set_id,
        udp_ep: Some("10.0.0.1:4000".parse().unwrap()),
        tcp_ep: Some("10.0.0.1:4001".parse().unwrap()),
        advertise_ttl: 4,
    };
    let logical_adv = LogicalAdvertise {
        endpoint_set_id: set_id,
        shard_index: 0,
        shard_count: 1,
        endpoints: vec!["logical://orders/checkout".into()],
    };

    let router_bytes = router_adv.encode();
    let decoded_router = RouterAdvertise::decode(&router_bytes).unwrap();
    let logical_bytes = logical_adv.encode().unwrap();
    let decoded_logical = LogicalAdvertise::decode(&logical_bytes).unwrap();

    assert_eq!(decoded_router.endpoint_set_id, decoded_logical.endpoint_set_id);
}
