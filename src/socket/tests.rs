use super::*;
use crate::protocol::CONTROL_PORT;

fn make_node(val: u8, name: &str) -> Node {
    Node::new(NodeAddr::from_bytes([0x02, 0, 0, 0, 0, val]), name).unwrap()
}

fn make_manager() -> (SocketManager, MemoryMessageStore) {
    let store = MemoryMessageStore::new();
    let manager = SocketManager::new(
        make_node(1, "bob"),
        CONTROL_PORT,
        8,
        Box::new(store.clone()),
    );
    (manager, store)
}

fn datagram(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    Segment::datagram(src_port, dst_port, payload.to_vec())
        .encode()
        .unwrap()
}

struct FailingStore;

impl MessageStore for FailingStore {
    fn insert(&mut self, _record: MessageRecord) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("disk full".into()))
    }
}

// ===== Lifecycle =====

#[test]
fn test_request_socket_unbound() {
    let (mut mgr, _) = make_manager();
    let id = mgr.request_socket(SegmentKind::Datagram).unwrap();
    let entry = mgr.get(id).unwrap();
    assert_eq!(entry.kind, SegmentKind::Datagram);
    assert!(entry.bound_port.is_none());
    assert!(matches!(mgr.local_port(id), Err(SocketError::NotBound(_))));
    assert_eq!(mgr.socket_count(), 1);
}

#[test]
fn test_socket_limit() {
    let (mut mgr, _) = make_manager();
    for _ in 0..8 {
        mgr.request_socket(SegmentKind::Datagram).unwrap();
    }
    assert!(matches!(
        mgr.request_socket(SegmentKind::Datagram),
        Err(SocketError::TooManySockets(8))
    ));
}

#[test]
fn test_bind_port_in_use() {
    let (mut mgr, _) = make_manager();
    let a = mgr.request_socket(SegmentKind::Datagram).unwrap();
    let b = mgr.request_socket(SegmentKind::Datagram).unwrap();

    assert_eq!(mgr.bind(a, 7000).unwrap(), 7000);
    assert!(matches!(mgr.bind(b, 7000), Err(SocketError::PortInUse(7000))));
    // Rebinding the holder to the same port is fine.
    assert_eq!(mgr.bind(a, 7000).unwrap(), 7000);
    assert_eq!(mgr.socket_for_port(7000), Some(a));
}

#[test]
fn test_bind_control_port_reserved() {
    let (mut mgr, _) = make_manager();
    let a = mgr.request_socket(SegmentKind::Datagram).unwrap();
    assert!(matches!(
        mgr.bind(a, CONTROL_PORT),
        Err(SocketError::ReservedPort(CONTROL_PORT))
    ));
}

#[test]
fn test_bind_unknown_socket() {
    let (mut mgr, _) = make_manager();
    assert!(matches!(
        mgr.bind(SocketId::new(99), 7000),
        Err(SocketError::UnknownSocket(_))
    ));
}

#[test]
fn test_rebind_frees_old_port() {
    let (mut mgr, _) = make_manager();
    let a = mgr.request_socket(SegmentKind::Datagram).unwrap();
    let b = mgr.request_socket(SegmentKind::Datagram).unwrap();
    mgr.bind(a, 7000).unwrap();
    mgr.bind(a, 7001).unwrap();

    assert_eq!(mgr.socket_for_port(7000), None);
    mgr.bind(b, 7000).unwrap();
    assert_eq!(mgr.local_port(a).unwrap(), 7001);
}

#[test]
fn test_socket_ids_skip_live_sockets_after_wrap() {
    let (mut mgr, _) = make_manager();
    let a = mgr.request_socket(SegmentKind::Datagram).unwrap();
    let b = mgr.request_socket(SegmentKind::Stream).unwrap();
    mgr.bind(a, 7000).unwrap();

    mgr.next_id = u32::MAX;
    let c = mgr.request_socket(SegmentKind::Datagram).unwrap();
    assert_eq!(c, SocketId::new(u32::MAX));

    let d = mgr.request_socket(SegmentKind::Datagram).unwrap();
    assert_eq!(d, SocketId::new(3));
    assert_eq!(mgr.socket_count(), 4);
    assert_eq!(mgr.get(a).unwrap().bound_port, Some(7000));
    assert_eq!(mgr.get(b).unwrap().kind, SegmentKind::Stream);
}

#[test]
fn test_remove_socket_frees_port() {
    let (mut mgr, _) = make_manager();
    let a = mgr.request_socket(SegmentKind::Datagram).unwrap();
    mgr.bind(a, 7000).unwrap();
    mgr.remove_socket(a).unwrap();

    assert!(mgr.get(a).is_none());
    assert!(matches!(mgr.remove_socket(a), Err(SocketError::UnknownSocket(_))));

    let b = mgr.request_socket(SegmentKind::Datagram).unwrap();
    mgr.bind(b, 7000).unwrap();
}

#[test]
fn test_bind_zero_picks_ephemeral() {
    let (mut mgr, _) = make_manager();
    let a = mgr.request_socket(SegmentKind::Datagram).unwrap();
    let b = mgr.request_socket(SegmentKind::Datagram).unwrap();
    let pa = mgr.bind(a, 0).unwrap();
    let pb = mgr.bind(b, 0).unwrap();
    assert!(pa >= EPHEMERAL_PORT_START);
    assert!(pb >= EPHEMERAL_PORT_START);
    assert_ne!(pa, pb);
}

// ===== Outbound =====

#[test]
fn test_datagram_segment_uses_connected_remote() {
    let (mut mgr, _) = make_manager();
    let peer = *make_node(2, "").addr();
    let a = mgr.request_socket(SegmentKind::Datagram).unwrap();
    mgr.bind(a, 7000).unwrap();

    assert!(matches!(
        mgr.datagram_segment(a, None, vec![1]),
        Err(SocketError::NotConnected(_))
    ));

    mgr.connect(a, peer, 8000).unwrap();
    let (dest, bytes) = mgr.datagram_segment(a, None, vec![1, 2, 3]).unwrap();
    assert_eq!(dest, peer);
    assert_eq!(
        Segment::decode(&bytes).unwrap(),
        Segment::datagram(7000, 8000, vec![1, 2, 3])
    );

    // Explicit destination overrides the connected one.
    let other = *make_node(3, "").addr();
    let (dest, bytes) = mgr.datagram_segment(a, Some((other, 9000)), vec![]).unwrap();
    assert_eq!(dest, other);
    assert_eq!(
        Segment::decode(&bytes).unwrap(),
        Segment::datagram(7000, 9000, vec![])
    );
}

#[test]
fn test_datagram_segment_auto_binds() {
    let (mut mgr, _) = make_manager();
    let a = mgr.request_socket(SegmentKind::Datagram).unwrap();
    let peer = *make_node(2, "").addr();

    let (_, bytes) = mgr.datagram_segment(a, Some((peer, 8000)), vec![9]).unwrap();
    let port = mgr.local_port(a).unwrap();
    assert_eq!(port, EPHEMERAL_PORT_START);
    match Segment::decode(&bytes).unwrap() {
        Segment::Datagram(dg) => assert_eq!(dg.src_port, port),
        other => panic!("unexpected segment: {other:?}"),
    }
}

#[test]
fn test_stream_socket_cannot_send() {
    let (mut mgr, _) = make_manager();
    let s = mgr.request_socket(SegmentKind::Stream).unwrap();
    let peer = *make_node(2, "").addr();
    assert!(matches!(
        mgr.datagram_segment(s, Some((peer, 1)), vec![]),
        Err(SocketError::UnsupportedKind(SegmentKind::Stream))
    ));
}

#[test]
fn test_control_segment() {
    let (mgr, _) = make_manager();
    let env = Envelope::from(RoutingMessage::Hello(make_node(1, "bob")));
    let bytes = mgr.control_segment(&env).unwrap();
    match Segment::decode(&bytes).unwrap() {
        Segment::Datagram(dg) => {
            assert_eq!(dg.src_port, CONTROL_PORT);
            assert_eq!(dg.dst_port, CONTROL_PORT);
            assert_eq!(Envelope::decode(&dg.payload).unwrap(), env);
        }
        other => panic!("unexpected segment: {other:?}"),
    }
}

// ===== Inbound =====

#[test]
fn test_deliver_to_bound_socket() {
    let (mut mgr, _) = make_manager();
    let source = *make_node(2, "").addr();
    let a = mgr.request_socket(SegmentKind::Datagram).unwrap();
    mgr.bind(a, 7000).unwrap();
    let (tx, mut rx) = datagram_channel(4);
    mgr.set_receive_handler(a, Some(tx)).unwrap();

    let dispatch = mgr.handle_segment(source, &datagram(6000, 7000, b"ping"));
    assert_eq!(dispatch, Dispatch::Delivered(a));

    let got = rx.try_recv().unwrap();
    assert_eq!(got.source, source);
    assert_eq!(got.source_port, 6000);
    assert_eq!(got.payload, b"ping");
    assert_eq!(mgr.stats().delivered, 1);
}

#[test]
fn test_unbound_port_dropped_without_side_effect() {
    let (mut mgr, store) = make_manager();
    let source = *make_node(2, "").addr();
    let a = mgr.request_socket(SegmentKind::Datagram).unwrap();
    mgr.bind(a, 7000).unwrap();
    let (tx, mut rx) = datagram_channel(4);
    mgr.set_receive_handler(a, Some(tx)).unwrap();

    assert_eq!(
        mgr.handle_segment(source, &datagram(6000, 7001, b"x")),
        Dispatch::Dropped
    );
    assert!(rx.try_recv().is_err());
    assert!(store.is_empty());
    assert_eq!(mgr.stats().dropped_unbound, 1);
}

#[test]
fn test_bound_socket_without_handler_drops() {
    let (mut mgr, _) = make_manager();
    let a = mgr.request_socket(SegmentKind::Datagram).unwrap();
    mgr.bind(a, 7000).unwrap();
    let source = *make_node(2, "").addr();
    assert_eq!(
        mgr.handle_segment(source, &datagram(1, 7000, b"x")),
        Dispatch::Dropped
    );
    assert_eq!(mgr.stats().dropped_no_handler, 1);
}

#[test]
fn test_full_handler_drops() {
    let (mut mgr, _) = make_manager();
    let a = mgr.request_socket(SegmentKind::Datagram).unwrap();
    mgr.bind(a, 7000).unwrap();
    let (tx, _rx) = datagram_channel(1);
    mgr.set_receive_handler(a, Some(tx)).unwrap();
    let source = *make_node(2, "").addr();

    assert_eq!(
        mgr.handle_segment(source, &datagram(1, 7000, b"1")),
        Dispatch::Delivered(a)
    );
    assert_eq!(
        mgr.handle_segment(source, &datagram(1, 7000, b"2")),
        Dispatch::Dropped
    );
    assert_eq!(mgr.stats().dropped_handler_full, 1);
}

#[test]
fn test_closed_handler_is_cleared() {
    let (mut mgr, _) = make_manager();
    let a = mgr.request_socket(SegmentKind::Datagram).unwrap();
    mgr.bind(a, 7000).unwrap();
    let (tx, rx) = datagram_channel(1);
    mgr.set_receive_handler(a, Some(tx)).unwrap();
    drop(rx);

    let source = *make_node(2, "").addr();
    assert_eq!(
        mgr.handle_segment(source, &datagram(1, 7000, b"x")),
        Dispatch::Dropped
    );
    assert!(mgr.get(a).unwrap().handler.is_none());
}

#[test]
fn test_control_port_message_stored() {
    let (mut mgr, store) = make_manager();
    let alice = make_node(2, "alice");
    let msg = AppMessage::new(alice.clone(), 1_330_000_000, "hi bob");
    let payload = Envelope::from(msg.clone()).encode().unwrap();

    let dispatch = mgr.handle_segment(*alice.addr(), &datagram(CONTROL_PORT, CONTROL_PORT, &payload));
    assert_eq!(dispatch, Dispatch::Stored(msg));

    let records = store.records();
    assert_eq!(
        records,
        vec![MessageRecord {
            sender_name: "alice".into(),
            sender_address: *alice.addr(),
            receiver_name: "bob".into(),
            receiver_address: *make_node(1, "").addr(),
            text: "hi bob".into(),
            timestamp: 1_330_000_000,
        }]
    );
}

#[test]
fn test_control_port_routing_message_returned() {
    let (mut mgr, store) = make_manager();
    let alice = make_node(2, "alice");
    let hello = RoutingMessage::Hello(alice.clone());
    let payload = Envelope::from(hello.clone()).encode().unwrap();

    let dispatch = mgr.handle_segment(*alice.addr(), &datagram(CONTROL_PORT, CONTROL_PORT, &payload));
    assert_eq!(dispatch, Dispatch::Routing(hello));
    assert!(store.is_empty());
    assert_eq!(mgr.stats().routing, 1);
}

#[test]
fn test_store_failure_drops() {
    let mut mgr = SocketManager::new(make_node(1, "bob"), CONTROL_PORT, 8, Box::new(FailingStore));
    let alice = make_node(2, "alice");
    let payload = Envelope::from(AppMessage::new(alice.clone(), 0, "x"))
        .encode()
        .unwrap();

    let dispatch = mgr.handle_segment(*alice.addr(), &datagram(CONTROL_PORT, CONTROL_PORT, &payload));
    assert_eq!(dispatch, Dispatch::Dropped);
    assert_eq!(mgr.stats().store_failures, 1);
}

#[test]
fn test_malformed_input_dropped() {
    let (mut mgr, _) = make_manager();
    let source = *make_node(2, "").addr();

    // Unknown segment kind.
    assert_eq!(mgr.handle_segment(source, &[0x7F, 0, 0]), Dispatch::Dropped);
    // Garbage envelope on the control port.
    assert_eq!(
        mgr.handle_segment(source, &datagram(CONTROL_PORT, CONTROL_PORT, &[0xEE])),
        Dispatch::Dropped
    );
    assert_eq!(mgr.stats().dropped_malformed, 2);
}

#[test]
fn test_stream_segment_ignored() {
    let (mut mgr, _) = make_manager();
    let source = *make_node(2, "").addr();
    let bytes = Segment::Stream(vec![1, 2, 3]).encode().unwrap();
    assert_eq!(mgr.handle_segment(source, &bytes), Dispatch::Dropped);
}
