use super::worker::{MeshWorker, SeedPeer};
use super::*;
use crate::protocol::{Datagram, Envelope, Packet, RoutingMessage, Segment, CONTROL_PORT};
use crate::socket::MemoryMessageStore;
use crate::transport::{outbound_channel, OutboundRx, ReceivedPacket, TransportAddr};


pub(super) fn make_addr(val: u8) -> NodeAddr {
    NodeAddr::from_bytes([0x02, 0, 0, 0, 0, val])
}

pub(super) fn make_node(val: u8) -> Node {
    Node::new(make_addr(val), format!("node-{}", val)).unwrap()
}

/// A worker driven synchronously, with its outbound queue and listeners.
pub(super) struct TestWorker {
    pub(super) worker: MeshWorker,
    pub(super) outbound_rx: OutboundRx,
    pub(super) events: broadcast::Receiver<MeshEvent>,
    pub(super) store: MemoryMessageStore,
}

pub(super) fn make_worker(val: u8) -> TestWorker {
    make_worker_with(val, Config::new())
}

pub(super) fn make_worker_with(val: u8, config: Config) -> TestWorker {
    let store = MemoryMessageStore::new();
    let (outbound_tx, outbound_rx) = outbound_channel(64);
    let (event_tx, events) = broadcast::channel(64);
    let worker = MeshWorker::new(
        &config,
        make_node(val),
        Box::new(store.clone()),
        outbound_tx,
        event_tx,
    );
    TestWorker {
        worker,
        outbound_rx,
        events,
        store,
    }
}

impl TestWorker {
    /// Run one command and return its reply.
    pub(super) fn command<T>(&mut self, make: impl FnOnce(oneshot::Sender<T>) -> MeshCommand) -> T {
        let (tx, mut rx) = oneshot::channel();
        self.worker.handle_command(make(tx));
        rx.try_recv().expect("worker did not reply")
    }

    /// Frames queued for the adapter since the last call, decoded.
    pub(super) fn sent(&mut self) -> Vec<(TransportAddr, Packet)> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound_rx.try_recv() {
            let packet = Packet::decode(&frame.data).expect("worker sent a bad packet");
            frames.push((frame.remote_addr, packet));
        }
        frames
    }

    /// Pending events, in order.
    pub(super) fn events(&mut self) -> Vec<MeshEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Complete a handshake with `peer` and accept its advertisement.
    pub(super) fn join(&mut self, peer: &Node, lsa_sequence: u32) {
        self.worker.handle_routing(RoutingMessage::Hello(peer.clone()));
        self.worker.handle_routing(RoutingMessage::HelloAck(peer.clone()));
        let local = self.worker.engine().local().clone();
        let lsa = crate::protocol::LinkStateAdvertisement::new(peer.clone(), lsa_sequence)
            .with_neighbor(local);
        self.worker
            .handle_routing(RoutingMessage::LinkStateAdvertisement(lsa));
    }
}

/// Decode the control envelope carried by a packet.
pub(super) fn control_envelope(packet: &Packet) -> Envelope {
    match Segment::decode(&packet.segment).unwrap() {
        Segment::Datagram(Datagram {
            dst_port, payload, ..
        }) => {
            assert_eq!(dst_port, CONTROL_PORT);
            Envelope::decode(&payload).unwrap()
        }
        other => panic!("expected datagram, got {:?}", other),
    }
}

/// Routing message carried by a packet.
pub(super) fn routing_message(packet: &Packet) -> RoutingMessage {
    match control_envelope(packet) {
        Envelope::Routing(message) => message,
        other => panic!("expected routing message, got {:?}", other),
    }
}

/// A frame as an adapter would deliver it.
pub(super) fn frame(remote: &str, packet: &Packet) -> ReceivedPacket {
    ReceivedPacket::new(TransportAddr::from(remote), packet.encode())
}

/// Control-port packet from `from` to `to`.
pub(super) fn control_packet(from: &Node, to: NodeAddr, envelope: &Envelope) -> Packet {
    let payload = envelope.encode().unwrap();
    let segment = Segment::datagram(CONTROL_PORT, CONTROL_PORT, payload)
        .encode()
        .unwrap();
    Packet::new(*from.addr(), to, segment)
}
