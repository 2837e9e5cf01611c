use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::BytesMut;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::gate::g2_packet::G2Packet;
use crate::gate::gate_config::GateConfig;
use crate::gate::gate_events::GateEvent;
use crate::gate::local_packet::LocalPacket;
use crate::gate::router::{GateOutput, Router};
use crate::gate::subscribers::{SubscriberId, Subscribers};
use crate::store::kv_store::KeyValueStore;
use crate::util::seqpacket::{SeqPacketConn, SeqPacketListener};
use crate::util::sleep_until_deadline;
use crate::util::udp::DualStackUdp;

/// records longer than this are truncated on receipt and then rejected by the decoder
const MAX_RECORD_LEN: usize = 256;

/// The gate process: a [Router] wired to the G2 sockets and the local client socket.
pub struct Gate {
    router: Router,
    subscribers: Subscribers,
    udp: DualStackUdp,
    listener: Arc<SeqPacketListener>,
    events_send: mpsc::Sender<GateEvent>,
    events_recv: mpsc::Receiver<GateEvent>,
}

/// the router's view of the gate's sockets
struct GateIo<'a> {
    subscribers: &'a Subscribers,
    udp: &'a DualStackUdp,
    buf: BytesMut,
}

impl GateOutput for GateIo<'_> {
    fn broadcast_local(&mut self, packet: &LocalPacket) {
        self.buf.clear();
        packet.ser(&mut self.buf);
        trace!("broadcasting {:?} to {} local clients", packet, self.subscribers.len());
        self.subscribers.broadcast(&self.buf);
    }

    fn send_g2(&mut self, to: SocketAddr, packet: &G2Packet) {
        self.buf.clear();
        packet.ser(&mut self.buf);
        self.udp.try_send_to(to, &self.buf);
    }
}

impl Gate {
    pub async fn bind(config: Arc<GateConfig>, store: Arc<dyn KeyValueStore>) -> anyhow::Result<Gate> {
        let listener = SeqPacketListener::bind(&config.local_socket_path, config.local_socket_backlog)?;
        let udp = DualStackUdp::bind(config.g2_port_v4, config.g2_port_v6);
        let (events_send, events_recv) = mpsc::channel(1024);

        info!("gate {:?} serving modules {:?}", String::from_utf8_lossy(&config.callsign), config.modules);
        Ok(Gate {
            router: Router::new(config, store),
            subscribers: Default::default(),
            udp,
            listener: Arc::new(listener),
            events_send,
            events_recv,
        })
    }

    /// for feeding presence updates into the gate
    pub fn event_sender(&self) -> mpsc::Sender<GateEvent> {
        self.events_send.clone()
    }

    pub fn g2_addr_v4(&self) -> Option<SocketAddr> {
        self.udp.v4.as_ref()
            .and_then(|s| s.local_addr().ok())
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        self.udp.spawn_receivers(self.events_send.clone(), |buf, from| GateEvent::G2Datagram { buf, from });
        tokio::spawn(accept_loop(self.listener.clone(), self.events_send.clone()));

        loop {
            let deadline = self.router.next_deadline();
            select! {
                evt = self.events_recv.recv() => {
                    let evt = evt.expect("the gate holds a sender itself - this should never happen");
                    self.on_event(evt);
                }
                _ = sleep_until_deadline(deadline) => {
                    let mut io = GateIo { subscribers: &self.subscribers, udp: &self.udp, buf: BytesMut::new() };
                    self.router.on_deadline(Instant::now(), &mut io);
                }
            }
        }
    }

    fn on_event(&mut self, evt: GateEvent) {
        let mut io = GateIo {
            subscribers: &self.subscribers,
            udp: &self.udp,
            buf: BytesMut::with_capacity(LocalPacket::MAX_LEN),
        };

        match evt {
            GateEvent::G2Datagram { buf, from } => {
                match G2Packet::deser(&buf) {
                    Ok(packet) => {
                        debug!("received {:?} from {:?}", packet, from);
                        if let Err(rejected) = self.router.on_g2_packet(packet, from, Instant::now(), &mut io) {
                            trace!("datagram from {:?} not routed: {:?}", from, rejected);
                        }
                    }
                    Err(e) => debug!("dropping datagram from {:?}: {}", from, e),
                }
            }
            GateEvent::SubscriberRecord { id, buf } => {
                match LocalPacket::deser(&buf) {
                    Ok(packet) => {
                        debug!("received {:?} from local client #{}", packet, id);
                        if let Err(rejected) = self.router.on_local_packet(packet, Instant::now(), &mut io) {
                            trace!("record from local client #{} not routed: {:?}", id, rejected);
                        }
                    }
                    Err(e) => warn!("dropping malformed record from local client #{}: {}", id, e),
                }
            }
            GateEvent::SubscriberConnected { id, conn } => self.subscribers.add(id, conn),
            GateEvent::SubscriberClosed { id } => self.subscribers.remove(id),
            GateEvent::Presence(update) => self.router.on_presence(&update, unix_now_secs()),
        }
    }
}

pub fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

async fn accept_loop(listener: Arc<SeqPacketListener>, events: mpsc::Sender<GateEvent>) {
    let mut next_id: SubscriberId = 0;
    loop {
        let conn = match listener.accept().await {
            Ok(conn) => Arc::new(conn),
            Err(e) => {
                error!("error accepting local clients - no longer accepting: {}", e);
                return;
            }
        };

        next_id += 1;
        let id = next_id;
        if events.send(GateEvent::SubscriberConnected { id, conn: conn.clone() }).await.is_err() {
            return;
        }
        tokio::spawn(read_loop(id, conn, events.clone()));
    }
}

async fn read_loop(id: SubscriberId, conn: Arc<SeqPacketConn>, events: mpsc::Sender<GateEvent>) {
    let mut buf = [0u8; MAX_RECORD_LEN];
    loop {
        let evt = match conn.recv(&mut buf).await {
            Ok(0) => GateEvent::SubscriberClosed { id },
            Ok(n) => GateEvent::SubscriberRecord { id, buf: buf[..n].to_vec() },
            Err(e) => {
                warn!("error reading from local client #{}: {}", id, e);
                GateEvent::SubscriberClosed { id }
            }
        };

        let is_closed = matches!(evt, GateEvent::SubscriberClosed { .. });
        if events.send(evt).await.is_err() || is_closed {
            return;
        }
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;
    use tokio::time::timeout;
    use crate::dv::frame::RfFrame;
    use crate::dv::header::{callsign, Header};
    use crate::gate::local_packet::{ModuleId, PacketFlags, PacketType};
    use crate::store::kv_store::MemoryStore;
    use crate::store::presence::PresenceUpdate;
    use crate::util::udp::bind_udp;
    use super::*;

    fn header() -> Header {
        Header::new([0, 0, 0], callsign("KO6JXH B"), callsign("KO6JXH G"), callsign("CQCQCQ"), callsign("KO6JXH"), *b"52P ")
    }

    async fn recv_packet(conn: &SeqPacketConn) -> LocalPacket {
        let mut buf = [0u8; 64];
        let n = timeout(Duration::from_secs(5), conn.recv(&mut buf)).await
            .unwrap()
            .unwrap();
        LocalPacket::deser(&buf[..n]).unwrap()
    }

    #[tokio::test]
    async fn test_gate_loop() {
        let path = std::env::temp_dir().join(format!("dvrouter-gate-{}.sock", std::process::id()));
        let mut config = GateConfig::new("KO6JXH", [ModuleId::new('B'), ModuleId::new('C')]);
        config.local_socket_path = path.clone();
        config.g2_port_v4 = 0;
        config.g2_port_v6 = 0;

        let gate = Gate::bind(Arc::new(config), Arc::new(MemoryStore::new())).await.unwrap();
        let g2_port = gate.g2_addr_v4().unwrap().port();
        tokio::spawn(gate.run());

        let listening = SeqPacketConn::connect(&path).unwrap();
        let talking = SeqPacketConn::connect(&path).unwrap();

        // garbage is dropped without affecting the connection
        talking.send(b"DGTE garbage").await.unwrap();

        // so is voice for a module without an active stream
        let stray_voice = LocalPacket::voice(ModuleId::new('C'), PacketFlags::LOCAL, 0xBEEF, 0, 0, RfFrame::null());
        talking.send(&stray_voice.to_bytes()).await.unwrap();

        let header_record = LocalPacket::header(ModuleId::new('C'), PacketFlags::LOCAL, 0xBEEF, header());
        talking.send(&header_record.to_bytes()).await.unwrap();

        for conn in [&listening, &talking] {
            let packet = recv_packet(conn).await;
            assert_eq!(packet, header_record);
        }

        let g2 = bind_udp("127.0.0.1:0".parse().unwrap()).unwrap();
        let g2_header = G2Packet::header([0, 0, 0], 0x1234, header());
        g2.send_to(&g2_header.to_bytes(), ("127.0.0.1", g2_port)).await.unwrap();

        let packet = recv_packet(&listening).await;
        assert_eq!(packet.packet_type(), PacketType::Header);
        assert_eq!(packet.module, ModuleId::new('B'));
        assert_eq!(packet.stream_id(), 0x1234);
        assert!(!packet.is_local());

        // neither stream continues, so both time out
        drop(talking);
        let mut ended = Vec::new();
        for _ in 0..2 {
            let packet = recv_packet(&listening).await;
            assert_eq!(packet.packet_type(), PacketType::VoiceEnd);
            ended.push(packet.module);
        }
        ended.sort();
        assert_eq!(ended, vec![ModuleId::new('B'), ModuleId::new('C')]);
    }

    #[tokio::test]
    async fn test_presence_updates_reach_the_store() {
        let path = std::env::temp_dir().join(format!("dvrouter-gate-presence-{}.sock", std::process::id()));
        let mut config = GateConfig::new("KO6JXH", [ModuleId::new('C')]);
        config.local_socket_path = path;
        config.g2_port_v4 = 0;
        config.g2_port_v6 = 0;

        let store = Arc::new(MemoryStore::new());
        let gate = Gate::bind(Arc::new(config), store.clone()).await.unwrap();
        let events = gate.event_sender();
        tokio::spawn(gate.run());

        events.send(GateEvent::Presence(PresenceUpdate::User {
            callsign: callsign("DL1ABC"),
            repeater: callsign("DB0ABC B"),
        })).await.unwrap();

        timeout(Duration::from_secs(5), async {
            while store.get("cs_rptr/DL1ABC  ").is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }).await.unwrap();
        assert_eq!(store.get("cs_rptr/DL1ABC  "), Some("DB0ABC B".to_string()));
    }
}
