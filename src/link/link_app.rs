use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use bytes::BytesMut;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::client::gate_client::{dispatch, GateClient, GateConnection};
use crate::gate::g2_packet::G2Packet;
use crate::gate::local_packet::{HeaderRecord, LocalPacket, ModuleId, PacketFlags, VoiceEndRecord, VoiceRecord};
use crate::link::link_config::LinkConfig;
use crate::link::link_state::{LinkOutput, Linker};
use crate::link::reflectors::Reflectors;
use crate::link::xrf_packet::XrfPacket;
use crate::util::sleep_until_deadline;
use crate::util::udp::DualStackUdp;

#[derive(Debug)]
struct XrfDatagram {
    buf: Vec<u8>,
    from: SocketAddr,
}

/// the linker's view of the gate connection and the XRF sockets
struct LinkIo<'a> {
    gate: &'a GateConnection,
    udp: &'a DualStackUdp,
    buf: BytesMut,
}
impl<'a> LinkIo<'a> {
    fn new(gate: &'a GateConnection, udp: &'a DualStackUdp) -> LinkIo<'a> {
        LinkIo {
            gate,
            udp,
            buf: BytesMut::with_capacity(G2Packet::HEADER_LEN),
        }
    }
}

impl LinkOutput for LinkIo<'_> {
    fn send_xrf(&mut self, to: SocketAddr, packet: &XrfPacket) {
        self.buf.clear();
        packet.ser(&mut self.buf);
        self.udp.try_send_to(to, &self.buf);
    }

    fn send_gate(&mut self, packet: &LocalPacket) {
        self.gate.try_send(packet);
    }
}

struct LinkClient {
    linker: Linker,
    udp: DualStackUdp,
}

#[async_trait]
impl GateClient for LinkClient {
    async fn on_header(&mut self, conn: &GateConnection, module: ModuleId, flags: PacketFlags, record: &HeaderRecord) {
        let mut io = LinkIo::new(conn, &self.udp);
        self.linker.on_gate_header(module, flags, record, Instant::now(), &mut io);
    }

    async fn on_voice(&mut self, conn: &GateConnection, module: ModuleId, flags: PacketFlags, record: &VoiceRecord) {
        let mut io = LinkIo::new(conn, &self.udp);
        self.linker.on_gate_voice(module, flags, record, &mut io);
    }

    async fn on_voice_end(&mut self, conn: &GateConnection, module: ModuleId, flags: PacketFlags, record: &VoiceEndRecord) {
        let mut io = LinkIo::new(conn, &self.udp);
        self.linker.on_gate_voice_end(module, flags, record, &mut io);
    }
}

/// The `dlink` process: a [Linker] wired to the gate connection and the XRF sockets.
pub struct LinkApp {
    gate: GateConnection,
    client: LinkClient,
    xrf_send: mpsc::Sender<XrfDatagram>,
    xrf_recv: mpsc::Receiver<XrfDatagram>,
}

impl LinkApp {
    pub fn bind(config: Arc<LinkConfig>) -> anyhow::Result<LinkApp> {
        let reflectors = Reflectors::load(&config.reflectors_file)?;
        let udp = DualStackUdp::bind(config.xrf_bind_port, config.xrf_bind_port);
        if udp.v4.is_none() && udp.v6.is_none() {
            bail!("cannot bind XRF port {}", config.xrf_bind_port);
        }
        let gate = GateConnection::connect(&config.local_socket_path)?;
        let (xrf_send, xrf_recv) = mpsc::channel(1024);

        Ok(LinkApp {
            gate,
            client: LinkClient {
                linker: Linker::new(config, reflectors),
                udp,
            },
            xrf_send,
            xrf_recv,
        })
    }

    /// Runs until the gate closes the connection.
    pub async fn run(mut self) -> anyhow::Result<()> {
        self.client.udp.spawn_receivers(self.xrf_send.clone(), |buf, from| XrfDatagram { buf, from });

        loop {
            let deadline = self.client.linker.next_deadline();
            select! {
                packet = self.gate.recv() => {
                    let Some(packet) = packet
                    else {
                        info!("gate closed the connection - shutting down");
                        return Ok(());
                    };
                    dispatch(&self.gate, &mut self.client, &packet).await;
                }
                datagram = self.xrf_recv.recv() => {
                    let datagram = datagram.expect("the link app holds a sender itself - this should never happen");
                    self.on_datagram(datagram);
                }
                _ = sleep_until_deadline(deadline) => {
                    let mut io = LinkIo::new(&self.gate, &self.client.udp);
                    self.client.linker.on_deadline(Instant::now(), &mut io);
                }
            }
        }
    }

    fn on_datagram(&mut self, datagram: XrfDatagram) {
        match XrfPacket::deser(&datagram.buf) {
            Ok(packet) => {
                debug!("received {:?} from {:?}", packet, datagram.from);
                let mut io = LinkIo::new(&self.gate, &self.client.udp);
                self.client.linker.on_xrf_packet(packet, datagram.from, Instant::now(), &mut io);
            }
            Err(e) => debug!("dropping datagram from {:?}: {}", datagram.from, e),
        }
    }
}
