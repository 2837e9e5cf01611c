use std::net::SocketAddr;

use crate::gate::g2_packet::G2Packet;
use crate::gate::local_packet::LocalPacket;
use crate::gate::router::GateOutput;

/// Records everything the router sends, in order.
#[derive(Debug, Default)]
pub struct TrackingGateOutput {
    pub local: Vec<LocalPacket>,
    pub g2: Vec<(SocketAddr, G2Packet)>,
}

impl GateOutput for TrackingGateOutput {
    fn broadcast_local(&mut self, packet: &LocalPacket) {
        self.local.push(packet.clone());
    }

    fn send_g2(&mut self, to: SocketAddr, packet: &G2Packet) {
        self.g2.push((to, packet.clone()));
    }
}
