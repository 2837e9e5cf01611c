use std::net::SocketAddr;

use crate::gate::local_packet::LocalPacket;
use crate::link::link_state::LinkOutput;
use crate::link::xrf_packet::XrfPacket;

/// Records everything the linker sends, in order.
#[derive(Debug, Default)]
pub struct TrackingLinkOutput {
    pub xrf: Vec<(SocketAddr, XrfPacket)>,
    pub gate: Vec<LocalPacket>,
}

impl LinkOutput for TrackingLinkOutput {
    fn send_xrf(&mut self, to: SocketAddr, packet: &XrfPacket) {
        self.xrf.push((to, packet.clone()));
    }

    fn send_gate(&mut self, packet: &LocalPacket) {
        self.gate.push(packet.clone());
    }
}
