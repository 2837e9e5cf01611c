use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

#[cfg(test)] use mockall::automock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::dv::header::{cs_str, with_suffix, Callsign, Header};
use crate::gate::g2_packet::G2Packet;
use crate::gate::local_packet::{HeaderRecord, LocalPacket, ModuleId, PacketFlags, VoiceEndRecord, VoiceRecord};
use crate::link::link_config::LinkConfig;
use crate::link::reflectors::Reflectors;
use crate::link::xrf_packet::XrfPacket;

/// flag bytes of DSVT datagrams sent to a reflector
const XRF_FLAGB: [u8; 3] = [0, 1, 1];

const URCALL_UNLINK: &[u8; 8] = b"       U";
const URCALL_CQ: &[u8; 8] = b"CQCQCQ  ";

#[cfg_attr(test, automock)]
pub trait LinkOutput {
    fn send_xrf(&mut self, to: SocketAddr, packet: &XrfPacket);
    fn send_gate(&mut self, packet: &LocalPacket);
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LinkStatus {
    Unlinked,
    Connecting,
    Linked,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ReflectorProtocol {
    Dcs,
    Xrf,
    Ref,
}

/// A URCALL of the form `XRF012AL`: link the module to module `A` of reflector `XRF012`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LinkRequest {
    pub protocol: ReflectorProtocol,
    pub reflector: String,
    pub mod_to: u8,
}
impl LinkRequest {
    pub fn parse(urcall: &[u8; 8]) -> Option<LinkRequest> {
        let protocol = match &urcall[0..3] {
            b"DCS" => ReflectorProtocol::Dcs,
            b"XRF" | b"XLX" => ReflectorProtocol::Xrf,
            b"REF" => ReflectorProtocol::Ref,
            _ => return None,
        };
        if !urcall[3..6].iter().all(|b| b.is_ascii_digit()) || !urcall[6].is_ascii_uppercase() || urcall[7] != b'L' {
            return None;
        }

        Some(LinkRequest {
            protocol,
            reflector: cs_str(&urcall[0..6]),
            mod_to: urcall[6],
        })
    }
}

#[derive(Debug)]
struct Link {
    status: LinkStatus,
    peer: SocketAddr,
    reflector: String,
    mod_from: ModuleId,
    mod_to: u8,
    idle_deadline: Instant,
    heartbeat_deadline: Option<Instant>,
}

/// The linker's state: at most one XRF link, tying one local module to a reflector module.
///  Records from the gate and datagrams from the reflector are relayed while the link is up.
pub struct Linker {
    config: Arc<LinkConfig>,
    reflectors: Reflectors,
    link: Option<Link>,
}

impl Linker {
    pub fn new(config: Arc<LinkConfig>, reflectors: Reflectors) -> Linker {
        Linker {
            config,
            reflectors,
            link: None,
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.link.as_ref()
            .map(|l| l.status)
            .unwrap_or(LinkStatus::Unlinked)
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.link.as_ref()
            .map(|l| l.peer)
    }

    /// the local module that is linked or being linked
    pub fn linked_module(&self) -> Option<ModuleId> {
        self.link.as_ref()
            .map(|l| l.mod_from)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        let link = self.link.as_ref()?;
        match link.heartbeat_deadline {
            Some(heartbeat) => Some(heartbeat.min(link.idle_deadline)),
            None => Some(link.idle_deadline),
        }
    }

    pub fn on_deadline(&mut self, now: Instant, out: &mut impl LinkOutput) {
        let Some(link) = &mut self.link
        else {
            return;
        };

        if link.idle_deadline <= now {
            info!("link to {} {} timed out", link.reflector, link.mod_to as char);
            self.unlink(out);
            return;
        }

        if let Some(heartbeat) = link.heartbeat_deadline {
            if heartbeat <= now {
                link.heartbeat_deadline = Some(now + self.config.heartbeat_interval);
                out.send_xrf(link.peer, &XrfPacket::Heartbeat { from: self.config.callsign });
            }
        }
    }

    fn relevant_module(&self, module: ModuleId, flags: PacketFlags) -> bool {
        // records that came in over a reflector are not local and must not be sent back out
        flags.contains(PacketFlags::LOCAL) && self.config.is_enabled(module)
    }

    fn relay_target(&self, module: ModuleId) -> Option<SocketAddr> {
        match &self.link {
            Some(link) if link.mod_from == module && link.status == LinkStatus::Linked => Some(link.peer),
            _ => None,
        }
    }

    pub fn on_gate_header(&mut self, module: ModuleId, flags: PacketFlags, record: &HeaderRecord, now: Instant, out: &mut impl LinkOutput) {
        if !self.relevant_module(module, flags) {
            return;
        }

        let header = &record.header;
        let urcall = &header.companion;

        if self.link.is_none() {
            if let Some(request) = LinkRequest::parse(urcall) {
                self.on_link_request(module, request, now, out);
            }
            return;
        }

        if self.linked_module() != Some(module) {
            debug!("header on module {:?} while {:?} is linked - ignoring", module, self.linked_module());
            return;
        }

        if urcall == URCALL_UNLINK {
            info!("unlink request from {}", cs_str(&header.own));
            self.unlink(out);
        }
        else if urcall == URCALL_CQ && header.destination_rptr[7] == b'G' {
            if let Some(peer) = self.relay_target(module) {
                debug!("relaying stream {:04X} to {:?}", record.stream_id, peer);
                out.send_xrf(peer, &XrfPacket::Dsvt(G2Packet::header(XRF_FLAGB, record.stream_id, *header)));
            }
        }
        else if LinkRequest::parse(urcall).is_some() {
            info!("module {:?} is already linked - ignoring link request {}", module, cs_str(urcall));
        }
    }

    pub fn on_gate_voice(&mut self, module: ModuleId, flags: PacketFlags, record: &VoiceRecord, out: &mut impl LinkOutput) {
        if !self.relevant_module(module, flags) {
            return;
        }
        if let Some(peer) = self.relay_target(module) {
            out.send_xrf(peer, &XrfPacket::Dsvt(G2Packet::voice(XRF_FLAGB, record.stream_id, record.seqno, false, record.frame)));
        }
    }

    pub fn on_gate_voice_end(&mut self, module: ModuleId, flags: PacketFlags, record: &VoiceEndRecord, out: &mut impl LinkOutput) {
        if !self.relevant_module(module, flags) {
            return;
        }
        if let Some(peer) = self.relay_target(module) {
            out.send_xrf(peer, &XrfPacket::Dsvt(G2Packet::voice(XRF_FLAGB, record.stream_id, record.seqno, true, record.frame)));
        }
    }

    fn on_link_request(&mut self, module: ModuleId, request: LinkRequest, now: Instant, out: &mut impl LinkOutput) {
        if request.protocol != ReflectorProtocol::Xrf {
            warn!("link request to {}: {:?} reflectors are not supported", request.reflector, request.protocol);
            return;
        }

        let Some(host) = self.reflectors.get(&request.reflector)
        else {
            warn!("link request to unknown reflector {}", request.reflector);
            return;
        };
        let ip = match host.parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(_) => {
                warn!("reflector {} has non-numeric address {:?} - not linking", request.reflector, host);
                return;
            }
        };
        let peer = SocketAddr::new(ip, self.config.xrf_port);

        info!("linking module {:?} to {} {} at {:?}", module, request.reflector, request.mod_to as char, peer);
        let packet = XrfPacket::link(self.config.callsign, module.0, request.mod_to);
        for _ in 0..self.config.link_request_repeat {
            out.send_xrf(peer, &packet);
        }

        self.link = Some(Link {
            status: LinkStatus::Connecting,
            peer,
            reflector: request.reflector,
            mod_from: module,
            mod_to: request.mod_to,
            idle_deadline: now + self.config.idle_timeout,
            heartbeat_deadline: None,
        });
    }

    fn unlink(&mut self, out: &mut impl LinkOutput) {
        if let Some(link) = self.link.take() {
            info!("unlinking module {:?} from {} {}", link.mod_from, link.reflector, link.mod_to as char);
            out.send_xrf(link.peer, &XrfPacket::unlink(self.config.callsign, link.mod_from.0));
        }
    }

    pub fn on_xrf_packet(&mut self, packet: XrfPacket, from: SocketAddr, now: Instant, out: &mut impl LinkOutput) {
        let Some(link) = &mut self.link
        else {
            debug!("not linked - dropping {:?} from {:?}", packet, from);
            return;
        };
        if from.ip() != link.peer.ip() {
            debug!("dropping datagram from {:?}, linked to {:?}", from, link.peer);
            return;
        }

        match (link.status, packet) {
            (LinkStatus::Connecting, XrfPacket::Ack(ack)) => {
                if !ack.is_accepted() {
                    info!("{} refused the link", link.reflector);
                    self.unlink(out);
                    return;
                }
                info!("linked to {} {}", link.reflector, link.mod_to as char);
                link.status = LinkStatus::Linked;
                link.idle_deadline = now + self.config.idle_timeout;
                link.heartbeat_deadline = Some(now + self.config.heartbeat_interval);
            }
            (LinkStatus::Linked, XrfPacket::Heartbeat { .. }) => {
                link.idle_deadline = now + self.config.idle_timeout;
            }
            (LinkStatus::Linked, XrfPacket::Dsvt(G2Packet::Header(h))) => {
                link.idle_deadline = now + self.config.idle_timeout;
                let header = rewrite_header(&self.config.callsign, link.mod_from, h.header);
                out.send_gate(&LocalPacket::header(link.mod_from, PacketFlags::empty(), h.stream_id, header));
            }
            (LinkStatus::Linked, XrfPacket::Dsvt(G2Packet::Voice(v))) => {
                link.idle_deadline = now + self.config.idle_timeout;
                let packet = if v.is_end() {
                    LocalPacket::voice_end(link.mod_from, PacketFlags::empty(), v.stream_id, 0, v.seqno(), v.frame, 0)
                }
                else {
                    LocalPacket::voice(link.mod_from, PacketFlags::empty(), v.stream_id, 0, v.seqno(), v.frame)
                };
                out.send_gate(&packet);
            }
            (status, packet) => debug!("ignoring {:?} while {:?}", packet, status),
        }
    }
}

/// The gate routes by RPT1 and RPT2, so a header from the reflector is addressed to the linked
///  module of this gateway.
fn rewrite_header(own_callsign: &Callsign, module: ModuleId, mut header: Header) -> Header {
    header.departure_rptr = with_suffix(own_callsign, module.0);
    header.destination_rptr = with_suffix(own_callsign, b'G');
    header.with_crc()
}
