use std::net::SocketAddr;
use std::sync::Arc;

#[cfg(test)] use mockall::automock;
use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::dv::frame::RfFrame;
use crate::dv::header::{cs_str, with_suffix, Header};
use crate::gate::g2_packet::{G2Packet, G2VoiceData};
use crate::gate::gate_config::GateConfig;
use crate::gate::local_packet::{LocalPacket, LocalRecord, ModuleId, PacketFlags};
use crate::gate::module_state::{Module, Origin, Rejected, Transmission, VoiceOut};
use crate::store::kv_store::KeyValueStore;
use crate::store::presence::{lookup_route, PresenceUpdate};

/// Where the router's output goes. The gate's event loop writes to sockets, tests record.
#[cfg_attr(test, automock)]
pub trait GateOutput {
    /// best effort delivery to every connected local client
    fn broadcast_local(&mut self, packet: &LocalPacket);
    fn send_g2(&mut self, to: SocketAddr, packet: &G2Packet);
}

/// Routes transmissions between the gateway network and local clients, one state machine per
///  enabled module. All methods run to completion without blocking.
pub struct Router {
    config: Arc<GateConfig>,
    modules: FxHashMap<ModuleId, Module>,
    store: Arc<dyn KeyValueStore>,
}

impl Router {
    pub fn new(config: Arc<GateConfig>, store: Arc<dyn KeyValueStore>) -> Router {
        let modules = config.modules.iter()
            .map(|&id| (id, Module::new(id)))
            .collect();

        Router {
            config,
            modules,
            store,
        }
    }

    pub fn module(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(&id)
    }

    fn module_mut(&mut self, id: ModuleId) -> Result<&mut Module, Rejected> {
        self.modules.get_mut(&id)
            .ok_or(Rejected::ModuleNotEnabled(id))
    }

    pub fn on_g2_packet(&mut self, packet: G2Packet, from: SocketAddr, now: Instant, out: &mut impl GateOutput) -> Result<(), Rejected> {
        let result = match packet {
            G2Packet::Header(h) => {
                let module = ModuleId(h.header.destination_rptr[7]);
                self.on_header(module, h.stream_id, h.header, Origin::Gateway(from), now, out)
            }
            G2Packet::Voice(v) => self.on_g2_voice(v, now, out),
        };

        if let Err(rejected) = &result {
            debug!("dropping packet from {:?}: {:?}", from, rejected);
        }
        result
    }

    fn on_g2_voice(&mut self, v: G2VoiceData, now: Instant, out: &mut impl GateOutput) -> Result<(), Rejected> {
        let module = self.modules.values()
            .find(|m| m.active_stream_id() == Some(v.stream_id))
            .map(|m| m.id)
            .ok_or(Rejected::UnknownStream(v.stream_id))?;

        if v.is_end() {
            self.on_voice_end(module, v.stream_id, &v.frame, out)
        }
        else {
            self.on_voice(module, v.stream_id, v.seqno(), &v.frame, now, out)
        }
    }

    pub fn on_local_packet(&mut self, packet: LocalPacket, now: Instant, out: &mut impl GateOutput) -> Result<(), Rejected> {
        let module = packet.module;
        let result = match packet.record {
            LocalRecord::Header(r) => {
                let origin = if packet.flags.contains(PacketFlags::LOCAL) {
                    Origin::Rf
                }
                else {
                    Origin::Client
                };
                self.on_header(module, r.stream_id, r.header, origin, now, out)
            }
            LocalRecord::Voice(r) => self.on_voice(module, r.stream_id, r.seqno, &r.frame, now, out),
            LocalRecord::VoiceEnd(r) => self.on_voice_end(module, r.stream_id, &r.frame, out),
        };

        if let Err(rejected) = &result {
            debug!("dropping local record for module {:?}: {:?}", module, rejected);
        }
        result
    }

    /// The module is checked before the header itself: a header for a disabled or busy module is
    ///  rejected as such, whatever its checksum.
    fn on_header(&mut self, module: ModuleId, stream_id: u16, header: Header, origin: Origin, now: Instant, out: &mut impl GateOutput) -> Result<(), Rejected> {
        let m = self.modules.get(&module)
            .ok_or(Rejected::ModuleNotEnabled(module))?;
        if let Some(active_stream_id) = m.active_stream_id() {
            warn!("module {:?} is busy - rejecting stream {:04X}", module, stream_id);
            return Err(Rejected::Busy { active_stream_id });
        }

        if !header.verify() {
            warn!("header with bad checksum for stream {:04X}: {:?}", stream_id, header);
            return Err(Rejected::BadChecksum);
        }

        let deadline = now + self.config.tx_timeout;
        let departure_rptr = with_suffix(&self.config.callsign, b'G');
        let route = if origin == Origin::Rf && self.config.route_lookup {
            lookup_route(self.store.as_ref(), &header.companion, self.config.g2_port_v4, self.config.g2_port_v6)
        }
        else {
            None
        };

        let m = self.module_mut(module)?;
        m.try_begin(stream_id, header, origin, deadline)?;
        info!("module {:?}: stream {:04X} started by {:?}", module, stream_id, header);

        out.broadcast_local(&LocalPacket::header(module, flags_for(origin), stream_id, header));

        if let Some(route) = route {
            if let Some(t) = m.transmission_mut() {
                t.g2_route = Some(route.addr);
            }
            let mut g2_header = header;
            g2_header.destination_rptr = route.repeater;
            g2_header.departure_rptr = departure_rptr;
            info!("forwarding stream {:04X} to {} at {:?}", stream_id, cs_str(&route.repeater), route.addr);
            out.send_g2(route.addr, &G2Packet::header([0, 0, 0], stream_id, g2_header.with_crc()));
        }
        Ok(())
    }

    fn on_voice(&mut self, module: ModuleId, stream_id: u16, carried_seqno: u8, frame: &RfFrame, now: Instant, out: &mut impl GateOutput) -> Result<(), Rejected> {
        let deadline = now + self.config.tx_timeout;
        let m = self.module_mut(module)?;
        let voice = m.on_voice(stream_id, carried_seqno, frame, deadline)?;

        let (origin, g2_route) = match m.transmission() {
            Some(t) => (t.origin, t.g2_route),
            None => return Ok(()),
        };

        out.broadcast_local(&LocalPacket::voice(module, flags_for(origin), stream_id, voice.count, voice.seqno, voice.frame));
        if let Some(to) = g2_route {
            out.send_g2(to, &G2Packet::voice([0, 0, 0], stream_id, voice.seqno, false, voice.frame));
        }
        Ok(())
    }

    fn on_voice_end(&mut self, module: ModuleId, stream_id: u16, frame: &RfFrame, out: &mut impl GateOutput) -> Result<(), Rejected> {
        let (voice, finished) = self.module_mut(module)?
            .on_voice_end(stream_id, frame)?;
        Self::finish(module, voice, finished, out);
        Ok(())
    }

    fn finish(module: ModuleId, voice: VoiceOut, t: Transmission, out: &mut impl GateOutput) {
        out.broadcast_local(&LocalPacket::voice_end(module, flags_for(t.origin), t.stream_id, voice.count, voice.seqno, voice.frame, t.bit_errors));
        if let Some(to) = t.g2_route {
            out.send_g2(to, &G2Packet::voice([0, 0, 0], t.stream_id, voice.seqno, true, voice.frame));
        }

        info!("module {:?}: stream {:04X} ended after {} frames with {} bit errors - {}/{} -> {} via {},{} - serial data {:?} - message {:?}",
            module,
            t.stream_id,
            t.count,
            t.bit_errors,
            cs_str(&t.header.own),
            cs_str(&t.header.own_ext),
            cs_str(&t.header.companion),
            cs_str(&t.header.destination_rptr),
            cs_str(&t.header.departure_rptr),
            String::from_utf8_lossy(t.serial_data()),
            t.tx_msg(),
        );
    }

    /// the earliest point in time at which an active transmission times out
    pub fn next_deadline(&self) -> Option<Instant> {
        self.modules.values()
            .filter_map(|m| m.deadline())
            .min()
    }

    /// Closes every transmission whose deadline has passed.
    pub fn on_deadline(&mut self, now: Instant, out: &mut impl GateOutput) {
        let mut expired = self.modules.values()
            .filter(|m| m.deadline().map(|d| d <= now).unwrap_or(false))
            .map(|m| m.id)
            .collect::<Vec<_>>();
        expired.sort();

        for module in expired {
            if let Some((voice, finished)) = self.modules.get_mut(&module).and_then(|m| m.on_timeout()) {
                Self::finish(module, voice, finished, out);
            }
        }
    }

    pub fn on_presence(&mut self, update: &PresenceUpdate, now_secs: u64) {
        update.apply(self.store.as_ref(), now_secs);
    }
}

fn flags_for(origin: Origin) -> PacketFlags {
    match origin {
        Origin::Rf => PacketFlags::LOCAL,
        Origin::Client | Origin::Gateway(_) => PacketFlags::empty(),
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;
    use rstest::rstest;
    use crate::dv::frame::{Frame, F_EMPTY};
    use crate::dv::header::callsign;
    use crate::gate::local_packet::PacketType;
    use crate::store::kv_store::MemoryStore;
    use crate::test_util::gate::TrackingGateOutput;
    use super::*;

    const C: ModuleId = ModuleId(b'C');

    fn config() -> Arc<GateConfig> {
        Arc::new(GateConfig::new("KO6JXH", [ModuleId::new('B'), C]))
    }

    fn router() -> Router {
        Router::new(config(), Arc::new(MemoryStore::new()))
    }

    fn header(rpt2: &str) -> Header {
        Header::new([0, 0, 0], callsign(rpt2), callsign("KO6JXH G"), callsign("CQCQCQ"), callsign("KO6JXH"), *b"52P ")
    }

    fn clean_voice(n: u16) -> RfFrame {
        Frame {
            ambe_decode_1: n & 0xFFF,
            ambe_decode_2: (n * 3) & 0xFFF,
            ambe: [4, 5, 6],
            data: [F_EMPTY; 3],
            bit_errors: 0,
        }.encode()
    }

    fn local_header(module: ModuleId, stream_id: u16) -> LocalPacket {
        LocalPacket::header(module, PacketFlags::LOCAL, stream_id, header("KO6JXH C"))
    }

    fn gateway() -> SocketAddr {
        "192.0.2.1:40000".parse().unwrap()
    }

    #[test]
    fn test_end_to_end_local() {
        let mut router = router();
        let mut out = TrackingGateOutput::default();
        let now = Instant::now();

        router.on_local_packet(local_header(C, 0xBEEF), now, &mut out).unwrap();
        for seqno in 0..20u8 {
            let voice = LocalPacket::voice(C, PacketFlags::LOCAL, 0xBEEF, 0, seqno, clean_voice(seqno as u16 + 1));
            router.on_local_packet(voice, now, &mut out).unwrap();
        }
        let end = LocalPacket::voice_end(C, PacketFlags::LOCAL, 0xBEEF, 0, 20, RfFrame::end(), 0);
        router.on_local_packet(end, now, &mut out).unwrap();

        let local = out.local.clone();
        assert_eq!(local.len(), 22);

        assert_eq!(local[0].packet_type(), PacketType::Header);
        assert_eq!(local[0].module, C);
        assert_eq!(local[0].stream_id(), 0xBEEF);
        assert!(local[0].is_local());

        for (i, packet) in local[1..21].iter().enumerate() {
            match &packet.record {
                LocalRecord::Voice(r) => {
                    assert_eq!(r.seqno, i as u8);
                    assert_eq!(r.count, i as u8 + 1);
                    assert_eq!(r.stream_id, 0xBEEF);
                    assert_eq!(r.frame, clean_voice(i as u16 + 1));
                }
                r => panic!("unexpected {:?}", r),
            }
        }

        match &local[21].record {
            LocalRecord::VoiceEnd(r) => {
                assert_eq!(r.bit_errors, 0);
                assert_eq!(r.count, 21);
                assert_eq!(r.stream_id, 0xBEEF);
            }
            r => panic!("unexpected {:?}", r),
        }

        assert!(out.g2.is_empty());
        assert!(router.module(C).unwrap().is_idle());
    }

    #[test]
    fn test_g2_stream() {
        let mut router = router();
        let mut out = TrackingGateOutput::default();
        let now = Instant::now();

        router.on_g2_packet(G2Packet::header([0, 0, 0], 7, header("KO6JXH C")), gateway(), now, &mut out).unwrap();
        router.on_g2_packet(G2Packet::voice([0, 0, 0], 7, 0, false, clean_voice(1)), gateway(), now, &mut out).unwrap();
        router.on_g2_packet(G2Packet::voice([0, 0, 0], 7, 1, true, RfFrame::end()), gateway(), now, &mut out).unwrap();

        let types = out.local.iter().map(|p| p.packet_type()).collect::<Vec<_>>();
        assert_eq!(types, vec![PacketType::Header, PacketType::Voice, PacketType::VoiceEnd]);
        assert!(out.local.iter().all(|p| !p.is_local() && p.module == C));
        assert!(router.module(C).unwrap().is_idle());
    }

    #[rstest]
    #[case::disabled_module("KO6JXH A", Rejected::ModuleNotEnabled(ModuleId(b'A')))]
    #[case::gateway_suffix("KO6JXH G", Rejected::ModuleNotEnabled(ModuleId(b'G')))]
    fn test_g2_header_for_unknown_module(#[case] rpt2: &str, #[case] expected: Rejected) {
        let mut router = router();
        let mut out = TrackingGateOutput::default();
        let result = router.on_g2_packet(G2Packet::header([0, 0, 0], 7, header(rpt2)), gateway(), Instant::now(), &mut out);
        assert_eq!(result.unwrap_err(), expected);
        assert!(out.local.is_empty());
    }

    #[test]
    fn test_bad_checksum() {
        let mut router = router();
        let mut out = TrackingGateOutput::default();
        let mut header = header("KO6JXH C");
        header.own = callsign("N0CALL");

        let result = router.on_local_packet(LocalPacket::header(C, PacketFlags::LOCAL, 1, header), Instant::now(), &mut out);
        assert_eq!(result.unwrap_err(), Rejected::BadChecksum);
        assert!(router.module(C).unwrap().is_idle());
        assert!(out.local.is_empty());
    }

    #[test]
    fn test_module_checked_before_checksum() {
        let mut router = router();
        let mut out = TrackingGateOutput::default();
        let now = Instant::now();

        let mut corrupt = header("KO6JXH A");
        corrupt.own = callsign("N0CALL");
        let result = router.on_g2_packet(G2Packet::header([0, 0, 0], 7, corrupt), gateway(), now, &mut out);
        assert_eq!(result.unwrap_err(), Rejected::ModuleNotEnabled(ModuleId(b'A')));

        router.on_local_packet(local_header(C, 1), now, &mut out).unwrap();
        let mut corrupt = header("KO6JXH C");
        corrupt.own = callsign("N0CALL");
        let result = router.on_g2_packet(G2Packet::header([0, 0, 0], 7, corrupt), gateway(), now, &mut out);
        assert_eq!(result.unwrap_err(), Rejected::Busy { active_stream_id: 1 });

        assert_eq!(out.local.len(), 1);
        assert!(out.g2.is_empty());
    }

    #[test]
    fn test_concurrent_headers_exclusive() {
        let mut router = router();
        let mut out = TrackingGateOutput::default();
        let now = Instant::now();

        router.on_g2_packet(G2Packet::header([0, 0, 0], 0x1111, header("KO6JXH C")), gateway(), now, &mut out).unwrap();
        let result = router.on_local_packet(local_header(C, 0x2222), now, &mut out);
        assert_eq!(result.unwrap_err(), Rejected::Busy { active_stream_id: 0x1111 });

        assert_eq!(router.module(C).unwrap().active_stream_id(), Some(0x1111));
        assert_eq!(out.local.len(), 1);

        // voice for the losing stream is rejected as well
        let voice = LocalPacket::voice(C, PacketFlags::LOCAL, 0x2222, 0, 0, clean_voice(1));
        assert_eq!(router.on_local_packet(voice, now, &mut out).unwrap_err(), Rejected::StreamMismatch { active_stream_id: 0x1111 });

        // other modules are independent
        router.on_local_packet(local_header(ModuleId::new('B'), 0x2222), now, &mut out).unwrap();
    }

    #[test]
    fn test_unknown_g2_stream() {
        let mut router = router();
        let mut out = TrackingGateOutput::default();
        let result = router.on_g2_packet(G2Packet::voice([0, 0, 0], 9, 0, false, clean_voice(1)), gateway(), Instant::now(), &mut out);
        assert_eq!(result.unwrap_err(), Rejected::UnknownStream(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_module() {
        let mut router = router();
        let mut out = TrackingGateOutput::default();

        router.on_local_packet(local_header(C, 1), Instant::now(), &mut out).unwrap();
        router.on_local_packet(LocalPacket::voice(C, PacketFlags::LOCAL, 1, 0, 0, clean_voice(1)), Instant::now(), &mut out).unwrap();
        let deadline = router.next_deadline().unwrap();
        assert_eq!(deadline, Instant::now() + Duration::from_secs(1));

        tokio::time::advance(Duration::from_millis(999)).await;
        router.on_deadline(Instant::now(), &mut out);
        assert!(!router.module(C).unwrap().is_idle());

        tokio::time::advance(Duration::from_millis(1)).await;
        router.on_deadline(Instant::now(), &mut out);
        assert!(router.module(C).unwrap().is_idle());
        assert_eq!(router.next_deadline(), None);

        match &out.local.last().unwrap().record {
            LocalRecord::VoiceEnd(r) => {
                assert_eq!(r.stream_id, 1);
                assert_eq!(r.count, 2);
            }
            r => panic!("unexpected {:?}", r),
        }

        router.on_local_packet(local_header(C, 2), Instant::now(), &mut out).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_voice_rearms_timeout() {
        let mut router = router();
        let mut out = TrackingGateOutput::default();
        router.on_local_packet(local_header(C, 1), Instant::now(), &mut out).unwrap();

        for seqno in 0..5 {
            tokio::time::advance(Duration::from_millis(600)).await;
            router.on_deadline(Instant::now(), &mut out);
            router.on_local_packet(LocalPacket::voice(C, PacketFlags::LOCAL, 1, 0, seqno, clean_voice(1)), Instant::now(), &mut out).unwrap();
        }
        assert_eq!(router.module(C).unwrap().active_stream_id(), Some(1));
    }

    #[test]
    fn test_resync_then_continue() {
        let mut router = router();
        let mut out = TrackingGateOutput::default();
        let now = Instant::now();
        router.on_local_packet(local_header(C, 1), now, &mut out).unwrap();

        for seqno in [0, 1, 4, 5] {
            router.on_local_packet(LocalPacket::voice(C, PacketFlags::LOCAL, 1, 0, seqno, clean_voice(1)), now, &mut out).unwrap();
        }

        let seqnos = out.local[1..].iter()
            .map(|p| match &p.record {
                LocalRecord::Voice(r) => r.seqno,
                r => panic!("unexpected {:?}", r),
            })
            .collect::<Vec<_>>();
        assert_eq!(seqnos, vec![0, 1, 4, 5]);
        assert_eq!(router.module(C).unwrap().transmission().unwrap().seqno, 5);
    }

    #[test]
    fn test_client_header_is_not_local() {
        let mut router = router();
        let mut out = TrackingGateOutput::default();
        let header = LocalPacket::header(C, PacketFlags::empty(), 1, header("KO6JXH C"));
        router.on_local_packet(header, Instant::now(), &mut out).unwrap();

        assert!(!out.local[0].is_local());
        assert_eq!(router.module(C).unwrap().transmission().unwrap().origin, Origin::Client);
    }

    #[test]
    fn test_forwards_to_known_gateway() {
        let store = Arc::new(MemoryStore::new());
        PresenceUpdate::User { callsign: callsign("N0CALL"), repeater: callsign("W1AW   B") }.apply(store.as_ref(), 0);
        PresenceUpdate::Gateway {
            server: 0,
            name: "W1AW".to_string(),
            nick: "w1aw-1".to_string(),
            host: "192.0.2.7".to_string(),
            v6: false,
        }.apply(store.as_ref(), 0);

        let mut router = Router::new(config(), store);
        let mut out = TrackingGateOutput::default();
        let now = Instant::now();

        let mut h = header("KO6JXH C");
        h.companion = callsign("N0CALL");
        router.on_local_packet(LocalPacket::header(C, PacketFlags::LOCAL, 5, h.with_crc()), now, &mut out).unwrap();
        router.on_local_packet(LocalPacket::voice(C, PacketFlags::LOCAL, 5, 0, 0, clean_voice(1)), now, &mut out).unwrap();
        router.on_local_packet(LocalPacket::voice_end(C, PacketFlags::LOCAL, 5, 0, 1, RfFrame::end(), 0), now, &mut out).unwrap();

        let to: SocketAddr = "192.0.2.7:40000".parse().unwrap();
        assert_eq!(out.g2.len(), 3);
        assert!(out.g2.iter().all(|(addr, _)| *addr == to));

        match &out.g2[0].1 {
            G2Packet::Header(g2) => {
                assert_eq!(g2.header.destination_rptr, callsign("W1AW   B"));
                assert_eq!(g2.header.departure_rptr, callsign("KO6JXH G"));
                assert!(g2.header.verify());
            }
            p => panic!("unexpected {:?}", p),
        }
        match &out.g2[2].1 {
            G2Packet::Voice(v) => {
                assert!(v.is_end());
                assert_eq!(v.seqno(), 1);
            }
            p => panic!("unexpected {:?}", p),
        }
    }

    #[test]
    fn test_network_stream_is_not_forwarded() {
        let store = Arc::new(MemoryStore::new());
        store.put("cs_rptr/CQCQCQ  ", "W1AW   B");
        store.put("zone_ip4/W1AW   ", "0 0 192.0.2.7");

        let mut router = Router::new(config(), store);
        let mut out = MockGateOutput::new();
        out.expect_broadcast_local().times(1).return_const(());
        out.expect_send_g2().never();

        router.on_g2_packet(G2Packet::header([0, 0, 0], 7, header("KO6JXH C")), gateway(), Instant::now(), &mut out).unwrap();
    }
}
