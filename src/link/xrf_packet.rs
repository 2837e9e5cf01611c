use anyhow::bail;
use bytes::{BufMut, BytesMut};

use crate::dv::header::Callsign;
use crate::gate::g2_packet::G2Packet;
use crate::util::buf_ext::BufExt;

const HEARTBEAT_LEN: usize = 9;
const LINK_LEN: usize = 11;
const ACK_LEN: usize = 14;

/// module letter that asks the reflector to drop the link
pub const MOD_UNLINK: u8 = b' ';

/// Datagrams of the XRF reflector protocol. Header and voice share the gateway's DSVT format,
///  linking and keep-alive are small fixed-size records without a type tag.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum XrfPacket {
    Heartbeat { from: Callsign },
    Link(XrfLinkRequest),
    Ack(XrfLinkAck),
    Dsvt(G2Packet),
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct XrfLinkRequest {
    pub from: Callsign,
    pub mod_from: u8,
    pub mod_to: u8,
}
impl XrfLinkRequest {
    pub fn is_unlink(&self) -> bool {
        self.mod_to == MOD_UNLINK
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct XrfLinkAck {
    pub from: Callsign,
    pub mod_from: u8,
    pub mod_to: u8,
    /// "ACK", or "NAK" if the reflector refused the link
    pub ack: [u8; 3],
}
impl XrfLinkAck {
    pub fn is_accepted(&self) -> bool {
        self.ack[0] != b'N'
    }
}

impl XrfPacket {
    pub fn link(from: Callsign, mod_from: u8, mod_to: u8) -> XrfPacket {
        XrfPacket::Link(XrfLinkRequest { from, mod_from, mod_to })
    }

    pub fn unlink(from: Callsign, mod_from: u8) -> XrfPacket {
        XrfPacket::link(from, mod_from, MOD_UNLINK)
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        match self {
            XrfPacket::Heartbeat { from } => {
                buf.put_slice(from);
                buf.put_u8(0);
            }
            XrfPacket::Link(l) => {
                buf.put_slice(&l.from);
                buf.put_u8(l.mod_from);
                buf.put_u8(l.mod_to);
                buf.put_u8(0);
            }
            XrfPacket::Ack(a) => {
                buf.put_slice(&a.from);
                buf.put_u8(a.mod_from);
                buf.put_u8(a.mod_to);
                buf.put_slice(&a.ack);
                buf.put_u8(0);
            }
            XrfPacket::Dsvt(p) => p.ser(buf),
        }
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(G2Packet::HEADER_LEN);
        self.ser(&mut buf);
        buf
    }

    /// Classifies by structure, first match wins: heartbeat, ack, link request, DSVT.
    pub fn deser(buf: &[u8]) -> anyhow::Result<XrfPacket> {
        let is_null_terminated = buf.last() == Some(&0);

        if buf.len() == HEARTBEAT_LEN && is_null_terminated {
            let mut buf = buf;
            return Ok(XrfPacket::Heartbeat { from: buf.checked_array()? });
        }
        if buf.len() == ACK_LEN && is_null_terminated && buf[ACK_LEN - 2] == b'K' {
            let mut buf = buf;
            return Ok(XrfPacket::Ack(XrfLinkAck {
                from: buf.checked_array()?,
                mod_from: buf.checked_u8()?,
                mod_to: buf.checked_u8()?,
                ack: buf.checked_array()?,
            }));
        }
        if buf.len() == LINK_LEN && is_null_terminated {
            let mut buf = buf;
            return Ok(XrfPacket::Link(XrfLinkRequest {
                from: buf.checked_array()?,
                mod_from: buf.checked_u8()?,
                mod_to: buf.checked_u8()?,
            }));
        }
        if buf.len() == G2Packet::HEADER_LEN || buf.len() == G2Packet::VOICE_LEN {
            return Ok(XrfPacket::Dsvt(G2Packet::deser(buf)?));
        }
        bail!("unrecognized XRF datagram of length {}", buf.len())
    }
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use crate::dv::frame::RfFrame;
    use crate::dv::header::{callsign, Header};
    use super::*;

    #[test]
    fn test_heartbeat_layout() {
        let packet = XrfPacket::Heartbeat { from: callsign("KO6JXH") };
        let buf = packet.to_bytes();
        assert_eq!(&buf[..], b"KO6JXH  \0");
        assert_eq!(XrfPacket::deser(&buf).unwrap(), packet);
    }

    #[test]
    fn test_link_layout() {
        let buf = XrfPacket::link(callsign("KO6JXH"), b'C', b'A').to_bytes();
        assert_eq!(&buf[..], b"KO6JXH  CA\0");

        let buf = XrfPacket::unlink(callsign("KO6JXH"), b'C').to_bytes();
        assert_eq!(&buf[..], b"KO6JXH  C \0");
        match XrfPacket::deser(&buf).unwrap() {
            XrfPacket::Link(l) => assert!(l.is_unlink()),
            p => panic!("{:?}", p),
        }
    }

    #[rstest]
    #[case::ack(b"XRF012  CAACK\0", true)]
    #[case::nak(b"XRF012  CANAK\0", false)]
    fn test_ack(#[case] buf: &[u8], #[case] accepted: bool) {
        match XrfPacket::deser(buf).unwrap() {
            XrfPacket::Ack(ack) => {
                assert_eq!(ack.from, callsign("XRF012"));
                assert_eq!(ack.mod_from, b'C');
                assert_eq!(ack.mod_to, b'A');
                assert_eq!(ack.is_accepted(), accepted);
            }
            p => panic!("{:?}", p),
        }
    }

    #[test]
    fn test_dsvt() {
        let header = Header::new([0, 0, 0], callsign("XRF012 G"), callsign("XRF012 A"), callsign("CQCQCQ"), callsign("KO6JXH"), *b"52P ");
        let header_packet = XrfPacket::Dsvt(G2Packet::header([0, 1, 1], 0x1234, header));
        assert_eq!(XrfPacket::deser(&header_packet.to_bytes()).unwrap(), header_packet);

        let voice_packet = XrfPacket::Dsvt(G2Packet::voice([0, 1, 1], 0x1234, 20, true, RfFrame::end()));
        assert_eq!(XrfPacket::deser(&voice_packet.to_bytes()).unwrap(), voice_packet);
    }

    #[rstest]
    #[case::empty(b"")]
    #[case::heartbeat_without_null(b"KO6JXH  X")]
    #[case::ack_without_k(b"XRF012  CAACX\0")]
    #[case::odd_length(b"KO6JXH  CA\0\0")]
    #[case::dsvt_garbage(&[0u8; 27])]
    fn test_rejected(#[case] buf: &[u8]) {
        assert!(XrfPacket::deser(buf).is_err());
    }
}
