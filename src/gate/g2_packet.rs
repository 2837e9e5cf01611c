use anyhow::bail;
use bytes::{BufMut, BytesMut};

use crate::dv::frame::RfFrame;
use crate::dv::header::Header;
use crate::util::buf_ext::BufExt;

pub const DSVT_TITLE: [u8; 4] = *b"DSVT";

pub const CONFIG_HEADER: u8 = 0x10;
pub const CONFIG_VOICE: u8 = 0x20;
const PACKET_ID: u8 = 0x20;

const CTRL_HEADER: u8 = 0x80;
pub const CTRL_END: u8 = 0x40;
const CTRL_SEQNO_MASK: u8 = 0x1F;

const PREFIX_LEN: usize = 15;

/// The "DSVT" encapsulation used between gateways and (for header and voice) by reflectors.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum G2Packet {
    Header(G2HeaderData),
    Voice(G2VoiceData),
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct G2HeaderData {
    pub flagb: [u8; 3],
    pub stream_id: u16,
    pub header: Header,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct G2VoiceData {
    pub flagb: [u8; 3],
    pub stream_id: u16,
    /// sequence number in the low bits, 0x40 marks the last frame of a transmission
    pub ctrl: u8,
    pub frame: RfFrame,
}
impl G2VoiceData {
    pub fn seqno(&self) -> u8 {
        self.ctrl & CTRL_SEQNO_MASK
    }

    pub fn is_end(&self) -> bool {
        self.ctrl & CTRL_END != 0
    }
}

impl G2Packet {
    pub const HEADER_LEN: usize = PREFIX_LEN + Header::SERIALIZED_LEN;
    pub const VOICE_LEN: usize = PREFIX_LEN + RfFrame::SERIALIZED_LEN;

    pub fn header(flagb: [u8; 3], stream_id: u16, header: Header) -> G2Packet {
        G2Packet::Header(G2HeaderData { flagb, stream_id, header })
    }

    pub fn voice(flagb: [u8; 3], stream_id: u16, seqno: u8, is_end: bool, frame: RfFrame) -> G2Packet {
        let ctrl = (seqno & CTRL_SEQNO_MASK) | if is_end { CTRL_END } else { 0 };
        G2Packet::Voice(G2VoiceData { flagb, stream_id, ctrl, frame })
    }

    pub fn stream_id(&self) -> u16 {
        match self {
            G2Packet::Header(h) => h.stream_id,
            G2Packet::Voice(v) => v.stream_id,
        }
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        let (config, flagb, stream_id, ctrl) = match self {
            G2Packet::Header(h) => (CONFIG_HEADER, h.flagb, h.stream_id, CTRL_HEADER),
            G2Packet::Voice(v) => (CONFIG_VOICE, v.flagb, v.stream_id, v.ctrl),
        };

        buf.put_slice(&DSVT_TITLE);
        buf.put_u8(config);
        buf.put_slice(&[0, 0, 0]);
        buf.put_u8(PACKET_ID);
        buf.put_slice(&flagb);
        buf.put_u16_le(stream_id);
        buf.put_u8(ctrl);

        match self {
            G2Packet::Header(h) => h.header.ser(buf),
            G2Packet::Voice(v) => v.frame.ser(buf),
        }
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::HEADER_LEN);
        self.ser(&mut buf);
        buf
    }

    /// Header and voice are told apart by the datagram's length; the config byte has to agree, and a
    ///  header must carry the header ctrl byte.
    pub fn deser(buf: &[u8]) -> anyhow::Result<G2Packet> {
        let total_len = buf.len();
        let mut buf = buf;

        if buf.checked_array::<4>()? != DSVT_TITLE {
            bail!("not a DSVT packet");
        }
        let config = buf.checked_u8()?;
        let _flaga = buf.checked_array::<3>()?;
        let id = buf.checked_u8()?;
        if id != PACKET_ID {
            bail!("unsupported DSVT packet id 0x{:02X}", id);
        }
        let flagb = buf.checked_array::<3>()?;
        let stream_id = buf.checked_u16_le()?;
        let ctrl = buf.checked_u8()?;

        match (total_len, config) {
            (Self::HEADER_LEN, CONFIG_HEADER) if ctrl == CTRL_HEADER => Ok(G2Packet::Header(G2HeaderData {
                flagb,
                stream_id,
                header: Header::deser(&mut buf)?,
            })),
            (Self::VOICE_LEN, CONFIG_VOICE) => Ok(G2Packet::Voice(G2VoiceData {
                flagb,
                stream_id,
                ctrl,
                frame: RfFrame::deser(&mut buf)?,
            })),
            (Self::HEADER_LEN, CONFIG_HEADER) => bail!("DSVT header with ctrl 0x{:02X}", ctrl),
            _ => bail!("DSVT packet with config 0x{:02X} and length {}", config, total_len),
        }
    }
}
