use std::fmt::{Debug, Formatter};

use anyhow::{anyhow, bail};
use bitflags::bitflags;
use bytes::{Buf, BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::dv::frame::RfFrame;
use crate::dv::header::Header;
use crate::util::buf_ext::BufExt;

pub const PACKET_TITLE: [u8; 4] = *b"DGTE";

const PREFIX_LEN: usize = 8;

/// A repeater port, identified by a single ASCII letter.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ModuleId(pub u8);
impl ModuleId {
    pub fn new(letter: char) -> ModuleId {
        ModuleId(letter.to_ascii_uppercase() as u8)
    }
}
impl Debug for ModuleId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0 as char)
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct PacketFlags: u8 {
        /// the transmission originates from a local RF user rather than from the network
        const LOCAL = 0x01;
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PacketType {
    Header = 0x10,
    Voice = 0x20,
    VoiceEnd = 0x21,
}
impl PacketType {
    pub fn serialized_len(&self) -> usize {
        PREFIX_LEN + match self {
            PacketType::Header => 2 + Header::SERIALIZED_LEN,
            PacketType::Voice => 4 + RfFrame::SERIALIZED_LEN,
            PacketType::VoiceEnd => 4 + RfFrame::SERIALIZED_LEN + 4,
        }
    }
}

/// A record on the local socket between the gate and its clients: a common prefix (title, module,
///  type, flags) followed by a body whose layout depends on the type.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LocalPacket {
    pub module: ModuleId,
    pub flags: PacketFlags,
    pub record: LocalRecord,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LocalRecord {
    Header(HeaderRecord),
    Voice(VoiceRecord),
    VoiceEnd(VoiceEndRecord),
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HeaderRecord {
    pub stream_id: u16,
    pub header: Header,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct VoiceRecord {
    pub stream_id: u16,
    pub count: u8,
    pub seqno: u8,
    pub frame: RfFrame,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct VoiceEndRecord {
    pub stream_id: u16,
    pub count: u8,
    pub seqno: u8,
    pub frame: RfFrame,
    pub bit_errors: u32,
}

impl LocalPacket {
    pub const MAX_LEN: usize = PREFIX_LEN + 2 + Header::SERIALIZED_LEN;

    pub fn header(module: ModuleId, flags: PacketFlags, stream_id: u16, header: Header) -> LocalPacket {
        LocalPacket {
            module,
            flags,
            record: LocalRecord::Header(HeaderRecord { stream_id, header }),
        }
    }

    pub fn voice(module: ModuleId, flags: PacketFlags, stream_id: u16, count: u8, seqno: u8, frame: RfFrame) -> LocalPacket {
        LocalPacket {
            module,
            flags,
            record: LocalRecord::Voice(VoiceRecord { stream_id, count, seqno, frame }),
        }
    }

    pub fn voice_end(module: ModuleId, flags: PacketFlags, stream_id: u16, count: u8, seqno: u8, frame: RfFrame, bit_errors: u32) -> LocalPacket {
        LocalPacket {
            module,
            flags,
            record: LocalRecord::VoiceEnd(VoiceEndRecord { stream_id, count, seqno, frame, bit_errors }),
        }
    }

    pub fn packet_type(&self) -> PacketType {
        match &self.record {
            LocalRecord::Header(_) => PacketType::Header,
            LocalRecord::Voice(_) => PacketType::Voice,
            LocalRecord::VoiceEnd(_) => PacketType::VoiceEnd,
        }
    }

    pub fn stream_id(&self) -> u16 {
        match &self.record {
            LocalRecord::Header(r) => r.stream_id,
            LocalRecord::Voice(r) => r.stream_id,
            LocalRecord::VoiceEnd(r) => r.stream_id,
        }
    }

    pub fn is_local(&self) -> bool {
        self.flags.contains(PacketFlags::LOCAL)
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_slice(&PACKET_TITLE);
        buf.put_u8(self.module.0);
        buf.put_u8(self.packet_type().into());
        buf.put_u8(self.flags.bits());
        buf.put_u8(0);

        match &self.record {
            LocalRecord::Header(r) => {
                buf.put_u16_le(r.stream_id);
                r.header.ser(buf);
            }
            LocalRecord::Voice(r) => {
                buf.put_u16_le(r.stream_id);
                buf.put_u8(r.count);
                buf.put_u8(r.seqno);
                r.frame.ser(buf);
            }
            LocalRecord::VoiceEnd(r) => {
                buf.put_u16_le(r.stream_id);
                buf.put_u8(r.count);
                buf.put_u8(r.seqno);
                r.frame.ser(buf);
                buf.put_u32_le(r.bit_errors);
            }
        }
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::MAX_LEN);
        self.ser(&mut buf);
        buf
    }

    /// Dispatches on the type byte. The record's length must match the length implied by its type.
    pub fn deser(buf: &[u8]) -> anyhow::Result<LocalPacket> {
        let total_len = buf.len();
        let mut buf = buf;

        if buf.checked_array::<4>()? != PACKET_TITLE {
            bail!("not a local packet");
        }
        let module = ModuleId(buf.checked_u8()?);
        let packet_type = buf.checked_u8()?;
        let packet_type = PacketType::try_from(packet_type)
            .map_err(|_| anyhow!("invalid packet type 0x{:02X}", packet_type))?;
        let flags = PacketFlags::from_bits_truncate(buf.checked_u8()?);
        let _reserved = buf.checked_u8()?;

        if total_len != packet_type.serialized_len() {
            bail!("{:?} record with length {}", packet_type, total_len);
        }

        let record = match packet_type {
            PacketType::Header => LocalRecord::Header(HeaderRecord {
                stream_id: buf.checked_u16_le()?,
                header: Header::deser(&mut buf)?,
            }),
            PacketType::Voice => LocalRecord::Voice(Self::deser_voice(&mut buf)?),
            PacketType::VoiceEnd => {
                let voice = Self::deser_voice(&mut buf)?;
                LocalRecord::VoiceEnd(VoiceEndRecord {
                    stream_id: voice.stream_id,
                    count: voice.count,
                    seqno: voice.seqno,
                    frame: voice.frame,
                    bit_errors: buf.checked_u32_le()?,
                })
            }
        };

        Ok(LocalPacket { module, flags, record })
    }

    fn deser_voice(buf: &mut impl Buf) -> anyhow::Result<VoiceRecord> {
        Ok(VoiceRecord {
            stream_id: buf.checked_u16_le()?,
            count: buf.checked_u8()?,
            seqno: buf.checked_u8()?,
            frame: RfFrame::deser(buf)?,
        })
    }
}
