use std::fmt::{Debug, Formatter};

use bytes::{Buf, BufMut};

use crate::dv::crc::crc16_ccitt;
use crate::util::buf_ext::BufExt;

/// Flag byte A. The low three bits are a compound repeater control code rather than single flags.
pub mod flags {
    pub const DATA: u8 = 0x80;
    pub const REPEATER: u8 = 0x40;
    pub const INTERRUPT: u8 = 0x20;
    pub const CONTROL: u8 = 0x10;
    pub const URGENT: u8 = 0x08;

    pub const MASK_CONTROL: u8 = 0x07;
    pub const RPTR_CTRL: u8 = 0x07;
    pub const AUTO_REPLY: u8 = 0x06;
    pub const RESEND: u8 = 0x04;
    pub const ACK: u8 = 0x03;
    pub const NO_REPLY: u8 = 0x02;
    pub const RELAY_UNAVAIL: u8 = 0x01;
}

pub type Callsign = [u8; 8];

/// normalizes a callsign to its wire form: upper case, space padded (or truncated) to 8 bytes
pub fn callsign(s: &str) -> Callsign {
    let mut result = [b' '; 8];
    for (dst, src) in result.iter_mut().zip(s.bytes()) {
        *dst = src.to_ascii_uppercase();
    }
    result
}

/// replaces the eighth character of a callsign, which D-STAR uses for the module letter
pub fn with_suffix(cs: &Callsign, suffix: u8) -> Callsign {
    let mut result = *cs;
    result[7] = suffix;
    result
}

/// A decoded D-STAR header. The CRC is not recomputed on changes, it is transferred as it was
///  received until [Header::set_crc] is called.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Header {
    /// only flag byte A is used, the other two are reserved
    pub flags: [u8; 3],
    /// RPT2
    pub destination_rptr: Callsign,
    /// RPT1
    pub departure_rptr: Callsign,
    /// URCALL
    pub companion: Callsign,
    /// MYCALL
    pub own: Callsign,
    pub own_ext: [u8; 4],
    /// little endian on the wire
    pub crc: [u8; 2],
}
impl Debug for Header {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Header{{{}/{} -> {} via {},{} flags={:02X?} crc={:04X}}}",
               cs_str(&self.own),
               String::from_utf8_lossy(&self.own_ext),
               cs_str(&self.companion),
               cs_str(&self.destination_rptr),
               cs_str(&self.departure_rptr),
               self.flags,
               self.get_crc(),
        )
    }
}

pub fn cs_str(cs: &[u8]) -> String {
    String::from_utf8_lossy(cs).to_string()
}

impl Header {
    /// size of everything covered by the checksum
    pub const CHECKED_LEN: usize = 39;
    pub const SERIALIZED_LEN: usize = Self::CHECKED_LEN + 2;

    pub fn new(flags: [u8; 3], destination_rptr: Callsign, departure_rptr: Callsign, companion: Callsign, own: Callsign, own_ext: [u8; 4]) -> Header {
        let mut result = Header {
            flags,
            destination_rptr,
            departure_rptr,
            companion,
            own,
            own_ext,
            crc: [0, 0],
        };
        result.set_crc(result.calc_crc());
        result
    }

    pub fn calc_crc(&self) -> u16 {
        let mut buf = Vec::with_capacity(Self::SERIALIZED_LEN);
        self.ser(&mut buf);
        crc16_ccitt(&buf[..Self::CHECKED_LEN])
    }

    pub fn set_crc(&mut self, crc: u16) {
        self.crc = crc.to_le_bytes();
    }

    pub fn get_crc(&self) -> u16 {
        u16::from_le_bytes(self.crc)
    }

    pub fn verify(&self) -> bool {
        self.get_crc() == self.calc_crc()
    }

    /// updates the checksum after fields were modified
    pub fn with_crc(mut self) -> Header {
        self.set_crc(self.calc_crc());
        self
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.flags);
        buf.put_slice(&self.destination_rptr);
        buf.put_slice(&self.departure_rptr);
        buf.put_slice(&self.companion);
        buf.put_slice(&self.own);
        buf.put_slice(&self.own_ext);
        buf.put_slice(&self.crc);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Header> {
        Ok(Header {
            flags: buf.checked_array()?,
            destination_rptr: buf.checked_array()?,
            departure_rptr: buf.checked_array()?,
            companion: buf.checked_array()?,
            own: buf.checked_array()?,
            own_ext: buf.checked_array()?,
            crc: buf.checked_array()?,
        })
    }
}
