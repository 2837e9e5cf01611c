use bytes::BufMut;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::dv::fec::{ambe_deinterleave, ambe_interleave, golay_decode_24_12, golay_encode_24_12, prng};
use crate::util::buf_ext::BufExt;

/// AMBE encoding of silence
pub const AMBE_NULL: [u8; 9] = [0x9E, 0x8D, 0x32, 0x88, 0x26, 0x1A, 0x3F, 0x61, 0xE8];
pub const AMBE_END: [u8; 9] = [0x55, 0xC8, 0x7A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

pub const DATA_SCRAMBLE: [u8; 3] = [0x70, 0x4F, 0x93];
pub const DATA_NULL: [u8; 3] = scramble([F_EMPTY, F_EMPTY, F_EMPTY]);
pub const DATA_SYNC: [u8; 3] = [0x55, 0x2D, 0x16];
pub const DATA_PREEND: [u8; 3] = [0x55, 0x55, 0x55];
/// data field of the synthetic frame that closes a transmission which timed out
pub const DATA_END: [u8; 3] = [0x55, 0xC8, 0x7A];

/// filler byte for unused miniheader slots
pub const F_EMPTY: u8 = 0x66;

/// The high nibble of the first data byte in every odd frame announces what the following two
///  frames' data bytes carry.
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum MiniHeader {
    Data = 0x30,
    TxMsg = 0x40,
    Header = 0x50,
    FastData1 = 0x80,
    FastData2 = 0x90,
    Dsql = 0xC0,
}
impl MiniHeader {
    pub fn from_tag(tag: u8) -> Option<MiniHeader> {
        MiniHeader::try_from(tag & 0xF0).ok()
    }
}

/// XORs against the fixed scramble mask. The operation is its own inverse.
pub const fn scramble(data: [u8; 3]) -> [u8; 3] {
    [
        data[0] ^ DATA_SCRAMBLE[0],
        data[1] ^ DATA_SCRAMBLE[1],
        data[2] ^ DATA_SCRAMBLE[2],
    ]
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FrameKind {
    Sync,
    PreEnd,
    End,
    Voice,
}

/// A voice frame exactly as it is sent over the air: nine bytes of FEC protected AMBE data and
///  three bytes of scrambled auxiliary data.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RfFrame {
    pub ambe: [u8; 9],
    pub data: [u8; 3],
}
impl RfFrame {
    pub const SERIALIZED_LEN: usize = 12;

    pub fn new(ambe: [u8; 9], data: [u8; 3]) -> RfFrame {
        RfFrame { ambe, data }
    }

    /// silence with an empty data slot
    pub fn null() -> RfFrame {
        RfFrame::new(AMBE_NULL, DATA_NULL)
    }

    pub fn end() -> RfFrame {
        RfFrame::new(AMBE_END, [0, 0, 0])
    }

    pub fn is_sync(&self) -> bool {
        self.data == DATA_SYNC
    }

    pub fn is_preend(&self) -> bool {
        self.data == DATA_PREEND
    }

    pub fn is_end(&self) -> bool {
        self.ambe == AMBE_END
    }

    pub fn kind(&self) -> FrameKind {
        if self.is_sync() {
            FrameKind::Sync
        }
        else if self.is_preend() {
            FrameKind::PreEnd
        }
        else if self.is_end() {
            FrameKind::End
        }
        else {
            FrameKind::Voice
        }
    }

    pub fn decode(&self) -> Frame {
        let deinterleaved = ambe_deinterleave(&self.ambe);

        let (ambe_decode_1, errors_1) = golay_decode_24_12(word_at(&deinterleaved, 0));
        let (ambe_decode_2, errors_2) = golay_decode_24_12(word_at(&deinterleaved, 3) ^ prng(ambe_decode_1));

        let mut frame = Frame {
            ambe_decode_1,
            ambe_decode_2,
            ambe: [deinterleaved[6], deinterleaved[7], deinterleaved[8]],
            data: self.data,
            bit_errors: errors_1 + errors_2,
        };

        match self.kind() {
            // sentinels are not scrambled
            FrameKind::Sync | FrameKind::PreEnd => {}
            FrameKind::End => {
                frame.ambe_decode_1 = 0;
                frame.ambe_decode_2 = 0;
                frame.ambe = [AMBE_END[0], AMBE_END[1], AMBE_END[2]];
                frame.bit_errors = 0;
            }
            FrameKind::Voice => {
                frame.data = scramble(self.data);
            }
        }
        frame
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.ambe);
        buf.put_slice(&self.data);
    }

    pub fn deser(buf: &mut impl bytes::Buf) -> anyhow::Result<RfFrame> {
        let ambe = buf.checked_array()?;
        let data = buf.checked_array()?;
        Ok(RfFrame { ambe, data })
    }
}

fn word_at(buf: &[u8; 9], offset: usize) -> u32 {
    ((buf[offset] as u32) << 16) | ((buf[offset + 1] as u32) << 8) | buf[offset + 2] as u32
}

/// An [RfFrame] with FEC applied and the data field unscrambled. The AMBE payload itself stays
///  encoded: the two Golay protected 12-bit symbols plus the three unprotected trailing bytes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Frame {
    pub ambe_decode_1: u16,
    pub ambe_decode_2: u16,
    pub ambe: [u8; 3],
    pub data: [u8; 3],
    /// number of bits corrected while decoding the AMBE symbols
    pub bit_errors: u8,
}
impl Frame {
    pub fn is_sync(&self) -> bool {
        self.data == DATA_SYNC
    }

    pub fn is_preend(&self) -> bool {
        self.data == DATA_PREEND
    }

    pub fn is_end(&self) -> bool {
        self.ambe_decode_1 == 0 && self.ambe_decode_2 == 0 && self.ambe == AMBE_END[..3]
    }

    pub fn encode(&self) -> RfFrame {
        let encoded_1 = golay_encode_24_12(self.ambe_decode_1);
        let encoded_2 = golay_encode_24_12(self.ambe_decode_2) ^ prng(self.ambe_decode_1);

        let mut deinterleaved = [0u8; 9];
        deinterleaved[..3].copy_from_slice(&encoded_1.to_be_bytes()[1..]);
        deinterleaved[3..6].copy_from_slice(&encoded_2.to_be_bytes()[1..]);
        deinterleaved[6..].copy_from_slice(&self.ambe);

        if self.is_sync() || self.is_preend() {
            RfFrame::new(ambe_interleave(&deinterleaved), self.data)
        }
        else if self.is_end() {
            RfFrame::new(AMBE_END, self.data)
        }
        else {
            RfFrame::new(ambe_interleave(&deinterleaved), scramble(self.data))
        }
    }
}
