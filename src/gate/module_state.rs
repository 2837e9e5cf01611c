use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::dv::frame::{Frame, MiniHeader, RfFrame, AMBE_NULL, DATA_END};
use crate::dv::header::Header;
use crate::dv::stream::TX_MSG_LEN;
use crate::dv::{next_seqno, prev_seqno, SEQNO_MODULUS};
use crate::gate::local_packet::ModuleId;

pub const SERIAL_CAPACITY: usize = 512;

/// Why a packet was not accepted by a module. Rejections leave the module's state untouched.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Rejected {
    ModuleNotEnabled(ModuleId),
    BadChecksum,
    Busy { active_stream_id: u16 },
    NotActive,
    StreamMismatch { active_stream_id: u16 },
    UnknownStream(u16),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Origin {
    /// an RF user on one of this gateway's repeaters
    Rf,
    /// a local client relaying traffic from elsewhere, e.g. a reflector link
    Client,
    Gateway(SocketAddr),
}

/// Per-transmission state, created from a header and discarded after the voice end.
#[derive(Clone)]
pub struct Transmission {
    pub stream_id: u16,
    pub origin: Origin,
    pub header: Header,
    pub count: u32,
    pub seqno: u8,
    pub bit_errors: u32,
    serial_data: [u8; SERIAL_CAPACITY],
    serial_ptr: usize,
    tx_msg: [u8; TX_MSG_LEN],
    miniheader: u8,
    pub deadline: Instant,
    /// the remote gateway a locally originated transmission is forwarded to
    pub g2_route: Option<SocketAddr>,
}
impl Debug for Transmission {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Transmission{{stream_id={:04X}, origin={:?}, count={}, seqno={}, bit_errors={}}}",
               self.stream_id, self.origin, self.count, self.seqno, self.bit_errors)
    }
}

impl Transmission {
    fn new(stream_id: u16, header: Header, origin: Origin, deadline: Instant) -> Transmission {
        Transmission {
            stream_id,
            origin,
            header,
            count: 0,
            // the first voice frame of a stream is expected to be the sync frame with seqno 0
            seqno: SEQNO_MODULUS - 1,
            bit_errors: 0,
            serial_data: [0; SERIAL_CAPACITY],
            serial_ptr: 0,
            tx_msg: [b' '; TX_MSG_LEN],
            miniheader: 0,
            deadline,
            g2_route: None,
        }
    }

    pub fn is_local(&self) -> bool {
        self.origin == Origin::Rf
    }

    pub fn serial_data(&self) -> &[u8] {
        &self.serial_data[..self.serial_ptr.min(SERIAL_CAPACITY)]
    }

    pub fn tx_msg(&self) -> String {
        String::from_utf8_lossy(&self.tx_msg).to_string()
    }

    /// Follows the sender's numbering rather than dropping frames when the carried sequence number
    ///  is not the expected one. Returns `true` if the numbering had to be corrected.
    fn resync(&mut self, carried_seqno: u8) -> bool {
        let expected = next_seqno(self.seqno);
        if expected == carried_seqno % SEQNO_MODULUS {
            return false;
        }
        warn!("stream {:04X}: expected seqno {}, received {} - resynchronizing", self.stream_id, expected, carried_seqno);
        self.seqno = prev_seqno(carried_seqno);
        true
    }

    fn decode_next(&mut self, frame: &RfFrame) -> Frame {
        self.count += 1;
        self.seqno = next_seqno(self.seqno);

        let decoded = frame.decode();
        self.bit_errors += decoded.bit_errors as u32;
        decoded
    }

    fn on_voice(&mut self, frame: &RfFrame) -> RfFrame {
        let decoded = self.decode_next(frame);

        if decoded.is_sync() && self.seqno != 0 {
            warn!("stream {:04X}: sync frame at seqno {}", self.stream_id, self.seqno);
            self.seqno = 0;
        }

        if !(decoded.is_sync() || decoded.is_preend() || decoded.is_end()) {
            self.parse_miniheader(&decoded);
        }

        decoded.encode()
    }

    fn on_voice_end(&mut self, frame: &RfFrame) -> RfFrame {
        self.decode_next(frame).encode()
    }

    /// Appends at most `declared` of `bytes`. Bytes past the capacity are dropped.
    fn append_serial(&mut self, bytes: &[u8], declared: usize) {
        let n = declared
            .min(bytes.len())
            .min(SERIAL_CAPACITY - self.serial_ptr);
        self.serial_data[self.serial_ptr..self.serial_ptr + n].copy_from_slice(&bytes[..n]);
        self.serial_ptr += n;
    }

    fn parse_miniheader(&mut self, frame: &Frame) {
        let data = frame.data;

        if self.seqno % 2 == 1 {
            self.miniheader = data[0];
            let low = (data[0] & 0x0F) as usize;
            match MiniHeader::from_tag(data[0]) {
                Some(MiniHeader::Data) => self.append_serial(&data[1..], low),
                Some(MiniHeader::TxMsg) => {
                    let i = low * 5;
                    if i <= TX_MSG_LEN - 5 {
                        self.tx_msg[i..i + 2].copy_from_slice(&data[1..]);
                    }
                }
                _ => {}
            }
        }
        else if self.seqno > 0 {
            let low = (self.miniheader & 0x0F) as usize;
            match MiniHeader::from_tag(self.miniheader) {
                Some(MiniHeader::Data) => self.append_serial(&data, low.saturating_sub(2)),
                Some(MiniHeader::TxMsg) => {
                    let i = low * 5;
                    if i <= TX_MSG_LEN - 5 {
                        self.tx_msg[i + 2..i + 5].copy_from_slice(&data);
                    }
                }
                _ => {}
            }
        }
    }
}

/// What a module produced for an accepted voice or voice end frame.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct VoiceOut {
    pub count: u8,
    pub seqno: u8,
    pub frame: RfFrame,
}

#[derive(Debug)]
enum ModuleState {
    Idle,
    Active(Box<Transmission>),
}

/// A repeater port. At most one transmission is active on a module at any time.
#[derive(Debug)]
pub struct Module {
    pub id: ModuleId,
    state: ModuleState,
}

impl Module {
    pub fn new(id: ModuleId) -> Module {
        Module {
            id,
            state: ModuleState::Idle,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, ModuleState::Idle)
    }

    pub fn transmission(&self) -> Option<&Transmission> {
        match &self.state {
            ModuleState::Idle => None,
            ModuleState::Active(t) => Some(t),
        }
    }

    pub fn transmission_mut(&mut self) -> Option<&mut Transmission> {
        match &mut self.state {
            ModuleState::Idle => None,
            ModuleState::Active(t) => Some(t),
        }
    }

    pub fn active_stream_id(&self) -> Option<u16> {
        self.transmission().map(|t| t.stream_id)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.transmission().map(|t| t.deadline)
    }

    /// Claims the module for a new stream. This is the only transition out of idle, and it fails if
    ///  the module is already claimed.
    pub fn try_begin(&mut self, stream_id: u16, header: Header, origin: Origin, deadline: Instant) -> Result<(), Rejected> {
        if let ModuleState::Active(t) = &self.state {
            return Err(Rejected::Busy { active_stream_id: t.stream_id });
        }

        debug!("module {:?}: starting stream {:04X} from {:?}", self.id, stream_id, origin);
        self.state = ModuleState::Active(Box::new(Transmission::new(stream_id, header, origin, deadline)));
        Ok(())
    }

    fn active_for(&mut self, stream_id: u16) -> Result<&mut Transmission, Rejected> {
        match &mut self.state {
            ModuleState::Idle => Err(Rejected::NotActive),
            ModuleState::Active(t) if t.stream_id != stream_id => Err(Rejected::StreamMismatch { active_stream_id: t.stream_id }),
            ModuleState::Active(t) => Ok(t),
        }
    }

    pub fn on_voice(&mut self, stream_id: u16, carried_seqno: u8, frame: &RfFrame, deadline: Instant) -> Result<VoiceOut, Rejected> {
        let t = self.active_for(stream_id)?;
        t.resync(carried_seqno);
        t.deadline = deadline;

        let frame = t.on_voice(frame);
        Ok(VoiceOut {
            count: t.count as u8,
            seqno: t.seqno,
            frame,
        })
    }

    /// Releases the module. The finished transmission is handed back for reporting.
    pub fn on_voice_end(&mut self, stream_id: u16, frame: &RfFrame) -> Result<(VoiceOut, Transmission), Rejected> {
        self.active_for(stream_id)?;
        let ModuleState::Active(mut t) = std::mem::replace(&mut self.state, ModuleState::Idle)
        else {
            return Err(Rejected::NotActive);
        };

        let frame = t.on_voice_end(frame);
        let out = VoiceOut {
            count: t.count as u8,
            seqno: t.seqno,
            frame,
        };
        Ok((out, *t))
    }

    /// Closes an abandoned transmission as if a voice end with silence had been received. Always
    ///  leaves the module idle.
    pub fn on_timeout(&mut self) -> Option<(VoiceOut, Transmission)> {
        let stream_id = self.active_stream_id()?;
        warn!("module {:?}: stream {:04X} timed out", self.id, stream_id);

        let result = self.on_voice_end(stream_id, &RfFrame::new(AMBE_NULL, DATA_END)).ok();
        self.state = ModuleState::Idle;
        result
    }
}
