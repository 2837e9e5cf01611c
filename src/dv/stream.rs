use tracing::trace;

use crate::dv::frame::{scramble, MiniHeader, RfFrame, AMBE_NULL, DATA_NULL, DATA_PREEND, DATA_SYNC, F_EMPTY};
use crate::dv::header::Header;

pub const TX_MSG_LEN: usize = 20;

const FRAMES_PER_GROUP: usize = 21;
/// a text message is sent as four segments of five characters, each spanning two frames
const TX_MSG_SEGMENTS: usize = 4;

/// A complete transmission ready to be sent frame by frame: header, voice frames and the data
///  that is multiplexed into the voice frames' auxiliary bytes.
#[derive(Debug, Clone)]
pub struct Stream {
    pub header: Header,
    pub frames: Vec<RfFrame>,
    /// shown on the receiving radio's display, space padded to 20 characters
    pub tx_msg: Option<String>,
    pub serial_data: Vec<u8>,
    /// digital squelch code
    pub d_sql: Option<u16>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Segment {
    Serial,
    TxMsg,
}

impl Stream {
    pub fn new(header: Header, frames: Vec<RfFrame>) -> Stream {
        Stream {
            header,
            frames,
            tx_msg: None,
            serial_data: Vec::new(),
            d_sql: None,
        }
    }

    /// Lays out sync patterns, squelch code, serial data and the text message across the voice
    ///  frames, padding with silence where there is not enough voice to carry all data, and appends
    ///  the terminating pre-end and end frames.
    ///
    /// Any data the voice frames carried before is overwritten. Serial data is sent first, then the
    ///  text message.
    pub fn prepare(&mut self) {
        let tx_msg = self.tx_msg.as_deref().map(Self::padded_tx_msg);

        let mut payload_frames = 0;
        if tx_msg.is_some() {
            payload_frames += 2 * TX_MSG_SEGMENTS;
        }
        payload_frames += self.serial_data.len().div_ceil(5) * 2;

        // the sync frame starts every group, the squelch code takes up the two frames after it
        let (payload_per_group, overhead_per_group) = match self.d_sql {
            Some(_) => (FRAMES_PER_GROUP - 3, 3),
            None => (FRAMES_PER_GROUP - 1, 1),
        };
        let num_groups = payload_frames.div_ceil(payload_per_group);
        let min_frames = (payload_frames + num_groups * overhead_per_group).max(1);

        if self.frames.last().map(|f| f.is_end()).unwrap_or(false) {
            self.frames.pop();
        }

        // data segments span two frames, so the last group should have an even number of frames
        //  after its sync frame
        let mut preend_voice = None;
        if self.frames.len() > min_frames {
            let in_last_group = self.frames.len() % FRAMES_PER_GROUP;
            if in_last_group.saturating_sub(1) % 2 == 1 {
                preend_voice = self.frames.pop();
            }
        }
        else if self.frames.len() < min_frames {
            self.frames.resize(min_frames, RfFrame::new(AMBE_NULL, DATA_NULL));
        }

        trace!("preparing {} frames for {} payload frames", self.frames.len(), payload_frames);

        let mut serial_idx = 0;
        let mut msg_idx = 0;
        let mut current = None;

        for (i, frame) in self.frames.iter_mut().enumerate() {
            let seqno = i % FRAMES_PER_GROUP;

            frame.data = match (seqno, self.d_sql) {
                (0, _) => DATA_SYNC,
                (1, Some(code)) => {
                    let [lo, hi] = code.to_le_bytes();
                    scramble([u8::from(MiniHeader::Dsql) | 0x02, lo, hi])
                }
                (2, Some(_)) => DATA_NULL,
                _ if seqno % 2 == 1 => {
                    current = if serial_idx < self.serial_data.len() {
                        Some(Segment::Serial)
                    }
                    else if tx_msg.is_some() && msg_idx < TX_MSG_SEGMENTS {
                        Some(Segment::TxMsg)
                    }
                    else {
                        None
                    };

                    match (current, &tx_msg) {
                        (Some(Segment::Serial), _) => {
                            let remaining = &self.serial_data[serial_idx..];
                            let to_send = remaining.len().min(5);
                            scramble([
                                u8::from(MiniHeader::Data) | to_send as u8,
                                remaining[0],
                                remaining.get(1).copied().filter(|_| to_send > 1).unwrap_or(F_EMPTY),
                            ])
                        }
                        (Some(Segment::TxMsg), Some(msg)) => {
                            let segment = &msg[msg_idx * 5..];
                            scramble([u8::from(MiniHeader::TxMsg) | msg_idx as u8, segment[0], segment[1]])
                        }
                        _ => DATA_NULL,
                    }
                }
                _ => {
                    match (current.take(), &tx_msg) {
                        (Some(Segment::Serial), _) => {
                            let remaining = &self.serial_data[serial_idx..];
                            let to_send = remaining.len().min(5);
                            let byte_at = |i: usize| if i < to_send { remaining[i] } else { F_EMPTY };
                            serial_idx += to_send;
                            scramble([byte_at(2), byte_at(3), byte_at(4)])
                        }
                        (Some(Segment::TxMsg), Some(msg)) => {
                            let segment = &msg[msg_idx * 5..];
                            msg_idx += 1;
                            scramble([segment[2], segment[3], segment[4]])
                        }
                        _ => DATA_NULL,
                    }
                }
            };
        }

        match preend_voice {
            Some(voice) => self.frames.push(RfFrame::new(voice.ambe, DATA_PREEND)),
            None => {
                match self.frames.last_mut() {
                    Some(last) if last.is_sync() => last.data = DATA_PREEND,
                    _ => self.frames.push(RfFrame::new(AMBE_NULL, DATA_PREEND)),
                }
            }
        }
        self.frames.push(RfFrame::end());
    }

    fn padded_tx_msg(msg: &str) -> [u8; TX_MSG_LEN] {
        let mut result = [b' '; TX_MSG_LEN];
        for (dst, src) in result.iter_mut().zip(msg.bytes()) {
            *dst = src;
        }
        result
    }
}
