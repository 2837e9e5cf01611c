use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::gate_client::{GateClient, GateConnection};
use crate::dv::aprs::encode_aprs_string;
use crate::dv::frame::RfFrame;
use crate::dv::header::{callsign, cs_str, Callsign, Header};
use crate::dv::stream::Stream;
use crate::dv::SEQNO_MODULUS;
use crate::gate::local_packet::{HeaderRecord, LocalPacket, ModuleId, PacketFlags, VoiceEndRecord, VoiceRecord};

/// URCALL that asks for an echo
pub const URCALL_ECHO: &[u8; 8] = b"       E";

/// three minutes of voice
const MAX_RECORDED_FRAMES: usize = 50 * 180;

/// replies waiting for their turn while another one is being played back
const REPLAY_QUEUE_LEN: usize = 4;

#[derive(Debug, Clone)]
pub struct EchoConfig {
    /// the reply's MYCALL
    pub callsign: Callsign,
    pub module: ModuleId,
    /// pause between the end of a recording and the start of its replay
    pub reply_delay: Duration,
    pub frame_interval: Duration,
    pub reply_text: String,
    /// APRS packet sent in the reply's serial data, if any
    pub aprs: Option<String>,
    pub local_socket_path: PathBuf,
}

impl EchoConfig {
    pub fn new(own_callsign: &str, module: ModuleId) -> EchoConfig {
        EchoConfig {
            callsign: callsign(own_callsign),
            module,
            reply_delay: Duration::from_millis(500),
            frame_interval: Duration::from_millis(20),
            reply_text: "ECHO".to_string(),
            aprs: None,
            local_socket_path: PathBuf::from("dgate.sock"),
        }
    }
}

#[derive(Debug)]
struct Recording {
    stream_id: u16,
    header: Header,
    frames: Vec<RfFrame>,
}

/// Records transmissions addressed to [URCALL_ECHO] and plays them back to the caller.
///
/// Replies are played back by a separate task while the client keeps reading from the gate.
pub struct EchoClient {
    config: Arc<EchoConfig>,
    recording: Option<Recording>,
    replay_sender: mpsc::Sender<Stream>,
}

impl EchoClient {
    /// Spawns the replay task, so this must be called from within a tokio runtime.
    pub fn new(config: Arc<EchoConfig>, conn: Arc<GateConnection>) -> EchoClient {
        let (replay_sender, replay_receiver) = mpsc::channel(REPLAY_QUEUE_LEN);
        tokio::spawn(replay_loop(config.clone(), conn, replay_receiver));

        EchoClient {
            config,
            recording: None,
            replay_sender,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    fn recording_mut(&mut self, module: ModuleId, flags: PacketFlags, stream_id: u16) -> Option<&mut Recording> {
        if module != self.config.module || !flags.contains(PacketFlags::LOCAL) {
            return None;
        }
        self.recording.as_mut()
            .filter(|r| r.stream_id == stream_id)
    }

    /// The recorded voice addressed back to the caller, with the configured text and serial data.
    fn reply(&self, recording: Recording) -> Stream {
        let mut header = recording.header;
        std::mem::swap(&mut header.departure_rptr, &mut header.destination_rptr);
        header.companion = recording.header.own;
        header.own = self.config.callsign;
        header.own_ext = *b"ECHO";

        let mut stream = Stream::new(header.with_crc(), recording.frames);
        stream.tx_msg = Some(self.config.reply_text.clone());
        if let Some(aprs) = &self.config.aprs {
            stream.serial_data = encode_aprs_string(aprs).into_bytes();
        }
        stream.prepare();
        stream
    }
}

async fn replay_loop(config: Arc<EchoConfig>, conn: Arc<GateConnection>, mut replay_receiver: mpsc::Receiver<Stream>) {
    while let Some(stream) = replay_receiver.recv().await {
        sleep(config.reply_delay).await;
        replay(&config, &conn, &stream).await;
    }
    debug!("echo client dropped - replay task finished");
}

async fn replay(config: &EchoConfig, conn: &GateConnection, stream: &Stream) {
    let module = config.module;
    let stream_id = rand::random::<u16>();

    let Some((last, voice)) = stream.frames.split_last()
    else {
        return;
    };

    info!("replaying {} frames to {} as stream {:04X}", stream.frames.len(), cs_str(&stream.header.companion), stream_id);
    conn.send(&LocalPacket::header(module, PacketFlags::LOCAL, stream_id, stream.header)).await;

    let mut ticker = interval_at(Instant::now() + config.frame_interval, config.frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    for (i, frame) in voice.iter().enumerate() {
        ticker.tick().await;
        conn.send(&LocalPacket::voice(module, PacketFlags::LOCAL, stream_id, i as u8, (i % SEQNO_MODULUS as usize) as u8, *frame)).await;
    }

    ticker.tick().await;
    let i = voice.len();
    conn.send(&LocalPacket::voice_end(module, PacketFlags::LOCAL, stream_id, i as u8, (i % SEQNO_MODULUS as usize) as u8, *last, 0)).await;
}

#[async_trait]
impl GateClient for EchoClient {
    async fn on_header(&mut self, _conn: &GateConnection, module: ModuleId, flags: PacketFlags, record: &HeaderRecord) {
        if module != self.config.module || !flags.contains(PacketFlags::LOCAL) || &record.header.companion != URCALL_ECHO {
            return;
        }

        info!("recording {} on module {:?}", cs_str(&record.header.own), module);
        self.recording = Some(Recording {
            stream_id: record.stream_id,
            header: record.header,
            frames: Vec::new(),
        });
    }

    async fn on_voice(&mut self, _conn: &GateConnection, module: ModuleId, flags: PacketFlags, record: &VoiceRecord) {
        let Some(recording) = self.recording_mut(module, flags, record.stream_id)
        else {
            return;
        };

        if recording.frames.len() < MAX_RECORDED_FRAMES {
            recording.frames.push(record.frame);
        }
        else {
            debug!("recording is full - dropping frame");
        }
    }

    async fn on_voice_end(&mut self, _conn: &GateConnection, module: ModuleId, flags: PacketFlags, record: &VoiceEndRecord) {
        if self.recording_mut(module, flags, record.stream_id).is_none() {
            return;
        }
        let Some(mut recording) = self.recording.take()
        else {
            return;
        };
        recording.frames.push(record.frame);

        if recording.frames.len() <= 1 {
            warn!("empty recording from {} - not replaying", cs_str(&recording.header.own));
            return;
        }

        let caller = recording.header.own;
        let stream = self.reply(recording);
        if let Err(e) = self.replay_sender.try_send(stream) {
            warn!("dropping reply to {}: {}", cs_str(&caller), e);
        }
    }
}
