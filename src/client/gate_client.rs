use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tracing::{debug, error, info, trace, warn};

use crate::gate::local_packet::{HeaderRecord, LocalPacket, LocalRecord, ModuleId, PacketFlags, VoiceEndRecord, VoiceRecord};
use crate::util::seqpacket::SeqPacketConn;

/// Callbacks for a process that attaches to the gate as a local client. Replies go through the
///  connection that is passed in.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GateClient: Send {
    async fn on_header(&mut self, conn: &GateConnection, module: ModuleId, flags: PacketFlags, record: &HeaderRecord);

    async fn on_voice(&mut self, conn: &GateConnection, module: ModuleId, flags: PacketFlags, record: &VoiceRecord);

    async fn on_voice_end(&mut self, _conn: &GateConnection, _module: ModuleId, _flags: PacketFlags, _record: &VoiceEndRecord) {
    }
}

/// A local client's connection to the gate.
#[derive(Debug)]
pub struct GateConnection {
    conn: SeqPacketConn,
}

impl GateConnection {
    pub fn connect(path: &Path) -> anyhow::Result<GateConnection> {
        let conn = SeqPacketConn::connect(path)?;
        info!("connected to gate at {:?}", path);
        Ok(GateConnection { conn })
    }

    pub fn new(conn: SeqPacketConn) -> GateConnection {
        GateConnection { conn }
    }

    /// The next well-formed record from the gate, or `None` once the gate closed the connection.
    pub async fn recv(&self) -> Option<LocalPacket> {
        let mut buf = [0u8; 256];
        loop {
            let n = match self.conn.recv(&mut buf).await {
                Ok(0) => return None,
                Ok(n) => n,
                Err(e) => {
                    error!("error reading from gate: {}", e);
                    return None;
                }
            };

            match LocalPacket::deser(&buf[..n]) {
                Ok(packet) => {
                    trace!("received {:?}", packet);
                    return Some(packet);
                }
                Err(e) => debug!("skipping malformed record from gate: {}", e),
            }
        }
    }

    pub async fn send(&self, packet: &LocalPacket) {
        trace!("sending {:?}", packet);
        let buf = packet.to_bytes();
        match self.conn.send(&buf).await {
            Ok(n) if n != buf.len() => warn!("partial write of {} out of {} bytes to gate", n, buf.len()),
            Ok(_) => {}
            Err(e) => error!("error sending to gate: {}", e),
        }
    }

    /// Sends without waiting, dropping the record if the gate is not keeping up.
    pub fn try_send(&self, packet: &LocalPacket) {
        trace!("sending {:?}", packet);
        match self.conn.try_send(&packet.to_bytes()) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => warn!("gate is not keeping up - dropping {:?}", packet.packet_type()),
            Err(e) => error!("error sending to gate: {}", e),
        }
    }
}

/// Dispatches records from the gate to the client until the gate closes the connection.
pub async fn run_client(conn: &GateConnection, client: &mut impl GateClient) {
    while let Some(packet) = conn.recv().await {
        dispatch(conn, client, &packet).await;
    }
    info!("gate closed the connection");
}

pub async fn dispatch(conn: &GateConnection, client: &mut impl GateClient, packet: &LocalPacket) {
    match &packet.record {
        LocalRecord::Header(r) => client.on_header(conn, packet.module, packet.flags, r).await,
        LocalRecord::Voice(r) => client.on_voice(conn, packet.module, packet.flags, r).await,
        LocalRecord::VoiceEnd(r) => client.on_voice_end(conn, packet.module, packet.flags, r).await,
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;
    use tokio::time::timeout;
    use crate::dv::frame::RfFrame;
    use crate::dv::header::{callsign, Header};
    use super::*;

    fn header() -> Header {
        Header::new([0, 0, 0], callsign("KO6JXH C"), callsign("KO6JXH G"), callsign("CQCQCQ"), callsign("KO6JXH"), *b"52P ")
    }

    #[tokio::test]
    async fn test_run_client_dispatches() {
        let (gate_end, client_end) = SeqPacketConn::pair().unwrap();
        let gate = GateConnection::new(gate_end);
        let conn = GateConnection::new(client_end);

        let c = ModuleId::new('C');
        gate.send(&LocalPacket::header(c, PacketFlags::LOCAL, 1, header())).await;
        gate.conn.send(b"not a record").await.unwrap();
        gate.send(&LocalPacket::voice(c, PacketFlags::LOCAL, 1, 1, 0, RfFrame::null())).await;
        gate.send(&LocalPacket::voice(c, PacketFlags::LOCAL, 1, 2, 1, RfFrame::null())).await;
        gate.send(&LocalPacket::voice_end(c, PacketFlags::LOCAL, 1, 3, 2, RfFrame::end(), 0)).await;
        drop(gate);

        let mut client = MockGateClient::new();
        client.expect_on_header()
            .withf(|_, module, flags, record| *module == ModuleId::new('C') && *flags == PacketFlags::LOCAL && record.stream_id == 1)
            .times(1)
            .return_const(());
        client.expect_on_voice()
            .times(2)
            .return_const(());
        client.expect_on_voice_end()
            .withf(|_, _, _, record| record.count == 3)
            .times(1)
            .return_const(());

        timeout(Duration::from_secs(5), run_client(&conn, &mut client)).await.unwrap();
    }

    #[tokio::test]
    async fn test_try_send() {
        let (gate_end, client_end) = SeqPacketConn::pair().unwrap();
        let gate = GateConnection::new(gate_end);
        let packet = LocalPacket::header(ModuleId::new('B'), PacketFlags::empty(), 7, header());
        GateConnection::new(client_end).try_send(&packet);
        assert_eq!(gate.recv().await, Some(packet));
    }

    #[tokio::test]
    async fn test_recv_none_on_close() {
        let (gate_end, client_end) = SeqPacketConn::pair().unwrap();
        drop(gate_end);
        assert_eq!(GateConnection::new(client_end).recv().await, None);
    }

    #[tokio::test]
    async fn test_send_after_close_does_not_fail() {
        let (gate_end, client_end) = SeqPacketConn::pair().unwrap();
        drop(gate_end);
        let conn = GateConnection::new(client_end);
        conn.send(&LocalPacket::voice(ModuleId::new('C'), PacketFlags::empty(), 1, 1, 0, RfFrame::null())).await;
    }
}
