use std::net::SocketAddr;
use std::sync::Arc;

use crate::gate::subscribers::SubscriberId;
use crate::store::presence::PresenceUpdate;
use crate::util::seqpacket::SeqPacketConn;

/// Everything that drives the gate's event loop. Socket readers and presence workers run as
///  separate tasks and feed the loop through a single channel.
#[derive(Debug)]
pub enum GateEvent {
    G2Datagram {
        buf: Vec<u8>,
        from: SocketAddr,
    },
    SubscriberConnected {
        id: SubscriberId,
        conn: Arc<SeqPacketConn>,
    },
    SubscriberRecord {
        id: SubscriberId,
        buf: Vec<u8>,
    },
    SubscriberClosed {
        id: SubscriberId,
    },
    Presence(PresenceUpdate),
}
