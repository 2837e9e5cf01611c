use std::io::ErrorKind;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::util::seqpacket::SeqPacketConn;

pub type SubscriberId = u64;

/// The local clients connected to the gate. Owned by the event loop, so no locking is needed.
#[derive(Default)]
pub struct Subscribers {
    conns: FxHashMap<SubscriberId, Arc<SeqPacketConn>>,
}

impl Subscribers {
    pub fn add(&mut self, id: SubscriberId, conn: Arc<SeqPacketConn>) {
        info!("local client #{} connected", id);
        self.conns.insert(id, conn);
    }

    pub fn remove(&mut self, id: SubscriberId) {
        if self.conns.remove(&id).is_some() {
            info!("local client #{} disconnected", id);
        }
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Sends a record to every client without waiting. A client that is not ready to receive misses
    ///  the record.
    pub fn broadcast(&self, buf: &[u8]) {
        for (id, conn) in &self.conns {
            match conn.try_send(buf) {
                Ok(n) if n != buf.len() => warn!("partial write of {} out of {} bytes to local client #{}", n, buf.len(), id),
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => warn!("local client #{} is not keeping up - skipping record", id),
                // the client's reader task reports the disconnect
                Err(e) => debug!("error sending to local client #{}: {}", id, e),
            }
        }
    }
}
