use std::net::{IpAddr, SocketAddr};

use tracing::{debug, trace};

use crate::dv::header::{cs_str, Callsign};
use crate::store::kv_store::KeyValueStore;

pub const CS_RPTR: &str = "cs_rptr";
pub const ZONE_IP4: &str = "zone_ip4";
pub const ZONE_IP6: &str = "zone_ip6";
pub const ZONE_NICK: &str = "zone_nick";

pub fn table_key(table: &str, key: &str) -> String {
    format!("{}/{}", table, key)
}

/// gateway names are compared as their first seven upper case characters, padded with spaces
pub fn name_to_zone(name: &str) -> String {
    let mut zone = name.to_ascii_uppercase();
    zone.truncate(7);
    while zone.len() < 7 {
        zone.push(' ');
    }
    zone
}

/// A change reported by a presence server. `server` identifies which of several presence servers
///  reported it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PresenceUpdate {
    Gateway {
        server: usize,
        name: String,
        nick: String,
        host: String,
        v6: bool,
    },
    GatewayGone {
        server: usize,
        name: String,
    },
    User {
        callsign: Callsign,
        repeater: Callsign,
    },
}

impl PresenceUpdate {
    pub fn apply(&self, store: &dyn KeyValueStore, now_secs: u64) {
        trace!("applying presence update {:?}", self);

        let mut txn = store.begin();
        match self {
            PresenceUpdate::Gateway { server, name, nick, host, v6 } => {
                let zone = name_to_zone(name);
                txn.put(&table_key(ZONE_NICK, &format!("{} {}", server, zone)), nick);
                let table = if *v6 { ZONE_IP6 } else { ZONE_IP4 };
                txn.put(&table_key(table, &zone), &format!("{} {} {}", server, now_secs, host));
            }
            PresenceUpdate::GatewayGone { server, name } => {
                // the address entry may have been reported by a different server, so it stays
                txn.delete(&table_key(ZONE_NICK, &format!("{} {}", server, name_to_zone(name))));
            }
            PresenceUpdate::User { callsign, repeater } => {
                txn.put(&table_key(CS_RPTR, &cs_str(callsign)), &cs_str(repeater));
            }
        }
        txn.commit();
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct GatewayRoute {
    pub repeater: Callsign,
    pub addr: SocketAddr,
}

/// Resolves a destination callsign to the gateway its user was last heard on: the user's repeater
///  names the gateway's zone, the zone maps to the address the gateway was last seen with.
pub fn lookup_route(store: &dyn KeyValueStore, urcall: &Callsign, g2_port_v4: u16, g2_port_v6: u16) -> Option<GatewayRoute> {
    let repeater = store.get(&table_key(CS_RPTR, &cs_str(urcall)))?;
    let repeater_bytes = repeater.as_bytes();
    if repeater_bytes.len() != 8 {
        debug!("repeater entry {:?} for {} is not a callsign", repeater, cs_str(urcall));
        return None;
    }
    let mut repeater_cs = [b' '; 8];
    repeater_cs.copy_from_slice(repeater_bytes);

    let zone = name_to_zone(&cs_str(&repeater_cs[..7]));

    let candidates = [(ZONE_IP4, g2_port_v4), (ZONE_IP6, g2_port_v6)];
    for (table, port) in candidates {
        let Some(entry) = store.get(&table_key(table, &zone))
        else {
            continue;
        };
        match parse_zone_entry(&entry) {
            Some(ip) => {
                return Some(GatewayRoute {
                    repeater: repeater_cs,
                    addr: SocketAddr::new(ip, port),
                });
            }
            None => debug!("unusable {} entry for {:?}: {:?}", table, zone, entry),
        }
    }
    None
}

/// "<server> <timestamp> <host>"
fn parse_zone_entry(entry: &str) -> Option<IpAddr> {
    let mut parts = entry.split(' ');
    let _server = parts.next()?;
    let _timestamp = parts.next()?;
    parts.next()?.parse().ok()
}
